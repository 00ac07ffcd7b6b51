use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use super::auth::require_role;
use super::ApiState;
use crate::db::{Database, InvoiceFilter};
use crate::error::{IntakeError, IntakeResult};
use crate::models::{
    DuplicateDetection, Identity, IngestionStatus, Invoice, InvoiceDetail, InvoiceSummary, ReviewStatus, Role,
};
use crate::services::overrides::{apply_overrides, effective_invoices, normalize_override};
use crate::services::processor::{self, process_invoice};

const DEFAULT_LIST_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub review: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct FieldEdit {
    pub field: String,
    pub value: String,
}

#[derive(Deserialize)]
pub struct DuplicateReview {
    pub status: String,
}

pub async fn list(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListQuery>,
) -> IntakeResult<Json<Vec<InvoiceSummary>>> {
    let ingestion_status = match query.status.as_deref() {
        Some(raw) => Some(
            IngestionStatus::parse(raw)
                .ok_or_else(|| IntakeError::Validation(format!("Unknown status: {raw}")))?,
        ),
        None => None,
    };
    let review_status = match query.review.as_deref() {
        Some(raw) => Some(
            ReviewStatus::parse(raw)
                .ok_or_else(|| IntakeError::Validation(format!("Unknown review status: {raw}")))?,
        ),
        None => None,
    };
    let filter = InvoiceFilter {
        ingestion_status,
        review_status,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
        ..InvoiceFilter::default()
    };

    let owner_key = identity.owner().key();
    let db = state.db()?;
    let invoices = effective_invoices(&db, &owner_key, db.list_invoices(&owner_key, &filter)?)?;
    Ok(Json(invoices.iter().map(InvoiceSummary::from).collect()))
}

pub async fn detail(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<Json<InvoiceDetail>> {
    let db = state.db()?;
    let invoice = owned_invoice(&db, &identity, &id)?;
    Ok(Json(load_detail(&db, invoice)?))
}

/// `PATCH /api/invoices/:id` with `{"field", "value"}`. The edit is stored as
/// an override and the invoice is validated again.
pub async fn update_field(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(edit): Json<FieldEdit>,
) -> IntakeResult<Json<InvoiceDetail>> {
    require_role(&identity, Role::Member)?;
    let value = normalize_override(&edit.field, &edit.value)?;

    let db = state.db()?;
    let mut invoice = owned_invoice(&db, &identity, &id)?;
    db.set_override(&invoice.id, &edit.field, &value)?;
    tracing::info!(invoice_id = %invoice.id, field = %edit.field, user_id = %identity.user_id, "Field overridden");
    refresh(&db, &state, &mut invoice)?;
    Ok(Json(load_detail(&db, invoice)?))
}

pub async fn clear_overrides(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<Json<InvoiceDetail>> {
    require_role(&identity, Role::Member)?;
    let db = state.db()?;
    let mut invoice = owned_invoice(&db, &identity, &id)?;
    let removed = db.clear_all_overrides(&invoice.id)?;
    tracing::info!(invoice_id = %invoice.id, removed, "Overrides cleared");
    refresh(&db, &state, &mut invoice)?;
    Ok(Json(load_detail(&db, invoice)?))
}

pub async fn clear_override(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path((id, field)): Path<(String, String)>,
) -> IntakeResult<Json<InvoiceDetail>> {
    require_role(&identity, Role::Member)?;
    let db = state.db()?;
    let mut invoice = owned_invoice(&db, &identity, &id)?;
    if db.clear_override(&invoice.id, &field)? == 0 {
        return Err(IntakeError::NotFound(format!("override {field} on invoice {id}")));
    }
    refresh(&db, &state, &mut invoice)?;
    Ok(Json(load_detail(&db, invoice)?))
}

pub async fn approve(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<Json<InvoiceSummary>> {
    set_review(&state, &identity, &id, ReviewStatus::Approved)
}

pub async fn reject(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<Json<InvoiceSummary>> {
    set_review(&state, &identity, &id, ReviewStatus::Rejected)
}

fn set_review(
    state: &ApiState,
    identity: &Identity,
    id: &str,
    status: ReviewStatus,
) -> IntakeResult<Json<InvoiceSummary>> {
    require_role(identity, Role::Admin)?;
    let db = state.db()?;
    let mut invoice = owned_invoice(&db, identity, id)?;
    db.set_review_status(&invoice.id, status)?;
    invoice.review_status = status;
    let overrides = db.get_overrides(&invoice.id)?;
    apply_overrides(&mut invoice, &overrides);
    tracing::info!(invoice_id = %invoice.id, status = status.as_str(), user_id = %identity.user_id, "Review status set");
    Ok(Json(InvoiceSummary::from(&invoice)))
}

/// Runs extraction again on the stored document. Overrides survive.
pub async fn reprocess(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<Json<InvoiceDetail>> {
    require_role(&identity, Role::Member)?;
    let mut invoice = {
        let db = state.db()?;
        let invoice = owned_invoice(&db, &identity, &id)?;
        db.clear_pending_duplicates(&invoice.id)?;
        invoice
    };
    process_invoice(&state, &mut invoice).await?;

    let db = state.db()?;
    Ok(Json(load_detail(&db, invoice)?))
}

/// `POST /api/duplicates/:id/review` with `{"status": "confirmed" | "false_positive"}`.
pub async fn review_duplicate(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(review): Json<DuplicateReview>,
) -> IntakeResult<Json<DuplicateDetection>> {
    require_role(&identity, Role::Member)?;
    if !matches!(review.status.as_str(), "confirmed" | "false_positive") {
        return Err(IntakeError::Validation(format!(
            "Review status must be confirmed or false_positive, got {}",
            review.status
        )));
    }

    let db = state.db()?;
    let detection = db
        .get_duplicate_detection(&id)?
        .ok_or_else(|| IntakeError::NotFound(format!("duplicate detection {id}")))?;
    owned_invoice(&db, &identity, &detection.invoice_id)
        .map_err(|_| IntakeError::NotFound(format!("duplicate detection {id}")))?;
    db.review_duplicate(&id, &review.status, &identity.user_id)?;
    db.get_duplicate_detection(&id)?
        .map(Json)
        .ok_or_else(|| IntakeError::NotFound(format!("duplicate detection {id}")))
}

/// Invoices of other owners are reported as missing.
fn owned_invoice(db: &Database, identity: &Identity, id: &str) -> IntakeResult<Invoice> {
    db.get_invoice_by_id(id)?
        .filter(|invoice| invoice.owner_key == identity.owner().key())
        .ok_or_else(|| IntakeError::NotFound(format!("invoice {id}")))
}

/// Re-validates after an override change. Failed invoices have nothing to
/// validate and stay failed.
fn refresh(db: &Database, state: &ApiState, invoice: &mut Invoice) -> IntakeResult<()> {
    if invoice.ingestion_status == IngestionStatus::Failed {
        return Ok(());
    }
    db.clear_pending_duplicates(&invoice.id)?;
    processor::finalize(db, state.validator(), invoice, processor::today())
}

fn load_detail(db: &Database, mut invoice: Invoice) -> IntakeResult<InvoiceDetail> {
    let overrides = db.get_overrides(&invoice.id)?;
    apply_overrides(&mut invoice, &overrides);
    Ok(InvoiceDetail {
        duplicates: db.get_duplicates_for_invoice(&invoice.id)?,
        plausibility: db.get_plausibility_checks(&invoice.id)?,
        overrides,
        invoice,
    })
}
