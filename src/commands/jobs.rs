use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::require_role;
use super::{file_response, ApiState};
use crate::db::{Database, InvoiceFilter};
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Identity, IngestionStatus, Invoice, InvoiceSummary, Job, Role};
use crate::services::batch::run_job;
use crate::services::export::{self, ExportFormat};
use crate::services::intake::{create_job, IncomingFile};
use crate::services::overrides::effective_invoices;

#[derive(Serialize)]
pub struct UploadedFile {
    pub id: String,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub status: &'static str,
    pub total_files: u32,
    pub files: Vec<UploadedFile>,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: Job,
    pub progress: f64,
}

#[derive(Serialize)]
pub struct FileFailure {
    pub file_name: String,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub remediation: Option<String>,
}

#[derive(Serialize, Default)]
pub struct ResultStats {
    pub total: usize,
    pub processed: usize,
    pub blocked: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub gross_total: f64,
}

#[derive(Serialize)]
pub struct ResultsResponse {
    pub job: Job,
    pub stats: ResultStats,
    pub invoices: Vec<InvoiceSummary>,
    pub failures: Vec<FileFailure>,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
}

/// `POST /api/upload`: multipart form, every part with a file name is a
/// document.
pub async fn upload(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> IntakeResult<(StatusCode, Json<UploadResponse>)> {
    require_role(&identity, Role::Member)?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&state, e))? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| multipart_error(&state, e))?;
        files.push(IncomingFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    let owner = identity.owner();
    let worker_state = Arc::clone(&state);
    let job = tokio::task::spawn_blocking(move || create_job(&worker_state, &owner, files))
        .await
        .map_err(|e| IntakeError::Internal(format!("upload task: {e}")))??;

    let stored = state.db()?.get_job_files(&job.id)?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id: job.id,
            status: job.status.as_str(),
            total_files: job.total_files,
            files: stored
                .into_iter()
                .map(|f| UploadedFile {
                    id: f.id,
                    file_name: f.file_name,
                    size_bytes: f.size_bytes,
                })
                .collect(),
        }),
    ))
}

fn multipart_error(state: &ApiState, err: axum::extract::multipart::MultipartError) -> IntakeError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limits = &state.config.limits;
        IntakeError::FileTooLarge {
            filename: "upload".to_string(),
            size: limits.max_request_bytes() as u64,
            max: limits.max_file_bytes,
        }
    } else {
        IntakeError::Validation(format!("Malformed upload: {}", err.body_text()))
    }
}

/// `POST /api/process/:job_id`: starts the batch in the background.
pub async fn process(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(job_id): Path<String>,
) -> IntakeResult<(StatusCode, Json<JobStatusResponse>)> {
    require_role(&identity, Role::Member)?;
    let job = {
        let db = state.db()?;
        owned_job(&db, &identity, &job_id)?;
        if !db.start_job(&job_id)? {
            return Err(IntakeError::Validation(format!("Job {job_id} was already started")));
        }
        owned_job(&db, &identity, &job_id)?
    };

    let worker_state = Arc::clone(&state);
    let background_id = job_id.clone();
    tokio::spawn(async move {
        if let Err(err) = run_job(worker_state, background_id.clone()).await {
            tracing::error!(job_id = %background_id, error = %err, "Batch aborted");
        }
    });

    let progress = job.progress();
    Ok((StatusCode::ACCEPTED, Json(JobStatusResponse { job, progress })))
}

pub async fn status(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(job_id): Path<String>,
) -> IntakeResult<Json<JobStatusResponse>> {
    let job = {
        let db = state.db()?;
        owned_job(&db, &identity, &job_id)?
    };
    let progress = job.progress();
    Ok(Json(JobStatusResponse { job, progress }))
}

pub async fn results(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(job_id): Path<String>,
) -> IntakeResult<Json<ResultsResponse>> {
    let db = state.db()?;
    let job = owned_job(&db, &identity, &job_id)?;
    let invoices = effective_invoices(&db, &job.owner_key, db.get_invoices_by_job(&job.id)?)?;
    let failures = db
        .get_job_files(&job.id)?
        .into_iter()
        .filter(|f| f.status == "failed")
        .map(|f| FileFailure {
            file_name: f.file_name,
            error_kind: f.error_kind,
            error_message: f.error_message,
            remediation: f.remediation,
        })
        .collect();

    Ok(Json(ResultsResponse {
        stats: stats(&invoices),
        invoices: invoices.iter().map(InvoiceSummary::from).collect(),
        job,
        failures,
    }))
}

fn stats(invoices: &[Invoice]) -> ResultStats {
    let mut stats = ResultStats {
        total: invoices.len(),
        ..ResultStats::default()
    };
    for invoice in invoices {
        match invoice.ingestion_status {
            IngestionStatus::Processed => stats.processed += 1,
            IngestionStatus::Blocked => stats.blocked += 1,
            IngestionStatus::Failed => stats.failed += 1,
            IngestionStatus::Queued | IngestionStatus::Processing => {}
        }
        if invoice.duplicate_of.is_some() {
            stats.duplicates += 1;
        }
        if invoice.ingestion_status != IngestionStatus::Failed {
            stats.gross_total += invoice.gross_amount.unwrap_or(0.0);
        }
    }
    stats.gross_total = crate::utils::round2(stats.gross_total);
    stats
}

/// `GET /api/download/:job_id/:format`
pub async fn download(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path((job_id, format)): Path<(String, String)>,
) -> IntakeResult<Response> {
    let format = parse_format(&format)?;
    let invoices = {
        let db = state.db()?;
        let job = owned_job(&db, &identity, &job_id)?;
        effective_invoices(&db, &job.owner_key, db.get_invoices_by_job(&job.id)?)?
    };
    let exported: Vec<Invoice> = invoices
        .into_iter()
        .filter(|i| i.ingestion_status != IngestionStatus::Failed)
        .collect();
    let file = export::export(format, &exported, &state.config.datev)?;
    Ok(file_response(file))
}

/// `GET /api/export?format&from&to&status`: every invoice of the caller's
/// owner in the invoice-date range. Failed documents are never exported.
pub async fn export(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ExportQuery>,
) -> IntakeResult<Response> {
    let format = parse_format(query.format.as_deref().unwrap_or("xlsx"))?;
    let ingestion_status = match query.status.as_deref() {
        Some(raw) => Some(
            IngestionStatus::parse(raw)
                .ok_or_else(|| IntakeError::Validation(format!("Unknown status: {raw}")))?,
        ),
        None => None,
    };
    let filter = InvoiceFilter {
        ingestion_status,
        date_from: query.from,
        date_to: query.to,
        ..InvoiceFilter::default()
    };
    let owner_key = identity.owner().key();
    let invoices = {
        let db = state.db()?;
        effective_invoices(&db, &owner_key, db.list_invoices(&owner_key, &filter)?)?
    };
    let exported: Vec<Invoice> = invoices
        .into_iter()
        .filter(|i| i.ingestion_status != IngestionStatus::Failed)
        .collect();
    let file = export::export(format, &exported, &state.config.datev)?;
    Ok(file_response(file))
}

fn parse_format(raw: &str) -> IntakeResult<ExportFormat> {
    ExportFormat::parse(raw)
        .ok_or_else(|| IntakeError::Validation(format!("Unknown export format: {raw}")))
}

/// Jobs of other owners are reported as missing.
fn owned_job(db: &Database, identity: &Identity, job_id: &str) -> IntakeResult<Job> {
    db.get_job(job_id)?
        .filter(|job| job.owner_key == identity.owner().key())
        .ok_or_else(|| IntakeError::NotFound(format!("job {job_id}")))
}
