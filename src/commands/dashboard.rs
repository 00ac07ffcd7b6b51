use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::ApiState;
use crate::db::InvoiceFilter;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{DashboardStats, Identity, IngestionStatus, Invoice, InvoiceSummary, ReviewStatus, StatusCount};
use crate::services::overrides::effective_invoices;
use crate::services::quota;
use crate::utils::round2;

const RECENT_COUNT: usize = 5;
const CHART_MONTHS: u32 = 12;

#[derive(Deserialize)]
pub struct DashboardQuery {
    pub year_month: Option<String>,
}

/// `GET /api/dashboard?year_month=YYYY-MM`. Totals count every invoice that
/// is neither failed nor rejected, bucketed by invoice date.
pub async fn stats(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<DashboardQuery>,
) -> IntakeResult<Json<DashboardStats>> {
    let now = Utc::now();
    let year_month = query
        .year_month
        .unwrap_or_else(|| format!("{}-{:02}", now.year(), now.month()));
    let base = NaiveDate::parse_from_str(&format!("{year_month}-01"), "%Y-%m-%d")
        .map_err(|_| IntakeError::Validation(format!("year_month must be YYYY-MM, got {year_month}")))?;

    let owner = identity.owner();
    let owner_key = owner.key();
    let db = state.db()?;
    let invoices = effective_invoices(&db, &owner_key, db.list_invoices(&owner_key, &InvoiceFilter::default())?)?;
    let counted: Vec<&Invoice> = invoices.iter().filter(|i| counts_towards_totals(i)).collect();

    let mut by_month: HashMap<&str, (f64, u64)> = HashMap::new();
    for invoice in &counted {
        if let Some(month) = invoice.invoice_date.as_deref().and_then(|d| d.get(0..7)) {
            let entry = by_month.entry(month).or_insert((0.0, 0));
            entry.0 += invoice.gross_amount.unwrap_or(0.0);
            entry.1 += 1;
        }
    }

    let year = &year_month[0..4];
    let gross_year: f64 = by_month
        .iter()
        .filter(|(month, _)| month.starts_with(year))
        .map(|(_, (gross, _))| gross)
        .sum();
    let gross_month = by_month.get(year_month.as_str()).map(|(gross, _)| *gross).unwrap_or(0.0);

    let mut chart_months = Vec::new();
    let mut chart_gross = Vec::new();
    let mut chart_count = Vec::new();
    for offset in (0..CHART_MONTHS).rev() {
        let date = base
            .checked_sub_months(Months::new(offset))
            .ok_or_else(|| IntakeError::Validation(format!("year_month out of range: {year_month}")))?;
        let ym = format!("{}-{:02}", date.year(), date.month());
        let (gross, count) = by_month.get(ym.as_str()).copied().unwrap_or((0.0, 0));
        chart_months.push(ym);
        chart_gross.push(round2(gross));
        chart_count.push(count);
    }

    let mut recent: Vec<&Invoice> = invoices.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(DashboardStats {
        gross_month: round2(gross_month),
        gross_year: round2(gross_year),
        invoices_month: quota::used_this_month(&db, &owner, now)?,
        quota_limit: quota::monthly_limit(&db, &state.config.quota, &owner)?,
        status_counts: db
            .count_by_ingestion_status(&owner_key)?
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        open_duplicates: db.count_pending_duplicates(&owner_key)?,
        recent: recent
            .into_iter()
            .take(RECENT_COUNT)
            .map(InvoiceSummary::from)
            .collect(),
        year_month,
        chart_months,
        chart_gross,
        chart_count,
    }))
}

fn counts_towards_totals(invoice: &Invoice) -> bool {
    invoice.ingestion_status != IngestionStatus::Failed && invoice.review_status != ReviewStatus::Rejected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::TestApp;
    use crate::models::{Owner, Role};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn totals_and_chart_follow_invoice_dates() {
        let app = TestApp::new(Role::Viewer);
        let owner = Owner {
            user_id: app.user_id(),
            org_id: None,
        };
        {
            let db = app.state.db().unwrap();
            let march = crate::db::tests::sample_invoice(&owner, "RE-1");
            db.upsert_invoice(&march).unwrap();

            let mut january = crate::db::tests::sample_invoice(&owner, "RE-2");
            january.invoice_date = Some("2024-01-10".into());
            january.gross_amount = Some(50.5);
            db.upsert_invoice(&january).unwrap();

            let mut rejected = crate::db::tests::sample_invoice(&owner, "RE-3");
            rejected.review_status = ReviewStatus::Rejected;
            db.upsert_invoice(&rejected).unwrap();

            let mut failed = crate::db::tests::sample_invoice(&owner, "RE-4");
            failed.ingestion_status = IngestionStatus::Failed;
            db.upsert_invoice(&failed).unwrap();
        }

        let (status, body) = app.call("GET", "/api/dashboard?year_month=2024-03", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gross_month"], 119.0);
        assert_eq!(body["gross_year"], 169.5);
        assert_eq!(body["chart_months"].as_array().unwrap().len(), 12);
        assert_eq!(body["chart_months"][0], "2023-04");
        assert_eq!(body["chart_months"][11], "2024-03");
        assert_eq!(body["chart_count"][9], 1);
        assert_eq!(body["chart_gross"][9], 50.5);
        assert_eq!(body["recent"].as_array().unwrap().len(), 4);
        assert_eq!(body["open_duplicates"], 0);
    }

    #[tokio::test]
    async fn malformed_month_is_rejected() {
        let app = TestApp::new(Role::Viewer);
        let (status, _) = app.call("GET", "/api/dashboard?year_month=March", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
