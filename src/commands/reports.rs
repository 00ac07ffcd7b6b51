use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use super::auth::require_role;
use super::ApiState;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Identity, ReportFrequency, Role, ScheduledReport};
use crate::services::reports::new_report;

#[derive(Deserialize)]
pub struct NewReport {
    pub name: String,
    pub frequency: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub recipients: Vec<String>,
}

fn default_format() -> String {
    "xlsx".to_string()
}

pub async fn list(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> IntakeResult<Json<Vec<ScheduledReport>>> {
    require_role(&identity, Role::Member)?;
    let reports = state.db()?.list_scheduled_reports(&identity.owner().key())?;
    Ok(Json(reports))
}

pub async fn create(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<NewReport>,
) -> IntakeResult<(StatusCode, Json<ScheduledReport>)> {
    require_role(&identity, Role::Member)?;
    let frequency = ReportFrequency::parse(&payload.frequency).ok_or_else(|| {
        IntakeError::Validation(format!(
            "Frequency must be daily, weekly or monthly, got {}",
            payload.frequency
        ))
    })?;
    let report = new_report(
        &identity.owner(),
        &payload.name,
        frequency,
        &payload.format,
        payload.recipients,
    )?;
    state.db()?.insert_scheduled_report(&report)?;
    tracing::info!(report_id = %report.id, frequency = frequency.as_str(), next_run = %report.next_run_at, "Scheduled report created");
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn remove(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> IntakeResult<StatusCode> {
    require_role(&identity, Role::Member)?;
    let db = state.db()?;
    let owned = db
        .get_scheduled_report(&id)?
        .is_some_and(|report| report.owner_key == identity.owner().key());
    if !owned {
        return Err(IntakeError::NotFound(format!("report {id}")));
    }
    db.delete_scheduled_report(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
