use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::InvoiceFilter;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Owner, ReportFrequency, ScheduledReport};
use crate::services::export::{self, ExportFormat};
use crate::services::notifier::{Attachment, DeliveryReport, Email};
use crate::services::overrides::effective_invoices;
use crate::services::state::AppState;
use crate::utils::now_rfc3339;

const RUN_HOUR: u32 = 7;
const CHECK_INTERVAL_SECS: u64 = 60;

/// First run time strictly after `from` for the frequency: every day, every
/// Monday, or the first of every month.
pub fn next_run(frequency: ReportFrequency, from: DateTime<Utc>) -> DateTime<Utc> {
    let today = from.date_naive();
    let before_run_hour = from.time() < at_run_hour(today).time();
    let date = match frequency {
        ReportFrequency::Daily if before_run_hour => today,
        ReportFrequency::Daily => today + Duration::days(1),
        ReportFrequency::Weekly => {
            let days_until_monday = (7 - today.weekday().num_days_from_monday()) % 7;
            match days_until_monday {
                0 if before_run_hour => today,
                0 => today + Duration::days(7),
                days => today + Duration::days(days as i64),
            }
        }
        ReportFrequency::Monthly if today.day() == 1 && before_run_hour => today,
        ReportFrequency::Monthly => first_of_next_month(today),
    };
    at_run_hour(date)
}

/// Inclusive invoice-date range a run at `run_at` reports on.
pub fn report_period(frequency: ReportFrequency, run_at: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let today = run_at.date_naive();
    let yesterday = today - Duration::days(1);
    match frequency {
        ReportFrequency::Daily => (yesterday, yesterday),
        ReportFrequency::Weekly => (today - Duration::days(7), yesterday),
        ReportFrequency::Monthly => {
            let first_this_month = today.with_day(1).unwrap_or(today);
            let last_prev = first_this_month - Duration::days(1);
            (last_prev.with_day(1).unwrap_or(last_prev), last_prev)
        }
    }
}

fn at_run_hour(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(RUN_HOUR, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Builds a new active report after checking format and recipients.
pub fn new_report(
    owner: &Owner,
    name: &str,
    frequency: ReportFrequency,
    format: &str,
    recipients: Vec<String>,
) -> IntakeResult<ScheduledReport> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IntakeError::Validation("Report name is empty".to_string()));
    }
    let format = ExportFormat::parse(format)
        .ok_or_else(|| IntakeError::Validation(format!("Unknown export format: {format}")))?;
    let recipients: Vec<String> = recipients
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(IntakeError::Validation("At least one recipient is required".to_string()));
    }
    if let Some(bad) = recipients.iter().find(|r| !r.contains('@')) {
        return Err(IntakeError::Validation(format!("Not an email address: {bad}")));
    }

    let now = Utc::now();
    Ok(ScheduledReport {
        id: uuid::Uuid::new_v4().to_string(),
        owner_key: owner.key(),
        user_id: owner.user_id.clone(),
        org_id: owner.org_id.clone(),
        name: name.to_string(),
        frequency,
        format: format.as_str().to_string(),
        recipients,
        active: true,
        last_run_at: None,
        next_run_at: next_run(frequency, now).to_rfc3339(),
        created_at: now.to_rfc3339(),
    })
}

/// Exports the report period, mails it and schedules the next run.
pub async fn run_report(
    state: &AppState,
    report: &ScheduledReport,
    now: DateTime<Utc>,
) -> IntakeResult<DeliveryReport> {
    let format = ExportFormat::parse(&report.format).unwrap_or(ExportFormat::Xlsx);
    let (from, to) = report_period(report.frequency, now);
    let invoices = {
        let db = state.db()?;
        let filter = InvoiceFilter {
            date_from: Some(from.to_string()),
            date_to: Some(to.to_string()),
            ..InvoiceFilter::default()
        };
        effective_invoices(&db, &report.owner_key, db.list_invoices(&report.owner_key, &filter)?)?
    };
    let file = export::export(format, &invoices, &state.config.datev)?;

    let subject = format!("{}: {} bis {}", report.name, from, to);
    let body = format!(
        "Bericht \"{}\" für den Zeitraum {} bis {}.\n\nRechnungen: {}\n",
        report.name,
        from,
        to,
        invoices.len()
    );
    let delivery = state
        .notifier()
        .send(
            state.shared_db(),
            Email {
                to: report.recipients.clone(),
                subject,
                body,
                attachment: Some(Attachment {
                    filename: file.file_name,
                    content_type: file.content_type,
                    bytes: file.bytes,
                }),
                job_id: None,
                report_id: Some(report.id.clone()),
            },
        )
        .await?;

    state
        .db()?
        .mark_report_run(&report.id, &now_rfc3339(), &next_run(report.frequency, now).to_rfc3339())?;
    tracing::info!(
        report_id = %report.id,
        invoices = invoices.len(),
        sent = delivery.sent,
        failed = delivery.failed,
        "Scheduled report delivered"
    );
    Ok(delivery)
}

/// Runs every report due at `now`. Returns how many ran.
pub async fn run_due_reports(state: &AppState, now: DateTime<Utc>) -> IntakeResult<usize> {
    let due = state.db()?.due_scheduled_reports(&now.to_rfc3339())?;
    let mut ran = 0;
    for report in due {
        match run_report(state, &report, now).await {
            Ok(_) => ran += 1,
            Err(err) => {
                tracing::error!(report_id = %report.id, error = %err, "Scheduled report failed")
            }
        }
    }
    Ok(ran)
}

pub fn spawn_scheduler(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(CHECK_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = run_due_reports(&state, Utc::now()).await {
                tracing::error!(error = %err, "Report scheduler pass failed");
            }
        }
    })
}
