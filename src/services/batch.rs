use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{IntakeError, IntakeResult};
use crate::models::{IngestionStatus, Job, JobFile, Owner};
use crate::services::export::{self, ExportFormat};
use crate::services::notifier::{job_summary, Attachment, Email};
use crate::services::overrides::effective_invoices;
use crate::services::processor::{process_invoice, register_document};
use crate::services::state::AppState;

/// Processes every pending file of the job, then finalizes the job status and
/// sends the batch summary. Returns the finished job.
pub async fn run_job(state: Arc<AppState>, job_id: String) -> IntakeResult<Job> {
    let (job, files) = {
        let db = state.db()?;
        let job = db
            .get_job(&job_id)?
            .ok_or_else(|| IntakeError::NotFound(format!("job {job_id}")))?;
        let files = db.get_job_files(&job_id)?;
        (job, files)
    };

    let workers = state.config.processing.worker_count();
    tracing::info!(job_id = %job.id, files = files.len(), workers, "Batch started");

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    for file in files.into_iter().filter(|f| f.status == "pending") {
        let state = Arc::clone(&state);
        let semaphore = Arc::clone(&semaphore);
        let job = job.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| IntakeError::Internal("worker pool closed".to_string()))?;
            process_file(&state, &job, &file).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(job_id = %job.id, error = %err, "Recording file outcome failed")
            }
            Err(err) => tracing::error!(job_id = %job.id, error = %err, "Worker task panicked"),
        }
    }

    let finished = state
        .db()?
        .finish_job(&job.id)?
        .ok_or_else(|| IntakeError::NotFound(format!("job {}", job.id)))?;
    tracing::info!(
        job_id = %finished.id,
        status = finished.status.as_str(),
        succeeded = finished.succeeded_files,
        failed = finished.failed_files,
        "Batch finished"
    );

    if let Err(err) = notify_finished(&state, &finished).await {
        tracing::warn!(job_id = %finished.id, error = %err, "Batch notification failed");
    }
    Ok(finished)
}

/// One unit of work. Pipeline failures are recorded on the job file and
/// count as a failed document; only storage errors propagate.
async fn process_file(state: &AppState, job: &Job, file: &JobFile) -> IntakeResult<()> {
    let owner = Owner {
        user_id: job.user_id.clone(),
        org_id: job.org_id.clone(),
    };
    let path = PathBuf::from(&file.stored_path);

    let registered = {
        let db = state.db()?;
        register_document(&db, &owner, Some(&job.id), &file.file_name, &path).and_then(|invoice| {
            db.link_job_file(&file.id, &invoice.id)?;
            Ok(invoice)
        })
    };

    let outcome = match registered {
        Ok(mut invoice) => process_invoice(state, &mut invoice)
            .await
            .map(|()| invoice.ingestion_status),
        Err(err) => Err(err),
    };

    let db = state.db()?;
    match outcome {
        Ok(status) => {
            // blocked invoices were read successfully; the block shows on the file
            db.complete_job_file(&file.id, status.as_str())?;
            db.record_job_outcome(&job.id, true)?;
        }
        Err(err) => {
            tracing::warn!(
                job_id = %job.id,
                file = %file.file_name,
                kind = %err.kind(),
                error = %err,
                "Document failed"
            );
            db.fail_job_file(&file.id, err.kind().as_str(), &err.to_string(), err.remediation())?;
            db.record_job_outcome(&job.id, false)?;
        }
    }
    Ok(())
}

async fn notify_finished(state: &AppState, job: &Job) -> IntakeResult<()> {
    let recipients = state.notifier().default_recipients().to_vec();
    if recipients.is_empty() {
        return Ok(());
    }

    let invoices = {
        let db = state.db()?;
        effective_invoices(&db, &job.owner_key, db.get_invoices_by_job(&job.id)?)?
    };
    let blocked = invoices
        .iter()
        .filter(|i| i.ingestion_status == IngestionStatus::Blocked)
        .count();
    let duplicates = invoices.iter().filter(|i| i.duplicate_of.is_some()).count();
    let exported: Vec<_> = invoices
        .into_iter()
        .filter(|i| i.ingestion_status != IngestionStatus::Failed)
        .collect();
    let file = export::export(ExportFormat::Xlsx, &exported, &state.config.datev)?;

    let (subject, body) = job_summary(job, blocked, duplicates);
    state
        .notifier()
        .send(
            state.shared_db(),
            Email {
                to: recipients,
                subject,
                body,
                attachment: Some(Attachment {
                    filename: file.file_name,
                    content_type: file.content_type,
                    bytes: file.bytes,
                }),
                job_id: Some(job.id.clone()),
                report_id: None,
            },
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::config::{AppConfig, NotificationConfig, MAX_WORKERS, MIN_WORKERS};
    use crate::services::state::tests::test_state;

    fn write_file(dir: &std::path::Path, name: &str, bytes: &[u8]) -> String {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn failed_documents_carry_kind_and_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            notifications: NotificationConfig {
                to_addresses: vec!["ops@example.com".into()],
                ..NotificationConfig::default()
            },
            ..AppConfig::default()
        };
        let state = Arc::new(test_state(config, None));
        let job = {
            let db = state.db().unwrap();
            let job = db.create_job(&crate::db::tests::owner("u1"), 2).unwrap();
            let text = write_file(dir.path(), "notes.txt", b"just some text, not an invoice");
            db.add_job_file(&job.id, "notes.txt", &text, 30).unwrap();
            let missing = dir.path().join("gone.pdf").to_string_lossy().to_string();
            db.add_job_file(&job.id, "gone.pdf", &missing, 10).unwrap();
            job
        };

        let finished = run_job(Arc::clone(&state), job.id.clone()).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.processed_files, 2);
        assert_eq!(finished.failed_files, 2);

        let db = state.db().unwrap();
        let files = db.get_job_files(&job.id).unwrap();
        assert!(files.iter().all(|f| f.status == "failed"));
        assert!(files
            .iter()
            .all(|f| f.error_kind.as_deref() == Some("invalid_format")));
        assert!(files.iter().all(|f| f.remediation.is_some()));

        // notifications are disabled by default, so the attempt is logged as skipped
        let log = db.recent_notifications(5).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "skipped");
        assert_eq!(log[0].job_id.as_deref(), Some(job.id.as_str()));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let state = Arc::new(test_state(AppConfig::default(), None));
        let err = run_job(state, "missing".into()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn pool_size_stays_within_bounds() {
        for requested in [0, 1, 2, 5, 8, 9, 100] {
            let mut config = AppConfig::default();
            config.processing.workers = requested;
            let workers = config.processing.worker_count();
            assert!((MIN_WORKERS..=MAX_WORKERS).contains(&workers));
        }
    }
}
