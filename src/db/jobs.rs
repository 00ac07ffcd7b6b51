use rusqlite::{params, OptionalExtension, Result as SqlResult, Row};

use super::{parse_text, Database};
use crate::models::{Job, JobFile, JobStatus, Owner};
use crate::utils::now_rfc3339;

const JOB_COLUMNS: &str = "id, owner_key, user_id, org_id, status, total_files, processed_files,
    succeeded_files, failed_files, created_at, started_at, finished_at";

const JOB_FILE_COLUMNS: &str = "id, job_id, invoice_id, file_name, stored_path, size_bytes, status,
    error_kind, error_message, remediation, finished_at";

impl Database {
    pub fn create_job(&self, owner: &Owner, total_files: u32) -> SqlResult<Job> {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            owner_key: owner.key(),
            user_id: owner.user_id.clone(),
            org_id: owner.org_id.clone(),
            status: JobStatus::Uploaded,
            total_files,
            processed_files: 0,
            succeeded_files: 0,
            failed_files: 0,
            created_at: now_rfc3339(),
            started_at: None,
            finished_at: None,
        };
        self.conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, 0, ?7, NULL, NULL)"
            ),
            params![
                job.id,
                job.owner_key,
                job.user_id,
                job.org_id,
                job.status.as_str(),
                job.total_files,
                job.created_at
            ],
        )?;
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> SqlResult<Option<Job>> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()
    }

    /// Moves an uploaded job to `processing`. Returns false if it was not in
    /// `uploaded` state, so a job is only ever started once.
    pub fn start_job(&self, job_id: &str) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = 'processing', started_at = ?2
             WHERE id = ?1 AND status = 'uploaded'",
            params![job_id, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn record_job_outcome(&self, job_id: &str, succeeded: bool) -> SqlResult<()> {
        let sql = if succeeded {
            "UPDATE jobs SET processed_files = processed_files + 1,
                             succeeded_files = succeeded_files + 1 WHERE id = ?1"
        } else {
            "UPDATE jobs SET processed_files = processed_files + 1,
                             failed_files = failed_files + 1 WHERE id = ?1"
        };
        self.conn.execute(sql, params![job_id])?;
        Ok(())
    }

    pub fn finish_job(&self, job_id: &str) -> SqlResult<Option<Job>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let status = JobStatus::from_counts(job.succeeded_files, job.failed_files);
        self.conn.execute(
            "UPDATE jobs SET status = ?2, finished_at = ?3 WHERE id = ?1",
            params![job_id, status.as_str(), now_rfc3339()],
        )?;
        self.get_job(job_id)
    }

    pub fn add_job_file(
        &self,
        job_id: &str,
        file_name: &str,
        stored_path: &str,
        size_bytes: u64,
    ) -> SqlResult<JobFile> {
        let file = JobFile {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            invoice_id: None,
            file_name: file_name.to_string(),
            stored_path: stored_path.to_string(),
            size_bytes,
            status: "pending".to_string(),
            error_kind: None,
            error_message: None,
            remediation: None,
            finished_at: None,
        };
        self.conn.execute(
            &format!(
                "INSERT INTO job_files ({JOB_FILE_COLUMNS})
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, 'pending', NULL, NULL, NULL, NULL)"
            ),
            params![file.id, file.job_id, file.file_name, file.stored_path, size_bytes as i64],
        )?;
        Ok(file)
    }

    pub fn get_job_files(&self, job_id: &str) -> SqlResult<Vec<JobFile>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_FILE_COLUMNS} FROM job_files WHERE job_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![job_id], job_file_from_row)?;
        rows.collect()
    }

    pub fn link_job_file(&self, file_id: &str, invoice_id: &str) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE job_files SET invoice_id = ?2, status = 'processing' WHERE id = ?1",
            params![file_id, invoice_id],
        )?;
        Ok(())
    }

    pub fn complete_job_file(&self, file_id: &str, status: &str) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE job_files SET status = ?2, finished_at = ?3 WHERE id = ?1",
            params![file_id, status, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn fail_job_file(
        &self,
        file_id: &str,
        error_kind: &str,
        message: &str,
        remediation: &str,
    ) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE job_files SET status = 'failed', error_kind = ?2, error_message = ?3,
                                  remediation = ?4, finished_at = ?5
             WHERE id = ?1",
            params![file_id, error_kind, message, remediation, now_rfc3339()],
        )?;
        Ok(())
    }
}

fn job_from_row(row: &Row<'_>) -> SqlResult<Job> {
    Ok(Job {
        id: row.get(0)?,
        owner_key: row.get(1)?,
        user_id: row.get(2)?,
        org_id: row.get(3)?,
        status: parse_text(4, row.get(4)?, JobStatus::parse)?,
        total_files: row.get(5)?,
        processed_files: row.get(6)?,
        succeeded_files: row.get(7)?,
        failed_files: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
    })
}

fn job_file_from_row(row: &Row<'_>) -> SqlResult<JobFile> {
    let size: i64 = row.get(5)?;
    Ok(JobFile {
        id: row.get(0)?,
        job_id: row.get(1)?,
        invoice_id: row.get(2)?,
        file_name: row.get(3)?,
        stored_path: row.get(4)?,
        size_bytes: size.max(0) as u64,
        status: row.get(6)?,
        error_kind: row.get(7)?,
        error_message: row.get(8)?,
        remediation: row.get(9)?,
        finished_at: row.get(10)?,
    })
}
