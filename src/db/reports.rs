use rusqlite::{params, OptionalExtension, Result as SqlResult, Row};

use super::{from_json, parse_text, to_json, Database};
use crate::models::{NotificationLog, ReportFrequency, ScheduledReport};
use crate::utils::now_rfc3339;

const REPORT_COLUMNS: &str = "id, owner_key, user_id, org_id, name, frequency, format, recipients,
    active, last_run_at, next_run_at, created_at";

impl Database {
    pub fn insert_scheduled_report(&self, report: &ScheduledReport) -> SqlResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO scheduled_reports ({REPORT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                report.id,
                report.owner_key,
                report.user_id,
                report.org_id,
                report.name,
                report.frequency.as_str(),
                report.format,
                to_json(&report.recipients)?,
                report.active,
                report.last_run_at,
                report.next_run_at,
                report.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_scheduled_report(&self, id: &str) -> SqlResult<Option<ScheduledReport>> {
        self.conn
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM scheduled_reports WHERE id = ?1"),
                params![id],
                report_from_row,
            )
            .optional()
    }

    pub fn list_scheduled_reports(&self, owner_key: &str) -> SqlResult<Vec<ScheduledReport>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM scheduled_reports WHERE owner_key = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![owner_key], report_from_row)?;
        rows.collect()
    }

    pub fn due_scheduled_reports(&self, now: &str) -> SqlResult<Vec<ScheduledReport>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM scheduled_reports
             WHERE active = 1 AND next_run_at <= ?1 ORDER BY next_run_at"
        ))?;
        let rows = stmt.query_map(params![now], report_from_row)?;
        rows.collect()
    }

    pub fn mark_report_run(&self, id: &str, last_run_at: &str, next_run_at: &str) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE scheduled_reports SET last_run_at = ?2, next_run_at = ?3 WHERE id = ?1",
            params![id, last_run_at, next_run_at],
        )?;
        Ok(())
    }

    pub fn delete_scheduled_report(&self, id: &str) -> SqlResult<usize> {
        self.conn
            .execute("DELETE FROM scheduled_reports WHERE id = ?1", params![id])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_notification(
        &self,
        channel: &str,
        recipient: &str,
        subject: &str,
        status: &str,
        error: Option<&str>,
        job_id: Option<&str>,
        report_id: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO notification_log
                (id, channel, recipient, subject, status, error, job_id, report_id, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![channel, recipient, subject, status, error, job_id, report_id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent_notifications(&self, limit: usize) -> SqlResult<Vec<NotificationLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, channel, recipient, subject, status, error, job_id, report_id, created_at
             FROM notification_log ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(NotificationLog {
                id: row.get(0)?,
                channel: row.get(1)?,
                recipient: row.get(2)?,
                subject: row.get(3)?,
                status: row.get(4)?,
                error: row.get(5)?,
                job_id: row.get(6)?,
                report_id: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        rows.collect()
    }
}

fn report_from_row(row: &Row<'_>) -> SqlResult<ScheduledReport> {
    let recipients: String = row.get(7)?;
    Ok(ScheduledReport {
        id: row.get(0)?,
        owner_key: row.get(1)?,
        user_id: row.get(2)?,
        org_id: row.get(3)?,
        name: row.get(4)?,
        frequency: parse_text(5, row.get(5)?, ReportFrequency::parse)?,
        format: row.get(6)?,
        recipients: from_json(7, &recipients)?,
        active: row.get(8)?,
        last_run_at: row.get(9)?,
        next_run_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}
