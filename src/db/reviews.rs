use rusqlite::{params, OptionalExtension, Result as SqlResult, Row};

use super::Database;
use crate::models::{DuplicateDetection, PlausibilityCheck};
use crate::utils::now_rfc3339;

impl Database {
    pub fn insert_duplicate_detection(
        &self,
        invoice_id: &str,
        duplicate_of: &str,
        method: &str,
        confidence: f64,
    ) -> SqlResult<DuplicateDetection> {
        let detection = DuplicateDetection {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            duplicate_of: duplicate_of.to_string(),
            method: method.to_string(),
            confidence,
            review_status: "pending".to_string(),
            reviewed_by: None,
            reviewed_at: None,
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO duplicate_detections
                (id, invoice_id, duplicate_of, method, confidence, review_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                detection.id,
                detection.invoice_id,
                detection.duplicate_of,
                detection.method,
                detection.confidence,
                detection.created_at
            ],
        )?;
        Ok(detection)
    }

    pub fn get_duplicate_detection(&self, id: &str) -> SqlResult<Option<DuplicateDetection>> {
        self.conn
            .query_row(
                "SELECT id, invoice_id, duplicate_of, method, confidence, review_status,
                        reviewed_by, reviewed_at, created_at
                 FROM duplicate_detections WHERE id = ?1",
                params![id],
                detection_from_row,
            )
            .optional()
    }

    pub fn get_duplicates_for_invoice(&self, invoice_id: &str) -> SqlResult<Vec<DuplicateDetection>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, invoice_id, duplicate_of, method, confidence, review_status,
                    reviewed_by, reviewed_at, created_at
             FROM duplicate_detections WHERE invoice_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![invoice_id], detection_from_row)?;
        rows.collect()
    }

    /// Drops earlier, unreviewed findings before a re-run.
    pub fn clear_pending_duplicates(&self, invoice_id: &str) -> SqlResult<()> {
        self.conn.execute(
            "DELETE FROM duplicate_detections WHERE invoice_id = ?1 AND review_status = 'pending'",
            params![invoice_id],
        )?;
        Ok(())
    }

    pub fn review_duplicate(&self, id: &str, status: &str, reviewer: &str) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE duplicate_detections SET review_status = ?2, reviewed_by = ?3, reviewed_at = ?4
             WHERE id = ?1",
            params![id, status, reviewer, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn count_pending_duplicates(&self, owner_key: &str) -> SqlResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM duplicate_detections d JOIN invoices i ON i.id = d.invoice_id
             WHERE i.owner_key = ?1 AND d.review_status = 'pending'",
            params![owner_key],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn replace_plausibility_checks(
        &self,
        invoice_id: &str,
        checks: &[PlausibilityCheck],
    ) -> SqlResult<()> {
        self.conn.execute(
            "DELETE FROM plausibility_checks WHERE invoice_id = ?1",
            params![invoice_id],
        )?;
        for check in checks {
            self.conn.execute(
                "INSERT INTO plausibility_checks
                    (id, invoice_id, check_type, severity, confidence, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    check.id,
                    invoice_id,
                    check.check_type,
                    check.severity,
                    check.confidence,
                    check.details.to_string(),
                    check.created_at
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_plausibility_checks(&self, invoice_id: &str) -> SqlResult<Vec<PlausibilityCheck>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, invoice_id, check_type, severity, confidence, details, created_at
             FROM plausibility_checks WHERE invoice_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![invoice_id], |row| {
            let details: String = row.get(5)?;
            Ok(PlausibilityCheck {
                id: row.get(0)?,
                invoice_id: row.get(1)?,
                check_type: row.get(2)?,
                severity: row.get(3)?,
                confidence: row.get(4)?,
                details: super::from_json(5, &details)?,
                created_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}

fn detection_from_row(row: &Row<'_>) -> SqlResult<DuplicateDetection> {
    Ok(DuplicateDetection {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        duplicate_of: row.get(2)?,
        method: row.get(3)?,
        confidence: row.get(4)?,
        review_status: row.get(5)?,
        reviewed_by: row.get(6)?,
        reviewed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    #[test]
    fn duplicate_detection_review_cycle() {
        let db = Database::open_in_memory().unwrap();
        let owner = owner("u1");
        let first = sample_invoice(&owner, "RE-1");
        let second = sample_invoice(&owner, "RE-1");
        db.upsert_invoice(&first).unwrap();
        db.upsert_invoice(&second).unwrap();

        let detection = db
            .insert_duplicate_detection(&second.id, &first.id, "content_hash", 0.95)
            .unwrap();
        assert_eq!(db.count_pending_duplicates(&owner.key()).unwrap(), 1);

        db.review_duplicate(&detection.id, "false_positive", "u1").unwrap();
        let reviewed = db.get_duplicate_detection(&detection.id).unwrap().unwrap();
        assert_eq!(reviewed.review_status, "false_positive");
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("u1"));
        assert_eq!(db.count_pending_duplicates(&owner.key()).unwrap(), 0);
    }
}
