use rusqlite::types::Type;
use rusqlite::{named_params, params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;

use crate::models::{IngestionStatus, Invoice, InvoiceOverride, ReviewStatus};

mod accounts;
mod jobs;
mod reports;
mod reviews;

pub use accounts::hash_token;

pub struct Database {
    conn: Connection,
}

/// Filters for owner-wide invoice listings and exports.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub ingestion_status: Option<IngestionStatus>,
    pub review_status: Option<ReviewStatus>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<usize>,
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_invoices.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/001_create_invoices.sql")),
    ),
    (
        "002_create_overrides_and_settings.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/002_create_overrides_and_settings.sql"
        )),
    ),
    (
        "003_create_processing_logs_table.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/003_create_processing_logs_table.sql"
        )),
    ),
    (
        "004_create_accounts.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/004_create_accounts.sql")),
    ),
    (
        "005_create_jobs.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/005_create_jobs.sql")),
    ),
    (
        "006_create_duplicates_and_plausibility.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/006_create_duplicates_and_plausibility.sql"
        )),
    ),
    (
        "007_create_reports_and_notifications.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/007_create_reports_and_notifications.sql"
        )),
    ),
];

const INVOICE_COLUMNS: &str = "id, job_id, owner_key, user_id, org_id, file_name, file_path, file_hash,
    content_hash, ingestion_status, review_status, supplier_name, supplier_address, recipient_name,
    recipient_address, customer_number, invoice_number, invoice_date, due_date, payment_terms_days,
    net_amount, vat_amount, gross_amount, vat_rate, currency, iban, bic, tax_number, vat_id,
    payment_terms, payment_reference, line_items, extraction_provider, extraction_model,
    extraction_method, complexity_score, confidence, ocr_text, extracted_json, validation_issues,
    duplicate_of, error_kind, error_message, created_at, updated_at";

impl Database {
    pub fn new(db_path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        for (name, sql) in MIGRATIONS {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
                tracing::debug!(migration = name, "Applied migration");
            }
        }

        Ok(())
    }

    pub fn upsert_invoice(&self, invoice: &Invoice) -> SqlResult<()> {
        let line_items = to_json(&invoice.line_items)?;
        let issues = to_json(&invoice.validation_issues)?;
        let updates = INVOICE_COLUMNS
            .split(',')
            .map(str::trim)
            .filter(|column| *column != "id" && *column != "created_at")
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute(
            &format!(
                "INSERT INTO invoices ({INVOICE_COLUMNS}) VALUES (
                    :id, :job_id, :owner_key, :user_id, :org_id, :file_name, :file_path, :file_hash,
                    :content_hash, :ingestion_status, :review_status, :supplier_name, :supplier_address,
                    :recipient_name, :recipient_address, :customer_number, :invoice_number,
                    :invoice_date, :due_date, :payment_terms_days, :net_amount, :vat_amount,
                    :gross_amount, :vat_rate, :currency, :iban, :bic, :tax_number, :vat_id,
                    :payment_terms, :payment_reference, :line_items, :extraction_provider,
                    :extraction_model, :extraction_method, :complexity_score, :confidence, :ocr_text,
                    :extracted_json, :validation_issues, :duplicate_of, :error_kind, :error_message,
                    :created_at, :updated_at
                ) ON CONFLICT(id) DO UPDATE SET {updates}"
            ),
            named_params! {
                ":id": invoice.id,
                ":job_id": invoice.job_id,
                ":owner_key": invoice.owner_key,
                ":user_id": invoice.user_id,
                ":org_id": invoice.org_id,
                ":file_name": invoice.file_name,
                ":file_path": invoice.file_path,
                ":file_hash": invoice.file_hash,
                ":content_hash": invoice.content_hash,
                ":ingestion_status": invoice.ingestion_status.as_str(),
                ":review_status": invoice.review_status.as_str(),
                ":supplier_name": invoice.supplier_name,
                ":supplier_address": invoice.supplier_address,
                ":recipient_name": invoice.recipient_name,
                ":recipient_address": invoice.recipient_address,
                ":customer_number": invoice.customer_number,
                ":invoice_number": invoice.invoice_number,
                ":invoice_date": invoice.invoice_date,
                ":due_date": invoice.due_date,
                ":payment_terms_days": invoice.payment_terms_days,
                ":net_amount": invoice.net_amount,
                ":vat_amount": invoice.vat_amount,
                ":gross_amount": invoice.gross_amount,
                ":vat_rate": invoice.vat_rate,
                ":currency": invoice.currency,
                ":iban": invoice.iban,
                ":bic": invoice.bic,
                ":tax_number": invoice.tax_number,
                ":vat_id": invoice.vat_id,
                ":payment_terms": invoice.payment_terms,
                ":payment_reference": invoice.payment_reference,
                ":line_items": line_items,
                ":extraction_provider": invoice.extraction_provider,
                ":extraction_model": invoice.extraction_model,
                ":extraction_method": invoice.extraction_method,
                ":complexity_score": invoice.complexity_score,
                ":confidence": invoice.confidence,
                ":ocr_text": invoice.ocr_text,
                ":extracted_json": invoice.extracted_json,
                ":validation_issues": issues,
                ":duplicate_of": invoice.duplicate_of,
                ":error_kind": invoice.error_kind,
                ":error_message": invoice.error_message,
                ":created_at": invoice.created_at,
                ":updated_at": invoice.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn get_invoice_by_id(&self, id: &str) -> SqlResult<Option<Invoice>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"))?;
        stmt.query_row(params![id], invoice_from_row).optional()
    }

    pub fn get_invoices_by_job(&self, job_id: &str) -> SqlResult<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE job_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![job_id], invoice_from_row)?;
        rows.collect()
    }

    pub fn list_invoices(&self, owner_key: &str, filter: &InvoiceFilter) -> SqlResult<Vec<Invoice>> {
        let mut sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE owner_key = :owner_key");
        if filter.ingestion_status.is_some() {
            sql.push_str(" AND ingestion_status = :ingestion_status");
        }
        if filter.review_status.is_some() {
            sql.push_str(" AND review_status = :review_status");
        }
        if filter.date_from.is_some() {
            sql.push_str(" AND invoice_date >= :date_from");
        }
        if filter.date_to.is_some() {
            sql.push_str(" AND invoice_date <= :date_to");
        }
        sql.push_str(" ORDER BY invoice_date DESC, created_at DESC LIMIT :limit");

        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let ingestion = filter.ingestion_status.map(|s| s.as_str());
        let review = filter.review_status.map(|s| s.as_str());

        let mut stmt = self.conn.prepare(&sql)?;
        let mut bound: Vec<(&str, &dyn rusqlite::ToSql)> =
            vec![(":owner_key", &owner_key), (":limit", &limit)];
        if let Some(status) = &ingestion {
            bound.push((":ingestion_status", status));
        }
        if let Some(status) = &review {
            bound.push((":review_status", status));
        }
        if let Some(from) = &filter.date_from {
            bound.push((":date_from", from));
        }
        if let Some(to) = &filter.date_to {
            bound.push((":date_to", to));
        }
        let rows = stmt.query_map(bound.as_slice(), invoice_from_row)?;
        rows.collect()
    }

    /// Earliest extracted invoice of the owner with the same document bytes,
    /// created no later than `created_until`.
    pub fn find_by_file_hash(
        &self,
        owner_key: &str,
        file_hash: &str,
        exclude_id: &str,
        created_until: &str,
    ) -> SqlResult<Option<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE owner_key = ?1 AND file_hash = ?2 AND id != ?3 AND created_at <= ?4
               AND ingestion_status IN ('processed', 'blocked')
               AND review_status != 'rejected'
             ORDER BY created_at ASC LIMIT 1"
        ))?;
        stmt.query_row(params![owner_key, file_hash, exclude_id, created_until], invoice_from_row)
            .optional()
    }

    /// Other non-rejected invoices of the owner carrying the content hash,
    /// oldest first.
    pub fn find_by_content_hash(
        &self,
        owner_key: &str,
        content_hash: &str,
        exclude_id: &str,
    ) -> SqlResult<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE owner_key = ?1 AND content_hash = ?2 AND id != ?3
               AND review_status != 'rejected'
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![owner_key, content_hash, exclude_id], invoice_from_row)?;
        rows.collect()
    }

    /// Gross amounts of the supplier's other invoices dated on or after `since`.
    pub fn supplier_amounts_since(
        &self,
        owner_key: &str,
        supplier_name: &str,
        since: &str,
        exclude_id: &str,
    ) -> SqlResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT gross_amount FROM invoices
             WHERE owner_key = ?1 AND lower(supplier_name) = lower(?2) AND id != ?3
               AND invoice_date >= ?4 AND gross_amount IS NOT NULL
               AND review_status != 'rejected'",
        )?;
        let rows = stmt.query_map(params![owner_key, supplier_name, exclude_id, since], |row| {
            row.get(0)
        })?;
        rows.collect()
    }

    pub fn latest_supplier_amount(
        &self,
        owner_key: &str,
        supplier_name: &str,
        exclude_id: &str,
    ) -> SqlResult<Option<f64>> {
        self.conn
            .query_row(
                "SELECT gross_amount FROM invoices
                 WHERE owner_key = ?1 AND lower(supplier_name) = lower(?2) AND id != ?3
                   AND gross_amount IS NOT NULL AND review_status != 'rejected'
                 ORDER BY invoice_date DESC, created_at DESC LIMIT 1",
                params![owner_key, supplier_name, exclude_id],
                |row| row.get(0),
            )
            .optional()
    }

    /// Documents charged against the quota since `since`: every file of a
    /// job that has not failed, counted at upload, plus invoices created
    /// outside a job.
    pub fn count_usage_since(&self, owner_key: &str, since: &str) -> SqlResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT
                (SELECT COALESCE(SUM(total_files), 0) FROM jobs
                  WHERE owner_key = ?1 AND created_at >= ?2 AND status != 'failed')
              + (SELECT COUNT(*) FROM invoices
                  WHERE owner_key = ?1 AND created_at >= ?2 AND job_id IS NULL)",
            params![owner_key, since],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn count_by_ingestion_status(&self, owner_key: &str) -> SqlResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT ingestion_status, COUNT(*) FROM invoices
             WHERE owner_key = ?1 GROUP BY ingestion_status ORDER BY ingestion_status",
        )?;
        let rows = stmt.query_map(params![owner_key], |row| {
            let count: i64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, count.max(0) as u64))
        })?;
        rows.collect()
    }

    pub fn set_review_status(&self, invoice_id: &str, status: ReviewStatus) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE invoices SET review_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![invoice_id, status.as_str(), crate::utils::now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_override(&self, invoice_id: &str, field_name: &str, value: &str) -> SqlResult<()> {
        let now = crate::utils::now_rfc3339();
        self.conn.execute(
            "INSERT INTO invoice_overrides (id, invoice_id, field_name, override_value, created_at, updated_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(invoice_id, field_name)
             DO UPDATE SET override_value = excluded.override_value, updated_at = excluded.updated_at",
            params![invoice_id, field_name, value, now],
        )?;
        Ok(())
    }

    pub fn get_overrides(&self, invoice_id: &str) -> SqlResult<Vec<InvoiceOverride>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, invoice_id, field_name, override_value, created_at, updated_at
             FROM invoice_overrides WHERE invoice_id = ?1 ORDER BY field_name",
        )?;

        let rows = stmt.query_map(params![invoice_id], override_from_row)?;
        rows.collect()
    }

    /// All overrides of an owner's invoices, keyed by invoice id.
    pub fn get_overrides_by_owner(
        &self,
        owner_key: &str,
    ) -> SqlResult<HashMap<String, Vec<InvoiceOverride>>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.invoice_id, o.field_name, o.override_value, o.created_at, o.updated_at
             FROM invoice_overrides o JOIN invoices i ON i.id = o.invoice_id
             WHERE i.owner_key = ?1",
        )?;
        let mut grouped: HashMap<String, Vec<InvoiceOverride>> = HashMap::new();
        for entry in stmt.query_map(params![owner_key], override_from_row)? {
            let entry = entry?;
            grouped.entry(entry.invoice_id.clone()).or_default().push(entry);
        }
        Ok(grouped)
    }

    pub fn clear_override(&self, invoice_id: &str, field_name: &str) -> SqlResult<usize> {
        self.conn.execute(
            "DELETE FROM invoice_overrides WHERE invoice_id = ?1 AND field_name = ?2",
            params![invoice_id, field_name],
        )
    }

    pub fn clear_all_overrides(&self, invoice_id: &str) -> SqlResult<usize> {
        self.conn.execute(
            "DELETE FROM invoice_overrides WHERE invoice_id = ?1",
            params![invoice_id],
        )
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    pub fn delete_setting(&self, key: &str) -> SqlResult<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn log_processing(
        &self,
        invoice_id: Option<&str>,
        file_hash: Option<&str>,
        process_type: &str,
        status: &str,
        message: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO processing_logs (id, invoice_id, file_hash, process_type, status, message, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![invoice_id, file_hash, process_type, status, message],
        )?;
        Ok(())
    }

    pub fn processing_log_statuses(&self, invoice_id: &str) -> SqlResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT process_type || ':' || status FROM processing_logs
             WHERE invoice_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![invoice_id], |row| row.get(0))?;
        rows.collect()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> SqlResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> SqlResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_text<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> SqlResult<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {raw:?}").into(),
        )
    })
}

fn invoice_from_row(row: &Row<'_>) -> SqlResult<Invoice> {
    let line_items: String = row.get(31)?;
    let issues: String = row.get(39)?;
    Ok(Invoice {
        id: row.get(0)?,
        job_id: row.get(1)?,
        owner_key: row.get(2)?,
        user_id: row.get(3)?,
        org_id: row.get(4)?,
        file_name: row.get(5)?,
        file_path: row.get(6)?,
        file_hash: row.get(7)?,
        content_hash: row.get(8)?,
        ingestion_status: parse_text(9, row.get(9)?, IngestionStatus::parse)?,
        review_status: parse_text(10, row.get(10)?, ReviewStatus::parse)?,
        supplier_name: row.get(11)?,
        supplier_address: row.get(12)?,
        recipient_name: row.get(13)?,
        recipient_address: row.get(14)?,
        customer_number: row.get(15)?,
        invoice_number: row.get(16)?,
        invoice_date: row.get(17)?,
        due_date: row.get(18)?,
        payment_terms_days: row.get(19)?,
        net_amount: row.get(20)?,
        vat_amount: row.get(21)?,
        gross_amount: row.get(22)?,
        vat_rate: row.get(23)?,
        currency: row.get(24)?,
        iban: row.get(25)?,
        bic: row.get(26)?,
        tax_number: row.get(27)?,
        vat_id: row.get(28)?,
        payment_terms: row.get(29)?,
        payment_reference: row.get(30)?,
        line_items: from_json(31, &line_items)?,
        extraction_provider: row.get(32)?,
        extraction_model: row.get(33)?,
        extraction_method: row.get(34)?,
        complexity_score: row.get(35)?,
        confidence: row.get(36)?,
        ocr_text: row.get(37)?,
        extracted_json: row.get(38)?,
        validation_issues: from_json(39, &issues)?,
        duplicate_of: row.get(40)?,
        error_kind: row.get(41)?,
        error_message: row.get(42)?,
        created_at: row.get(43)?,
        updated_at: row.get(44)?,
    })
}

fn override_from_row(row: &Row<'_>) -> SqlResult<InvoiceOverride> {
    Ok(InvoiceOverride {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        field_name: row.get(2)?,
        override_value: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Owner;

    pub(crate) fn owner(user: &str) -> Owner {
        Owner {
            user_id: user.to_string(),
            org_id: None,
        }
    }

    pub(crate) fn sample_invoice(owner: &Owner, number: &str) -> Invoice {
        let mut invoice = Invoice::new(owner, None, "rechnung.pdf", "filehash", "2024-03-15T10:00:00+00:00");
        invoice.ingestion_status = IngestionStatus::Processed;
        invoice.invoice_number = Some(number.to_string());
        invoice.invoice_date = Some("2024-03-15".to_string());
        invoice.supplier_name = Some("Muster GmbH".to_string());
        invoice.net_amount = Some(100.0);
        invoice.vat_amount = Some(19.0);
        invoice.gross_amount = Some(119.0);
        invoice
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.sqlite");
        drop(Database::new(&path).unwrap());
        let db = Database::new(&path).unwrap();
        let applied: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[test]
    fn invoice_round_trips_through_storage() {
        let db = Database::open_in_memory().unwrap();
        let owner = owner("u1");
        let mut invoice = sample_invoice(&owner, "RE-1");
        invoice.line_items.push(crate::models::LineItem {
            position: Some(1),
            description: Some("Beratung".into()),
            quantity: Some(1.0),
            unit_price: Some(100.0),
            total: Some(100.0),
        });
        db.upsert_invoice(&invoice).unwrap();

        let loaded = db.get_invoice_by_id(&invoice.id).unwrap().unwrap();
        assert_eq!(loaded.invoice_number.as_deref(), Some("RE-1"));
        assert_eq!(loaded.line_items.len(), 1);
        assert_eq!(loaded.ingestion_status, IngestionStatus::Processed);
        assert_eq!(loaded.owner_key, "user:u1");
    }

    #[test]
    fn listing_is_scoped_to_owner_and_filters() {
        let db = Database::open_in_memory().unwrap();
        let alice = owner("alice");
        let bob = owner("bob");
        db.upsert_invoice(&sample_invoice(&alice, "A-1")).unwrap();
        let mut failed = sample_invoice(&alice, "A-2");
        failed.ingestion_status = IngestionStatus::Failed;
        db.upsert_invoice(&failed).unwrap();
        db.upsert_invoice(&sample_invoice(&bob, "B-1")).unwrap();

        let all = db.list_invoices(&alice.key(), &InvoiceFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let filter = InvoiceFilter {
            ingestion_status: Some(IngestionStatus::Failed),
            ..InvoiceFilter::default()
        };
        let only_failed = db.list_invoices(&alice.key(), &filter).unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].invoice_number.as_deref(), Some("A-2"));
    }

    #[test]
    fn overrides_upsert_and_clear() {
        let db = Database::open_in_memory().unwrap();
        let invoice = sample_invoice(&owner("u1"), "RE-1");
        db.upsert_invoice(&invoice).unwrap();

        db.set_override(&invoice.id, "gross_amount", "120.00").unwrap();
        db.set_override(&invoice.id, "gross_amount", "121.00").unwrap();
        let overrides = db.get_overrides(&invoice.id).unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].override_value, "121.00");

        assert_eq!(db.clear_override(&invoice.id, "gross_amount").unwrap(), 1);
        assert!(db.get_overrides(&invoice.id).unwrap().is_empty());
    }
}
