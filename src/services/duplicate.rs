use rusqlite::Result as SqlResult;

use crate::db::Database;
use crate::models::{DuplicateDetection, Invoice};
use crate::utils::sha256_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMethod {
    FileHash,
    ContentHash,
}

impl DuplicateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateMethod::FileHash => "file_hash",
            DuplicateMethod::ContentHash => "content_hash",
        }
    }
}

/// SHA-256 over supplier, invoice number, gross and date. `None` when the
/// record carries too little to identify an invoice.
pub fn content_hash(invoice: &Invoice) -> Option<String> {
    let clean = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_default()
    };
    let supplier = clean(&invoice.supplier_name);
    let number = clean(&invoice.invoice_number);
    if supplier.is_empty() && number.is_empty() {
        return None;
    }
    let gross = invoice
        .gross_amount
        .map(|g| format!("{g:.2}"))
        .unwrap_or_default();
    let date = clean(&invoice.invoice_date);
    let key = [supplier, number, gross, date].join("|");
    Some(sha256_bytes(key.as_bytes()))
}

/// Earlier extraction of the same document bytes for this owner.
pub fn find_file_duplicate(db: &Database, invoice: &Invoice) -> SqlResult<Option<Invoice>> {
    db.find_by_file_hash(&invoice.owner_key, &invoice.file_hash, &invoice.id, &invoice.created_at)
}

/// Stamps the content hash on the invoice and links it with the owner's other
/// non-rejected invoices sharing it. The detection always sits on the
/// later-registered invoice, whichever of the two finished extraction first.
pub fn check_content_duplicate(
    db: &Database,
    invoice: &mut Invoice,
) -> SqlResult<Option<DuplicateDetection>> {
    invoice.content_hash = content_hash(invoice);
    // an identical upload is already recorded; nothing more to learn
    if has_file_detection(db, &invoice.id)? {
        return Ok(None);
    }

    db.clear_pending_duplicates(&invoice.id)?;
    let matches = match &invoice.content_hash {
        Some(hash) => db.find_by_content_hash(&invoice.owner_key, hash, &invoice.id)?,
        None => Vec::new(),
    };
    let (earlier, later): (Vec<Invoice>, Vec<Invoice>) = matches
        .into_iter()
        .partition(|other| registered_before(other, invoice));

    if let Some(original) = earlier.first() {
        tracing::info!(
            invoice_id = %invoice.id,
            duplicate_of = %original.id,
            "Duplicate invoice detected by content"
        );
        invoice.duplicate_of = Some(original.id.clone());
        return db
            .insert_duplicate_detection(&invoice.id, &original.id, DuplicateMethod::ContentHash.as_str(), 1.0)
            .map(Some);
    }

    invoice.duplicate_of = None;
    for mut newer in later.into_iter().filter(|other| other.duplicate_of.is_none()) {
        tracing::info!(
            invoice_id = %newer.id,
            duplicate_of = %invoice.id,
            "Duplicate invoice detected by content"
        );
        db.clear_pending_duplicates(&newer.id)?;
        db.insert_duplicate_detection(&newer.id, &invoice.id, DuplicateMethod::ContentHash.as_str(), 1.0)?;
        newer.duplicate_of = Some(invoice.id.clone());
        db.upsert_invoice(&newer)?;
    }
    Ok(None)
}

fn registered_before(a: &Invoice, b: &Invoice) -> bool {
    (a.created_at.as_str(), a.id.as_str()) < (b.created_at.as_str(), b.id.as_str())
}

pub fn record_file_duplicate(
    db: &Database,
    invoice: &mut Invoice,
    original: &Invoice,
) -> SqlResult<DuplicateDetection> {
    tracing::info!(
        invoice_id = %invoice.id,
        duplicate_of = %original.id,
        "Identical document uploaded again"
    );
    invoice.duplicate_of = Some(original.id.clone());
    db.clear_pending_duplicates(&invoice.id)?;
    db.insert_duplicate_detection(&invoice.id, &original.id, DuplicateMethod::FileHash.as_str(), 1.0)
}

fn has_file_detection(db: &Database, invoice_id: &str) -> SqlResult<bool> {
    Ok(db
        .get_duplicates_for_invoice(invoice_id)?
        .iter()
        .any(|d| d.method == DuplicateMethod::FileHash.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    #[test]
    fn hash_ignores_case_and_padding() {
        let a = sample_invoice(&owner("u1"), "RE-1");
        let mut b = sample_invoice(&owner("u1"), " re-1 ");
        b.supplier_name = Some("MUSTER GMBH".into());
        assert_eq!(content_hash(&a), content_hash(&b));

        b.gross_amount = Some(119.01);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn nothing_to_hash_without_supplier_or_number() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.invoice_number = None;
        invoice.supplier_name = None;
        assert!(content_hash(&invoice).is_none());
    }

    #[test]
    fn content_duplicates_are_scoped_per_owner() {
        let db = Database::open_in_memory().unwrap();
        let mut first = sample_invoice(&owner("alice"), "RE-1");
        first.content_hash = content_hash(&first);
        db.upsert_invoice(&first).unwrap();

        let mut other_owner = sample_invoice(&owner("bob"), "RE-1");
        db.upsert_invoice(&other_owner).unwrap();
        assert!(check_content_duplicate(&db, &mut other_owner).unwrap().is_none());

        let mut again = sample_invoice(&owner("alice"), "RE-1");
        again.created_at = "2024-03-15T11:00:00+00:00".into();
        db.upsert_invoice(&again).unwrap();
        let detection = check_content_duplicate(&db, &mut again).unwrap().unwrap();
        assert_eq!(detection.duplicate_of, first.id);
        assert_eq!(again.duplicate_of.as_deref(), Some(first.id.as_str()));
    }

    #[test]
    fn later_invoice_finishing_first_is_still_flagged() {
        let db = Database::open_in_memory().unwrap();
        let mut first = sample_invoice(&owner("alice"), "RE-1");
        first.created_at = "2024-03-15T10:00:00+00:00".into();
        db.upsert_invoice(&first).unwrap();
        let mut second = sample_invoice(&owner("alice"), "RE-1");
        second.created_at = "2024-03-15T10:00:01+00:00".into();
        db.upsert_invoice(&second).unwrap();

        assert!(check_content_duplicate(&db, &mut second).unwrap().is_none());
        db.upsert_invoice(&second).unwrap();
        assert!(second.duplicate_of.is_none());

        assert!(check_content_duplicate(&db, &mut first).unwrap().is_none());
        assert!(first.duplicate_of.is_none());
        let stored = db.get_invoice_by_id(&second.id).unwrap().unwrap();
        assert_eq!(stored.duplicate_of.as_deref(), Some(first.id.as_str()));
        let detections = db.get_duplicates_for_invoice(&second.id).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].duplicate_of, first.id);
    }

    #[test]
    fn rejected_originals_do_not_count() {
        let db = Database::open_in_memory().unwrap();
        let mut first = sample_invoice(&owner("alice"), "RE-1");
        first.content_hash = content_hash(&first);
        first.review_status = crate::models::ReviewStatus::Rejected;
        db.upsert_invoice(&first).unwrap();

        let mut again = sample_invoice(&owner("alice"), "RE-1");
        db.upsert_invoice(&again).unwrap();
        assert!(check_content_duplicate(&db, &mut again).unwrap().is_none());
    }
}
