use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{IngestionStatus, Invoice, Owner};
use crate::services::duplicate;
use crate::services::overrides::apply_overrides;
use crate::services::plausibility;
use crate::services::router::RoutedExtraction;
use crate::services::state::AppState;
use crate::services::text_extraction::{read_header, DocumentFormat, ExtractedText, TextExtractor};
use crate::services::validation::{DataCleaner, Validator};
use crate::utils::{now_rfc3339, sha256_file};

/// Creates the invoice row for a stored upload. The returned invoice is
/// `queued`; [`process_invoice`] does the work.
pub fn register_document(
    db: &Database,
    owner: &Owner,
    job_id: Option<&str>,
    file_name: &str,
    path: &Path,
) -> IntakeResult<Invoice> {
    let file_hash = sha256_file(path).map_err(|e| IntakeError::InvalidFormat {
        filename: file_name.to_string(),
        reason: format!("{e:#}"),
    })?;
    let mut invoice = Invoice::new(owner, job_id, file_name, &file_hash, &now_rfc3339());
    invoice.file_path = Some(path.to_string_lossy().to_string());
    db.upsert_invoice(&invoice)?;
    Ok(invoice)
}

/// Runs the pipeline on a registered invoice. On error the invoice is stored
/// as `failed` with the error kind before the error is returned.
pub async fn process_invoice(state: &AppState, invoice: &mut Invoice) -> IntakeResult<()> {
    invoice.ingestion_status = IngestionStatus::Processing;
    invoice.error_kind = None;
    invoice.error_message = None;
    invoice.updated_at = now_rfc3339();
    state.db()?.upsert_invoice(invoice)?;

    match run_pipeline(state, invoice).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let db = state.db()?;
            mark_failed(&db, invoice, &err)?;
            Err(err)
        }
    }
}

async fn run_pipeline(state: &AppState, invoice: &mut Invoice) -> IntakeResult<()> {
    let earlier = {
        let db = state.db()?;
        duplicate::find_file_duplicate(&db, invoice)?
    };
    if let Some(original) = earlier {
        copy_extraction(invoice, &original);
        let db = state.db()?;
        duplicate::record_file_duplicate(&db, invoice, &original)?;
        finalize(&db, state.validator(), invoice, today())?;
        db.log_processing(
            Some(&invoice.id),
            Some(&invoice.file_hash),
            "duplicate",
            "success",
            Some(&format!("copied extraction of {}", original.id)),
        )?;
        return Ok(());
    }

    let path = invoice
        .file_path
        .clone()
        .map(PathBuf::from)
        .ok_or_else(|| IntakeError::ProcessingFailed("stored document path missing".to_string()))?;
    let text = extract_text(&path, &invoice.file_name, &state.config.processing.ocr_language).await?;

    extract_fields(state, invoice, text).await
}

/// Routed extraction on already extracted document text, then finalize.
pub(crate) async fn extract_fields(
    state: &AppState,
    invoice: &mut Invoice,
    text: ExtractedText,
) -> IntakeResult<()> {
    let min_chars = state.config.processing.min_text_chars;
    let chars = text.text.trim().chars().count();
    if chars < min_chars {
        return Err(IntakeError::ProcessingFailed(format!(
            "only {chars} characters of text found, at least {min_chars} needed"
        )));
    }

    let router = state.router()?;
    let routed = router.extract(&text.text, text.method).await?;
    tracing::info!(
        invoice_id = %invoice.id,
        provider = %routed.extraction.provider,
        complexity = routed.complexity,
        attempts = routed.attempts,
        fallback = routed.fallback_used,
        "Extraction finished"
    );
    apply_extraction(invoice, &text, routed);

    let db = state.db()?;
    finalize(&db, state.validator(), invoice, today())?;
    db.log_processing(
        Some(&invoice.id),
        Some(&invoice.file_hash),
        "extract",
        invoice.ingestion_status.as_str(),
        invoice.extraction_provider.as_deref(),
    )?;
    Ok(())
}

/// Validates the effective record (overrides applied), sets the ingestion
/// status, runs duplicate and plausibility checks and saves the invoice.
/// Also used after manual edits.
pub fn finalize(
    db: &Database,
    validator: &Validator,
    invoice: &mut Invoice,
    today: NaiveDate,
) -> IntakeResult<()> {
    let mut effective = invoice.clone();
    apply_overrides(&mut effective, &db.get_overrides(&invoice.id)?);

    let outcome = validator.validate(&effective, today);
    invoice.validation_issues = outcome.issues;
    invoice.ingestion_status = if outcome.blocked {
        IngestionStatus::Blocked
    } else {
        IngestionStatus::Processed
    };
    if outcome.blocked {
        tracing::warn!(invoice_id = %invoice.id, "Invoice blocked by strict validation");
    }

    duplicate::check_content_duplicate(db, &mut effective)?;
    invoice.content_hash = effective.content_hash.clone();
    invoice.duplicate_of = effective.duplicate_of.clone();
    invoice.updated_at = now_rfc3339();
    db.upsert_invoice(invoice)?;

    effective.validation_issues = invoice.validation_issues.clone();
    plausibility::run_checks(db, &effective, today)?;
    Ok(())
}

pub fn mark_failed(db: &Database, invoice: &mut Invoice, err: &IntakeError) -> IntakeResult<()> {
    tracing::warn!(invoice_id = %invoice.id, kind = %err.kind(), error = %err, "Processing failed");
    invoice.ingestion_status = IngestionStatus::Failed;
    invoice.error_kind = Some(err.kind().as_str().to_string());
    invoice.error_message = Some(err.to_string());
    invoice.updated_at = now_rfc3339();
    db.upsert_invoice(invoice)?;
    db.log_processing(
        Some(&invoice.id),
        Some(&invoice.file_hash),
        "process",
        "failed",
        Some(&err.to_string()),
    )?;
    Ok(())
}

async fn extract_text(path: &Path, file_name: &str, language: &str) -> IntakeResult<ExtractedText> {
    let header = read_header(path)?;
    if DocumentFormat::detect(&header).is_none() {
        return Err(IntakeError::InvalidFormat {
            filename: file_name.to_string(),
            reason: "not a PDF, PNG, JPEG or TIFF document".to_string(),
        });
    }

    let path = path.to_path_buf();
    let language = language.to_string();
    tokio::task::spawn_blocking(move || TextExtractor::extract(&path, &language))
        .await
        .map_err(|e| IntakeError::Internal(format!("text extraction task: {e}")))?
        .map_err(|e| IntakeError::ProcessingFailed(format!("{e:#}")))
}

fn apply_extraction(invoice: &mut Invoice, text: &ExtractedText, routed: RoutedExtraction) {
    let data = DataCleaner::clean(routed.extraction.data);
    invoice.supplier_name = data.supplier_name;
    invoice.supplier_address = data.supplier_address;
    invoice.recipient_name = data.recipient_name;
    invoice.recipient_address = data.recipient_address;
    invoice.customer_number = data.customer_number;
    invoice.invoice_number = data.invoice_number;
    invoice.invoice_date = data.invoice_date;
    invoice.due_date = data.due_date;
    invoice.payment_terms_days = data.payment_terms_days;
    invoice.net_amount = data.net_amount;
    invoice.vat_amount = data.vat_amount;
    invoice.gross_amount = data.gross_amount;
    invoice.vat_rate = data.vat_rate;
    invoice.currency = data.currency.unwrap_or_else(|| "EUR".to_string());
    invoice.iban = data.iban;
    invoice.bic = data.bic;
    invoice.tax_number = data.tax_number;
    invoice.vat_id = data.vat_id;
    invoice.payment_terms = data.payment_terms;
    invoice.payment_reference = data.payment_reference;
    invoice.line_items = data.line_items;
    invoice.confidence = data.confidence.unwrap_or(0.0);
    invoice.extraction_provider = Some(routed.extraction.provider.as_str().to_string());
    invoice.extraction_model = Some(routed.extraction.model);
    invoice.extraction_method = Some(text.method.as_str().to_string());
    invoice.complexity_score = Some(i64::from(routed.complexity));
    invoice.extracted_json = routed.extraction.raw_json;
    invoice.ocr_text = Some(text.text.clone());
}

fn copy_extraction(invoice: &mut Invoice, original: &Invoice) {
    invoice.supplier_name = original.supplier_name.clone();
    invoice.supplier_address = original.supplier_address.clone();
    invoice.recipient_name = original.recipient_name.clone();
    invoice.recipient_address = original.recipient_address.clone();
    invoice.customer_number = original.customer_number.clone();
    invoice.invoice_number = original.invoice_number.clone();
    invoice.invoice_date = original.invoice_date.clone();
    invoice.due_date = original.due_date.clone();
    invoice.payment_terms_days = original.payment_terms_days;
    invoice.net_amount = original.net_amount;
    invoice.vat_amount = original.vat_amount;
    invoice.gross_amount = original.gross_amount;
    invoice.vat_rate = original.vat_rate;
    invoice.currency = original.currency.clone();
    invoice.iban = original.iban.clone();
    invoice.bic = original.bic.clone();
    invoice.tax_number = original.tax_number.clone();
    invoice.vat_id = original.vat_id.clone();
    invoice.payment_terms = original.payment_terms.clone();
    invoice.payment_reference = original.payment_reference.clone();
    invoice.line_items = original.line_items.clone();
    invoice.confidence = original.confidence;
    invoice.extraction_provider = original.extraction_provider.clone();
    invoice.extraction_model = original.extraction_model.clone();
    invoice.extraction_method = original.extraction_method.clone();
    invoice.complexity_score = original.complexity_score;
    invoice.extracted_json = original.extracted_json.clone();
    invoice.ocr_text = original.ocr_text.clone();
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::tests::owner;
    use crate::error::ErrorKind;
    use crate::services::llm::testing::{invoice_json, ScriptedProvider};
    use crate::services::llm::{ProviderError, ProviderKind};
    use crate::services::state::tests::test_state;
    use crate::services::text_extraction::ExtractionMethod;
    use std::sync::Arc;

    const TEXT: &str = "Rechnung RE-2024-001 vom 15.03.2024 Muster GmbH Musterstrasse 1 \
        12345 Musterstadt Nettobetrag 100,00 EUR MwSt 19 % 19,00 EUR Gesamtbetrag 119,00 EUR";

    fn pdf_text() -> ExtractedText {
        ExtractedText {
            text: TEXT.to_string(),
            method: ExtractionMethod::PdfText,
        }
    }

    fn registered(state: &AppState, dir: &Path, name: &str, bytes: &[u8]) -> Invoice {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        register_document(&state.db().unwrap(), &owner("u1"), None, name, &path).unwrap()
    }

    #[tokio::test]
    async fn extracted_fields_are_cleaned_validated_and_stored() {
        let provider = Arc::new(ScriptedProvider::answering(
            ProviderKind::OpenAi,
            &invoice_json("RE-2024-001", 119.0, 0.9),
        ));
        let state = test_state(AppConfig::default(), Some(provider.clone()));
        let dir = tempfile::tempdir().unwrap();
        let mut invoice = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 a");

        extract_fields(&state, &mut invoice, pdf_text()).await.unwrap();

        let stored = state.db().unwrap().get_invoice_by_id(&invoice.id).unwrap().unwrap();
        assert_eq!(stored.ingestion_status, IngestionStatus::Processed);
        assert_eq!(stored.iban.as_deref(), Some("DE89370400440532013000"));
        assert_eq!(stored.extraction_provider.as_deref(), Some("openai"));
        assert!(stored.validation_issues.is_empty(), "{:?}", stored.validation_issues);
        assert!(stored.content_hash.is_some());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn strict_mode_blocks_missing_required_fields() {
        let mut answer: serde_json::Value =
            serde_json::from_str(&invoice_json("RE-1", 119.0, 0.9)).unwrap();
        answer["supplier_name"] = serde_json::Value::Null;
        let provider = Arc::new(ScriptedProvider::answering(ProviderKind::OpenAi, &answer.to_string()));

        let mut config = AppConfig::default();
        config.processing.strict_validation = true;
        let state = test_state(config, Some(provider));
        let dir = tempfile::tempdir().unwrap();
        let mut invoice = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 a");

        extract_fields(&state, &mut invoice, pdf_text()).await.unwrap();
        assert_eq!(invoice.ingestion_status, IngestionStatus::Blocked);
        assert!(invoice.has_hard_issues());
    }

    #[tokio::test]
    async fn identical_upload_copies_extraction_without_llm_call() {
        let provider = Arc::new(ScriptedProvider::answering(
            ProviderKind::OpenAi,
            &invoice_json("RE-2024-001", 119.0, 0.9),
        ));
        let state = test_state(AppConfig::default(), Some(provider.clone()));
        let dir = tempfile::tempdir().unwrap();
        let mut first = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 same");
        extract_fields(&state, &mut first, pdf_text()).await.unwrap();

        let mut again = registered(&state, dir.path(), "b.pdf", b"%PDF-1.4 same");
        process_invoice(&state, &mut again).await.unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(again.duplicate_of.as_deref(), Some(first.id.as_str()));
        assert_eq!(again.invoice_number.as_deref(), Some("RE-2024-001"));
        let detections = state.db().unwrap().get_duplicates_for_invoice(&again.id).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].method, "file_hash");
        let logs = state.db().unwrap().processing_log_statuses(&again.id).unwrap();
        assert!(logs.contains(&"duplicate:success".to_string()), "{logs:?}");
    }

    #[tokio::test]
    async fn resent_invoice_is_flagged_when_it_finishes_first() {
        let provider = Arc::new(ScriptedProvider::answering(
            ProviderKind::OpenAi,
            &invoice_json("RE-2024-001", 119.0, 0.9),
        ));
        let state = test_state(AppConfig::default(), Some(provider));
        let dir = tempfile::tempdir().unwrap();
        let mut first = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 scan");
        let mut resent = registered(&state, dir.path(), "b.pdf", b"%PDF-1.4 mail");

        extract_fields(&state, &mut resent, pdf_text()).await.unwrap();
        extract_fields(&state, &mut first, pdf_text()).await.unwrap();

        let db = state.db().unwrap();
        let first = db.get_invoice_by_id(&first.id).unwrap().unwrap();
        let resent = db.get_invoice_by_id(&resent.id).unwrap().unwrap();
        assert!(first.duplicate_of.is_none());
        assert_eq!(resent.duplicate_of.as_deref(), Some(first.id.as_str()));
        let detections = db.get_duplicates_for_invoice(&resent.id).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].method, "content_hash");
    }

    #[tokio::test]
    async fn unknown_format_fails_with_kind() {
        let state = test_state(AppConfig::default(), None);
        let dir = tempfile::tempdir().unwrap();
        let mut invoice = registered(&state, dir.path(), "notes.pdf", b"plain text, not a pdf");

        let err = process_invoice(&state, &mut invoice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);

        let stored = state.db().unwrap().get_invoice_by_id(&invoice.id).unwrap().unwrap();
        assert_eq!(stored.ingestion_status, IngestionStatus::Failed);
        assert_eq!(stored.error_kind.as_deref(), Some("invalid_format"));
    }

    #[tokio::test]
    async fn short_text_is_processing_failed() {
        let state = test_state(AppConfig::default(), None);
        let dir = tempfile::tempdir().unwrap();
        let mut invoice = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 a");
        let text = ExtractedText {
            text: "Rechnung".into(),
            method: ExtractionMethod::PdfText,
        };
        let err = extract_fields(&state, &mut invoice, text).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
    }

    #[tokio::test]
    async fn exhausted_backends_are_processing_failed() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![Err(ProviderError::Network("timeout".into()))],
        ));
        let state = test_state(AppConfig::default(), Some(provider.clone()));
        let dir = tempfile::tempdir().unwrap();
        let mut invoice = registered(&state, dir.path(), "a.pdf", b"%PDF-1.4 a");

        let err = extract_fields(&state, &mut invoice, pdf_text()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert_eq!(provider.call_count(), 2);
    }
}
