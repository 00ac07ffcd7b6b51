use rusqlite::Result as SqlResult;

use crate::db::Database;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Invoice, InvoiceOverride};
use crate::utils::{format_decimal, parse_date, parse_decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Code,
    Amount,
    Date,
    Days,
}

const EDITABLE_FIELDS: &[(&str, FieldKind)] = &[
    ("supplier_name", FieldKind::Text),
    ("supplier_address", FieldKind::Text),
    ("recipient_name", FieldKind::Text),
    ("recipient_address", FieldKind::Text),
    ("customer_number", FieldKind::Text),
    ("invoice_number", FieldKind::Text),
    ("invoice_date", FieldKind::Date),
    ("due_date", FieldKind::Date),
    ("payment_terms_days", FieldKind::Days),
    ("net_amount", FieldKind::Amount),
    ("vat_amount", FieldKind::Amount),
    ("gross_amount", FieldKind::Amount),
    ("vat_rate", FieldKind::Amount),
    ("currency", FieldKind::Code),
    ("iban", FieldKind::Code),
    ("bic", FieldKind::Code),
    ("tax_number", FieldKind::Text),
    ("vat_id", FieldKind::Code),
    ("payment_terms", FieldKind::Text),
    ("payment_reference", FieldKind::Text),
];

fn field_kind(field: &str) -> Option<FieldKind> {
    EDITABLE_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kind)| *kind)
}

/// Checks a submitted value and returns the form it is stored in.
pub fn normalize_override(field: &str, value: &str) -> IntakeResult<String> {
    let kind = field_kind(field)
        .ok_or_else(|| IntakeError::Validation(format!("Field cannot be edited: {field}")))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(IntakeError::Validation(format!("Empty value for {field}")));
    }

    match kind {
        FieldKind::Text => Ok(value.to_string()),
        FieldKind::Code => Ok(value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase()),
        FieldKind::Amount => parse_decimal(value)
            .map(format_decimal)
            .map_err(|_| IntakeError::Validation(format!("Not an amount for {field}: {value}"))),
        FieldKind::Date => parse_date(value)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .ok_or_else(|| IntakeError::Validation(format!("Not a date for {field}: {value}"))),
        FieldKind::Days => value
            .parse::<u32>()
            .map(|days| days.to_string())
            .map_err(|_| IntakeError::Validation(format!("Not a day count for {field}: {value}"))),
    }
}

pub fn apply_overrides(invoice: &mut Invoice, overrides: &[InvoiceOverride]) {
    for entry in overrides {
        let value = entry.override_value.clone();
        let amount = || parse_decimal(&entry.override_value).ok();
        match entry.field_name.as_str() {
            "supplier_name" => invoice.supplier_name = Some(value),
            "supplier_address" => invoice.supplier_address = Some(value),
            "recipient_name" => invoice.recipient_name = Some(value),
            "recipient_address" => invoice.recipient_address = Some(value),
            "customer_number" => invoice.customer_number = Some(value),
            "invoice_number" => invoice.invoice_number = Some(value),
            "invoice_date" => invoice.invoice_date = Some(value),
            "due_date" => invoice.due_date = Some(value),
            "payment_terms_days" => invoice.payment_terms_days = value.parse().ok(),
            "net_amount" => invoice.net_amount = amount(),
            "vat_amount" => invoice.vat_amount = amount(),
            "gross_amount" => invoice.gross_amount = amount(),
            "vat_rate" => invoice.vat_rate = amount(),
            "currency" => invoice.currency = value,
            "iban" => invoice.iban = Some(value),
            "bic" => invoice.bic = Some(value),
            "tax_number" => invoice.tax_number = Some(value),
            "vat_id" => invoice.vat_id = Some(value),
            "payment_terms" => invoice.payment_terms = Some(value),
            "payment_reference" => invoice.payment_reference = Some(value),
            other => {
                tracing::debug!(invoice_id = %invoice.id, field = other, "Ignoring unknown override");
            }
        }
    }
}

/// Invoices of one owner as reviewers see them: stored overrides applied.
pub fn effective_invoices(db: &Database, owner_key: &str, mut invoices: Vec<Invoice>) -> SqlResult<Vec<Invoice>> {
    let overrides = db.get_overrides_by_owner(owner_key)?;
    for invoice in invoices.iter_mut() {
        if let Some(entries) = overrides.get(&invoice.id) {
            apply_overrides(invoice, entries);
        }
    }
    Ok(invoices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    fn entry(field: &str, value: &str) -> InvoiceOverride {
        InvoiceOverride {
            id: "o1".into(),
            invoice_id: "i1".into(),
            field_name: field.into(),
            override_value: value.into(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn values_are_normalized_per_field() {
        assert_eq!(normalize_override("gross_amount", "1.190,50").unwrap(), "1190.50");
        assert_eq!(normalize_override("invoice_date", "15.03.2024").unwrap(), "2024-03-15");
        assert_eq!(normalize_override("iban", "de89 3704").unwrap(), "DE893704");
        assert_eq!(normalize_override("supplier_name", "  ACME ").unwrap(), "ACME");
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(normalize_override("gross_amount", "abc").is_err());
        assert!(normalize_override("invoice_date", "soon").is_err());
        assert!(normalize_override("id", "x").is_err());
        assert!(normalize_override("supplier_name", "   ").is_err());
    }

    #[test]
    fn overrides_replace_extracted_values() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        apply_overrides(
            &mut invoice,
            &[entry("gross_amount", "120.00"), entry("invoice_number", "RE-9")],
        );
        assert_eq!(invoice.gross_amount, Some(120.0));
        assert_eq!(invoice.invoice_number.as_deref(), Some("RE-9"));
        assert_eq!(invoice.supplier_name.as_deref(), Some("Muster GmbH"));
    }

    #[test]
    fn effective_invoices_use_stored_overrides() {
        let db = Database::open_in_memory().unwrap();
        let user = owner("u1");
        let invoice = sample_invoice(&user, "RE-1");
        db.upsert_invoice(&invoice).unwrap();
        db.set_override(&invoice.id, "supplier_name", "Neu AG").unwrap();

        let effective = effective_invoices(&db, &user.key(), vec![invoice]).unwrap();
        assert_eq!(effective[0].supplier_name.as_deref(), Some("Neu AG"));
    }
}
