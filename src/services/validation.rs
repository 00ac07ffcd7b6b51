use chrono::NaiveDate;
use regex::Regex;

use crate::config::ProcessingConfig;
use crate::models::{ExtractedInvoiceData, Invoice, Severity, ValidationIssue};
use crate::utils::{non_empty, normalize_date, round2};

const MIN_GROSS: f64 = 0.01;
const MAX_GROSS: f64 = 1_000_000.0;
const MAX_AGE_DAYS: i64 = 3650;
const MAX_FUTURE_DAYS: i64 = 365;

const IBAN_LENGTHS: &[(&str, usize)] = &[
    ("AT", 20),
    ("BE", 16),
    ("CH", 21),
    ("CZ", 24),
    ("DE", 22),
    ("DK", 18),
    ("ES", 24),
    ("FR", 27),
    ("GB", 22),
    ("IE", 22),
    ("IT", 27),
    ("LI", 21),
    ("LU", 20),
    ("NL", 18),
    ("PL", 28),
    ("PT", 25),
    ("SE", 24),
];

const VAT_ID_PATTERNS: &[(&str, &str)] = &[
    ("DE", r"^DE[0-9]{9}$"),
    ("AT", r"^ATU[0-9]{8}$"),
    ("BE", r"^BE[01][0-9]{9}$"),
    ("CH", r"^CHE[0-9]{9}(MWST|TVA|IVA)?$"),
    ("DK", r"^DK[0-9]{8}$"),
    ("ES", r"^ES[0-9A-Z][0-9]{7}[0-9A-Z]$"),
    ("FR", r"^FR[0-9A-Z]{2}[0-9]{9}$"),
    ("IT", r"^IT[0-9]{11}$"),
    ("LU", r"^LU[0-9]{8}$"),
    ("NL", r"^NL[0-9]{9}B[0-9]{2}$"),
    ("PL", r"^PL[0-9]{10}$"),
];

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub issues: Vec<ValidationIssue>,
    pub blocked: bool,
}

impl ValidationOutcome {
    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }
}

pub struct Validator {
    strict: bool,
    required_fields: Vec<String>,
    tolerance: f64,
    iban_format: Regex,
    bic_format: Regex,
    vat_generic: Regex,
    vat_patterns: Vec<(&'static str, Regex)>,
}

impl Validator {
    pub fn new(config: &ProcessingConfig) -> Result<Self, regex::Error> {
        let vat_patterns = VAT_ID_PATTERNS
            .iter()
            .map(|(country, pattern)| Ok((*country, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Validator {
            strict: config.strict_validation,
            required_fields: config.required_fields.clone(),
            tolerance: config.gross_tolerance,
            iban_format: Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$")?,
            bic_format: Regex::new(r"^[A-Z]{4}[A-Z]{2}[A-Z0-9]{2}([A-Z0-9]{3})?$")?,
            vat_generic: Regex::new(r"^[A-Z]{2}[0-9A-Z]{2,13}$")?,
            vat_patterns,
        })
    }

    pub fn validate(&self, invoice: &Invoice, today: NaiveDate) -> ValidationOutcome {
        let mut issues = Vec::new();

        for field in &self.required_fields {
            if !is_present(invoice, field) {
                issues.push(hard(field, "missing_required", format!("Required field missing: {field}")));
            }
        }

        self.check_amounts(invoice, &mut issues);
        self.check_dates(invoice, today, &mut issues);
        if let Some(iban) = &invoice.iban {
            self.check_iban(iban, &mut issues);
        }
        if let Some(bic) = &invoice.bic {
            if !self.bic_format.is_match(&compact(bic)) {
                issues.push(soft("bic", "bic_format", format!("Invalid BIC format: {bic}")));
            }
        }
        if let Some(vat_id) = &invoice.vat_id {
            if !self.is_valid_vat_id(&compact(vat_id)) {
                issues.push(soft("vat_id", "vat_id_format", format!("Invalid VAT ID format: {vat_id}")));
            }
        }

        let blocked = self.strict && issues.iter().any(|issue| issue.severity == Severity::Hard);
        ValidationOutcome { issues, blocked }
    }

    fn check_amounts(&self, invoice: &Invoice, issues: &mut Vec<ValidationIssue>) {
        for (field, value) in [
            ("net_amount", invoice.net_amount),
            ("vat_amount", invoice.vat_amount),
            ("gross_amount", invoice.gross_amount),
        ] {
            if let Some(value) = value {
                if value < 0.0 {
                    issues.push(soft(field, "negative_amount", format!("{field} is negative: {value:.2}")));
                }
            }
        }

        if let Some(gross) = invoice.gross_amount {
            if (0.0..MIN_GROSS).contains(&gross) {
                issues.push(soft("gross_amount", "amount_too_small", format!("Gross amount too small: {gross:.2}")));
            }
            if gross > MAX_GROSS {
                issues.push(soft("gross_amount", "amount_too_high", format!("Gross amount implausibly high: {gross:.2}")));
            }
        }

        if let (Some(net), Some(vat), Some(gross)) =
            (invoice.net_amount, invoice.vat_amount, invoice.gross_amount)
        {
            let calculated = net + vat;
            // compare in cents to keep float noise out of the tolerance
            let diff_cents = ((calculated - gross) * 100.0).round().abs();
            if diff_cents > (self.tolerance * 100.0).round() {
                issues.push(soft(
                    "gross_amount",
                    "sum_mismatch",
                    format!("Net + VAT does not match gross: {net:.2} + {vat:.2} = {calculated:.2} != {gross:.2}"),
                ));
            }
        }
    }

    fn check_dates(&self, invoice: &Invoice, today: NaiveDate, issues: &mut Vec<ValidationIssue>) {
        let invoice_date = invoice.invoice_date.as_deref().and_then(|raw| {
            let parsed = iso_date(raw);
            if parsed.is_none() {
                issues.push(soft("invoice_date", "invalid_date", format!("Invalid date format: {raw}")));
            }
            parsed
        });

        if let Some(date) = invoice_date {
            let age = (today - date).num_days();
            if age > MAX_AGE_DAYS {
                issues.push(soft("invoice_date", "date_too_old", format!("Invoice date too far in the past: {date}")));
            }
            if -age > MAX_FUTURE_DAYS {
                issues.push(soft("invoice_date", "date_in_future", format!("Invoice date too far in the future: {date}")));
            }
        }

        let due_date = invoice.due_date.as_deref().and_then(|raw| {
            let parsed = iso_date(raw);
            if parsed.is_none() {
                issues.push(soft("due_date", "invalid_date", format!("Invalid due date format: {raw}")));
            }
            parsed
        });

        if let (Some(date), Some(due)) = (invoice_date, due_date) {
            if due < date {
                issues.push(soft(
                    "due_date",
                    "due_before_invoice",
                    format!("Due date ({due}) is before invoice date ({date})"),
                ));
            }
        }
    }

    fn check_iban(&self, iban: &str, issues: &mut Vec<ValidationIssue>) {
        let iban = compact(iban);
        if !self.iban_format.is_match(&iban) {
            issues.push(soft("iban", "iban_format", format!("Invalid IBAN format: {iban}")));
            return;
        }
        if let Some((country, expected)) = IBAN_LENGTHS
            .iter()
            .find(|(country, _)| iban.starts_with(country))
        {
            if iban.len() != *expected {
                issues.push(soft(
                    "iban",
                    "iban_length",
                    format!("{country} IBAN must have {expected} characters, got {}", iban.len()),
                ));
                return;
            }
        }
        if !iban_checksum_ok(&iban) {
            issues.push(soft("iban", "iban_checksum", format!("IBAN checksum invalid: {iban}")));
        }
    }

    fn is_valid_vat_id(&self, vat_id: &str) -> bool {
        match self
            .vat_patterns
            .iter()
            .find(|(country, _)| vat_id.starts_with(country))
        {
            Some((_, pattern)) => pattern.is_match(vat_id),
            None => self.vat_generic.is_match(vat_id),
        }
    }
}

/// ISO 13616 mod-97 check on a compacted, uppercase IBAN.
pub fn iban_checksum_ok(iban: &str) -> bool {
    if iban.len() < 5 || !iban.is_ascii() {
        return false;
    }
    let rearranged = format!("{}{}", &iban[4..], &iban[..4]);
    let mut remainder: u32 = 0;
    for c in rearranged.chars() {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder == 1
}

fn iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

fn hard(field: &str, code: &str, message: String) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        code: code.to_string(),
        severity: Severity::Hard,
        message,
    }
}

fn soft(field: &str, code: &str, message: String) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        code: code.to_string(),
        severity: Severity::Soft,
        message,
    }
}

fn is_present(invoice: &Invoice, field: &str) -> bool {
    let text = |value: &Option<String>| value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false);
    match field {
        "invoice_number" => text(&invoice.invoice_number),
        "invoice_date" => text(&invoice.invoice_date),
        "due_date" => text(&invoice.due_date),
        "supplier_name" => text(&invoice.supplier_name),
        "supplier_address" => text(&invoice.supplier_address),
        "recipient_name" => text(&invoice.recipient_name),
        "customer_number" => text(&invoice.customer_number),
        "gross_amount" => invoice.gross_amount.is_some(),
        "net_amount" => invoice.net_amount.is_some(),
        "vat_amount" => invoice.vat_amount.is_some(),
        "iban" => text(&invoice.iban),
        "bic" => text(&invoice.bic),
        "tax_number" => text(&invoice.tax_number),
        "vat_id" => text(&invoice.vat_id),
        "payment_reference" => text(&invoice.payment_reference),
        _ => true,
    }
}

pub struct DataCleaner;

impl DataCleaner {
    pub fn clean(mut data: ExtractedInvoiceData) -> ExtractedInvoiceData {
        data.iban = non_empty(data.iban).map(|v| compact(&v));
        data.bic = non_empty(data.bic).map(|v| compact(&v));
        data.vat_id = non_empty(data.vat_id).map(|v| compact(&v));
        data.tax_number = non_empty(data.tax_number);
        data.currency = Some(
            non_empty(data.currency)
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| "EUR".to_string()),
        );

        data.gross_amount = data.gross_amount.map(round2);
        data.net_amount = data.net_amount.map(round2);
        data.vat_amount = data.vat_amount.map(round2);

        data.supplier_name = non_empty(data.supplier_name);
        data.recipient_name = non_empty(data.recipient_name);
        data.invoice_number = non_empty(data.invoice_number);
        data.invoice_date = normalize_date(data.invoice_date);
        data.due_date = normalize_date(data.due_date);

        Self::fix_swapped_tax_ids(&mut data);
        data
    }

    /// `DE` + 9 digits is a VAT ID; a value with `/` is a tax number.
    fn fix_swapped_tax_ids(data: &mut ExtractedInvoiceData) {
        let looks_like_vat_id = |value: &str| {
            let compacted = compact(value);
            compacted.len() == 11
                && compacted.starts_with("DE")
                && compacted[2..].chars().all(|c| c.is_ascii_digit())
        };

        if data.vat_id.is_none() && data.tax_number.as_deref().map(looks_like_vat_id).unwrap_or(false) {
            data.vat_id = data.tax_number.take().map(|v| compact(&v));
        }
        if data.tax_number.is_none() && data.vat_id.as_deref().map(|v| v.contains('/')).unwrap_or(false) {
            data.tax_number = data.vat_id.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    fn validator(strict: bool) -> Validator {
        let config = ProcessingConfig {
            strict_validation: strict,
            ..ProcessingConfig::default()
        };
        Validator::new(&config).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn clean_invoice_has_no_issues() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.iban = Some("DE89370400440532013000".into());
        invoice.vat_id = Some("DE123456789".into());
        invoice.bic = Some("COBADEFFXXX".into());
        let outcome = validator(true).validate(&invoice, today());
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        assert!(!outcome.blocked);
    }

    #[test]
    fn iban_checksum() {
        assert!(iban_checksum_ok("DE89370400440532013000"));
        assert!(iban_checksum_ok("GB82WEST12345698765432"));
        assert!(!iban_checksum_ok("DE89370400440532013001"));
        assert!(!iban_checksum_ok("DE"));
    }

    #[test]
    fn malformed_iban_is_always_flagged() {
        let v = validator(false);
        for (iban, code) in [
            ("DE8937040044053201300", "iban_length"),
            ("DE89370400440532013001", "iban_checksum"),
            ("1234", "iban_format"),
            ("DE89-3704", "iban_format"),
        ] {
            let mut invoice = sample_invoice(&owner("u1"), "RE-1");
            invoice.iban = Some(iban.into());
            let outcome = v.validate(&invoice, today());
            assert!(outcome.has_issue(code), "{iban}: {:?}", outcome.issues);
        }
    }

    #[test]
    fn sum_mismatch_respects_tolerance() {
        let v = validator(false);
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.gross_amount = Some(119.02);
        assert!(!v.validate(&invoice, today()).has_issue("sum_mismatch"));

        invoice.gross_amount = Some(119.03);
        let outcome = v.validate(&invoice, today());
        assert!(outcome.has_issue("sum_mismatch"));
        assert!(!outcome.blocked);
    }

    #[test]
    fn missing_required_blocks_only_in_strict_mode() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.invoice_number = None;

        let lenient = validator(false).validate(&invoice, today());
        assert!(lenient.has_issue("missing_required"));
        assert!(!lenient.blocked);

        let strict = validator(true).validate(&invoice, today());
        assert!(strict.blocked);
    }

    #[test]
    fn date_rules() {
        let v = validator(false);
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.invoice_date = Some("2010-01-01".into());
        assert!(v.validate(&invoice, today()).has_issue("date_too_old"));

        invoice.invoice_date = Some("2026-01-01".into());
        assert!(v.validate(&invoice, today()).has_issue("date_in_future"));

        invoice.invoice_date = Some("2024-05-10".into());
        invoice.due_date = Some("2024-05-01".into());
        assert!(v.validate(&invoice, today()).has_issue("due_before_invoice"));

        invoice.invoice_date = Some("15.03.2024".into());
        assert!(v.validate(&invoice, today()).has_issue("invalid_date"));
    }

    #[test]
    fn vat_id_patterns() {
        let v = validator(false);
        assert!(v.is_valid_vat_id("DE123456789"));
        assert!(!v.is_valid_vat_id("DE12345678"));
        assert!(v.is_valid_vat_id("ATU12345678"));
        assert!(!v.is_valid_vat_id("AT12345678"));
        assert!(v.is_valid_vat_id("NL123456789B01"));
        assert!(v.is_valid_vat_id("SE123456789701"));
        assert!(!v.is_valid_vat_id("123456789"));
    }

    #[test]
    fn cleaner_normalizes_and_swaps_tax_ids() {
        let data = ExtractedInvoiceData {
            iban: Some("de89 3704 0044 0532 0130 00".into()),
            currency: Some("eur".into()),
            gross_amount: Some(119.004),
            supplier_name: Some("  Muster GmbH ".into()),
            invoice_date: Some("15.03.2024".into()),
            tax_number: Some("DE 123456789".into()),
            ..ExtractedInvoiceData::default()
        };
        let cleaned = DataCleaner::clean(data);
        assert_eq!(cleaned.iban.as_deref(), Some("DE89370400440532013000"));
        assert_eq!(cleaned.currency.as_deref(), Some("EUR"));
        assert_eq!(cleaned.gross_amount, Some(119.0));
        assert_eq!(cleaned.supplier_name.as_deref(), Some("Muster GmbH"));
        assert_eq!(cleaned.invoice_date.as_deref(), Some("2024-03-15"));
        assert_eq!(cleaned.vat_id.as_deref(), Some("DE123456789"));
        assert!(cleaned.tax_number.is_none());

        let swapped = DataCleaner::clean(ExtractedInvoiceData {
            vat_id: Some("15/082/3055/7".into()),
            ..ExtractedInvoiceData::default()
        });
        assert_eq!(swapped.tax_number.as_deref(), Some("15/082/3055/7"));
        assert!(swapped.vat_id.is_none());
    }
}
