//! DATEV "Buchungsstapel" (EXTF format 300, version 21) export.
//!
//! One booking line per invoice: gross amount on the configured expense
//! account against the configured contra account, encoded in Windows-1252.

use chrono::NaiveDate;
use encoding_rs::WINDOWS_1252;

use crate::config::DatevConfig;
use crate::models::Invoice;
use crate::utils::{format_decimal_comma, parse_date, truncate_chars};

const MAX_BELEGFELD: usize = 36;
const MAX_BUCHUNGSTEXT: usize = 60;
const MAX_ZUSATZINFO: usize = 210;

const COLUMNS: &[&str] = &[
    "Umsatz (ohne Soll/Haben-Kz)",
    "Soll/Haben-Kennzeichen",
    "WKZ Umsatz",
    "Kurs",
    "Basis-Umsatz",
    "WKZ Basis-Umsatz",
    "Konto",
    "Gegenkonto (ohne BU-Schlüssel)",
    "BU-Schlüssel",
    "Belegdatum",
    "Belegfeld 1",
    "Belegfeld 2",
    "Skonto",
    "Buchungstext",
    "Postensperre",
    "Diverse Adressnummer",
    "Geschäftspartnerbank",
    "Sachverhalt",
    "Zinssperre",
    "Beleglink",
    "Beleginfo - Art 1",
    "Beleginfo - Inhalt 1",
    "Beleginfo - Art 2",
    "Beleginfo - Inhalt 2",
    "Beleginfo - Art 3",
    "Beleginfo - Inhalt 3",
    "Beleginfo - Art 4",
    "Beleginfo - Inhalt 4",
    "Beleginfo - Art 5",
    "Beleginfo - Inhalt 5",
    "Beleginfo - Art 6",
    "Beleginfo - Inhalt 6",
    "Beleginfo - Art 7",
    "Beleginfo - Inhalt 7",
    "Beleginfo - Art 8",
    "Beleginfo - Inhalt 8",
    "KOST1 - Kostenstelle",
    "KOST2 - Kostenstelle",
    "KOST-Menge",
    "EU-Land u. UStID",
    "EU-Steuersatz",
    "Abw. Versteuerungsart",
    "Sachverhalt L+L",
    "Funktionsergänzung L+L",
    "BU 49 Hauptfunktionstyp",
    "BU 49 Hauptfunktionsnummer",
    "BU 49 Funktionsergänzung",
    "Zusatzinformation - Art 1",
    "Zusatzinformation - Inhalt 1",
];

// Column positions used when filling a booking line.
const COL_BUCHUNGSTEXT: usize = 13;
const COL_KOST1: usize = 36;
const COL_KOST2: usize = 37;
const COL_ZUSATZINFO: usize = 48;

/// Full export as Windows-1252 bytes. Characters outside the code page are
/// replaced by the encoder.
pub fn to_datev(invoices: &[Invoice], config: &DatevConfig) -> Vec<u8> {
    let text = render(invoices, config, chrono::Local::now().date_naive());
    let (bytes, _, had_unmappable) = WINDOWS_1252.encode(&text);
    if had_unmappable {
        tracing::warn!("DATEV export contains characters outside Windows-1252");
    }
    bytes.into_owned()
}

fn render(invoices: &[Invoice], config: &DatevConfig, today: NaiveDate) -> String {
    let mut lines = Vec::with_capacity(invoices.len() + 2);
    lines.push(header_line(config));
    lines.push(COLUMNS.join(";"));
    for invoice in invoices {
        lines.push(booking_line(invoice, config, today).join(";"));
    }
    let mut text = lines.join("\r\n");
    text.push_str("\r\n");
    text
}

fn header_line(config: &DatevConfig) -> String {
    let mut fields = vec![String::new(); 21];
    fields[0] = "EXTF".into();
    fields[1] = "300".into();
    fields[2] = "21".into();
    fields[3] = "Buchungsstapel".into();
    fields[4] = "5".into();
    fields[11] = config.currency.clone();
    fields.join(";")
}

fn booking_line(invoice: &Invoice, config: &DatevConfig, today: NaiveDate) -> Vec<String> {
    let mut fields = vec![String::new(); COLUMNS.len()];
    let currency = if invoice.currency.trim().is_empty() {
        config.currency.clone()
    } else {
        invoice.currency.clone()
    };
    let belegdatum = invoice
        .invoice_date
        .as_deref()
        .and_then(parse_date)
        .unwrap_or(today);

    fields[0] = format_decimal_comma(invoice.gross_amount.unwrap_or(0.0).abs());
    fields[1] = "S".into();
    fields[2] = currency;
    fields[6] = config.sachkonto.clone();
    fields[7] = config.gegenkonto.clone();
    fields[9] = belegdatum.format("%d%m").to_string();
    fields[10] = field_text(invoice.invoice_number.as_deref(), "KEINE", MAX_BELEGFELD);
    fields[COL_BUCHUNGSTEXT] =
        field_text(invoice.supplier_name.as_deref(), "Unbekannt", MAX_BUCHUNGSTEXT);
    fields[COL_KOST1] = config.kostenstelle_1.clone();
    fields[COL_KOST2] = config.kostenstelle_2.clone();
    fields[COL_ZUSATZINFO] = field_text(invoice.payment_reference.as_deref(), "", MAX_ZUSATZINFO);
    fields
}

/// Separators and line breaks would shift columns, so they become spaces.
fn field_text(value: Option<&str>, fallback: &str, max: usize) -> String {
    let value = value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(fallback);
    let cleaned: String = value
        .chars()
        .map(|c| if matches!(c, ';' | '\r' | '\n' | '"') { ' ' } else { c })
        .collect();
    truncate_chars(&cleaned, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn header_and_column_lines() {
        let text = render(&[], &DatevConfig::default(), today());
        let mut lines = text.split("\r\n");
        let header = lines.next().unwrap();
        assert!(header.starts_with("EXTF;300;21;Buchungsstapel;5;"));
        assert_eq!(header.split(';').count(), 21);
        assert_eq!(header.split(';').nth(11), Some("EUR"));
        assert_eq!(lines.next().unwrap().split(';').count(), COLUMNS.len());
    }

    #[test]
    fn booking_line_carries_amount_accounts_and_date() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.payment_reference = Some("RE-1; Kunde 42".into());
        let config = DatevConfig {
            kostenstelle_1: "100".into(),
            ..DatevConfig::default()
        };
        let text = render(&[invoice], &config, today());
        let line = text.split("\r\n").nth(2).unwrap();
        let fields: Vec<&str> = line.split(';').collect();
        assert_eq!(fields.len(), COLUMNS.len());
        assert!(line.starts_with("119,00;S;EUR;;;;4900;1200;;1503;RE-1;"));
        assert_eq!(fields[COL_BUCHUNGSTEXT], "Muster GmbH");
        assert_eq!(fields[COL_KOST1], "100");
        assert_eq!(fields[COL_ZUSATZINFO], "RE-1  Kunde 42");
    }

    #[test]
    fn missing_fields_fall_back() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.invoice_number = None;
        invoice.supplier_name = None;
        invoice.invoice_date = None;
        let text = render(&[invoice], &DatevConfig::default(), today());
        let fields: Vec<String> = text
            .split("\r\n")
            .nth(2)
            .unwrap()
            .split(';')
            .map(String::from)
            .collect();
        assert_eq!(fields[9], "0106");
        assert_eq!(fields[10], "KEINE");
        assert_eq!(fields[COL_BUCHUNGSTEXT], "Unbekannt");
    }

    #[test]
    fn encodes_umlauts_as_windows_1252() {
        let mut invoice = sample_invoice(&owner("u1"), "RE-1");
        invoice.supplier_name = Some("Müller GmbH".into());
        let bytes = to_datev(&[invoice], &DatevConfig::default());
        assert!(bytes.windows(2).any(|w| w == [b'M', 0xFC]));
        let (decoded, _, errors) = WINDOWS_1252.decode(&bytes);
        assert!(!errors);
        assert!(decoded.contains("Müller GmbH"));
    }
}
