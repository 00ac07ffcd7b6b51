use anyhow::{anyhow, Result};
use rust_xlsxwriter::{Format, Workbook};
use serde_json::json;

use crate::config::{DatevConfig, APP_VERSION};
use crate::models::Invoice;
use crate::services::datev;
use crate::utils::{format_decimal_comma, now_rfc3339};

const SHEET_NAME: &str = "Rechnungen";
const MAX_COLUMN_WIDTH: usize = 50;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Json,
    Datev,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Some(ExportFormat::Xlsx),
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            "datev" => Some(ExportFormat::Datev),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Datev => "datev",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Datev => "text/csv; charset=windows-1252",
        }
    }

    fn file_name(&self, prefix: &str) -> String {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        match self {
            ExportFormat::Xlsx => format!("{prefix}_export_{stamp}.xlsx"),
            ExportFormat::Csv => format!("{prefix}_export_{stamp}.csv"),
            ExportFormat::Json => format!("{prefix}_export_{stamp}.json"),
            ExportFormat::Datev => format!("datev_export_{stamp}.csv"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Renders invoices (overrides already applied) in the requested format.
pub fn export(format: ExportFormat, invoices: &[Invoice], datev_config: &DatevConfig) -> Result<ExportFile> {
    let bytes = match format {
        ExportFormat::Xlsx => to_xlsx(invoices)?,
        ExportFormat::Csv => to_csv(invoices)?,
        ExportFormat::Json => to_json(invoices)?,
        ExportFormat::Datev => datev::to_datev(invoices, datev_config),
    };
    tracing::debug!(format = format.as_str(), invoices = invoices.len(), bytes = bytes.len(), "Export rendered");
    Ok(ExportFile {
        file_name: format.file_name("rechnungen"),
        content_type: format.content_type(),
        bytes,
    })
}

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: &Option<String>) -> Cell {
        match value {
            Some(v) if !v.is_empty() => Cell::Text(v.clone()),
            _ => Cell::Empty,
        }
    }

    fn number(value: Option<f64>) -> Cell {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }

    fn display(&self) -> String {
        match self {
            Cell::Text(v) => v.clone(),
            Cell::Number(v) => format_decimal_comma(*v),
            Cell::Empty => String::new(),
        }
    }
}

/// Column order: identification, supplier, recipient, amounts, payment, tax,
/// then bookkeeping metadata.
const COLUMNS: &[&str] = &[
    "Rechnungsnummer",
    "Datum",
    "Fälligkeitsdatum",
    "Zahlungsziel (Tage)",
    "Rechnungsaussteller",
    "Aussteller-Adresse",
    "Rechnungsempfänger",
    "Empfänger-Adresse",
    "Kundennummer",
    "Betrag brutto",
    "Betrag netto",
    "MwSt-Betrag",
    "MwSt-Satz",
    "Währung",
    "IBAN",
    "BIC",
    "Zahlungsbedingungen",
    "Steuernummer",
    "USt-IdNr",
    "Verwendungszweck",
    "Dateiname",
    "Status",
    "Prüfstatus",
    "Hinweise",
    "Duplikat von",
    "Erfasst am",
];

fn row(invoice: &Invoice) -> Vec<Cell> {
    let issues = invoice
        .validation_issues
        .iter()
        .map(|issue| issue.message.clone())
        .collect::<Vec<_>>()
        .join(" | ");
    vec![
        Cell::text(&invoice.invoice_number),
        Cell::text(&invoice.invoice_date),
        Cell::text(&invoice.due_date),
        Cell::number(invoice.payment_terms_days.map(|d| d as f64)),
        Cell::text(&invoice.supplier_name),
        Cell::text(&invoice.supplier_address),
        Cell::text(&invoice.recipient_name),
        Cell::text(&invoice.recipient_address),
        Cell::text(&invoice.customer_number),
        Cell::number(invoice.gross_amount),
        Cell::number(invoice.net_amount),
        Cell::number(invoice.vat_amount),
        Cell::number(invoice.vat_rate),
        Cell::Text(invoice.currency.clone()),
        Cell::text(&invoice.iban),
        Cell::text(&invoice.bic),
        Cell::text(&invoice.payment_terms),
        Cell::text(&invoice.tax_number),
        Cell::text(&invoice.vat_id),
        Cell::text(&invoice.payment_reference),
        Cell::Text(invoice.file_name.clone()),
        Cell::Text(invoice.ingestion_status.as_str().to_string()),
        Cell::Text(invoice.review_status.as_str().to_string()),
        if issues.is_empty() { Cell::Empty } else { Cell::Text(issues) },
        Cell::text(&invoice.duplicate_of),
        Cell::Text(invoice.created_at.clone()),
    ]
}

fn to_xlsx(invoices: &[Invoice]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;
    let bold = Format::new().set_bold();

    let mut widths: Vec<usize> = COLUMNS.iter().map(|h| h.chars().count()).collect();
    for (col, header) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }

    for (index, invoice) in invoices.iter().enumerate() {
        let row_no = (index + 1) as u32;
        for (col, cell) in row(invoice).into_iter().enumerate() {
            let col_no = col as u16;
            match &cell {
                Cell::Text(text) => {
                    sheet.write_string(row_no, col_no, text)?;
                }
                Cell::Number(value) => {
                    sheet.write_number(row_no, col_no, *value)?;
                }
                Cell::Empty => {}
            }
            widths[col] = widths[col].max(cell.display().chars().count());
        }
    }

    for (col, width) in widths.iter().enumerate() {
        sheet.set_column_width(col as u16, ((width + 2).min(MAX_COLUMN_WIDTH)) as f64)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    Ok(workbook.save_to_buffer()?)
}

fn to_csv(invoices: &[Invoice]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(UTF8_BOM.to_vec());
    writer.write_record(COLUMNS)?;
    for invoice in invoices {
        writer.write_record(row(invoice).iter().map(Cell::display))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Finish CSV: {}", e.error()))
}

fn to_json(invoices: &[Invoice]) -> Result<Vec<u8>> {
    let document = json!({
        "metadata": {
            "export_date": now_rfc3339(),
            "total_invoices": invoices.len(),
            "version": APP_VERSION,
        },
        "invoices": invoices,
    });
    Ok(serde_json::to_vec_pretty(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    fn invoices() -> Vec<Invoice> {
        let mut first = sample_invoice(&owner("u1"), "RE-1");
        first.supplier_name = Some("Müller; Söhne GmbH".into());
        vec![first, sample_invoice(&owner("u1"), "RE-2")]
    }

    #[test]
    fn csv_has_bom_semicolons_and_comma_decimals() {
        let file = export(ExportFormat::Csv, &invoices(), &DatevConfig::default()).unwrap();
        assert!(file.bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(file.bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Rechnungsnummer;Datum;"));
        let first = lines.next().unwrap();
        assert!(first.contains("\"Müller; Söhne GmbH\""));
        assert!(first.contains(";119,00;100,00;19,00;"));
        assert!(file.file_name.ends_with(".csv"));
    }

    #[test]
    fn json_carries_metadata() {
        let file = export(ExportFormat::Json, &invoices(), &DatevConfig::default()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&file.bytes).unwrap();
        assert_eq!(value["metadata"]["total_invoices"], 2);
        assert_eq!(value["invoices"][1]["invoice_number"], "RE-2");
        assert!(value["invoices"][0].get("ocr_text").is_none());
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let file = export(ExportFormat::Xlsx, &invoices(), &DatevConfig::default()).unwrap();
        assert!(file.bytes.starts_with(b"PK"));
        assert_eq!(file.content_type, ExportFormat::Xlsx.content_type());
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(ExportFormat::parse("XLSX"), Some(ExportFormat::Xlsx));
        assert_eq!(ExportFormat::parse("datev"), Some(ExportFormat::Datev));
        assert_eq!(ExportFormat::parse("pptx"), None);
    }
}
