/// Longest document text sent to a backend, in characters.
const MAX_PROMPT_CHARS: usize = 60_000;

pub fn system_prompt() -> String {
    r#"You are an invoice extraction system for German and European business invoices.
Return exactly one JSON object and nothing else. Use null for values that are not on the document.
Fields:
- invoice_number (string|null)
- invoice_date (YYYY-MM-DD|null)
- due_date (YYYY-MM-DD|null)
- payment_terms_days (integer|null)
- supplier_name (string|null): the company that ISSUES the invoice, usually in the letterhead. Never a customer number, a person or a tax ID.
- supplier_address (string|null)
- recipient_name (string|null): the customer receiving the invoice
- recipient_address (string|null)
- customer_number (string|null)
- net_amount (number|null)
- vat_amount (number|null)
- vat_rate (number|null, percent)
- gross_amount (number|null)
- currency (ISO code|null)
- iban (string|null)
- bic (string|null)
- tax_number (string|null): Steuernummer of the supplier, usually in the footer, contains "/"
- vat_id (string|null): USt-IdNr of the supplier, country prefix plus digits, e.g. DE123456789
- payment_terms (string|null)
- payment_reference (string|null)
- line_items (array of {position, description, quantity, unit_price, total})
- confidence (number 0..1): your confidence in the extraction
A value like DE123456789 belongs in vat_id, never in tax_number. A value with "/" belongs in tax_number.
"#
    .to_string()
}

pub fn user_prompt(text: &str) -> String {
    let text: String = text.chars().take(MAX_PROMPT_CHARS).collect();
    format!("Invoice text:\n{}", text)
}

pub fn repair_prompt(raw: &str) -> String {
    format!(
        "Fix this JSON so that it matches the field list exactly. Keep every key, use null for unknown values. Output JSON only. JSON:\n{}",
        raw
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_is_bounded() {
        let long = "x".repeat(MAX_PROMPT_CHARS + 100);
        assert_eq!(user_prompt(&long).chars().count(), "Invoice text:\n".len() + MAX_PROMPT_CHARS);
        assert!(system_prompt().contains("gross_amount"));
    }
}
