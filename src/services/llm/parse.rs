use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};

use super::ProviderError;
use crate::models::{ExtractedInvoiceData, LineItem};
use crate::utils::{non_empty, parse_decimal};

const FIELD_ALIASES: &[(&str, &str)] = &[
    ("rechnungsnummer", "invoice_number"),
    ("datum", "invoice_date"),
    ("rechnungsdatum", "invoice_date"),
    ("faelligkeitsdatum", "due_date"),
    ("fälligkeitsdatum", "due_date"),
    ("zahlungsziel_tage", "payment_terms_days"),
    ("rechnungsaussteller", "supplier_name"),
    ("rechnungsaussteller_adresse", "supplier_address"),
    ("rechnungsempfänger", "recipient_name"),
    ("rechnungsempfaenger", "recipient_name"),
    ("rechnungsempfänger_adresse", "recipient_address"),
    ("rechnungsempfaenger_adresse", "recipient_address"),
    ("kundennummer", "customer_number"),
    ("betrag_brutto", "gross_amount"),
    ("betrag_netto", "net_amount"),
    ("mwst_betrag", "vat_amount"),
    ("mwst_satz", "vat_rate"),
    ("waehrung", "currency"),
    ("währung", "currency"),
    ("steuernummer", "tax_number"),
    ("ust_idnr", "vat_id"),
    ("zahlungsbedingungen", "payment_terms"),
    ("verwendungszweck", "payment_reference"),
    ("artikel", "line_items"),
    ("total_amount", "gross_amount"),
    ("tax_amount", "vat_amount"),
    ("counterparty_name", "supplier_name"),
    ("confidence_score", "confidence"),
];

const LINE_ITEM_ALIASES: &[(&str, &str)] = &[
    ("beschreibung", "description"),
    ("menge", "quantity"),
    ("einzelpreis", "unit_price"),
    ("gesamt", "total"),
    ("gesamtpreis", "total"),
];

/// Strips Markdown fences and surrounding prose, then parses the outermost
/// JSON object and maps field names to their canonical form.
pub fn parse_response(raw: &str) -> Result<Value, ProviderError> {
    let body = strip_fences(raw);
    let start = body.find('{');
    let end = body.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => {
            return Err(ProviderError::MalformedResponse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(object)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ProviderError::MalformedResponse("expected a JSON object".into()));
    }
    Ok(canonicalize(value))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (```json)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn canonicalize(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut out = Map::new();
    for (key, value) in map {
        let lowered = key.to_lowercase();
        let canonical = FIELD_ALIASES
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, name)| name.to_string())
            .unwrap_or(lowered);
        let value = if canonical == "line_items" {
            canonicalize_items(value)
        } else {
            value
        };
        // canonical keys win over aliases
        if out.contains_key(&canonical) && key.to_lowercase() != canonical {
            continue;
        }
        out.insert(canonical, value);
    }
    Value::Object(out)
}

fn canonicalize_items(value: Value) -> Value {
    let Value::Array(items) = value else {
        return value;
    };
    Value::Array(
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Value::Object(
                    map.into_iter()
                        .map(|(key, value)| {
                            let lowered = key.to_lowercase();
                            let canonical = LINE_ITEM_ALIASES
                                .iter()
                                .find(|(alias, _)| *alias == lowered)
                                .map(|(_, name)| name.to_string())
                                .unwrap_or(lowered);
                            (canonical, value)
                        })
                        .collect(),
                ),
                other => other,
            })
            .collect(),
    )
}

fn extraction_schema() -> Value {
    let text = json!({"type": ["string", "number", "null"]});
    let amount = json!({"type": ["number", "string", "null"]});
    json!({
        "type": "object",
        "required": ["invoice_number", "invoice_date", "supplier_name", "gross_amount"],
        "properties": {
            "invoice_number": text,
            "invoice_date": {"type": ["string", "null"]},
            "due_date": {"type": ["string", "null"]},
            "payment_terms_days": {"type": ["integer", "string", "null"]},
            "supplier_name": {"type": ["string", "null"]},
            "supplier_address": {"type": ["string", "null"]},
            "recipient_name": {"type": ["string", "null"]},
            "recipient_address": {"type": ["string", "null"]},
            "customer_number": text,
            "gross_amount": amount,
            "net_amount": amount,
            "vat_amount": amount,
            "vat_rate": amount,
            "currency": {"type": ["string", "null"]},
            "iban": {"type": ["string", "null"]},
            "bic": {"type": ["string", "null"]},
            "tax_number": text,
            "vat_id": {"type": ["string", "null"]},
            "payment_terms": {"type": ["string", "null"]},
            "payment_reference": {"type": ["string", "null"]},
            "line_items": {"type": ["array", "null"], "items": {"type": "object"}},
            "confidence": {"type": ["number", "string", "null"]}
        }
    })
}

/// Returns the first schema violation, if any.
pub fn check_schema(value: &Value) -> Result<(), String> {
    let schema = extraction_schema();
    let compiled = JSONSchema::compile(&schema).map_err(|e| format!("schema: {e}"))?;
    let result = compiled.validate(value);
    match result {
        Ok(()) => Ok(()),
        Err(mut errors) => Err(errors
            .next()
            .map(|e| format!("{} at {}", e, e.instance_path))
            .unwrap_or_else(|| "schema violation".to_string())),
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => non_empty(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    amount_value(map.get(key)?)
}

fn amount_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s).ok(),
        _ => None,
    }
}

/// Maps a schema-valid object onto the canonical field set. Unparsable
/// values become `None` and surface later as validation findings.
pub fn into_extracted(value: &Value) -> ExtractedInvoiceData {
    let empty = Map::new();
    let map = value.as_object().unwrap_or(&empty);

    let line_items = map
        .get("line_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| LineItem {
                    position: item.get("position").and_then(amount_value).map(|p| p as i64),
                    description: text_field(item, "description"),
                    quantity: amount_field(item, "quantity"),
                    unit_price: amount_field(item, "unit_price"),
                    total: amount_field(item, "total"),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut data = ExtractedInvoiceData {
        invoice_number: text_field(map, "invoice_number"),
        invoice_date: text_field(map, "invoice_date"),
        due_date: text_field(map, "due_date"),
        payment_terms_days: map
            .get("payment_terms_days")
            .and_then(amount_value)
            .map(|days| days.round() as i64),
        supplier_name: text_field(map, "supplier_name"),
        supplier_address: text_field(map, "supplier_address"),
        recipient_name: text_field(map, "recipient_name"),
        recipient_address: text_field(map, "recipient_address"),
        customer_number: text_field(map, "customer_number"),
        gross_amount: amount_field(map, "gross_amount"),
        net_amount: amount_field(map, "net_amount"),
        vat_amount: amount_field(map, "vat_amount"),
        vat_rate: amount_field(map, "vat_rate"),
        currency: text_field(map, "currency"),
        iban: text_field(map, "iban"),
        bic: text_field(map, "bic"),
        tax_number: text_field(map, "tax_number"),
        vat_id: text_field(map, "vat_id"),
        payment_terms: text_field(map, "payment_terms"),
        payment_reference: text_field(map, "payment_reference"),
        line_items,
        confidence: amount_field(map, "confidence").map(normalize_confidence),
        extraction_notes: text_field(map, "extraction_notes"),
    };

    if data.currency.is_none() {
        data.currency = Some("EUR".to_string());
    }
    if data.confidence.is_none() {
        data.confidence = Some(compute_confidence(&data));
    }
    data
}

/// Accepts 0..1 and 0..100 scales.
fn normalize_confidence(value: f64) -> f64 {
    let value = if value > 1.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

pub fn compute_confidence(data: &ExtractedInvoiceData) -> f64 {
    let mut score: f64 = 0.4;
    if data.invoice_number.is_some() {
        score += 0.1;
    }
    if data.invoice_date.is_some() {
        score += 0.1;
    }
    if data.supplier_name.is_some() {
        score += 0.1;
    }
    if data.gross_amount.is_some() {
        score += 0.1;
    }
    if data.vat_amount.is_some() || data.net_amount.is_some() {
        score += 0.05;
    }
    if data.iban.is_some() || data.vat_id.is_some() {
        score += 0.05;
    }
    score.clamp(0.0, 1.0)
}
