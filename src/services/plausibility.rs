use chrono::{Duration, NaiveDate};
use rusqlite::Result as SqlResult;
use serde_json::json;

use crate::db::Database;
use crate::models::{Invoice, PlausibilityCheck};
use crate::utils::{now_rfc3339, round2};

const HISTORY_DAYS: i64 = 90;
const MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub check_type: &'static str,
    pub severity: &'static str,
    pub confidence: f64,
    pub details: serde_json::Value,
}

pub fn amount_outlier(gross: f64, history: &[f64]) -> Option<Finding> {
    if history.len() < MIN_SAMPLES {
        return None;
    }
    let n = history.len() as f64;
    let mean = history.iter().sum::<f64>() / n;
    let variance = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stdev = variance.sqrt();
    if stdev <= f64::EPSILON {
        return None;
    }

    let z = ((gross - mean) / stdev).abs();
    let (severity, confidence) = if z > 3.0 {
        ("high", 0.95)
    } else if z > 2.0 {
        ("medium", 0.85)
    } else {
        return None;
    };

    let mut sorted = history.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Some(Finding {
        check_type: "amount_outlier",
        severity,
        confidence,
        details: json!({
            "current_amount": gross,
            "historical_avg": round2(mean),
            "historical_median": round2(median),
            "z_score": round2(z),
            "sample_size": history.len(),
        }),
    })
}

pub fn unusual_change(gross: f64, last: f64) -> Option<Finding> {
    if last <= 0.0 {
        return None;
    }
    let change = ((gross - last) / last * 100.0).abs();
    let (severity, confidence) = if change > 100.0 {
        ("high", 0.8)
    } else if change > 50.0 {
        ("medium", 0.7)
    } else {
        return None;
    };
    Some(Finding {
        check_type: "unusual_change",
        severity,
        confidence,
        details: json!({
            "current_amount": gross,
            "last_amount": last,
            "change_percent": (change * 10.0).round() / 10.0,
        }),
    })
}

/// Runs both checks for an invoice and replaces its stored findings.
pub fn run_checks(db: &Database, invoice: &Invoice, today: NaiveDate) -> SqlResult<Vec<PlausibilityCheck>> {
    let mut findings = Vec::new();
    if let (Some(supplier), Some(gross)) = (invoice.supplier_name.as_deref(), invoice.gross_amount) {
        let since = (today - Duration::days(HISTORY_DAYS)).format("%Y-%m-%d").to_string();
        let history = db.supplier_amounts_since(&invoice.owner_key, supplier, &since, &invoice.id)?;
        findings.extend(amount_outlier(gross, &history));

        if let Some(last) = db.latest_supplier_amount(&invoice.owner_key, supplier, &invoice.id)? {
            findings.extend(unusual_change(gross, last));
        }
    }

    let now = now_rfc3339();
    let checks = findings
        .into_iter()
        .map(|finding| PlausibilityCheck {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: invoice.id.clone(),
            check_type: finding.check_type.to_string(),
            severity: finding.severity.to_string(),
            confidence: finding.confidence,
            details: finding.details,
            created_at: now.clone(),
        })
        .collect::<Vec<_>>();

    if !checks.is_empty() {
        tracing::info!(invoice_id = %invoice.id, findings = checks.len(), "Plausibility findings");
    }
    db.replace_plausibility_checks(&invoice.id, &checks)?;
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};

    #[test]
    fn outlier_needs_history_and_spread() {
        assert!(amount_outlier(1000.0, &[100.0, 110.0]).is_none());
        assert!(amount_outlier(1000.0, &[100.0, 100.0, 100.0]).is_none());

        let finding = amount_outlier(1000.0, &[100.0, 110.0, 90.0, 105.0]).unwrap();
        assert_eq!(finding.severity, "high");
        assert!(amount_outlier(112.0, &[100.0, 110.0, 90.0, 105.0]).is_none());
    }

    #[test]
    fn change_thresholds() {
        assert!(unusual_change(140.0, 100.0).is_none());
        assert_eq!(unusual_change(160.0, 100.0).unwrap().severity, "medium");
        assert_eq!(unusual_change(250.0, 100.0).unwrap().severity, "high");
        assert!(unusual_change(250.0, 0.0).is_none());
    }

    #[test]
    fn checks_are_stored_for_the_invoice() {
        let db = Database::open_in_memory().unwrap();
        let alice = owner("alice");
        for (n, gross) in [("1", 100.0), ("2", 105.0), ("3", 95.0)] {
            let mut prior = sample_invoice(&alice, n);
            prior.gross_amount = Some(gross);
            prior.invoice_date = Some("2024-05-01".into());
            db.upsert_invoice(&prior).unwrap();
        }
        let mut current = sample_invoice(&alice, "4");
        current.gross_amount = Some(900.0);
        current.invoice_date = Some("2024-05-20".into());
        db.upsert_invoice(&current).unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let checks = run_checks(&db, &current, today).unwrap();
        let types: Vec<_> = checks.iter().map(|c| c.check_type.as_str()).collect();
        assert!(types.contains(&"amount_outlier"));
        assert!(types.contains(&"unusual_change"));
        assert_eq!(db.get_plausibility_checks(&current.id).unwrap().len(), 2);
    }
}
