use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::config::QuotaConfig;
use crate::db::Database;
use crate::error::{IntakeError, IntakeResult};
use crate::models::Owner;

/// Limit for the owner: the organization's own quota if set, the configured
/// default otherwise. `None` means unlimited.
pub fn monthly_limit(db: &Database, config: &QuotaConfig, owner: &Owner) -> IntakeResult<Option<u64>> {
    let org_limit = match &owner.org_id {
        Some(org_id) => db.organization_quota(org_id)?,
        None => None,
    };
    let limit = org_limit.unwrap_or(config.monthly_invoices);
    Ok((limit > 0).then_some(limit))
}

pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub fn used_this_month(db: &Database, owner: &Owner, now: DateTime<Utc>) -> IntakeResult<u64> {
    Ok(db.count_usage_since(&owner.key(), &month_start(now).to_rfc3339())?)
}

/// Fails with `QuotaExceeded` when `additional` more invoices would go over
/// the owner's monthly limit.
pub fn ensure_capacity(
    db: &Database,
    config: &QuotaConfig,
    owner: &Owner,
    additional: u64,
) -> IntakeResult<()> {
    let Some(limit) = monthly_limit(db, config, owner)? else {
        return Ok(());
    };
    let used = used_this_month(db, owner, Utc::now())?;
    if used.saturating_add(additional) > limit {
        tracing::warn!(owner = %owner.key(), used, limit, additional, "Monthly quota exceeded");
        return Err(IntakeError::QuotaExceeded { used, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{owner, sample_invoice};
    use crate::error::ErrorKind;
    use crate::utils::now_rfc3339;

    fn store(db: &Database, owner: &Owner, count: usize) {
        for i in 0..count {
            let mut invoice = sample_invoice(owner, &format!("RE-{i}"));
            invoice.created_at = now_rfc3339();
            db.upsert_invoice(&invoice).unwrap();
        }
    }

    #[test]
    fn rejects_uploads_over_the_limit() {
        let db = Database::open_in_memory().unwrap();
        let user = owner("u1");
        store(&db, &user, 3);
        let config = QuotaConfig { monthly_invoices: 5 };

        assert!(ensure_capacity(&db, &config, &user, 2).is_ok());
        let err = ensure_capacity(&db, &config, &user, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn uploaded_jobs_count_before_processing() {
        let db = Database::open_in_memory().unwrap();
        let user = owner("u1");
        let config = QuotaConfig { monthly_invoices: 3 };

        ensure_capacity(&db, &config, &user, 2).unwrap();
        db.create_job(&user, 2).unwrap();
        let err = ensure_capacity(&db, &config, &user, 2).unwrap_err();
        assert!(matches!(err, IntakeError::QuotaExceeded { used: 2, limit: 3 }));
        assert!(ensure_capacity(&db, &config, &user, 1).is_ok());
    }

    #[test]
    fn job_invoices_are_not_counted_twice() {
        let db = Database::open_in_memory().unwrap();
        let user = owner("u1");
        let job = db.create_job(&user, 1).unwrap();
        let mut invoice = sample_invoice(&user, "RE-1");
        invoice.job_id = Some(job.id);
        invoice.created_at = now_rfc3339();
        db.upsert_invoice(&invoice).unwrap();
        store(&db, &user, 1);

        assert_eq!(used_this_month(&db, &user, Utc::now()).unwrap(), 2);
    }

    #[test]
    fn zero_means_unlimited() {
        let db = Database::open_in_memory().unwrap();
        let user = owner("u1");
        store(&db, &user, 3);
        let config = QuotaConfig { monthly_invoices: 0 };
        assert!(ensure_capacity(&db, &config, &user, 1_000).is_ok());
    }

    #[test]
    fn organization_quota_overrides_default() {
        let db = Database::open_in_memory().unwrap();
        let org = db.create_organization("Acme", Some(1)).unwrap();
        let member = Owner {
            user_id: "u1".into(),
            org_id: Some(org.id),
        };
        store(&db, &member, 1);
        let err = ensure_capacity(&db, &QuotaConfig::default(), &member, 1).unwrap_err();
        assert!(matches!(err, IntakeError::QuotaExceeded { used: 1, limit: 1 }));
    }

    #[test]
    fn month_starts_at_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap();
        assert_eq!(month_start(now).to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }
}
