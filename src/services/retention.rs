//! Periodic deletion of patient data past its retention date and of aged
//! audit events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("audit cutoff {days} days before {now} is out of range")]
    CutoffOutOfRange { days: i64, now: DateTime<Utc> },
}

/// `now + days`, or `None` when the result leaves chrono's range.
pub fn days_after(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|delta| now.checked_add_signed(delta))
}

/// `now - days`, or `None` when the result leaves chrono's range.
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|delta| now.checked_sub_signed(delta))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub patients_purged: u64,
    pub audit_events_purged: u64,
}

pub async fn run_retention_sweep(
    store: &dyn Store,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<SweepReport, SweepError> {
    let days = config.audit_log_retention_days;
    let audit_cutoff = days_before(now, days).ok_or(SweepError::CutoffOutOfRange { days, now })?;
    let patients_purged = store.purge_expired_patients(now).await?;
    let audit_events_purged = store.purge_audit_before(audit_cutoff).await?;

    Ok(SweepReport {
        patients_purged,
        audit_events_purged,
    })
}

pub fn spawn_retention_task(store: Arc<dyn Store>, config: Arc<Config>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(config.retention_sweep_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = period.as_secs(), "Retention sweeper started");

        loop {
            ticker.tick().await;
            match run_retention_sweep(store.as_ref(), &config, Utc::now()).await {
                Ok(report) if report.patients_purged > 0 || report.audit_events_purged > 0 => {
                    tracing::info!(
                        patients = report.patients_purged,
                        audit_events = report.audit_events_purged,
                        "Retention sweep purged expired records"
                    );
                }
                Ok(_) => tracing::debug!("Retention sweep found nothing to purge"),
                Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
            }
        }
    })
}
