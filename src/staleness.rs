use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::RotationError;
use crate::gateway::ResourceGateway;
use crate::ledger;
use crate::model::Version;

/// Age assessment of a secret's active version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessCheck {
    pub version: Version,
    pub age: Duration,
    pub stale: bool,
}

impl StalenessCheck {
    pub fn age_days(&self) -> i64 {
        self.age.num_days()
    }
}

/// Check if a version created at `created_at` is past the threshold at `now`.
///
/// A threshold of zero days means always due.
pub fn is_due(created_at: DateTime<Utc>, threshold_days: u32, now: DateTime<Utc>) -> bool {
    if threshold_days == 0 {
        return true;
    }
    now.signed_duration_since(created_at) > Duration::days(i64::from(threshold_days))
}

/// Evaluate a secret's newest enabled version against the threshold.
///
/// A secret with no enabled version is a data-quality error, never "not due".
pub async fn check_staleness(
    gateway: &ResourceGateway,
    secret: &str,
    threshold_days: u32,
    now: DateTime<Utc>,
) -> Result<StalenessCheck, RotationError> {
    let version = ledger::latest_version(gateway, secret, true)
        .await?
        .ok_or_else(|| RotationError::NoEligibleVersion(secret.to_string()))?;

    let age = now.signed_duration_since(version.created_at);
    let stale = is_due(version.created_at, threshold_days, now);
    debug!(
        "{} version {} created {} ({} day(s) old), due: {}",
        secret,
        version.id,
        version.created_at,
        age.num_days(),
        stale
    );

    Ok(StalenessCheck {
        version,
        age,
        stale,
    })
}

/// Whether a secret is due for rotation right now
pub async fn is_stale(
    gateway: &ResourceGateway,
    secret: &str,
    threshold_days: u32,
) -> Result<bool, RotationError> {
    check_staleness(gateway, secret, threshold_days, Utc::now())
        .await
        .map(|check| check.stale)
}
