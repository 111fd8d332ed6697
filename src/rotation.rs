use chrono::Utc;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, GatewayError, RotationError};
use crate::gateway::ResourceGateway;
use crate::ledger;
use crate::model::{Secret, Version};
use crate::rotator::{self, Replacement};
use crate::staleness;

/// Audit trail entry for one completed rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRecord {
    pub secret_name: String,
    pub old_version: String,
    pub new_version: String,
    pub credential_name: String,
    pub old_credential_id: String,
    pub new_credential_id: String,
    /// False when the prior version could not be disabled (drift left behind)
    pub old_version_disabled: bool,
    /// False when the old key could not be deleted (orphan left behind)
    pub old_credential_deleted: bool,
}

/// What happened to a single secret during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rotated(RotationRecord),
    NotDue { version: String, age_days: i64 },
    Skipped(RotationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretOutcome {
    pub secret: String,
    pub outcome: Outcome,
}

impl SecretOutcome {
    /// Short reason used in reports and the per-secret log line
    pub fn reason(&self) -> String {
        match &self.outcome {
            Outcome::Rotated(record) => {
                let mut leftovers = Vec::new();
                if !record.old_version_disabled {
                    leftovers.push("old version still enabled");
                }
                if !record.old_credential_deleted {
                    leftovers.push("old credential not deleted");
                }
                if leftovers.is_empty() {
                    "rotated".to_string()
                } else {
                    format!("rotated ({})", leftovers.join(", "))
                }
            }
            Outcome::NotDue { .. } => "not due".to_string(),
            Outcome::Skipped(err) => err.kind().to_string(),
        }
    }
}

impl fmt::Display for SecretOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Rotated(r) => write!(
                f,
                "{}: rotated version {} -> {}, key {} -> {}",
                self.secret, r.old_version, r.new_version, r.old_credential_id, r.new_credential_id
            ),
            Outcome::NotDue { version, age_days } => write!(
                f,
                "{}: not due (version {} is {} day(s) old)",
                self.secret, version, age_days
            ),
            Outcome::Skipped(err) => write!(f, "{}: {} ({})", self.secret, err.kind(), err),
        }
    }
}

/// Everything a rotation run did, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub outcomes: Vec<SecretOutcome>,
    /// Set when the run stopped early on cancellation
    pub cancelled: bool,
}

impl RotationReport {
    pub fn records(&self) -> impl Iterator<Item = &RotationRecord> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Rotated(record) => Some(record),
            _ => None,
        })
    }

    pub fn rotated_count(&self) -> usize {
        self.records().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped(_)))
            .count()
    }

    pub fn not_due_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::NotDue { .. }))
            .count()
    }

    /// Skip reasons keyed by secret name
    pub fn skips(&self) -> impl Iterator<Item = (&str, ErrorKind)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Skipped(err) => Some((o.secret.as_str(), err.kind())),
            _ => None,
        })
    }

    /// Plain-text summary suitable for a notification body
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} rotated, {} not due, {} skipped{}",
            self.rotated_count(),
            self.not_due_count(),
            self.skipped_count(),
            if self.cancelled { " (run cancelled)" } else { "" }
        )];
        lines.extend(self.outcomes.iter().map(|o| o.to_string()));
        lines.join("\n")
    }
}

/// Rotate every due secret in the project.
///
/// Secrets are handled one at a time and per-secret failures are recorded in the
/// report. Only a failure to enumerate the secrets aborts the run. Cancellation
/// is honoured between secrets, never in the middle of one.
pub async fn rotate_secrets(
    gateway: &ResourceGateway,
    threshold_days: u32,
    cancel: &CancellationToken,
) -> Result<RotationReport, GatewayError> {
    info!(
        "Rotating secrets older than {} day(s) via {}{}",
        threshold_days,
        gateway.describe(),
        if gateway.is_dry_run() { " [DRY RUN]" } else { "" }
    );

    let secrets = gateway.list_secrets(None).await?;
    if secrets.is_empty() {
        warn!("There are no secrets in this project");
    }

    let mut report = RotationReport::default();
    for secret in &secrets {
        if cancel.is_cancelled() {
            warn!(
                "Rotation cancelled, {} secret(s) not processed",
                secrets.len() - report.outcomes.len()
            );
            report.cancelled = true;
            break;
        }

        let outcome = rotate_secret(gateway, secret, threshold_days).await;
        match &outcome.outcome {
            Outcome::Rotated(_) => info!("{}", outcome),
            Outcome::NotDue { .. } => info!("{}", outcome),
            Outcome::Skipped(_) => error!("{}", outcome),
        }
        report.outcomes.push(outcome);
    }

    info!(
        "Rotation run finished: {} rotated, {} not due, {} skipped",
        report.rotated_count(),
        report.not_due_count(),
        report.skipped_count()
    );
    Ok(report)
}

/// Run the rotation steps for a single secret, converting any failure to an outcome
pub async fn rotate_secret(
    gateway: &ResourceGateway,
    secret: &Secret,
    threshold_days: u32,
) -> SecretOutcome {
    let outcome = match try_rotate(gateway, secret, threshold_days).await {
        Ok(outcome) => outcome,
        Err(err) => Outcome::Skipped(err),
    };
    SecretOutcome {
        secret: secret.name.clone(),
        outcome,
    }
}

async fn try_rotate(
    gateway: &ResourceGateway,
    secret: &Secret,
    threshold_days: u32,
) -> Result<Outcome, RotationError> {
    let name = secret.name.as_str();

    let check = staleness::check_staleness(gateway, name, threshold_days, Utc::now()).await?;
    if !check.stale {
        return Ok(Outcome::NotDue {
            version: check.version.id.clone(),
            age_days: check.age_days(),
        });
    }
    let old_version = check.version;

    let old_credential = ledger::resolve_credential_for(gateway, name, &old_version.id)
        .await?
        .ok_or_else(|| RotationError::MissingLinkage {
            secret: name.to_string(),
            version: old_version.id.clone(),
        })?;

    info!(
        "{}: version {} is {} day(s) old, rotating key {}",
        name,
        old_version.id,
        check.age.num_days(),
        old_credential
    );
    let replacement = rotator::issue_replacement(gateway, &old_credential).await?;

    let new_version = commit_or_compensate(gateway, name, &replacement).await?;

    if let Err(e) = ledger::bind(gateway, name, &new_version.id, &replacement.new_id).await {
        // the new version stays; keep the old key alive so nothing loses access
        error!(
            "{}: committed version {} but could not record {}={}; old version {} and key {} kept",
            name,
            new_version.id,
            ledger::annotation_key(&new_version.id),
            replacement.new_id,
            old_version.id,
            old_credential
        );
        return Err(e.into());
    }

    let old_version_disabled = disable_prior(gateway, name, &old_version).await;
    let old_credential_deleted = rotator::retire(gateway, &old_credential).await;

    Ok(Outcome::Rotated(RotationRecord {
        secret_name: name.to_string(),
        old_version: old_version.id,
        new_version: new_version.id,
        credential_name: replacement.display_name,
        old_credential_id: old_credential,
        new_credential_id: replacement.new_id,
        old_version_disabled,
        old_credential_deleted,
    }))
}

/// Commit the new key string; if that fails, delete the key that was just issued
async fn commit_or_compensate(
    gateway: &ResourceGateway,
    name: &str,
    replacement: &Replacement,
) -> Result<Version, GatewayError> {
    match gateway.commit_version(name, &replacement.key_string).await {
        Ok(version) => Ok(version),
        Err(e) => {
            warn!(
                "{}: commit failed, withdrawing new key {}: {}",
                name, replacement.new_id, e
            );
            if let Err(cleanup) = gateway.delete_credential(&replacement.new_id).await {
                warn!(
                    "{}: could not delete new key {} (now orphaned): {}",
                    name, replacement.new_id, cleanup
                );
            }
            Err(e)
        }
    }
}

/// Disable the version that was just superseded. Runs only after the commit.
async fn disable_prior(gateway: &ResourceGateway, name: &str, version: &Version) -> bool {
    match gateway.disable_version(name, &version.id).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "{}: failed to disable version {}, it remains enabled: {}",
                name, version.id, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryBackend, Operation};
    use crate::model::VersionState;
    use chrono::Duration;
    use std::sync::Arc;

    async fn seeded_due() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        let now = Utc::now();
        backend.add_secret("db-key", now - Duration::days(400)).await;
        backend
            .add_version_with_id(
                "db-key",
                7,
                "AIzaOld",
                now - Duration::days(40),
                VersionState::Enabled,
            )
            .await;
        backend.annotate("db-key", "version_7", "cred-123").await;
        backend
            .add_credential("cred-123", "billing", None, "AIzaOld")
            .await;
        backend
    }

    fn gateway(backend: &Arc<MemoryBackend>) -> ResourceGateway {
        ResourceGateway::new(backend.clone(), backend.clone())
    }

    #[tokio::test]
    async fn test_commit_failure_withdraws_new_key() {
        let backend = seeded_due().await;
        backend
            .fail_on(
                Operation::CommitVersion,
                GatewayError::Transient("unavailable".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        let report = rotate_secrets(&gw, 30, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.skipped_count(), 1);

        // old key and version untouched, no extra key left behind
        assert!(backend.credential("cred-123").await.is_some());
        assert_eq!(backend.credential_count().await, 1);
        let versions = backend.versions("db-key").await;
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_enabled());
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_old_key_and_version() {
        let backend = seeded_due().await;
        backend
            .fail_on(
                Operation::UpdateAnnotations,
                GatewayError::Transient("unavailable".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        let report = rotate_secrets(&gw, 30, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.skipped_count(), 1);
        assert!(backend.credential("cred-123").await.is_some());

        let versions = backend.versions("db-key").await;
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(Version::is_enabled));
    }

    #[tokio::test]
    async fn test_delete_failure_still_rotates() {
        let backend = seeded_due().await;
        backend
            .fail_on(
                Operation::DeleteCredential,
                GatewayError::Transient("unavailable".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        let report = rotate_secrets(&gw, 30, &CancellationToken::new()).await.unwrap();
        let record = report.records().next().unwrap();
        assert!(!record.old_credential_deleted);
        assert_eq!(report.outcomes[0].reason(), "rotated (old credential not deleted)");
    }

    #[tokio::test]
    async fn test_disable_and_delete_failures_both_reported() {
        let backend = seeded_due().await;
        for op in [Operation::DisableVersion, Operation::DeleteCredential] {
            backend
                .fail_on(op, GatewayError::Transient("unavailable".to_string()))
                .await;
        }
        let gw = gateway(&backend);

        let report = rotate_secrets(&gw, 30, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.rotated_count(), 1);
        assert_eq!(
            report.outcomes[0].reason(),
            "rotated (old version still enabled, old credential not deleted)"
        );
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts() {
        let backend = seeded_due().await;
        backend
            .fail_on(
                Operation::ListSecrets,
                GatewayError::Unauthorized("token expired".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        let err = rotate_secrets(&gw, 30, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = seeded_due().await;
        let gw = gateway(&backend);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = rotate_secrets(&gw, 30, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(backend.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_lists_each_secret() {
        let backend = seeded_due().await;
        let gw = gateway(&backend);

        let report = rotate_secrets(&gw, 30, &CancellationToken::new()).await.unwrap();
        let summary = report.summary();
        assert!(summary.starts_with("1 rotated, 0 not due, 0 skipped"));
        assert!(summary.contains("db-key: rotated version 7 -> 8"));
    }
}
