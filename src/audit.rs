//! Read-only drift audit of the single-enabled-version policy
//!
//! Nothing here mutates state. Results are a point-in-time snapshot and may race
//! with a concurrent rotation.

use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

use crate::error::{ErrorKind, GatewayError};
use crate::gateway::ResourceGateway;
use crate::ledger;
use crate::model::{Credential, Version};

/// Why a secret violates the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReason {
    NoVersions,
    NoEnabledVersion,
    MultipleEnabled,
    LatestNotEnabled,
}

impl DriftReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DriftReason::NoVersions => "no-versions",
            DriftReason::NoEnabledVersion => "no-enabled-version",
            DriftReason::MultipleEnabled => "multiple-versions-enabled",
            DriftReason::LatestNotEnabled => "latest-not-enabled",
        }
    }
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriftReason::NoVersions => "no versions",
            DriftReason::NoEnabledVersion => "no enabled version",
            DriftReason::MultipleEnabled => "multiple versions enabled",
            DriftReason::LatestNotEnabled => "latest version not enabled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftStatus {
    Ok,
    InViolation(DriftReason),
    /// The versions could not be read
    Unknown(ErrorKind),
}

impl DriftStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DriftStatus::Ok => "OK",
            DriftStatus::InViolation(_) => "IN VIOLATION",
            DriftStatus::Unknown(_) => "INSUFFICIENT DATA",
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            DriftStatus::Ok => "-",
            DriftStatus::InViolation(reason) => reason.code(),
            DriftStatus::Unknown(kind) => kind.as_str(),
        }
    }
}

/// Audit result for one secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftFinding {
    pub secret: String,
    pub status: DriftStatus,
    pub latest_enabled: bool,
    /// Ids of enabled versions, newest first
    pub enabled_versions: Vec<String>,
}

impl DriftFinding {
    pub fn enabled_count(&self) -> usize {
        self.enabled_versions.len()
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self.status, DriftStatus::Ok)
    }
}

/// Classify a secret from its versions (newest first)
pub fn classify(secret: &str, versions: &[Version]) -> DriftFinding {
    let enabled_versions: Vec<String> = versions
        .iter()
        .filter(|v| v.is_enabled())
        .map(|v| v.id.clone())
        .collect();
    let latest_enabled = versions.first().map(Version::is_enabled).unwrap_or(false);

    let status = if versions.is_empty() {
        DriftStatus::InViolation(DriftReason::NoVersions)
    } else if enabled_versions.is_empty() {
        DriftStatus::InViolation(DriftReason::NoEnabledVersion)
    } else if enabled_versions.len() > 1 {
        DriftStatus::InViolation(DriftReason::MultipleEnabled)
    } else if !latest_enabled {
        DriftStatus::InViolation(DriftReason::LatestNotEnabled)
    } else {
        DriftStatus::Ok
    };

    DriftFinding {
        secret: secret.to_string(),
        status,
        latest_enabled,
        enabled_versions,
    }
}

/// Audit every secret in the project
pub async fn audit_secrets(gateway: &ResourceGateway) -> Result<Vec<DriftFinding>, GatewayError> {
    let secrets = gateway.list_secrets(None).await?;
    info!("Auditing {} secret(s)", secrets.len());

    let mut findings = Vec::with_capacity(secrets.len());
    for secret in &secrets {
        let finding = match gateway.list_versions(&secret.name, None, false).await {
            Ok(versions) => classify(&secret.name, &versions),
            Err(e) => {
                warn!("{}: could not list versions: {}", secret.name, e);
                DriftFinding {
                    secret: secret.name.clone(),
                    status: DriftStatus::Unknown(e.kind()),
                    latest_enabled: false,
                    enabled_versions: Vec::new(),
                }
            }
        };

        match finding.status {
            DriftStatus::Ok => info!("{}: OK", finding.secret),
            status => warn!("{}: {} ({})", finding.secret, status.label(), status.reason_code()),
        }
        findings.push(finding);
    }

    Ok(findings)
}

/// Credentials that no enabled secret version holds, e.g. keys orphaned by a failed delete
pub async fn unreferenced_credentials(
    gateway: &ResourceGateway,
) -> Result<Vec<Credential>, GatewayError> {
    let secrets = gateway.list_secrets(None).await?;
    let mut referenced: HashSet<String> = HashSet::new();
    for secret in &secrets {
        referenced.extend(ledger::held_credentials(gateway, secret).await?);
    }

    let credentials = gateway.list_credentials().await?;
    Ok(credentials
        .into_iter()
        .filter(|c| !referenced.contains(&c.id))
        .collect())
}
