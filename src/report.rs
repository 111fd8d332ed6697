//! CSV reports for rotation runs and drift audits

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::audit::DriftFinding;
use crate::rotation::{Outcome, RotationReport};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RotationRow<'a> {
    secret_name: &'a str,
    old_version: &'a str,
    new_version: &'a str,
    credential_name: &'a str,
    old_credential_id: &'a str,
    new_credential_id: &'a str,
    outcome: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRow<'a> {
    secret_name: &'a str,
    status: &'static str,
    latest_enabled: bool,
    enabled_count: usize,
    enabled_versions: String,
    reason: &'static str,
}

/// Write one row per processed secret; skipped secrets carry the reason in place
/// of the identifiers they never got
pub fn write_rotation<W: Write>(writer: W, report: &RotationReport) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    for entry in &report.outcomes {
        let row = match &entry.outcome {
            Outcome::Rotated(r) => RotationRow {
                secret_name: &entry.secret,
                old_version: &r.old_version,
                new_version: &r.new_version,
                credential_name: &r.credential_name,
                old_credential_id: &r.old_credential_id,
                new_credential_id: &r.new_credential_id,
                outcome: entry.reason(),
            },
            Outcome::NotDue { version, .. } => RotationRow {
                secret_name: &entry.secret,
                old_version: version,
                new_version: "",
                credential_name: "",
                old_credential_id: "",
                new_credential_id: "",
                outcome: entry.reason(),
            },
            Outcome::Skipped(_) => RotationRow {
                secret_name: &entry.secret,
                old_version: "",
                new_version: "",
                credential_name: "",
                old_credential_id: "",
                new_credential_id: "",
                outcome: entry.reason(),
            },
        };
        csv.serialize(row).context("Failed to write rotation row")?;
    }

    csv.flush().context("Failed to flush rotation report")?;
    Ok(())
}

pub fn write_audit<W: Write>(writer: W, findings: &[DriftFinding]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    for finding in findings {
        csv.serialize(AuditRow {
            secret_name: &finding.secret,
            status: finding.status.label(),
            latest_enabled: finding.latest_enabled,
            enabled_count: finding.enabled_count(),
            enabled_versions: finding.enabled_versions.join("/"),
            reason: finding.status.reason_code(),
        })
        .context("Failed to write audit row")?;
    }

    csv.flush().context("Failed to flush audit report")?;
    Ok(())
}

/// Write a rotation report to a file
pub fn save_rotation<P: AsRef<Path>>(path: P, report: &RotationReport) -> Result<()> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create report file: {:?}", path.as_ref()))?;
    write_rotation(file, report)
}

/// Write an audit report to a file
pub fn save_audit<P: AsRef<Path>>(path: P, findings: &[DriftFinding]) -> Result<()> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create report file: {:?}", path.as_ref()))?;
    write_audit(file, findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{DriftReason, DriftStatus};
    use crate::error::RotationError;
    use crate::rotation::{RotationRecord, SecretOutcome};

    fn sample_report() -> RotationReport {
        RotationReport {
            outcomes: vec![
                SecretOutcome {
                    secret: "db-key".to_string(),
                    outcome: Outcome::Rotated(RotationRecord {
                        secret_name: "db-key".to_string(),
                        old_version: "7".to_string(),
                        new_version: "8".to_string(),
                        credential_name: "billing".to_string(),
                        old_credential_id: "cred-123".to_string(),
                        new_credential_id: "cred-456".to_string(),
                        old_version_disabled: true,
                        old_credential_deleted: true,
                    }),
                },
                SecretOutcome {
                    secret: "cache-key".to_string(),
                    outcome: Outcome::NotDue {
                        version: "2".to_string(),
                        age_days: 5,
                    },
                },
                SecretOutcome {
                    secret: "orphan-key".to_string(),
                    outcome: Outcome::Skipped(RotationError::MissingLinkage {
                        secret: "orphan-key".to_string(),
                        version: "1".to_string(),
                    }),
                },
            ],
            cancelled: false,
        }
    }

    #[test]
    fn test_rotation_csv() {
        let mut out = Vec::new();
        write_rotation(&mut out, &sample_report()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "secretName,oldVersion,newVersion,credentialName,oldCredentialId,newCredentialId,outcome"
        );
        assert_eq!(lines[1], "db-key,7,8,billing,cred-123,cred-456,rotated");
        assert_eq!(lines[2], "cache-key,2,,,,,not due");
        assert_eq!(lines[3], "orphan-key,,,,,,missing annotation");
    }

    #[test]
    fn test_audit_csv() {
        let findings = vec![DriftFinding {
            secret: "db-key".to_string(),
            status: DriftStatus::InViolation(DriftReason::MultipleEnabled),
            latest_enabled: true,
            enabled_versions: vec!["8".to_string(), "7".to_string()],
        }];

        let mut out = Vec::new();
        write_audit(&mut out, &findings).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "secretName,status,latestEnabled,enabledCount,enabledVersions,reason"
        );
        assert_eq!(
            lines[1],
            "db-key,IN VIOLATION,true,2,8/7,multiple-versions-enabled"
        );
    }

    #[test]
    fn test_save_rotation_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.csv");

        save_rotation(&path, &sample_report()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }
}
