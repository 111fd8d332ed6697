//! Credential rotation: clone a key's configuration into a fresh key, then retire the old one.
//!
//! The replacement is always created before the old key is touched, so any failure
//! up to the delete leaves the old key valid.

use tracing::{info, warn};

use crate::error::GatewayResult;
use crate::gateway::ResourceGateway;

/// A freshly issued replacement for an existing credential
#[derive(Clone)]
pub struct Replacement {
    pub new_id: String,
    pub key_string: String,
    pub display_name: String,
}

impl std::fmt::Debug for Replacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replacement")
            .field("new_id", &self.new_id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Outcome of a full standalone rotation
#[derive(Debug, Clone)]
pub struct RotatedCredential {
    pub replacement: Replacement,
    pub old_deleted: bool,
}

/// Issue a new credential with the same display name and restrictions as `old_id`.
///
/// The old credential is left untouched.
pub async fn issue_replacement(
    gateway: &ResourceGateway,
    old_id: &str,
) -> GatewayResult<Replacement> {
    let old = gateway.describe_credential(old_id).await?;
    info!(
        "Issuing replacement for key {} ({})",
        old.id, old.display_name
    );

    let issued = gateway
        .create_credential(&old.display_name, old.restrictions.as_ref())
        .await?;

    Ok(Replacement {
        new_id: issued.id,
        key_string: issued.key_string,
        display_name: old.display_name,
    })
}

/// Delete an old credential. Failure is logged and reported as `false`; the key
/// is then an orphan left for cleanup.
pub async fn retire(gateway: &ResourceGateway, old_id: &str) -> bool {
    match gateway.delete_credential(old_id).await {
        Ok(()) => {
            info!("Retired key {}", old_id);
            true
        }
        Err(e) => {
            warn!("Failed to delete old key {} (now orphaned): {}", old_id, e);
            false
        }
    }
}

/// Rotate a credential on its own: issue the replacement, then retire the old key
pub async fn rotate(gateway: &ResourceGateway, old_id: &str) -> GatewayResult<RotatedCredential> {
    let replacement = issue_replacement(gateway, old_id).await?;
    let old_deleted = retire(gateway, old_id).await;
    Ok(RotatedCredential {
        replacement,
        old_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryBackend, Operation};
    use crate::error::GatewayError;
    use crate::model::{ApiTarget, Restrictions};
    use std::sync::Arc;

    fn gateway(backend: &Arc<MemoryBackend>) -> ResourceGateway {
        ResourceGateway::new(backend.clone(), backend.clone())
    }

    fn restricted() -> Restrictions {
        Restrictions {
            api_targets: Some(vec![ApiTarget {
                service: "maps.googleapis.com".to_string(),
                methods: Some(vec!["GetPlace".to_string()]),
            }]),
            allowed_ips: Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_rotate_copies_restrictions() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .add_credential("cred-123", "billing", Some(restricted()), "AIzaOld")
            .await;
        let gw = gateway(&backend);

        let rotated = rotate(&gw, "cred-123").await.unwrap();
        assert!(rotated.old_deleted);
        assert!(backend.credential("cred-123").await.is_none());

        let new = backend
            .credential(&rotated.replacement.new_id)
            .await
            .unwrap();
        assert_eq!(new.display_name, "billing");
        assert_eq!(new.restrictions, Some(restricted()));
    }

    #[tokio::test]
    async fn test_rotate_keeps_absent_restrictions_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .add_credential("cred-open", "open", None, "AIzaOld")
            .await;
        let gw = gateway(&backend);

        let rotated = rotate(&gw, "cred-open").await.unwrap();
        let new = backend
            .credential(&rotated.replacement.new_id)
            .await
            .unwrap();
        assert_eq!(new.restrictions, None);
    }

    #[tokio::test]
    async fn test_create_failure_keeps_old_key() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .add_credential("cred-123", "billing", None, "AIzaOld")
            .await;
        backend
            .fail_on(
                Operation::CreateCredential,
                GatewayError::Transient("quota".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        assert!(rotate(&gw, "cred-123").await.is_err());
        assert!(backend.credential("cred-123").await.is_some());
        let deletes = backend
            .calls()
            .await
            .into_iter()
            .filter(|c| c.operation == Operation::DeleteCredential)
            .count();
        assert_eq!(deletes, 0);
    }

    #[tokio::test]
    async fn test_delete_failure_is_not_fatal() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .add_credential("cred-123", "billing", None, "AIzaOld")
            .await;
        backend
            .fail_on(
                Operation::DeleteCredential,
                GatewayError::Transient("timeout".to_string()),
            )
            .await;
        let gw = gateway(&backend);

        let rotated = rotate(&gw, "cred-123").await.unwrap();
        assert!(!rotated.old_deleted);
        assert_eq!(backend.credential_count().await, 2);
    }
}
