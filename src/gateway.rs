//! Single entry point for every call the rotation engine makes
//!
//! Reads pass straight through to the secret store and the credential issuer.
//! Mutations are either forwarded or, in dry-run mode, logged and answered with
//! deterministic synthetic identifiers so the rest of the engine runs unchanged.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::backends::{Issuer, Store};
use crate::error::GatewayResult;
use crate::model::{Credential, IssuedCredential, Restrictions, Secret, Version, VersionState};

pub struct ResourceGateway {
    store: Store,
    issuer: Issuer,
    dry_run: bool,
    synthetic: AtomicU64,
}

impl ResourceGateway {
    pub fn new(store: Store, issuer: Issuer) -> Self {
        Self {
            store,
            issuer,
            dry_run: false,
            synthetic: AtomicU64::new(0),
        }
    }

    /// Simulate every mutating call instead of performing it
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn describe(&self) -> String {
        format!("{} / {}", self.store.store_type(), self.issuer.issuer_type())
    }

    fn next_synthetic(&self) -> u64 {
        self.synthetic.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn list_secrets(&self, limit: Option<usize>) -> GatewayResult<Vec<Secret>> {
        let secrets = self.store.list_secrets(limit).await?;
        debug!("Listed {} secret(s)", secrets.len());
        Ok(secrets)
    }

    pub async fn describe_secret(&self, name: &str) -> GatewayResult<Secret> {
        let secret = self.store.describe_secret(name).await?;
        debug!("Secret {}: {:?}", name, secret.annotations);
        Ok(secret)
    }

    pub async fn list_versions(
        &self,
        name: &str,
        limit: Option<usize>,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Version>> {
        let versions = self.store.list_versions(name, limit, enabled_only).await?;
        debug!("Versions of {}: {:?}", name, versions);
        Ok(versions)
    }

    pub async fn enable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Would enable version {} of {}", version, name);
            return Ok(());
        }
        self.store.enable_version(name, version).await
    }

    pub async fn disable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Would disable version {} of {}", version, name);
            return Ok(());
        }
        self.store.disable_version(name, version).await
    }

    pub async fn update_annotations(
        &self,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Would set annotations of {} to {:?}", name, annotations);
            return Ok(());
        }
        self.store.update_annotations(name, annotations).await
    }

    pub async fn commit_version(&self, name: &str, value: &str) -> GatewayResult<Version> {
        if self.dry_run {
            let version = Version {
                id: format!("dry-run-{}", self.next_synthetic()),
                created_at: Utc::now(),
                state: VersionState::Enabled,
            };
            info!("[DRY RUN] Would add version {} to {}", version.id, name);
            return Ok(version);
        }
        self.store.commit_version(name, value).await
    }

    pub async fn describe_credential(&self, id: &str) -> GatewayResult<Credential> {
        let credential = self.issuer.describe_credential(id).await?;
        debug!("Credential {}: {:?}", id, credential);
        Ok(credential)
    }

    pub async fn list_credentials(&self) -> GatewayResult<Vec<Credential>> {
        self.issuer.list_credentials().await
    }

    /// Create a credential and fetch its key string.
    ///
    /// If the key string cannot be read the new credential is deleted again. Only
    /// when that delete also fails is the key left behind, logged as orphaned.
    pub async fn create_credential(
        &self,
        display_name: &str,
        restrictions: Option<&Restrictions>,
    ) -> GatewayResult<IssuedCredential> {
        if self.dry_run {
            let n = self.next_synthetic();
            info!(
                "[DRY RUN] Would create key '{}' with restrictions {:?}",
                display_name, restrictions
            );
            return Ok(IssuedCredential {
                id: format!("dry-run-credential-{}", n),
                key_string: format!("dry-run-key-{}", n),
            });
        }

        let id = self
            .issuer
            .create_credential(display_name, restrictions)
            .await?;
        match self.issuer.get_credential_secret_value(&id).await {
            Ok(key_string) => Ok(IssuedCredential { id, key_string }),
            Err(e) => {
                warn!("Created key {} but could not read its value, withdrawing it: {}", id, e);
                if let Err(cleanup) = self.issuer.delete_credential(&id).await {
                    warn!("Could not delete key {} (now orphaned): {}", id, cleanup);
                }
                Err(e)
            }
        }
    }

    pub async fn get_credential_secret_value(&self, id: &str) -> GatewayResult<String> {
        self.issuer.get_credential_secret_value(id).await
    }

    pub async fn delete_credential(&self, id: &str) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Would delete key {}", id);
            return Ok(());
        }
        self.issuer.delete_credential(id).await
    }
}
