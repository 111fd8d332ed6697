//! In-memory secret store and credential issuer
//!
//! Behaves like the Google services closely enough to drive the rotation engine
//! end to end: versions get monotonic ids per secret, keys get fresh ids, and every
//! call is appended to an ordered log so tests can assert on what happened and when.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::credential_issuer::CredentialIssuer;
use super::secret_store::SecretStore;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{sort_newest_first, Credential, Restrictions, Secret, Version, VersionState};

/// Every operation the fake can record or be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListSecrets,
    DescribeSecret,
    ListVersions,
    EnableVersion,
    DisableVersion,
    UpdateAnnotations,
    CommitVersion,
    ListCredentials,
    DescribeCredential,
    CreateCredential,
    GetCredentialSecretValue,
    DeleteCredential,
}

impl Operation {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Operation::EnableVersion
                | Operation::DisableVersion
                | Operation::UpdateAnnotations
                | Operation::CommitVersion
                | Operation::CreateCredential
                | Operation::DeleteCredential
        )
    }
}

/// One entry of the call log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Position in the log, starting at 1
    pub seq: u64,
    pub operation: Operation,
    /// Secret name or credential id the call addressed
    pub target: String,
}

#[derive(Debug, Default)]
struct StoredSecret {
    secret: Secret,
    versions: Vec<(Version, String)>,
    next_version: u64,
}

#[derive(Debug)]
struct StoredCredential {
    credential: Credential,
    key_string: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    secrets: BTreeMap<String, StoredSecret>,
    credentials: BTreeMap<String, StoredCredential>,
    next_credential: u64,
    calls: Vec<CallRecord>,
    failures: HashMap<Operation, GatewayError>,
}

impl MemoryState {
    /// Log the call, then fail it if a failure was injected for this operation
    fn record(&mut self, operation: Operation, target: &str) -> GatewayResult<()> {
        let seq = self.calls.len() as u64 + 1;
        self.calls.push(CallRecord {
            seq,
            operation,
            target: target.to_string(),
        });
        match self.failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn secret_mut(&mut self, name: &str) -> GatewayResult<&mut StoredSecret> {
        self.secrets
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound(format!("secret '{}'", name)))
    }

    fn credential(&self, id: &str) -> GatewayResult<&StoredCredential> {
        self.credentials
            .get(id)
            .ok_or_else(|| GatewayError::NotFound(format!("credential '{}'", id)))
    }

    /// Next unused `cred-N` id; seeded credentials may already hold some of them
    fn issue_id(&mut self) -> String {
        loop {
            self.next_credential += 1;
            let id = format!("cred-{}", self.next_credential);
            if !self.credentials.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Generate a random API key string
fn generate_key_string() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::thread_rng();
    let body: String = (0..35)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("AIza{}", body)
}

/// In-memory implementation of both provider traits
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty secret, or replace its metadata if it exists
    pub async fn add_secret(&self, name: &str, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let entry = state.secrets.entry(name.to_string()).or_default();
        entry.secret = Secret {
            name: name.to_string(),
            created_at: Some(created_at),
            annotations: entry.secret.annotations.clone(),
        };
    }

    /// Seed a version with an explicit creation time; returns its id
    pub async fn add_version(
        &self,
        name: &str,
        value: &str,
        created_at: DateTime<Utc>,
        state: VersionState,
    ) -> String {
        let mut guard = self.state.lock().await;
        let entry = guard.secrets.entry(name.to_string()).or_default();
        entry.secret.name = name.to_string();
        entry.next_version += 1;
        let id = entry.next_version.to_string();
        entry.versions.push((
            Version {
                id: id.clone(),
                created_at,
                state,
            },
            value.to_string(),
        ));
        id
    }

    /// Seed a version under a specific id, advancing the counter past it
    pub async fn add_version_with_id(
        &self,
        name: &str,
        id: u64,
        value: &str,
        created_at: DateTime<Utc>,
        state: VersionState,
    ) {
        let mut guard = self.state.lock().await;
        let entry = guard.secrets.entry(name.to_string()).or_default();
        entry.secret.name = name.to_string();
        entry.next_version = entry.next_version.max(id);
        entry.versions.push((
            Version {
                id: id.to_string(),
                created_at,
                state,
            },
            value.to_string(),
        ));
    }

    pub async fn annotate(&self, name: &str, key: &str, value: &str) {
        let mut guard = self.state.lock().await;
        let entry = guard.secrets.entry(name.to_string()).or_default();
        entry.secret.name = name.to_string();
        entry
            .secret
            .annotations
            .insert(key.to_string(), value.to_string());
    }

    /// Seed a credential under a fixed id
    pub async fn add_credential(
        &self,
        id: &str,
        display_name: &str,
        restrictions: Option<Restrictions>,
        key_string: &str,
    ) {
        let mut state = self.state.lock().await;
        state.credentials.insert(
            id.to_string(),
            StoredCredential {
                credential: Credential {
                    id: id.to_string(),
                    display_name: display_name.to_string(),
                    restrictions,
                },
                key_string: key_string.to_string(),
            },
        );
    }

    /// Make every future call of `operation` fail with `error`
    pub async fn fail_on(&self, operation: Operation, error: GatewayError) {
        self.state.lock().await.failures.insert(operation, error);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<CallRecord> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.operation.is_mutating())
            .collect()
    }

    pub async fn secret(&self, name: &str) -> Option<Secret> {
        let state = self.state.lock().await;
        state.secrets.get(name).map(|s| s.secret.clone())
    }

    /// Versions of a secret, newest first
    pub async fn versions(&self, name: &str) -> Vec<Version> {
        let state = self.state.lock().await;
        let mut versions: Vec<Version> = state
            .secrets
            .get(name)
            .map(|s| s.versions.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default();
        sort_newest_first(&mut versions);
        versions
    }

    /// Stored value of a specific version
    pub async fn value_of(&self, name: &str, version: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.secrets.get(name).and_then(|s| {
            s.versions
                .iter()
                .find(|(v, _)| v.id == version)
                .map(|(_, value)| value.clone())
        })
    }

    pub async fn credential(&self, id: &str) -> Option<Credential> {
        let state = self.state.lock().await;
        state.credentials.get(id).map(|c| c.credential.clone())
    }

    pub async fn credential_count(&self) -> usize {
        self.state.lock().await.credentials.len()
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryBackend {
    async fn list_secrets(&self, limit: Option<usize>) -> GatewayResult<Vec<Secret>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListSecrets, "*")?;

        let mut secrets: Vec<Secret> = state.secrets.values().map(|s| s.secret.clone()).collect();
        secrets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            secrets.truncate(limit);
        }
        Ok(secrets)
    }

    async fn describe_secret(&self, name: &str) -> GatewayResult<Secret> {
        let mut state = self.state.lock().await;
        state.record(Operation::DescribeSecret, name)?;
        Ok(state.secret_mut(name)?.secret.clone())
    }

    async fn list_versions(
        &self,
        name: &str,
        limit: Option<usize>,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Version>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListVersions, name)?;

        let mut versions: Vec<Version> = state
            .secret_mut(name)?
            .versions
            .iter()
            .map(|(v, _)| v.clone())
            .filter(|v| !enabled_only || v.is_enabled())
            .collect();
        sort_newest_first(&mut versions);
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        Ok(versions)
    }

    async fn enable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        set_state(self, Operation::EnableVersion, name, version, VersionState::Enabled).await
    }

    async fn disable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        set_state(self, Operation::DisableVersion, name, version, VersionState::Disabled).await
    }

    async fn update_annotations(
        &self,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::UpdateAnnotations, name)?;
        state.secret_mut(name)?.secret.annotations = annotations;
        Ok(())
    }

    async fn commit_version(&self, name: &str, value: &str) -> GatewayResult<Version> {
        let mut state = self.state.lock().await;
        state.record(Operation::CommitVersion, name)?;

        let entry = state.secret_mut(name)?;
        entry.next_version += 1;
        let version = Version {
            id: entry.next_version.to_string(),
            created_at: Utc::now(),
            state: VersionState::Enabled,
        };
        entry.versions.push((version.clone(), value.to_string()));
        Ok(version)
    }

    fn store_type(&self) -> &'static str {
        "in-memory secret store"
    }
}

async fn set_state(
    backend: &MemoryBackend,
    operation: Operation,
    name: &str,
    version: &str,
    target: VersionState,
) -> GatewayResult<()> {
    let mut state = backend.state.lock().await;
    state.record(operation, name)?;

    let entry = state.secret_mut(name)?;
    let (stored, _) = entry
        .versions
        .iter_mut()
        .find(|(v, _)| v.id == version)
        .ok_or_else(|| GatewayError::NotFound(format!("version {} of '{}'", version, name)))?;
    if stored.state == VersionState::Destroyed {
        return Err(GatewayError::Malformed(format!(
            "version {} of '{}' is destroyed",
            version, name
        )));
    }
    stored.state = target;
    Ok(())
}

#[async_trait::async_trait]
impl CredentialIssuer for MemoryBackend {
    async fn list_credentials(&self) -> GatewayResult<Vec<Credential>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListCredentials, "*")?;
        Ok(state
            .credentials
            .values()
            .map(|c| c.credential.clone())
            .collect())
    }

    async fn describe_credential(&self, id: &str) -> GatewayResult<Credential> {
        let mut state = self.state.lock().await;
        state.record(Operation::DescribeCredential, id)?;
        Ok(state.credential(id)?.credential.clone())
    }

    async fn create_credential(
        &self,
        display_name: &str,
        restrictions: Option<&Restrictions>,
    ) -> GatewayResult<String> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateCredential, display_name)?;

        let id = state.issue_id();
        state.credentials.insert(
            id.clone(),
            StoredCredential {
                credential: Credential {
                    id: id.clone(),
                    display_name: display_name.to_string(),
                    restrictions: restrictions.cloned(),
                },
                key_string: generate_key_string(),
            },
        );
        Ok(id)
    }

    async fn get_credential_secret_value(&self, id: &str) -> GatewayResult<String> {
        let mut state = self.state.lock().await;
        state.record(Operation::GetCredentialSecretValue, id)?;
        Ok(state.credential(id)?.key_string.clone())
    }

    async fn delete_credential(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteCredential, id)?;
        state
            .credentials
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("credential '{}'", id)))
    }

    fn issuer_type(&self) -> &'static str {
        "in-memory credential issuer"
    }
}
