use std::collections::HashMap;

use crate::error::GatewayResult;
use crate::model::{Secret, Version};

/// Trait for versioned secret stores (Google Secret Manager, in-memory fake)
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// List secrets in the project, newest-created first
    async fn list_secrets(&self, limit: Option<usize>) -> GatewayResult<Vec<Secret>>;

    /// Describe a single secret, failing with `NotFound` when absent
    async fn describe_secret(&self, name: &str) -> GatewayResult<Secret>;

    /// List versions of a secret, newest first
    async fn list_versions(
        &self,
        name: &str,
        limit: Option<usize>,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Version>>;

    async fn enable_version(&self, name: &str, version: &str) -> GatewayResult<()>;

    async fn disable_version(&self, name: &str, version: &str) -> GatewayResult<()>;

    /// Replace the whole annotation map of a secret
    async fn update_annotations(
        &self,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> GatewayResult<()>;

    /// Append a new enabled version holding `value`
    async fn commit_version(&self, name: &str, value: &str) -> GatewayResult<Version>;

    /// Get the store type name for display purposes
    fn store_type(&self) -> &'static str;
}
