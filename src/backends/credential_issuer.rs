use crate::error::GatewayResult;
use crate::model::{Credential, Restrictions};

/// Trait for API key issuers (Google API Keys, in-memory fake)
#[async_trait::async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn list_credentials(&self) -> GatewayResult<Vec<Credential>>;

    async fn describe_credential(&self, id: &str) -> GatewayResult<Credential>;

    /// Create a key and return its identifier. `None` restrictions means an
    /// unrestricted key.
    async fn create_credential(
        &self,
        display_name: &str,
        restrictions: Option<&Restrictions>,
    ) -> GatewayResult<String>;

    /// Fetch the secret key string of an existing key
    async fn get_credential_secret_value(&self, id: &str) -> GatewayResult<String>;

    async fn delete_credential(&self, id: &str) -> GatewayResult<()>;

    /// Get the issuer type name for display purposes
    fn issuer_type(&self) -> &'static str;
}
