use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credential_issuer::CredentialIssuer;
use super::http::{build_client, check, decode, trim_base};
use crate::error::{GatewayError, GatewayResult};
use crate::model::{short_name, ApiTarget, Credential, Restrictions};

const DEFAULT_MAX_POLLS: u32 = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Google API Keys client (REST v2)
#[derive(Clone)]
pub struct GcpApiKeysClient {
    client: Client,
    base_url: String,
    project: String,
    token: String,
    max_polls: u32,
    poll_interval: Duration,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_targets: Option<Vec<ApiTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_key_restrictions: Option<ServerKeyRestrictions>,
    /// Browser, Android and iOS restrictions, which are not carried over
    #[serde(flatten)]
    unsupported: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerKeyRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allowed_ips: Option<Vec<String>>,
}

impl RawRestrictions {
    fn into_model(self, key: &str) -> Option<Restrictions> {
        if !self.unsupported.is_empty() {
            let kinds: Vec<&str> = self.unsupported.keys().map(String::as_str).collect();
            warn!(
                "Key {} has restrictions that will not be carried over: {}",
                key,
                kinds.join(", ")
            );
        }
        let restrictions = Restrictions {
            api_targets: self.api_targets,
            allowed_ips: self.server_key_restrictions.and_then(|s| s.allowed_ips),
        };
        if restrictions.is_empty() {
            None
        } else {
            Some(restrictions)
        }
    }

    fn from_model(restrictions: &Restrictions) -> Self {
        Self {
            api_targets: restrictions.api_targets.clone(),
            server_key_restrictions: restrictions.allowed_ips.as_ref().map(|ips| {
                ServerKeyRestrictions {
                    allowed_ips: Some(ips.clone()),
                }
            }),
            unsupported: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKey {
    name: String,
    #[serde(default)]
    display_name: String,
    restrictions: Option<RawRestrictions>,
}

impl From<RawKey> for Credential {
    fn from(raw: RawKey) -> Self {
        let id = short_name(&raw.name).to_string();
        let restrictions = raw.restrictions.and_then(|r| r.into_model(&id));
        Credential {
            id,
            display_name: raw.display_name,
            restrictions,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    restrictions: Option<RawRestrictions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListKeysResponse {
    #[serde(default)]
    keys: Vec<RawKey>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStringResponse {
    key_string: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Long-running operation returned by create and delete
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationStatus>,
    response: Option<Value>,
}

/// Map a google.rpc status code onto the failure taxonomy
fn status_error(status: OperationStatus) -> GatewayError {
    match status.code {
        5 => GatewayError::NotFound(status.message),
        7 | 16 => GatewayError::Unauthorized(status.message),
        4 | 8 | 10 | 14 => GatewayError::Transient(status.message),
        _ => GatewayError::Malformed(format!("operation failed ({}): {}", status.code, status.message)),
    }
}

impl GcpApiKeysClient {
    /// Create a new API Keys client scoped to one project
    pub fn new(
        base_url: String,
        project: String,
        token: String,
        timeout_seconds: u64,
    ) -> GatewayResult<Self> {
        Ok(Self {
            client: build_client(timeout_seconds)?,
            base_url: trim_base(&base_url).to_string(),
            project,
            token,
            max_polls: DEFAULT_MAX_POLLS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how long-running operations are polled
    pub fn with_polling(mut self, max_polls: u32, poll_interval: Duration) -> Self {
        self.max_polls = max_polls;
        self.poll_interval = poll_interval;
        self
    }

    fn keys_url(&self) -> String {
        format!(
            "{}/v2/projects/{}/locations/global/keys",
            self.base_url, self.project
        )
    }

    fn key_url(&self, id: &str) -> String {
        format!("{}/{}", self.keys_url(), id)
    }

    /// Poll an operation until it is done and return its response payload
    async fn wait_for(&self, mut operation: Operation) -> GatewayResult<Option<Value>> {
        let mut polls = 0;
        while !operation.done {
            if polls >= self.max_polls {
                return Err(GatewayError::Transient(format!(
                    "operation {} did not finish after {} polls",
                    operation.name, polls
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            let url = format!("{}/v2/{}", self.base_url, operation.name);
            debug!("Polling operation: {}", url);
            let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
            operation = decode(response).await?;
        }

        if let Some(status) = operation.error {
            return Err(status_error(status));
        }
        Ok(operation.response)
    }
}

#[async_trait::async_trait]
impl CredentialIssuer for GcpApiKeysClient {
    async fn list_credentials(&self) -> GatewayResult<Vec<Credential>> {
        let url = self.keys_url();
        debug!("Listing keys at: {}", url);

        let mut keys = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(&self.token);
            if let Some(ref token) = next_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ListKeysResponse = decode(request.send().await?).await?;
            keys.extend(page.keys.into_iter().map(Credential::from));

            next_token = page.next_page_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    async fn describe_credential(&self, id: &str) -> GatewayResult<Credential> {
        let url = self.key_url(id);
        debug!("Describing key: {}", url);

        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let raw: RawKey = decode(response).await?;
        Ok(raw.into())
    }

    async fn create_credential(
        &self,
        display_name: &str,
        restrictions: Option<&Restrictions>,
    ) -> GatewayResult<String> {
        let url = self.keys_url();
        let body = CreateKeyRequest {
            display_name: display_name.to_string(),
            restrictions: restrictions.map(RawRestrictions::from_model),
        };
        debug!("Creating key at {}: {:?}", url, body);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let operation: Operation = decode(response).await?;
        let created = self.wait_for(operation).await?.ok_or_else(|| {
            GatewayError::Malformed("create operation finished without a key".to_string())
        })?;

        let key: RawKey =
            serde_json::from_value(created).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let id = short_name(&key.name).to_string();

        info!("Created key {} ({})", id, display_name);
        Ok(id)
    }

    async fn get_credential_secret_value(&self, id: &str) -> GatewayResult<String> {
        let url = format!("{}/keyString", self.key_url(id));
        debug!("Fetching key string: {}", url);

        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let body: KeyStringResponse = decode(response).await?;
        Ok(body.key_string)
    }

    async fn delete_credential(&self, id: &str) -> GatewayResult<()> {
        let url = self.key_url(id);
        debug!("Deleting key: {}", url);

        let response = self.client.delete(&url).bearer_auth(&self.token).send().await?;
        let response = check(response).await?;

        // An empty body means the deletion was applied synchronously
        let bytes = response.bytes().await?;
        if !bytes.is_empty() {
            let operation: Operation = serde_json::from_slice(&bytes)
                .map_err(|e| GatewayError::Malformed(e.to_string()))?;
            self.wait_for(operation).await?;
        }

        info!("Deleted key {}", id);
        Ok(())
    }

    fn issuer_type(&self) -> &'static str {
        "Google API Keys"
    }
}
