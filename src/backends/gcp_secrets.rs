use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};

use super::http::{build_client, check, decode, trim_base};
use super::secret_store::SecretStore;
use crate::error::GatewayResult;
use crate::model::{short_name, sort_newest_first, Secret, Version, VersionState};

/// Google Secret Manager client (REST v1)
#[derive(Clone)]
pub struct GcpSecretManagerClient {
    client: Client,
    base_url: String,
    project: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecret {
    name: String,
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

impl From<RawSecret> for Secret {
    fn from(raw: RawSecret) -> Self {
        Secret {
            name: short_name(&raw.name).to_string(),
            created_at: raw.create_time,
            annotations: raw.annotations,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    name: String,
    create_time: DateTime<Utc>,
    state: VersionState,
}

impl From<RawVersion> for Version {
    fn from(raw: RawVersion) -> Self {
        Version {
            id: short_name(&raw.name).to_string(),
            created_at: raw.create_time,
            state: raw.state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSecretsResponse {
    #[serde(default)]
    secrets: Vec<RawSecret>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<RawVersion>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnnotationsPatch {
    annotations: HashMap<String, String>,
}

impl GcpSecretManagerClient {
    /// Create a new Secret Manager client scoped to one project
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
        })
    }

    fn secrets_url(&self) -> String {
        format!("{}/v1/projects/{}/secrets", self.base_url, self.project)
    }

    fn secret_url(&self, name: &str) -> String {
        format!("{}/{}", self.secrets_url(), name)
    }

    fn version_url(&self, name: &str, version: &str) -> String {
        format!("{}/versions/{}", self.secret_url(name), version)
    }

    async fn set_version_state(&self, name: &str, version: &str, action: &str) -> GatewayResult<()> {
        let url = format!("{}:{}", self.version_url(name, version), action);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await?;
        check(response).await?;

        info!("Version {} of {} now {}d", version, name, action);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretStore for GcpSecretManagerClient {
    async fn list_secrets(&self, limit: Option<usize>) -> GatewayResult<Vec<Secret>> {
        let url = self.secrets_url();
        debug!("Listing secrets at: {}", url);

        let mut secrets: Vec<Secret> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(&self.token);
            if let Some(ref token) = next_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ListSecretsResponse = decode(request.send().await?).await?;
            secrets.extend(page.secrets.into_iter().map(Secret::from));

            next_token = page.next_page_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
        }

        secrets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            secrets.truncate(limit);
        }
        Ok(secrets)
    }

    async fn describe_secret(&self, name: &str) -> GatewayResult<Secret> {
        let url = self.secret_url(name);
        debug!("Describing secret: {}", url);

        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let raw: RawSecret = decode(response).await?;
        Ok(raw.into())
    }

    async fn list_versions(
        &self,
        name: &str,
        limit: Option<usize>,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Version>> {
        let url = format!("{}/versions", self.secret_url(name));
        debug!("Listing versions at: {} (enabled only: {})", url, enabled_only);

        let mut versions: Vec<Version> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if enabled_only {
                query.push(("filter", "state:ENABLED".to_string()));
            }
            if let Some(ref token) = next_token {
                query.push(("pageToken", token.clone()));
            }

            let mut request = self.client.get(&url).bearer_auth(&self.token);
            if !query.is_empty() {
                request = request.query(&query);
            }

            let page: ListVersionsResponse = decode(request.send().await?).await?;
            versions.extend(page.versions.into_iter().map(Version::from));

            next_token = page.next_page_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
        }

        // the filter is applied server side, keep the guarantee regardless
        if enabled_only {
            versions.retain(Version::is_enabled);
        }
        sort_newest_first(&mut versions);
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        Ok(versions)
    }

    async fn enable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        self.set_version_state(name, version, "enable").await
    }

    async fn disable_version(&self, name: &str, version: &str) -> GatewayResult<()> {
        self.set_version_state(name, version, "disable").await
    }

    async fn update_annotations(
        &self,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> GatewayResult<()> {
        let url = self.secret_url(name);
        debug!("Updating annotations at: {}", url);

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .query(&[("updateMask", "annotations")])
            .json(&AnnotationsPatch { annotations })
            .send()
            .await?;
        check(response).await?;

        info!("Successfully updated annotations for {}", name);
        Ok(())
    }

    async fn commit_version(&self, name: &str, value: &str) -> GatewayResult<Version> {
        let url = format!("{}:addVersion", self.secret_url(name));
        debug!("Adding version at: {}", url);

        let body = json!({ "payload": { "data": STANDARD.encode(value) } });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let raw: RawVersion = decode(response).await?;
        let version = Version::from(raw);

        info!("Committed version {} to {}", version.id, name);
        Ok(version)
    }

    fn store_type(&self) -> &'static str {
        "Google Secret Manager"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> GcpSecretManagerClient {
        GcpSecretManagerClient::new(server.url(), "proj".to_string(), "token".to_string(), 5)
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_secrets_paginates_and_sorts_newest_first() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/v1/projects/proj/secrets")
            .match_query(Matcher::Missing)
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"secrets":[{"name":"projects/proj/secrets/old-key","createTime":"2023-01-01T00:00:00Z"}],
                    "nextPageToken":"page2"}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v1/projects/proj/secrets")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "page2".into()))
            .with_status(200)
            .with_body(
                r#"{"secrets":[{"name":"projects/proj/secrets/new-key","createTime":"2024-01-01T00:00:00.123456Z",
                    "annotations":{"version_1":"cred-1"}}]}"#,
            )
            .create_async()
            .await;

        let secrets = client_for(&server).list_secrets(None).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;

        let names: Vec<&str> = secrets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["new-key", "old-key"]);
        assert_eq!(secrets[0].annotations.get("version_1"), Some(&"cred-1".to_string()));
    }

    #[tokio::test]
    async fn test_list_secrets_empty_project() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/projects/proj/secrets")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let secrets = client_for(&server).list_secrets(Some(5)).await.unwrap();
        assert!(secrets.is_empty());
    }

    #[tokio::test]
    async fn test_list_versions_enabled_only() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/proj/secrets/db-key/versions")
            .match_query(Matcher::UrlEncoded("filter".into(), "state:ENABLED".into()))
            .with_status(200)
            .with_body(
                r#"{"versions":[
                    {"name":"projects/proj/secrets/db-key/versions/6","createTime":"2024-01-01T00:00:00Z","state":"ENABLED"},
                    {"name":"projects/proj/secrets/db-key/versions/7","createTime":"2024-02-01T00:00:00Z","state":"ENABLED"}
                ]}"#,
            )
            .create_async()
            .await;

        let versions = client_for(&server)
            .list_versions("db-key", Some(1), true)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, "7");
        assert_eq!(versions[0].state, VersionState::Enabled);
    }

    #[tokio::test]
    async fn test_describe_missing_secret_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/projects/proj/secrets/nope")
            .with_status(404)
            .with_body(r#"{"error":{"code":404}}"#)
            .create_async()
            .await;

        let err = client_for(&server).describe_secret("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_forbidden_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/projects/proj/secrets")
            .with_status(403)
            .create_async()
            .await;

        let err = client_for(&server).list_secrets(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/projects/proj/secrets/db-key")
            .with_status(200)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let err = client_for(&server).describe_secret("db-key").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_commit_version_sends_base64_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/proj/secrets/db-key:addVersion")
            .match_body(Matcher::PartialJson(json!({
                "payload": { "data": STANDARD.encode("new-key-string") }
            })))
            .with_status(200)
            .with_body(
                r#"{"name":"projects/proj/secrets/db-key/versions/8","createTime":"2024-03-01T00:00:00Z","state":"ENABLED"}"#,
            )
            .create_async()
            .await;

        let version = client_for(&server)
            .commit_version("db-key", "new-key-string")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(version.id, "8");
    }

    #[tokio::test]
    async fn test_update_annotations_uses_update_mask() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/v1/projects/proj/secrets/db-key")
            .match_query(Matcher::UrlEncoded("updateMask".into(), "annotations".into()))
            .match_body(Matcher::PartialJson(json!({
                "annotations": { "version_8": "cred-9", "owner": "team-a" }
            })))
            .with_status(200)
            .with_body(r#"{"name":"projects/proj/secrets/db-key"}"#)
            .create_async()
            .await;

        let mut annotations = HashMap::new();
        annotations.insert("version_8".to_string(), "cred-9".to_string());
        annotations.insert("owner".to_string(), "team-a".to_string());
        client_for(&server)
            .update_annotations("db-key", annotations)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_disable_version() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/proj/secrets/db-key/versions/7:disable")
            .with_status(200)
            .with_body(r#"{"name":"projects/proj/secrets/db-key/versions/7","state":"DISABLED"}"#)
            .create_async()
            .await;

        client_for(&server).disable_version("db-key", "7").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let client = GcpSecretManagerClient::new(
            "http://127.0.0.1:1".to_string(),
            "proj".to_string(),
            "token".to_string(),
            1,
        )
        .unwrap();

        let err = client.list_secrets(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
