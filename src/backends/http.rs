use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Build the HTTP client shared by the Google clients
pub(crate) fn build_client(timeout_seconds: u64) -> GatewayResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| GatewayError::Malformed(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-success response into a typed failure
pub(crate) async fn check(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), body))
}

/// Check the status and decode a JSON body
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let response = check(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Malformed(e.to_string()))
}

pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
