//! Annotation ledger: which credential each secret version holds
//!
//! The linkage lives in the secret's annotations as `version_<id> = <credential id>`.

use tracing::{debug, info};

use crate::error::GatewayResult;
use crate::gateway::ResourceGateway;
use crate::model::{Secret, Version};

const ANNOTATION_PREFIX: &str = "version_";

/// Annotation key that links `version` to its credential
pub fn annotation_key(version: &str) -> String {
    format!("{}{}", ANNOTATION_PREFIX, version)
}

/// Credential bound to `version` in an already-fetched secret
pub fn credential_in<'a>(secret: &'a Secret, version: &str) -> Option<&'a str> {
    secret
        .annotations
        .get(&annotation_key(version))
        .map(String::as_str)
}

/// Newest version of a secret, optionally only among enabled ones.
///
/// `Ok(None)` means nothing qualifies; a failed call is an `Err`.
pub async fn latest_version(
    gateway: &ResourceGateway,
    secret: &str,
    enabled_only: bool,
) -> GatewayResult<Option<Version>> {
    let versions = gateway.list_versions(secret, Some(1), enabled_only).await?;
    Ok(versions.into_iter().next())
}

/// Look up the credential bound to a version of `secret`
pub async fn resolve_credential_for(
    gateway: &ResourceGateway,
    secret: &str,
    version: &str,
) -> GatewayResult<Option<String>> {
    let described = gateway.describe_secret(secret).await?;
    let credential = credential_in(&described, version).map(str::to_string);
    debug!("{} version {} -> {:?}", secret, version, credential);
    Ok(credential)
}

/// Record that `version` of `secret` holds `credential_id`.
///
/// The store replaces the whole annotation map on update, so the current map is
/// read first and the new entry merged into it.
pub async fn bind(
    gateway: &ResourceGateway,
    secret: &str,
    version: &str,
    credential_id: &str,
) -> GatewayResult<()> {
    let described = gateway.describe_secret(secret).await?;
    let mut annotations = described.annotations;
    annotations.insert(annotation_key(version), credential_id.to_string());

    gateway.update_annotations(secret, annotations).await?;
    info!("Bound {} version {} to credential {}", secret, version, credential_id);
    Ok(())
}

/// Credentials bound to the enabled versions of an already-fetched secret.
///
/// Entries for disabled versions stay in the annotation map after a rotation
/// but no longer count as held.
pub async fn held_credentials(
    gateway: &ResourceGateway,
    secret: &Secret,
) -> GatewayResult<Vec<String>> {
    let enabled = gateway.list_versions(&secret.name, None, true).await?;
    Ok(enabled
        .iter()
        .filter_map(|v| credential_in(secret, &v.id))
        .map(str::to_string)
        .collect())
}

/// Find the secret that currently holds `credential_id` in an enabled version
pub async fn find_secret_by_credential(
    gateway: &ResourceGateway,
    credential_id: &str,
) -> GatewayResult<Option<Secret>> {
    let secrets = gateway.list_secrets(None).await?;
    for secret in secrets {
        if held_credentials(gateway, &secret)
            .await?
            .iter()
            .any(|id| id == credential_id)
        {
            return Ok(Some(secret));
        }
    }
    Ok(None)
}
