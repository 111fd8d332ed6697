//! Records exchanged with the secret store and the credential issuer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A named, versioned container in the secret store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Enabled,
    Disabled,
    Destroyed,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionState::Enabled => "ENABLED",
            VersionState::Disabled => "DISABLED",
            VersionState::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// One immutable snapshot of a secret's value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: VersionState,
}

impl Version {
    pub fn is_enabled(&self) -> bool {
        self.state == VersionState::Enabled
    }
}

/// Sort versions newest-first: creation time, then numeric id for ties
pub fn sort_newest_first(versions: &mut [Version]) {
    versions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| numeric_id(&b.id).cmp(&numeric_id(&a.id)))
    });
}

fn numeric_id(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

/// A single API the credential may call, optionally narrowed to methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTarget {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

/// Restriction set carried over verbatim on rotation.
///
/// `None` fields mean "no restriction of that kind", which the issuer treats
/// differently from an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_targets: Option<Vec<ApiTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
}

impl Restrictions {
    pub fn is_empty(&self) -> bool {
        self.api_targets.is_none() && self.allowed_ips.is_none()
    }
}

/// An API key as described by the issuer (the key string is fetched separately)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Restrictions>,
}

/// Result of a create call: the new identifier and its secret value
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub id: String,
    pub key_string: String,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("id", &self.id)
            .field("key_string", &"<redacted>")
            .finish()
    }
}

/// Last path segment of a provider resource name
/// (`projects/p/secrets/db-key/versions/7` -> `7`)
pub fn short_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}
