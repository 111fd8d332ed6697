//! Secret store and credential issuer implementations
//!
//! This module provides the two provider abstractions the rotation engine talks to,
//! a network implementation of each for Google Cloud, and an in-memory fake.

mod credential_issuer;
mod gcp_api_keys;
mod gcp_secrets;
mod http;
mod memory;
mod secret_store;

pub use credential_issuer::CredentialIssuer;
pub use gcp_api_keys::GcpApiKeysClient;
pub use gcp_secrets::GcpSecretManagerClient;
pub use memory::{CallRecord, MemoryBackend, Operation};
pub use secret_store::SecretStore;

use std::sync::Arc;

/// Shared handle to a secret store
pub type Store = Arc<dyn SecretStore>;

/// Shared handle to a credential issuer
pub type Issuer = Arc<dyn CredentialIssuer>;
