//! API Key Rotation Library
//!
//! Rotates API keys whose current value is mirrored in a secret store, keeping the
//! two systems linked through per-version annotations.

pub mod audit;
pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod report;
pub mod rotation;
pub mod rotator;
pub mod staleness;

pub use config::Config;
pub use error::{ErrorKind, GatewayError, RotationError};
pub use gateway::ResourceGateway;
pub use rotation::{rotate_secret, rotate_secrets, Outcome, RotationRecord, RotationReport};
