use std::fmt;
use thiserror::Error;

/// Failure of a single call against the secret store or the credential issuer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network or provider hiccup; callers may retry, nothing here does
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Map an HTTP status code onto the failure taxonomy
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => GatewayError::NotFound(body),
            401 | 403 => GatewayError::Unauthorized(body),
            408 | 429 | 500..=599 => GatewayError::Transient(format!("status {}: {}", status, body)),
            _ => GatewayError::Malformed(format!("unexpected status {}: {}", status, body)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Unauthorized(_) => ErrorKind::Unauthorized,
            GatewayError::Transient(_) => ErrorKind::Transient,
            GatewayError::Malformed(_) => ErrorKind::Malformed,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GatewayError::Malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            return GatewayError::from_status(status.as_u16(), err.to_string());
        }
        // timeouts, refused connections and the like
        GatewayError::Transient(err.to_string())
    }
}

/// Why a single secret could not be rotated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("secret '{secret}' has no annotation for version {version}")]
    MissingLinkage { secret: String, version: String },

    #[error("secret '{0}' has no enabled version")]
    NoEligibleVersion(String),
}

impl RotationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RotationError::Gateway(err) => err.kind(),
            RotationError::MissingLinkage { .. } => ErrorKind::MissingLinkage,
            RotationError::NoEligibleVersion(_) => ErrorKind::NoEligibleVersion,
        }
    }
}

/// Flat, machine-readable error classification used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    MissingLinkage,
    NoEligibleVersion,
    Transient,
    Malformed,
    Unauthorized,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::MissingLinkage => "missing annotation",
            ErrorKind::NoEligibleVersion => "no eligible version",
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::from_status(404, String::new()).kind(), ErrorKind::NotFound);
        assert_eq!(GatewayError::from_status(401, String::new()).kind(), ErrorKind::Unauthorized);
        assert_eq!(GatewayError::from_status(403, String::new()).kind(), ErrorKind::Unauthorized);
        assert_eq!(GatewayError::from_status(429, String::new()).kind(), ErrorKind::Transient);
        assert_eq!(GatewayError::from_status(503, String::new()).kind(), ErrorKind::Transient);
        assert_eq!(GatewayError::from_status(400, String::new()).kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_rotation_error_kind() {
        let err = RotationError::MissingLinkage {
            secret: "orphan-key".to_string(),
            version: "3".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::MissingLinkage);
        assert_eq!(err.kind().as_str(), "missing annotation");

        let err: RotationError = GatewayError::Transient("reset".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
