//! # Error Types for the Device Provisioning Gateway
//!
//! One error enum covers the whole lifecycle (identity generation, credential
//! storage, enrollment, registration and messaging). Every coordinator
//! surfaces the first failure it sees; nothing here is retried internally.

use thiserror::Error;

/// Main error type for the entire system
#[derive(Error, Debug)]
pub enum ProvisioningError {
    // =========================================================================
    // CRYPTOGRAPHY ERRORS
    // =========================================================================

    /// Key pair generation or self-signing failed
    #[error("Cryptographic operation failed: {0}")]
    CryptoFailure(String),

    // =========================================================================
    // CREDENTIAL STORE ERRORS
    // =========================================================================

    /// Reading or writing the credential bundle failed
    #[error("Credential storage failure: {0}")]
    StorageFailure(String),

    /// Bundle, certificate, assignment or secret is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Wrong password, or the remote side rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// The stored container holds no usable private-key-bearing entry
    #[error("Credential bundle for '{device_id}' is corrupt: {reason}")]
    CorruptBundle { device_id: String, reason: String },

    // =========================================================================
    // REMOTE ERRORS
    // =========================================================================

    /// Provisioning authority or hub transport failed
    #[error("Remote call to {service} failed: {reason}")]
    RemoteFailure { service: String, reason: String },

    // =========================================================================
    // REQUEST / CONFIGURATION ERRORS
    // =========================================================================

    /// Invalid caller input (e.g. an unusable device identifier)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias using ProvisioningError
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

impl ProvisioningError {
    /// Shorthand for a failure reported by the provisioning authority
    pub fn authority(reason: impl Into<String>) -> Self {
        ProvisioningError::RemoteFailure {
            service: "provisioning-authority".into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a failure reported by the hub transport
    pub fn hub(reason: impl Into<String>) -> Self {
        ProvisioningError::RemoteFailure {
            service: "hub".into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a corrupt bundle
    pub fn corrupt(device_id: &str, reason: impl Into<String>) -> Self {
        ProvisioningError::CorruptBundle {
            device_id: device_id.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<serde_json::Error> for ProvisioningError {
    fn from(err: serde_json::Error) -> Self {
        ProvisioningError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ProvisioningError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProvisioningError::NotFound(err.to_string()),
            _ => ProvisioningError::StorageFailure(err.to_string()),
        }
    }
}

impl From<base64::DecodeError> for ProvisioningError {
    fn from(err: base64::DecodeError) -> Self {
        ProvisioningError::SerializationError(err.to_string())
    }
}

// =============================================================================
// ERROR CATEGORIES (for logging)
// =============================================================================

impl ProvisioningError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProvisioningError::CryptoFailure(_) => "crypto",

            ProvisioningError::StorageFailure(_)
            | ProvisioningError::NotFound(_)
            | ProvisioningError::CorruptBundle { .. } => "storage",

            ProvisioningError::AuthFailure(_) => "auth",

            ProvisioningError::RemoteFailure { .. } => "remote",

            ProvisioningError::InvalidRequest(_) => "request",

            ProvisioningError::ConfigurationError(_) => "config",

            ProvisioningError::SerializationError(_) => "internal",
        }
    }

    /// Check if the caller may retry the operation as-is
    ///
    /// Only remote failures qualify: every local step is an idempotent
    /// overwrite, so retrying e.g. an enrollment whose upstream call failed
    /// is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisioningError::RemoteFailure { .. })
    }
}
