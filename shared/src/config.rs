//! # Configuration for the Device Provisioning Gateway
//!
//! All settings are carried in explicit structs handed to the components
//! that need them. Defaults come from [`crate::constants`]; `from_env`
//! overlays environment variables on top.

use crate::constants::*;
use crate::error::{ProvisioningError, ProvisioningResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// =============================================================================
// SERVICE CONFIGURATION
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API server configuration
    pub api: ApiConfig,

    /// Credential store configuration
    pub storage: StorageConfig,

    /// Identity generation configuration
    pub identity: IdentityConfig,

    /// Provisioning authority connection
    pub authority: AuthorityConfig,

    /// Hub transport configuration
    pub hub: HubConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ProvisioningResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = env::var(ENV_CREDENTIAL_DIR) {
            config.storage.credential_dir = PathBuf::from(dir);
        }

        if let Ok(url) = env::var(ENV_SERVICE_URL) {
            config.authority.service_url = url;
        }

        if let Ok(connection) = env::var(ENV_SERVICE_CONNECTION) {
            config.authority.service_connection = Some(connection);
        }

        if let Ok(endpoint) = env::var(ENV_GLOBAL_ENDPOINT) {
            config.authority.global_endpoint = endpoint;
        }

        if let Ok(scope) = env::var(ENV_ID_SCOPE) {
            config.authority.id_scope = scope;
        }

        if let Ok(port) = env::var(ENV_API_PORT) {
            config.api.port = port.parse().map_err(|_| {
                ProvisioningError::ConfigurationError(format!("{} is not a port: {}", ENV_API_PORT, port))
            })?;
        }

        if let Ok(path) = env::var(ENV_HUB_CA_CERT) {
            config.hub.ca_certificate = Some(PathBuf::from(path));
        }

        if let Ok(port) = env::var(ENV_HUB_PORT) {
            config.hub.port = port.parse().map_err(|_| {
                ProvisioningError::ConfigurationError(format!("{} is not a port: {}", ENV_HUB_PORT, port))
            })?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        self.storage.validate()?;
        self.identity.validate()?;
        self.authority.validate()?;
        self.hub.validate()?;
        Ok(())
    }
}

// =============================================================================
// API CONFIGURATION
// =============================================================================

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: API_PORT,
            enable_cors: true,
            max_body_size: MAX_REQUEST_BODY_SIZE,
            request_timeout_secs: 120,
        }
    }
}

impl ApiConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// STORAGE CONFIGURATION
// =============================================================================

/// Credential store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each device gets a subdirectory named by its ID
    pub credential_dir: PathBuf,

    /// Argon2id memory cost in KiB
    pub kdf_memory_kib: u32,

    /// Argon2id iterations
    pub kdf_iterations: u32,

    /// Argon2id lanes
    pub kdf_parallelism: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credential_dir: PathBuf::from(DEFAULT_CREDENTIAL_DIR),
            kdf_memory_kib: KDF_MEMORY_KIB,
            kdf_iterations: KDF_ITERATIONS,
            kdf_parallelism: KDF_PARALLELISM,
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `dir` with default key derivation costs
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            credential_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Validate storage configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.credential_dir.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigurationError(
                "credential_dir must not be empty".into(),
            ));
        }
        // Argon2 requires at least 8 KiB per lane
        if self.kdf_parallelism == 0
            || self.kdf_iterations == 0
            || self.kdf_memory_kib < self.kdf_parallelism.saturating_mul(8)
        {
            return Err(ProvisioningError::ConfigurationError(
                "key derivation costs are out of range".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// IDENTITY CONFIGURATION
// =============================================================================

/// Parameters for generated device certificates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Subject organization (O=)
    pub organization: String,

    /// Subject country (C=)
    pub country: String,

    /// Certificate validity in days
    pub validity_days: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            organization: IDENTITY_ORGANIZATION.into(),
            country: IDENTITY_COUNTRY.into(),
            validity_days: IDENTITY_VALIDITY_DAYS,
        }
    }
}

impl IdentityConfig {
    /// Validate identity configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.validity_days == 0 {
            return Err(ProvisioningError::ConfigurationError(
                "validity_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// PROVISIONING AUTHORITY CONFIGURATION
// =============================================================================

/// Connection parameters for the provisioning authority
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Enrollment management endpoint (e.g. `https://my-dps.azure-devices-provisioning.net`)
    pub service_url: String,

    /// Shared access connection credential
    /// (`HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`)
    #[serde(skip_serializing)]
    pub service_connection: Option<String>,

    /// Device registration endpoint
    pub global_endpoint: String,

    /// ID scope devices register under
    pub id_scope: String,

    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Timeout of one request in seconds
    pub operation_timeout_secs: u64,

    /// Delay between registration status polls in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum registration status polls before giving up
    pub max_polls: u32,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            service_connection: None,
            global_endpoint: DEFAULT_GLOBAL_ENDPOINT.into(),
            id_scope: String::new(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: OPERATION_TIMEOUT_SECS,
            poll_interval_ms: REGISTRATION_POLL_INTERVAL_MS,
            max_polls: REGISTRATION_MAX_POLLS,
        }
    }
}

impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("service_url", &self.service_url)
            .field("service_connection", &self.service_connection.as_ref().map(|_| "<redacted>"))
            .field("global_endpoint", &self.global_endpoint)
            .field("id_scope", &self.id_scope)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_polls", &self.max_polls)
            .finish()
    }
}

impl AuthorityConfig {
    /// Validate authority configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.global_endpoint.is_empty() {
            return Err(ProvisioningError::ConfigurationError(
                "global_endpoint must be set".into(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(ProvisioningError::ConfigurationError(
                "authority timeouts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get the service connection credential (if set)
    pub fn connection(&self) -> ProvisioningResult<&str> {
        self.service_connection.as_deref().ok_or_else(|| {
            ProvisioningError::ConfigurationError(format!("{} is not set", ENV_SERVICE_CONNECTION))
        })
    }
}

// =============================================================================
// HUB CONFIGURATION
// =============================================================================

/// Hub transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub TLS port
    pub port: u16,

    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Timeout for one send (write + acknowledgement) in seconds
    pub operation_timeout_secs: u64,

    /// PEM bundle of CAs trusted for hub certificates
    pub ca_certificate: Option<PathBuf>,

    /// Skip hub certificate verification (development only)
    pub accept_invalid_certs: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: HUB_PORT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: OPERATION_TIMEOUT_SECS,
            ca_certificate: None,
            accept_invalid_certs: false,
        }
    }
}

impl HubConfig {
    /// Validate hub configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(ProvisioningError::ConfigurationError(
                "hub timeouts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.storage.credential_dir, PathBuf::from(DEFAULT_CREDENTIAL_DIR));
        assert_eq!(config.identity.validity_days, IDENTITY_VALIDITY_DAYS);
        assert_eq!(config.hub.port, HUB_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_bind_addr() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ServiceConfig::default();
        config.hub.connect_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ProvisioningError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_kdf_costs_validated() {
        let mut storage = StorageConfig::at("/tmp/creds");
        storage.kdf_memory_kib = 4;
        assert!(storage.validate().is_err());

        storage.kdf_memory_kib = KDF_MEMORY_KIB;
        storage.kdf_parallelism = u32::MAX;
        assert!(matches!(
            storage.validate(),
            Err(ProvisioningError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_connection_secret_not_serialized() {
        let mut config = AuthorityConfig::default();
        config.service_connection = Some("SharedAccessKey=secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(config.connection().is_ok());
    }

    #[test]
    fn test_connection_secret_not_in_debug() {
        let mut config = ServiceConfig::default();
        config.authority.service_connection = Some("SharedAccessKey=secret".into());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }
}
