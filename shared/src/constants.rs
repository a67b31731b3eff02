//! # Constants for the Device Provisioning Gateway
//!
//! Fixed file names of the on-disk credential bundle, default network
//! settings and the environment variables read by the configuration layer.

// =============================================================================
// CREDENTIAL BUNDLE LAYOUT
// =============================================================================

/// Password-protected private identity container
pub const PRIVATE_CONTAINER_FILE: &str = "cert.pfx";

/// PEM-encoded public certificate
pub const PUBLIC_CERTIFICATE_FILE: &str = "cert.cer";

/// Plaintext shared secret
pub const SECRET_FILE: &str = "password.info";

/// JSON-serialized assignment record
pub const ASSIGNMENT_FILE: &str = "registration.info";

/// JSON-serialized lifecycle state
pub const STATE_FILE: &str = "state.info";

/// Default root directory for credential bundles
pub const DEFAULT_CREDENTIAL_DIR: &str = "./certificates";

/// Longest accepted device identifier (bytes)
pub const MAX_DEVICE_ID_LEN: usize = 128;

// =============================================================================
// IDENTITY
// =============================================================================

/// Validity of a generated device certificate (five years)
pub const IDENTITY_VALIDITY_DAYS: u32 = 5 * 365 + 1;

/// Subject organization of generated certificates
pub const IDENTITY_ORGANIZATION: &str = "TEST";

/// Subject country of generated certificates
pub const IDENTITY_COUNTRY: &str = "US";

// =============================================================================
// PRIVATE CONTAINER (Argon2id + AES-256-GCM)
// =============================================================================

/// Container format version
pub const CONTAINER_VERSION: u32 = 1;

/// Argon2id memory cost in KiB (19 MiB)
pub const KDF_MEMORY_KIB: u32 = 19 * 1024;

/// Argon2id iterations
pub const KDF_ITERATIONS: u32 = 2;

/// Argon2id lanes
pub const KDF_PARALLELISM: u32 = 1;

/// Salt length for key derivation
pub const KDF_SALT_LEN: usize = 16;

/// AES-GCM nonce length
pub const CONTAINER_NONCE_LEN: usize = 12;

/// Domain separation for the container's associated data
pub const CONTAINER_AAD_DOMAIN: &str = "device-provisioning:private-identity:v1";

// =============================================================================
// PROVISIONING AUTHORITY
// =============================================================================

/// Default global registration endpoint
pub const DEFAULT_GLOBAL_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

/// REST API version sent with every authority request
pub const AUTHORITY_API_VERSION: &str = "2021-06-01";

/// Lifetime of a generated shared access token
pub const SAS_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Connect timeout for authority and hub calls
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall timeout for one remote operation
pub const OPERATION_TIMEOUT_SECS: u64 = 60;

/// Delay between registration status polls
pub const REGISTRATION_POLL_INTERVAL_MS: u64 = 2_000;

/// Maximum registration status polls
pub const REGISTRATION_MAX_POLLS: u32 = 10;

// =============================================================================
// HUB TRANSPORT
// =============================================================================

/// Default hub port (TLS)
pub const HUB_PORT: u16 = 8883;

/// Largest frame accepted on the hub connection (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

// =============================================================================
// API CONFIGURATION
// =============================================================================

/// Default API port
pub const API_PORT: u16 = 8080;

/// Maximum request body size (1 MB)
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

/// Delivery status returned for a sent message
pub const DELIVERY_STATUS_SENT: &str = "sent";

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// Root directory for credential bundles
pub const ENV_CREDENTIAL_DIR: &str = "PROVISIONING_CREDENTIAL_DIR";

/// Provisioning service (enrollment management) URL
pub const ENV_SERVICE_URL: &str = "PROVISIONING_SERVICE_URL";

/// Shared access connection credential for enrollment management
pub const ENV_SERVICE_CONNECTION: &str = "PROVISIONING_SERVICE_CONNECTION";

/// Device registration endpoint
pub const ENV_GLOBAL_ENDPOINT: &str = "PROVISIONING_GLOBAL_ENDPOINT";

/// Provisioning ID scope
pub const ENV_ID_SCOPE: &str = "PROVISIONING_ID_SCOPE";

/// API listen port
pub const ENV_API_PORT: &str = "PROVISIONING_API_PORT";

/// CA bundle used to verify hub certificates
pub const ENV_HUB_CA_CERT: &str = "HUB_CA_CERT";

/// Hub port override
pub const ENV_HUB_PORT: &str = "HUB_PORT";
