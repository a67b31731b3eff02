//! # Provisioning Authority
//!
//! Client for the remote service that holds individual enrollments and
//! assigns registered devices to a hub.
//!
//! - Enrollment management is authorized with a shared access signature
//!   derived from the service connection credential.
//! - Device registration is authorized by the device certificate itself
//!   (client-certificate TLS), then polled until the authority reaches a
//!   terminal status.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use shared::{
    config::AuthorityConfig,
    constants::{AUTHORITY_API_VERSION, SAS_TOKEN_TTL_SECS},
    error::{ProvisioningError, ProvisioningResult},
    types::{EnrollmentAttestation, EnrollmentRecord, RegistrationResult},
};

use crate::identity::DeviceIdentity;

/// Capability interface over the provisioning authority
#[async_trait]
pub trait ProvisioningAuthority: Send + Sync {
    /// Create or replace the individual enrollment keyed by the attestation's device ID
    async fn create_or_update_enrollment(
        &self,
        attestation: &EnrollmentAttestation,
    ) -> ProvisioningResult<EnrollmentRecord>;

    /// Register the device, authenticating with its certificate
    async fn register(&self, identity: &DeviceIdentity) -> ProvisioningResult<RegistrationResult>;
}

// =============================================================================
// SERVICE CONNECTION CREDENTIAL
// =============================================================================

/// Parsed `HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceConnection {
    pub host_name: String,
    pub key_name: String,
    key: String,
}

impl ServiceConnection {
    pub fn parse(connection: &str) -> ProvisioningResult<Self> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection.split(';').filter(|p| !p.trim().is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| ProvisioningError::ConfigurationError(format!("malformed connection segment '{}'", name_of(part))))?;
            match name.trim() {
                "HostName" => host_name = Some(value.trim().to_string()),
                "SharedAccessKeyName" => key_name = Some(value.trim().to_string()),
                "SharedAccessKey" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let missing = |field: &str| ProvisioningError::ConfigurationError(format!("connection credential lacks {}", field));
        Ok(Self {
            host_name: host_name.ok_or_else(|| missing("HostName"))?,
            key_name: key_name.ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
        })
    }

    /// Authorization header value valid until `expiry` (unix seconds)
    pub fn sas_token(&self, expiry: i64) -> ProvisioningResult<String> {
        sas_token(&self.host_name, &self.key_name, &self.key, expiry)
    }
}

impl std::fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("host_name", &self.host_name)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Segment name for error messages; never echoes the value
fn name_of(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

/// Shared access signature over `resource_uri`
///
/// `sig` is the base64 HMAC-SHA256, keyed with the decoded shared key, of
/// the URL-encoded resource URI and the expiry joined by a newline.
pub fn sas_token(resource_uri: &str, key_name: &str, key_b64: &str, expiry: i64) -> ProvisioningResult<String> {
    let encoded_uri = urlencoding::encode(resource_uri);
    let key = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .map_err(|e| ProvisioningError::ConfigurationError(format!("shared access key is not base64: {}", e)))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))?;
    mac.update(format!("{}\n{}", encoded_uri, expiry).as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry,
        key_name
    ))
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// Registration operation as reported while the authority is assigning
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationOperation {
    #[serde(default)]
    operation_id: Option<String>,
    status: String,
    #[serde(default)]
    registration_state: Option<RegistrationResult>,
}

impl RegistrationOperation {
    fn is_assigning(&self) -> bool {
        self.status.eq_ignore_ascii_case("assigning")
    }

    fn into_result(self, registration_id: &str) -> RegistrationResult {
        self.registration_state.unwrap_or_else(|| RegistrationResult {
            registration_id: registration_id.to_string(),
            device_id: None,
            assigned_hub: None,
            status: self.status,
            error_code: None,
            error_message: None,
        })
    }
}

/// Provisioning authority reached over HTTPS
pub struct HttpProvisioningAuthority {
    config: AuthorityConfig,
    client: Client,
}

impl HttpProvisioningAuthority {
    pub fn new(config: AuthorityConfig) -> ProvisioningResult<Self> {
        config.validate()?;
        let client = Self::client_builder(&config)
            .build()
            .map_err(|e| ProvisioningError::ConfigurationError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn client_builder(config: &AuthorityConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.operation_timeout_secs))
    }

    /// Enrollment endpoint for a device
    pub fn enrollment_url(&self, connection: &ServiceConnection, device_id: &str) -> String {
        let base = if self.config.service_url.is_empty() {
            format!("https://{}", connection.host_name)
        } else {
            self.config.service_url.trim_end_matches('/').to_string()
        };
        format!(
            "{}/enrollments/{}?api-version={}",
            base,
            urlencoding::encode(device_id),
            AUTHORITY_API_VERSION
        )
    }

    /// Registration endpoint for a device
    pub fn registration_url(&self, device_id: &str) -> ProvisioningResult<String> {
        Ok(format!(
            "{}/register?api-version={}",
            self.registration_base(device_id)?,
            AUTHORITY_API_VERSION
        ))
    }

    fn operation_url(&self, device_id: &str, operation_id: &str) -> ProvisioningResult<String> {
        Ok(format!(
            "{}/operations/{}?api-version={}",
            self.registration_base(device_id)?,
            urlencoding::encode(operation_id),
            AUTHORITY_API_VERSION
        ))
    }

    fn registration_base(&self, device_id: &str) -> ProvisioningResult<String> {
        if self.config.id_scope.is_empty() {
            return Err(ProvisioningError::ConfigurationError("id_scope is not set".into()));
        }
        Ok(format!(
            "{}/{}/registrations/{}",
            self.config.global_endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.config.id_scope),
            urlencoding::encode(device_id)
        ))
    }

    /// Client presenting the device certificate
    fn device_client(&self, identity: &DeviceIdentity) -> ProvisioningResult<Client> {
        let key_pem = identity.private_key_pem()?;
        let mut pem = identity.certificate().to_pem().into_bytes();
        pem.extend_from_slice(b"\r\n");
        pem.extend_from_slice(key_pem.as_bytes());

        let tls_identity = reqwest::Identity::from_pem(&pem).map_err(|e| ProvisioningError::CryptoFailure(e.to_string()));
        zeroize::Zeroize::zeroize(&mut pem);

        Self::client_builder(&self.config)
            .identity(tls_identity?)
            .build()
            .map_err(|e| ProvisioningError::ConfigurationError(e.to_string()))
    }

    async fn poll_registration(
        &self,
        client: &Client,
        device_id: &str,
        mut operation: RegistrationOperation,
    ) -> ProvisioningResult<RegistrationResult> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut polls = 0;

        while operation.is_assigning() {
            if polls >= self.config.max_polls {
                return Err(ProvisioningError::authority(format!(
                    "registration of '{}' still assigning after {} polls",
                    device_id, polls
                )));
            }
            let operation_id = operation
                .operation_id
                .clone()
                .ok_or_else(|| ProvisioningError::authority("assigning response carried no operation id"))?;

            tokio::time::sleep(interval).await;
            polls += 1;

            debug!(device_id = %device_id, operation_id = %operation_id, poll = polls, "Polling registration");
            let response = client
                .get(self.operation_url(device_id, &operation_id)?)
                .send()
                .await
                .map_err(transport_error)?;
            operation = read_json(response).await?;
        }

        Ok(operation.into_result(device_id))
    }
}

#[async_trait]
impl ProvisioningAuthority for HttpProvisioningAuthority {
    async fn create_or_update_enrollment(
        &self,
        attestation: &EnrollmentAttestation,
    ) -> ProvisioningResult<EnrollmentRecord> {
        let connection = ServiceConnection::parse(self.config.connection()?)?;
        let expiry = chrono::Utc::now().timestamp() + SAS_TOKEN_TTL_SECS;
        let url = self.enrollment_url(&connection, &attestation.device_id);

        debug!(url = %url, "Submitting individual enrollment");

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::AUTHORIZATION, connection.sas_token(expiry)?)
            .json(&EnrollmentRecord::for_attestation(attestation))
            .send()
            .await
            .map_err(transport_error)?;

        let record: EnrollmentRecord = read_json(response).await?;
        info!(device_id = %record.device_id, "Enrollment acknowledged");
        Ok(record)
    }

    async fn register(&self, identity: &DeviceIdentity) -> ProvisioningResult<RegistrationResult> {
        let device_id = identity.device_id();
        let client = self.device_client(identity)?;
        let url = self.registration_url(device_id)?;

        debug!(url = %url, "Requesting registration");

        let response = client
            .put(&url)
            .json(&serde_json::json!({ "registrationId": device_id }))
            .send()
            .await
            .map_err(transport_error)?;
        let operation: RegistrationOperation = read_json(response).await?;

        let result = self.poll_registration(&client, device_id, operation).await?;
        info!(device_id = %device_id, status = %result.status, "Registration finished");
        Ok(result)
    }
}

// =============================================================================
// RESPONSE HANDLING
// =============================================================================

fn transport_error(err: reqwest::Error) -> ProvisioningError {
    if err.is_timeout() {
        ProvisioningError::authority(format!("request timed out: {}", err))
    } else {
        ProvisioningError::authority(err.to_string())
    }
}

/// Map a non-success HTTP status to the error it stands for
pub fn status_error(status: StatusCode, body: &str) -> ProvisioningError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProvisioningError::AuthFailure(detail),
        StatusCode::NOT_FOUND => ProvisioningError::NotFound(detail),
        _ => ProvisioningError::authority(detail),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> ProvisioningResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, "Provisioning authority rejected request");
        return Err(status_error(status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| ProvisioningError::authority(format!("unreadable response: {}", e)))
}
