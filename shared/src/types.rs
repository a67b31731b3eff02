//! # Shared Data Types for the Device Provisioning Gateway
//!
//! Records exchanged between the credential store, the coordinators, the
//! provisioning authority and the HTTP API. Field names are camelCase on the
//! wire and on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// LIFECYCLE STATE
// =============================================================================

/// Lifecycle stage of a device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// No identity stored
    #[default]
    Unenrolled,
    /// Identity generated, stored and submitted for enrollment
    Enrolled,
    /// Assignment received from the provisioning authority
    Registered,
}

impl DeviceState {
    /// Whether the device may attempt registration
    pub fn can_register(&self) -> bool {
        *self >= DeviceState::Enrolled
    }

    /// Whether the device may send messages
    pub fn can_message(&self) -> bool {
        *self == DeviceState::Registered
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Unenrolled => write!(f, "unenrolled"),
            DeviceState::Enrolled => write!(f, "enrolled"),
            DeviceState::Registered => write!(f, "registered"),
        }
    }
}

/// Persisted lifecycle state of one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub device_id: String,
    pub state: DeviceState,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(device_id: &str, state: DeviceState) -> Self {
        Self {
            device_id: device_id.to_string(),
            state,
            updated_at: Utc::now(),
        }
    }
}

// =============================================================================
// ENROLLMENT
// =============================================================================

/// Public-only proof of identity submitted during enrollment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentAttestation {
    /// Device the certificate belongs to
    pub device_id: String,
    /// PEM-encoded public certificate
    pub certificate_pem: String,
}

impl EnrollmentAttestation {
    pub fn new(device_id: impl Into<String>, certificate_pem: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            certificate_pem: certificate_pem.into(),
        }
    }

    /// Attestation mechanism as sent to the authority
    pub fn mechanism(&self) -> AttestationMechanism {
        AttestationMechanism {
            kind: "x509".into(),
            x509: X509Attestation {
                client_certificates: X509Certificates {
                    primary: X509CertificateWithInfo {
                        certificate: self.certificate_pem.clone(),
                    },
                },
            },
        }
    }
}

/// Attestation mechanism of an individual enrollment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttestationMechanism {
    #[serde(rename = "type")]
    pub kind: String,
    pub x509: X509Attestation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct X509Attestation {
    pub client_certificates: X509Certificates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct X509Certificates {
    pub primary: X509CertificateWithInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateWithInfo {
    pub certificate: String,
}

/// Individual enrollment as acknowledged by the provisioning authority
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    /// Enrollment key (equal to the device ID)
    pub registration_id: String,

    /// Device ID the hub will know the device by
    pub device_id: String,

    /// Attestation the device will authenticate with
    pub attestation: AttestationMechanism,

    /// `enabled` or `disabled`
    #[serde(default = "default_provisioning_status")]
    pub provisioning_status: String,

    /// Version tag assigned by the authority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time_utc: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
}

fn default_provisioning_status() -> String {
    "enabled".into()
}

impl EnrollmentRecord {
    /// Build the create-or-update body for an attestation
    pub fn for_attestation(attestation: &EnrollmentAttestation) -> Self {
        Self {
            registration_id: attestation.device_id.clone(),
            device_id: attestation.device_id.clone(),
            attestation: attestation.mechanism(),
            provisioning_status: default_provisioning_status(),
            etag: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Registration outcome reported by the provisioning authority
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub registration_id: String,

    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub assigned_hub: Option<String>,

    /// `assigned`, `assigning`, `failed`, `disabled` or `unassigned`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RegistrationResult {
    /// Whether the authority assigned the device to a hub
    pub fn is_assigned(&self) -> bool {
        self.status.eq_ignore_ascii_case("assigned")
    }
}

/// Assignment of a device to a hub, persisted after registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub device_id: String,

    /// Host name of the assigned hub
    pub assigned_hub: String,

    pub registration_id: String,

    pub registered_at: DateTime<Utc>,
}

// =============================================================================
// MESSAGING
// =============================================================================

/// Acknowledgement of a delivered message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub device_id: String,
    pub endpoint: String,
    pub message_id: String,
    /// Always `"sent"`
    pub status: String,
    pub sent_at: DateTime<Utc>,
}

// =============================================================================
// API REQUEST/RESPONSE TYPES
// =============================================================================

/// Request to enroll a device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub device_id: String,
    pub password: String,
}

/// Request to register a device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub device_id: String,
    pub password: String,
}

/// Request to send one message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub device_id: String,
    pub message_contents: String,
}

/// Response for a lifecycle state query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateResponse {
    pub device_id: String,
    pub state: DeviceState,
}
