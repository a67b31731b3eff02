//! # Device Provisioning
//!
//! Core of the provisioning gateway:
//! - Device identity generation (key pair + self-signed certificate)
//! - Password-protected credential storage
//! - Enrollment with the provisioning authority
//! - Certificate-authenticated registration
//! - Messaging to the assigned hub over TLS
//!
//! ## Lifecycle
//!
//! `unenrolled → enrolled → registered → (repeatable) messaging`.
//! Enrollment may be repeated from any stage and replaces the identity.

pub mod authority;
pub mod enrollment;
pub mod identity;
pub mod messaging;
pub mod provisioner;
pub mod registration;
pub mod storage;
pub mod tls;

// Re-export commonly used types
pub use authority::{HttpProvisioningAuthority, ProvisioningAuthority};
pub use enrollment::EnrollmentCoordinator;
pub use identity::{DeviceIdentity, IdentityGenerator, PublicCertificate};
pub use messaging::MessagingClient;
pub use provisioner::Provisioner;
pub use registration::RegistrationCoordinator;
pub use storage::{CredentialStore, DeviceLocks, FileCredentialStore};
pub use tls::{HubConnection, HubTransport, TlsHubTransport};
