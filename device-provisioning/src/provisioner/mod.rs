//! # Provisioner
//!
//! Wires the store, the authority client and the hub transport into the
//! three lifecycle coordinators behind one handle.

use std::sync::Arc;

use tracing::info;

use shared::{
    config::ServiceConfig,
    error::ProvisioningResult,
    types::{AssignmentRecord, DeliveryReceipt, DeviceState, EnrollmentRecord},
};

use crate::authority::{HttpProvisioningAuthority, ProvisioningAuthority};
use crate::enrollment::EnrollmentCoordinator;
use crate::identity::{validate_device_id, IdentityGenerator};
use crate::messaging::MessagingClient;
use crate::registration::RegistrationCoordinator;
use crate::storage::{CredentialStore, FileCredentialStore};
use crate::tls::{HubTransport, TlsHubTransport};

/// Enroll, register and message devices
pub struct Provisioner {
    store: Arc<dyn CredentialStore>,
    enrollment: EnrollmentCoordinator,
    registration: RegistrationCoordinator,
    messaging: MessagingClient,
}

impl Provisioner {
    /// Assemble from explicit collaborators
    pub fn new(
        generator: IdentityGenerator,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn ProvisioningAuthority>,
        transport: Arc<dyn HubTransport>,
    ) -> Self {
        Self {
            enrollment: EnrollmentCoordinator::new(generator, store.clone(), authority.clone()),
            registration: RegistrationCoordinator::new(store.clone(), authority),
            messaging: MessagingClient::new(store.clone(), transport),
            store,
        }
    }

    /// Assemble the file store and network clients from configuration
    pub async fn from_config(config: &ServiceConfig) -> ProvisioningResult<Self> {
        config.validate()?;

        let store = FileCredentialStore::new(config.storage.clone()).await?;
        let authority = HttpProvisioningAuthority::new(config.authority.clone())?;
        let transport = TlsHubTransport::new(config.hub.clone())?;

        info!(credential_dir = ?config.storage.credential_dir, "Provisioner ready");

        Ok(Self::new(
            IdentityGenerator::new(config.identity.clone()),
            Arc::new(store),
            Arc::new(authority),
            Arc::new(transport),
        ))
    }

    pub async fn enroll(&self, device_id: &str, password: &str) -> ProvisioningResult<EnrollmentRecord> {
        self.enrollment.enroll(device_id, password).await
    }

    pub async fn register(&self, device_id: &str, password: &str) -> ProvisioningResult<AssignmentRecord> {
        self.registration.register(device_id, password).await
    }

    pub async fn send_message(&self, device_id: &str, payload: &[u8]) -> ProvisioningResult<DeliveryReceipt> {
        self.messaging.send_message(device_id, payload).await
    }

    pub async fn state(&self, device_id: &str) -> ProvisioningResult<DeviceState> {
        validate_device_id(device_id)?;
        self.store.state(device_id).await
    }

    /// Remove every stored credential of a device
    pub async fn purge(&self, device_id: &str) -> ProvisioningResult<()> {
        validate_device_id(device_id)?;
        let _guard = self.store.lock(device_id).await;
        self.store.delete(device_id).await
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }
}
