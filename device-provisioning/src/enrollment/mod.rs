//! # Device Enrollment
//!
//! Handles enrollment of a device with the provisioning authority:
//! 1. Generate a fresh identity (key pair + self-signed certificate)
//! 2. Store it under the caller's password
//! 3. Re-read the stored public certificate
//! 4. Submit it as the device's attestation
//!
//! The identity stays persisted when step 4 fails; enrolling again
//! replaces it and resubmits.

use std::sync::Arc;

use tracing::{debug, info, warn};

use shared::{
    error::{ProvisioningError, ProvisioningResult},
    types::{EnrollmentAttestation, EnrollmentRecord},
};

use crate::authority::ProvisioningAuthority;
use crate::identity::{validate_device_id, IdentityGenerator, PublicCertificate};
use crate::storage::CredentialStore;

/// Runs the enroll sequence for one device at a time
pub struct EnrollmentCoordinator {
    generator: IdentityGenerator,
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn ProvisioningAuthority>,
}

impl EnrollmentCoordinator {
    pub fn new(
        generator: IdentityGenerator,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn ProvisioningAuthority>,
    ) -> Self {
        Self {
            generator,
            store,
            authority,
        }
    }

    /// Enroll `device_id`, protecting its private identity with `password`
    pub async fn enroll(&self, device_id: &str, password: &str) -> ProvisioningResult<EnrollmentRecord> {
        validate_device_id(device_id)?;
        if password.is_empty() {
            return Err(ProvisioningError::InvalidRequest("password must not be empty".into()));
        }

        let _guard = self.store.lock(device_id).await;
        info!(device_id = %device_id, "Starting device enrollment");

        let identity = self.generator.generate_identity(device_id)?;
        self.store.save(&identity, device_id, password).await?;

        let certificate = self.store.read_public(device_id).await?;
        let attestation = build_attestation(device_id, &certificate);
        debug!(device_id = %device_id, thumbprint = %certificate.thumbprint(), "Attestation built");

        let record = match self.authority.create_or_update_enrollment(&attestation).await {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Enrollment submission failed; identity kept");
                return Err(e);
            }
        };

        info!(
            device_id = %device_id,
            registration_id = %record.registration_id,
            "Device enrolled successfully"
        );
        Ok(record)
    }
}

/// Public-only attestation for a stored certificate
pub fn build_attestation(device_id: &str, certificate: &PublicCertificate) -> EnrollmentAttestation {
    EnrollmentAttestation::new(device_id, certificate.to_pem())
}
