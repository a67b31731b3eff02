//! # Device Registration
//!
//! Handles registration of an enrolled device:
//! 1. Unlock the stored private identity with the caller's password
//! 2. Register with the provisioning authority using that identity
//! 3. Keep the password as the shared secret, then store the assignment

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use shared::{
    error::{ProvisioningError, ProvisioningResult},
    types::{AssignmentRecord, RegistrationResult},
};

use crate::authority::ProvisioningAuthority;
use crate::identity::validate_device_id;
use crate::storage::CredentialStore;

/// Runs the register sequence for one device at a time
pub struct RegistrationCoordinator {
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn ProvisioningAuthority>,
}

impl RegistrationCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, authority: Arc<dyn ProvisioningAuthority>) -> Self {
        Self { store, authority }
    }

    /// Register `device_id`; re-registering overwrites the assignment
    pub async fn register(&self, device_id: &str, password: &str) -> ProvisioningResult<AssignmentRecord> {
        validate_device_id(device_id)?;

        let _guard = self.store.lock(device_id).await;
        info!(device_id = %device_id, "Starting device registration");

        let state = self.store.state(device_id).await?;
        if !state.can_register() {
            return Err(ProvisioningError::NotFound(format!("device '{}' is not enrolled", device_id)));
        }

        let identity = self.store.read_private(device_id, password).await?;
        let result = self.authority.register(&identity).await?;
        let record = assignment_from(device_id, result)?;

        // The assignment moves the device to `registered`, so it goes last
        self.store.save_secret(device_id, password).await?;
        self.store.save_assignment(&record).await?;

        info!(
            device_id = %device_id,
            assigned_hub = %record.assigned_hub,
            "Device registered successfully"
        );
        Ok(record)
    }
}

/// Accept only an `assigned` result for this device with a hub to talk to
fn assignment_from(device_id: &str, result: RegistrationResult) -> ProvisioningResult<AssignmentRecord> {
    if !result.is_assigned() {
        warn!(device_id = %device_id, status = %result.status, "Registration not assigned");
        let detail = result
            .error_message
            .map(|m| format!(" ({})", m))
            .unwrap_or_default();
        return Err(ProvisioningError::authority(format!(
            "registration of '{}' ended with status '{}'{}",
            device_id, result.status, detail
        )));
    }

    let assigned_device = result.device_id.unwrap_or_else(|| result.registration_id.clone());
    if assigned_device != device_id {
        warn!(device_id = %device_id, assigned_device = %assigned_device, "Assignment names another device");
        return Err(ProvisioningError::authority(format!(
            "assignment for '{}' names device '{}'",
            device_id, assigned_device
        )));
    }

    let assigned_hub = result
        .assigned_hub
        .filter(|hub| !hub.is_empty())
        .ok_or_else(|| ProvisioningError::authority(format!("no hub assigned to '{}'", device_id)))?;

    Ok(AssignmentRecord {
        device_id: assigned_device,
        assigned_hub,
        registration_id: result.registration_id,
        registered_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned(device_id: Option<&str>, hub: Option<&str>) -> RegistrationResult {
        RegistrationResult {
            registration_id: "dev-1".into(),
            device_id: device_id.map(str::to_string),
            assigned_hub: hub.map(str::to_string),
            status: "assigned".into(),
            error_code: None,
            error_message: None,
        }
    }

    #[test]
    fn test_assigned_result_accepted() {
        let record = assignment_from("dev-1", assigned(Some("dev-1"), Some("hub-1.example.net"))).unwrap();
        assert_eq!(record.device_id, "dev-1");
        assert_eq!(record.assigned_hub, "hub-1.example.net");
    }

    #[test]
    fn test_missing_device_id_falls_back_to_registration_id() {
        let record = assignment_from("dev-1", assigned(None, Some("hub-1.example.net"))).unwrap();
        assert_eq!(record.device_id, "dev-1");
    }

    #[test]
    fn test_other_device_rejected() {
        let result = assignment_from("dev-1", assigned(Some("dev-2"), Some("hub-1.example.net")));
        assert!(matches!(result, Err(ProvisioningError::RemoteFailure { .. })));
    }

    #[test]
    fn test_missing_hub_rejected() {
        let result = assignment_from("dev-1", assigned(Some("dev-1"), None));
        assert!(matches!(result, Err(ProvisioningError::RemoteFailure { .. })));
    }

    #[test]
    fn test_failed_status_rejected() {
        let mut result = assigned(Some("dev-1"), None);
        result.status = "failed".into();
        result.error_message = Some("enrollment disabled".into());

        let err = assignment_from("dev-1", result).unwrap_err();
        assert!(err.to_string().contains("enrollment disabled"));
    }
}
