//! # Provisioning Service
//!
//! HTTP and command-line front end over [`device_provisioning::Provisioner`]:
//! - Device enrollment (identity generation + authority enrollment)
//! - Device registration
//! - Sending messages from registered devices
//! - Lifecycle state queries

pub mod api;

use device_provisioning::Provisioner;
use shared::config::ServiceConfig;

/// Application state shared across handlers
pub struct AppState {
    /// Configuration
    pub config: ServiceConfig,
    /// Enroll/register/message lifecycle
    pub provisioner: Provisioner,
}
