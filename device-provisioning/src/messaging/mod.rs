//! # Device Messaging
//!
//! Sends one message from a registered device to its assigned hub. The
//! identity is unlocked with the shared secret kept at registration, and
//! the hub connection is closed on every path. Only a device whose stored
//! state is `registered` may send.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use shared::{
    constants::DELIVERY_STATUS_SENT,
    error::{ProvisioningError, ProvisioningResult},
    types::DeliveryReceipt,
};

use crate::identity::validate_device_id;
use crate::storage::CredentialStore;
use crate::tls::HubTransport;

pub struct MessagingClient {
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HubTransport>,
}

impl MessagingClient {
    pub fn new(store: Arc<dyn CredentialStore>, transport: Arc<dyn HubTransport>) -> Self {
        Self { store, transport }
    }

    /// Deliver `payload` once; no retry
    pub async fn send_message(&self, device_id: &str, payload: &[u8]) -> ProvisioningResult<DeliveryReceipt> {
        validate_device_id(device_id)?;

        let state = self.store.state(device_id).await?;
        if !state.can_message() {
            return Err(ProvisioningError::NotFound(format!(
                "device '{}' is {}, not registered",
                device_id, state
            )));
        }

        let assignment = self.store.read_assignment(device_id).await?;
        let secret = Zeroizing::new(self.store.read_secret(device_id).await?);
        let identity = self.store.read_private(device_id, &secret).await?;

        debug!(device_id = %device_id, hub = %assignment.assigned_hub, "Opening hub connection");
        let mut connection = self.transport.open(&assignment.assigned_hub, &identity).await?;

        let sent = connection.send(payload).await;
        let closed = connection.close().await;

        // Once the hub has acknowledged, the message is delivered whatever close reports
        let message_id = match (sent, closed) {
            (Ok(message_id), Ok(())) => message_id,
            (Ok(message_id), Err(close_err)) => {
                warn!(device_id = %device_id, message_id = %message_id, error = %close_err, "Close failed after delivery");
                message_id
            }
            (Err(send_err), Ok(())) => return Err(send_err),
            (Err(send_err), Err(close_err)) => {
                warn!(device_id = %device_id, send = %send_err, close = %close_err, "Close failed after send failure");
                return Err(send_err);
            }
        };

        info!(device_id = %device_id, message_id = %message_id, "Message sent");
        Ok(DeliveryReceipt {
            device_id: device_id.to_string(),
            endpoint: assignment.assigned_hub,
            message_id,
            status: DELIVERY_STATUS_SENT.into(),
            sent_at: Utc::now(),
        })
    }
}
