//! # Hub Transport
//!
//! Certificate-authenticated TLS connection from a device to its assigned
//! hub. The device certificate is presented as the TLS client certificate;
//! the hub certificate is checked against a configured CA bundle.
//!
//! ## Protocol Flow
//!
//! ```text
//! Device                                Hub
//!   |                                     |
//!   |-------- TLS Handshake ------------->|
//!   |<------- TLS Established ------------|
//!   |                                     |
//!   |-------- open {deviceId} ----------->|
//!   |                                     |
//!   |-------- event {messageId} --------->|
//!   |<------- ack {messageId} ------------|
//!   |            (repeatable)             |
//!   |                                     |
//!   |-------- close --------------------->|
//! ```
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body.

pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info, warn};

use shared::{
    config::HubConfig,
    constants::MAX_FRAME_SIZE,
    error::{ProvisioningError, ProvisioningResult},
};

use crate::identity::DeviceIdentity;
use verifier::{load_root_store, AcceptAnyCertVerifier};

/// Opens certificate-authenticated connections to a hub
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn open(&self, endpoint: &str, identity: &DeviceIdentity) -> ProvisioningResult<Box<dyn HubConnection>>;
}

/// One open hub connection
#[async_trait]
pub trait HubConnection: Send {
    /// Deliver one message, returning the message id the hub acknowledged
    async fn send(&mut self, payload: &[u8]) -> ProvisioningResult<String>;

    /// Close the connection; closing twice is a no-op
    async fn close(&mut self) -> ProvisioningResult<()>;
}

// =============================================================================
// WIRE FRAMES
// =============================================================================

/// Frame exchanged with the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubFrame {
    Open {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    Event {
        #[serde(rename = "messageId")]
        message_id: String,
        /// Base64 of the message bytes
        payload: String,
        #[serde(rename = "sentAt")]
        sent_at: DateTime<Utc>,
    },
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Close,
}

/// Write one length-prefixed frame
pub async fn send_frame<S>(stream: &mut S, frame: &HubFrame) -> ProvisioningResult<()>
where
    S: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(frame)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProvisioningError::InvalidRequest(format!(
            "frame of {} bytes exceeds the {} byte limit",
            json.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = (json.len() as u32).to_be_bytes();
    stream.write_all(&len).await.map_err(io_error)?;
    stream.write_all(&json).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    Ok(())
}

/// Read one length-prefixed frame
pub async fn receive_frame<S>(stream: &mut S) -> ProvisioningResult<HubFrame>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await.map_err(io_error)?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProvisioningError::hub(format!("frame of {} bytes is too large", len)));
    }

    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await.map_err(io_error)?;

    serde_json::from_slice(&buffer).map_err(|e| ProvisioningError::hub(format!("malformed frame: {}", e)))
}

fn io_error(err: std::io::Error) -> ProvisioningError {
    ProvisioningError::hub(err.to_string())
}

// =============================================================================
// TLS TRANSPORT
// =============================================================================

/// Hub transport over TLS with client-certificate authentication
pub struct TlsHubTransport {
    config: HubConfig,
    roots: Option<Arc<RootCertStore>>,
}

impl TlsHubTransport {
    /// Create a transport, loading the CA bundle if one is configured
    pub fn new(config: HubConfig) -> ProvisioningResult<Self> {
        config.validate()?;

        let roots = match &config.ca_certificate {
            Some(path) => Some(Arc::new(load_root_store(path)?)),
            None => None,
        };

        if config.accept_invalid_certs {
            warn!("Hub certificate verification is disabled");
        } else if roots.is_none() {
            warn!("No hub CA bundle configured; hub connections will be refused");
        }

        Ok(Self { config, roots })
    }

    fn client_config(&self, identity: &DeviceIdentity) -> ProvisioningResult<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))?;

        let builder = if self.config.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertVerifier))
        } else {
            let roots = self.roots.clone().ok_or_else(|| {
                ProvisioningError::ConfigurationError("no hub CA bundle configured".into())
            })?;
            builder.with_root_certificates(roots)
        };

        let chain = vec![CertificateDer::from(identity.certificate().der().to_vec())];
        let key = PrivateKeyDer::try_from(identity.private_key_der().to_vec())
            .map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))?;

        builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))
    }
}

#[async_trait]
impl HubTransport for TlsHubTransport {
    async fn open(&self, endpoint: &str, identity: &DeviceIdentity) -> ProvisioningResult<Box<dyn HubConnection>> {
        let connector = TlsConnector::from(Arc::new(self.client_config(identity)?));
        let addr = format!("{}:{}", endpoint, self.config.port);
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        info!(addr = %addr, device_id = %identity.device_id(), "Connecting to hub");

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProvisioningError::hub(format!("connect to {} timed out", addr)))?
            .map_err(|e| ProvisioningError::hub(format!("connect to {}: {}", addr, e)))?;

        let server_name = ServerName::try_from(endpoint.to_string())
            .map_err(|_| ProvisioningError::InvalidRequest(format!("invalid hub host name: {}", endpoint)))?;

        let mut stream = tokio::time::timeout(connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| ProvisioningError::hub(format!("TLS handshake with {} timed out", addr)))?
            .map_err(|e| ProvisioningError::hub(format!("TLS handshake with {}: {}", addr, e)))?;

        debug!("TLS handshake completed");

        send_frame(
            &mut stream,
            &HubFrame::Open {
                device_id: identity.device_id().to_string(),
            },
        )
        .await?;

        Ok(Box::new(TlsHubConnection {
            stream,
            operation_timeout: Duration::from_secs(self.config.operation_timeout_secs),
            closed: false,
        }))
    }
}

/// Open TLS connection to a hub
pub struct TlsHubConnection {
    stream: TlsStream<TcpStream>,
    operation_timeout: Duration,
    closed: bool,
}

impl TlsHubConnection {
    async fn exchange(&mut self, frame: HubFrame, message_id: &str) -> ProvisioningResult<()> {
        send_frame(&mut self.stream, &frame).await?;

        match receive_frame(&mut self.stream).await? {
            HubFrame::Ack { message_id: acked } if acked == message_id => Ok(()),
            HubFrame::Ack { message_id: acked } => Err(ProvisioningError::hub(format!(
                "hub acknowledged {} instead of {}",
                acked, message_id
            ))),
            other => Err(ProvisioningError::hub(format!("unexpected frame from hub: {:?}", other))),
        }
    }
}

#[async_trait]
impl HubConnection for TlsHubConnection {
    async fn send(&mut self, payload: &[u8]) -> ProvisioningResult<String> {
        if self.closed {
            return Err(ProvisioningError::hub("connection already closed"));
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let frame = HubFrame::Event {
            message_id: message_id.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            sent_at: Utc::now(),
        };

        let timeout = self.operation_timeout;
        tokio::time::timeout(timeout, self.exchange(frame, &message_id))
            .await
            .map_err(|_| ProvisioningError::hub(format!("no acknowledgement within {}s", timeout.as_secs())))??;

        debug!(message_id = %message_id, "Hub acknowledged message");
        Ok(message_id)
    }

    async fn close(&mut self) -> ProvisioningResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let sent = send_frame(&mut self.stream, &HubFrame::Close).await;
        let shutdown = self.stream.shutdown().await.map_err(io_error);

        debug!("Hub connection closed");
        sent?;
        shutdown
    }
}
