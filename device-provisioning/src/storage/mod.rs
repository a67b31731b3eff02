//! # Credential Store
//!
//! Persists, keyed by device ID:
//! - the private identity in a password-protected container
//! - the public certificate in PEM form
//! - the shared secret (plaintext, owner-only permissions)
//! - the assignment record received at registration
//! - the explicit lifecycle state
//!
//! Every device gets its own directory under the configured root:
//!
//! ```text
//! <credential_dir>/<device_id>/
//!   cert.pfx            private identity container
//!   cert.cer            PEM certificate
//!   password.info       shared secret
//!   registration.info   assignment record (JSON)
//!   state.info          lifecycle state (JSON)
//! ```
//!
//! All writes overwrite. Files are written to a temporary name and renamed
//! into place.

mod container;

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use shared::{
    config::StorageConfig,
    constants::*,
    error::{ProvisioningError, ProvisioningResult},
    types::{AssignmentRecord, DeviceState, StateRecord},
};

use crate::identity::{validate_device_id, DeviceIdentity, PublicCertificate};

/// Capability interface over persisted device credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist a freshly generated identity, replacing any previous bundle
    async fn save(&self, identity: &DeviceIdentity, device_id: &str, password: &str) -> ProvisioningResult<()>;

    /// Read the public certificate
    async fn read_public(&self, device_id: &str) -> ProvisioningResult<PublicCertificate>;

    /// Decrypt the private identity
    async fn read_private(&self, device_id: &str, password: &str) -> ProvisioningResult<DeviceIdentity>;

    /// Persist the assignment received at registration
    async fn save_assignment(&self, record: &AssignmentRecord) -> ProvisioningResult<()>;

    async fn read_assignment(&self, device_id: &str) -> ProvisioningResult<AssignmentRecord>;

    /// Persist the shared secret used to unlock the identity when messaging
    async fn save_secret(&self, device_id: &str, password: &str) -> ProvisioningResult<()>;

    async fn read_secret(&self, device_id: &str) -> ProvisioningResult<String>;

    /// Current lifecycle stage
    async fn state(&self, device_id: &str) -> ProvisioningResult<DeviceState>;

    /// Remove the whole bundle
    async fn delete(&self, device_id: &str) -> ProvisioningResult<()>;

    /// Serialize multi-step operations on one device
    async fn lock(&self, device_id: &str) -> DeviceGuard;
}

// =============================================================================
// PER-DEVICE LOCKS
// =============================================================================

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Held for the duration of a store-then-upstream sequence
///
/// Dropping the last guard of a device removes its entry from the lock map.
pub struct DeviceGuard {
    guard: Option<OwnedMutexGuard<()>>,
    device_id: String,
    locks: Arc<LockMap>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the mutex, so the count only
        // reaches one once nobody else is queued for this device
        self.locks
            .remove_if(&self.device_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl std::fmt::Debug for DeviceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGuard").field("device_id", &self.device_id).finish()
    }
}

/// One async mutex per device ID; distinct devices never contend
///
/// Entries exist only while a device is locked or awaited.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    inner: Arc<LockMap>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, device_id: &str) -> DeviceGuard {
        let mutex = {
            let entry = self.inner.entry(device_id.to_string()).or_default();
            Arc::clone(entry.value())
        };
        let guard = mutex.lock_owned().await;

        DeviceGuard {
            guard: Some(guard),
            device_id: device_id.to_string(),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of devices currently locked or awaited
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// =============================================================================
// FILE-BACKED STORE
// =============================================================================

/// Directory-per-device credential store
pub struct FileCredentialStore {
    config: StorageConfig,
    locks: DeviceLocks,
}

impl FileCredentialStore {
    /// Create a store rooted at `config.credential_dir`
    pub async fn new(config: StorageConfig) -> ProvisioningResult<Self> {
        config.validate()?;

        info!(path = ?config.credential_dir, "Initializing credential store");

        tokio::fs::create_dir_all(&config.credential_dir)
            .await
            .map_err(|e| storage_error(&config.credential_dir, e))?;

        Ok(Self {
            config,
            locks: DeviceLocks::new(),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.config.credential_dir
    }

    /// Directory of one device (validated)
    pub fn device_dir(&self, device_id: &str) -> ProvisioningResult<PathBuf> {
        validate_device_id(device_id)?;
        Ok(self.config.credential_dir.join(device_id))
    }

    fn file(&self, device_id: &str, name: &str) -> ProvisioningResult<PathBuf> {
        Ok(self.device_dir(device_id)?.join(name))
    }

    /// Fail with `NotFound` unless the device directory exists
    async fn require_bundle(&self, device_id: &str) -> ProvisioningResult<PathBuf> {
        let dir = self.device_dir(device_id)?;
        if !tokio::fs::try_exists(&dir).await.map_err(|e| storage_error(&dir, e))? {
            return Err(ProvisioningError::NotFound(format!(
                "no credential bundle for device '{}'",
                device_id
            )));
        }
        Ok(dir)
    }

    async fn write_state(&self, device_id: &str, state: DeviceState) -> ProvisioningResult<()> {
        let record = StateRecord::new(device_id, state);
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.file(device_id, STATE_FILE)?, &json, false).await?;
        debug!(device_id = %device_id, state = %state, "Lifecycle state updated");
        Ok(())
    }

    /// State implied by which files exist (bundles written without a state file)
    async fn infer_state(&self, device_id: &str) -> ProvisioningResult<DeviceState> {
        if exists(&self.file(device_id, ASSIGNMENT_FILE)?).await? {
            Ok(DeviceState::Registered)
        } else if exists(&self.file(device_id, PUBLIC_CERTIFICATE_FILE)?).await? {
            Ok(DeviceState::Enrolled)
        } else {
            Ok(DeviceState::Unenrolled)
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, identity: &DeviceIdentity, device_id: &str, password: &str) -> ProvisioningResult<()> {
        let dir = self.device_dir(device_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error(&dir, e))?;

        let sealed = container::seal(identity, device_id, password, &self.config)?;
        write_atomic(&dir.join(PRIVATE_CONTAINER_FILE), &sealed, true).await?;

        let pem = identity.certificate().to_pem();
        write_atomic(&dir.join(PUBLIC_CERTIFICATE_FILE), pem.as_bytes(), false).await?;

        // Assignment and secret belonged to the replaced identity
        remove_if_exists(&dir.join(ASSIGNMENT_FILE)).await?;
        remove_if_exists(&dir.join(SECRET_FILE)).await?;

        self.write_state(device_id, DeviceState::Enrolled).await?;

        debug!(path = ?dir, "Credential bundle stored");
        info!(device_id = %device_id, "Device identity saved");
        Ok(())
    }

    async fn read_public(&self, device_id: &str) -> ProvisioningResult<PublicCertificate> {
        let path = self.file(device_id, PUBLIC_CERTIFICATE_FILE)?;
        let pem = read_string(&path, "public certificate", device_id).await?;

        PublicCertificate::from_pem(&pem).map_err(|e| ProvisioningError::corrupt(device_id, e.to_string()))
    }

    async fn read_private(&self, device_id: &str, password: &str) -> ProvisioningResult<DeviceIdentity> {
        let path = self.file(device_id, PRIVATE_CONTAINER_FILE)?;
        let bytes = read_bytes(&path, "private identity", device_id).await?;

        let entries = match container::open(&bytes, device_id, password) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(device_id = %device_id, category = e.category(), "Failed to open private identity");
                return Err(e);
            }
        };
        container::select_private(entries, device_id)
    }

    async fn save_assignment(&self, record: &AssignmentRecord) -> ProvisioningResult<()> {
        let dir = self.require_bundle(&record.device_id).await?;

        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir.join(ASSIGNMENT_FILE), &json, false).await?;
        self.write_state(&record.device_id, DeviceState::Registered).await?;

        info!(
            device_id = %record.device_id,
            assigned_hub = %record.assigned_hub,
            "Assignment saved"
        );
        Ok(())
    }

    async fn read_assignment(&self, device_id: &str) -> ProvisioningResult<AssignmentRecord> {
        let path = self.file(device_id, ASSIGNMENT_FILE)?;
        let json = read_bytes(&path, "assignment", device_id).await?;

        serde_json::from_slice(&json)
            .map_err(|e| ProvisioningError::corrupt(device_id, format!("unreadable assignment: {}", e)))
    }

    async fn save_secret(&self, device_id: &str, password: &str) -> ProvisioningResult<()> {
        let dir = self.require_bundle(device_id).await?;
        write_atomic(&dir.join(SECRET_FILE), password.as_bytes(), true).await?;
        debug!(device_id = %device_id, "Shared secret saved");
        Ok(())
    }

    async fn read_secret(&self, device_id: &str) -> ProvisioningResult<String> {
        let path = self.file(device_id, SECRET_FILE)?;
        read_string(&path, "shared secret", device_id).await
    }

    async fn state(&self, device_id: &str) -> ProvisioningResult<DeviceState> {
        let path = self.file(device_id, STATE_FILE)?;
        match tokio::fs::read(&path).await {
            Ok(json) => {
                let record: StateRecord = serde_json::from_slice(&json)
                    .map_err(|e| ProvisioningError::corrupt(device_id, format!("unreadable state: {}", e)))?;
                Ok(record.state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.infer_state(device_id).await,
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    async fn delete(&self, device_id: &str) -> ProvisioningResult<()> {
        let dir = self.require_bundle(device_id).await?;
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| storage_error(&dir, e))?;

        info!(device_id = %device_id, "Credential bundle deleted");
        Ok(())
    }

    async fn lock(&self, device_id: &str) -> DeviceGuard {
        self.locks.lock(device_id).await
    }
}

// =============================================================================
// FILE HELPERS
// =============================================================================

fn storage_error(path: &Path, err: std::io::Error) -> ProvisioningError {
    ProvisioningError::StorageFailure(format!("{}: {}", path.display(), err))
}

async fn exists(path: &Path) -> ProvisioningResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| storage_error(path, e))
}

async fn read_bytes(path: &Path, what: &str, device_id: &str) -> ProvisioningResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProvisioningError::NotFound(format!(
            "no {} for device '{}'",
            what, device_id
        ))),
        Err(e) => Err(storage_error(path, e)),
    }
}

async fn read_string(path: &Path, what: &str, device_id: &str) -> ProvisioningResult<String> {
    let bytes = read_bytes(path, what, device_id).await?;
    String::from_utf8(bytes).map_err(|_| ProvisioningError::corrupt(device_id, format!("{} is not UTF-8", what)))
}

async fn remove_if_exists(path: &Path) -> ProvisioningResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_error(path, e)),
    }
}

/// Write through a temporary sibling and rename over the target
///
/// `private` files are restricted to owner read/write on Unix.
async fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> ProvisioningResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| storage_error(&tmp, e))?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| storage_error(&tmp, e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| storage_error(path, e))
}
