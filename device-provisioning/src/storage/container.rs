//! Password-protected private identity container (`cert.pfx`).
//!
//! Argon2id derives a 256-bit key from the password and a random salt;
//! AES-256-GCM encrypts a JSON list of certificate entries. The device ID is
//! part of the associated data, so a container moved into another device's
//! directory fails to open.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use shared::{
    config::StorageConfig,
    constants::{CONTAINER_AAD_DOMAIN, CONTAINER_NONCE_LEN, CONTAINER_VERSION, KDF_SALT_LEN},
    error::{ProvisioningError, ProvisioningResult},
};

use crate::identity::{DeviceIdentity, PublicCertificate};

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    kdf: KdfParams,
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParams {
    algorithm: String,
    salt: String,
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

/// One certificate recovered from a container, possibly with its key
#[derive(Serialize, Deserialize)]
pub(crate) struct ContainerEntry {
    certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

impl ContainerEntry {
    fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }
}

#[derive(Serialize, Deserialize)]
struct Contents {
    entries: Vec<ContainerEntry>,
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn aad(device_id: &str) -> Vec<u8> {
    format!("{}:{}", CONTAINER_AAD_DOMAIN, device_id).into_bytes()
}

fn derive_key(password: &str, salt: &[u8], kdf: &KdfParams) -> ProvisioningResult<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| ProvisioningError::CryptoFailure(format!("invalid Argon2 parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut *key)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypt `identity` under `password`
pub(crate) fn seal(
    identity: &DeviceIdentity,
    device_id: &str,
    password: &str,
    config: &StorageConfig,
) -> ProvisioningResult<Vec<u8>> {
    let mut salt = [0u8; KDF_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; CONTAINER_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let kdf = KdfParams {
        algorithm: "argon2id".into(),
        salt: b64().encode(salt),
        memory_kib: config.kdf_memory_kib,
        iterations: config.kdf_iterations,
        parallelism: config.kdf_parallelism,
    };
    let key = derive_key(password, &salt, &kdf)?;

    let contents = Contents {
        entries: vec![ContainerEntry {
            certificate: b64().encode(identity.certificate().der()),
            private_key: Some(b64().encode(identity.private_key_der())),
        }],
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&contents)?);

    let cipher = Aes256Gcm::new_from_slice(&*key)
        .map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))?;
    let aad = aad(device_id);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_slice(),
                aad: &aad,
            },
        )
        .map_err(|e| ProvisioningError::CryptoFailure(format!("encryption failed: {}", e)))?;

    let envelope = Envelope {
        version: CONTAINER_VERSION,
        kdf,
        nonce: b64().encode(nonce),
        ciphertext: b64().encode(ciphertext),
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decrypt a container and return the entries it holds
///
/// A wrong password surfaces as `AuthFailure`; anything structurally wrong
/// with the container is `CorruptBundle`.
pub(crate) fn open(bytes: &[u8], device_id: &str, password: &str) -> ProvisioningResult<Vec<ContainerEntry>> {
    let corrupt = |reason: String| ProvisioningError::corrupt(device_id, reason);

    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable container: {}", e)))?;
    if envelope.version != CONTAINER_VERSION {
        return Err(corrupt(format!("unsupported container version {}", envelope.version)));
    }
    if envelope.kdf.algorithm != "argon2id" {
        return Err(corrupt(format!("unsupported KDF {}", envelope.kdf.algorithm)));
    }

    let salt = b64().decode(&envelope.kdf.salt).map_err(|e| corrupt(e.to_string()))?;
    let nonce = b64().decode(&envelope.nonce).map_err(|e| corrupt(e.to_string()))?;
    let ciphertext = b64().decode(&envelope.ciphertext).map_err(|e| corrupt(e.to_string()))?;
    if nonce.len() != CONTAINER_NONCE_LEN {
        return Err(corrupt("bad nonce length".into()));
    }

    let key = derive_key(password, &salt, &envelope.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&*key)
        .map_err(|e| ProvisioningError::CryptoFailure(e.to_string()))?;
    let aad = aad(device_id);

    // GCM cannot tell a wrong key from tampered bytes; the password is the
    // overwhelmingly likely cause
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| ProvisioningError::AuthFailure(format!("wrong password for device '{}'", device_id)))?,
    );

    let contents: Contents =
        serde_json::from_slice(&plaintext).map_err(|e| corrupt(format!("unreadable contents: {}", e)))?;
    Ok(contents.entries)
}

/// Pick the entry carrying private key material and rebuild the identity
pub(crate) fn select_private(entries: Vec<ContainerEntry>, device_id: &str) -> ProvisioningResult<DeviceIdentity> {
    let entry = entries
        .into_iter()
        .find(ContainerEntry::has_private_key)
        .ok_or_else(|| ProvisioningError::corrupt(device_id, "no private key found"))?;

    let corrupt = |reason: String| ProvisioningError::corrupt(device_id, reason);

    let cert_der = b64().decode(&entry.certificate).map_err(|e| corrupt(e.to_string()))?;
    let key_der = Zeroizing::new(
        b64()
            .decode(entry.private_key.as_deref().unwrap_or_default())
            .map_err(|e| corrupt(e.to_string()))?,
    );

    let certificate = PublicCertificate::from_der(cert_der).map_err(|e| corrupt(e.to_string()))?;
    DeviceIdentity::from_parts(certificate, key_der.to_vec()).map_err(|e| corrupt(e.to_string()))
}

#[cfg(test)]
pub(crate) fn entry_without_key(identity: &DeviceIdentity) -> ContainerEntry {
    ContainerEntry {
        certificate: b64().encode(identity.certificate().der()),
        private_key: None,
    }
}

/// Seal arbitrary entries (used to build malformed containers in tests)
#[cfg(test)]
pub(crate) fn seal_entries(
    entries: Vec<ContainerEntry>,
    device_id: &str,
    password: &str,
    config: &StorageConfig,
) -> ProvisioningResult<Vec<u8>> {
    let mut salt = [0u8; KDF_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let nonce = [7u8; CONTAINER_NONCE_LEN];
    let kdf = KdfParams {
        algorithm: "argon2id".into(),
        salt: b64().encode(salt),
        memory_kib: config.kdf_memory_kib,
        iterations: config.kdf_iterations,
        parallelism: config.kdf_parallelism,
    };
    let key = derive_key(password, &salt, &kdf)?;
    let plaintext = serde_json::to_vec(&Contents { entries })?;
    let cipher = Aes256Gcm::new_from_slice(&*key).unwrap();
    let aad = aad(device_id);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: &aad,
            },
        )
        .unwrap();
    let envelope = Envelope {
        version: CONTAINER_VERSION,
        kdf,
        nonce: b64().encode(nonce),
        ciphertext: b64().encode(ciphertext),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityGenerator;

    fn fast_config() -> StorageConfig {
        StorageConfig {
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_seal_and_open() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let sealed = seal(&identity, "dev-1", "pw", &fast_config()).unwrap();

        let entries = open(&sealed, "dev-1", "pw").unwrap();
        let restored = select_private(entries, "dev-1").unwrap();
        assert_eq!(restored.certificate(), identity.certificate());
        assert_eq!(restored.private_key_der(), identity.private_key_der());
    }

    #[test]
    fn test_wrong_password_is_auth_failure() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let sealed = seal(&identity, "dev-1", "pw", &fast_config()).unwrap();

        assert!(matches!(
            open(&sealed, "dev-1", "other"),
            Err(ProvisioningError::AuthFailure(_))
        ));
    }

    #[test]
    fn test_container_bound_to_device() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let sealed = seal(&identity, "dev-1", "pw", &fast_config()).unwrap();

        assert!(open(&sealed, "dev-2", "pw").is_err());
    }

    #[test]
    fn test_plaintext_not_in_container() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let sealed = seal(&identity, "dev-1", "pw", &fast_config()).unwrap();

        let key_b64 = b64().encode(identity.private_key_der());
        let text = String::from_utf8(sealed).unwrap();
        assert!(!text.contains(&key_b64));
    }

    #[test]
    fn test_selects_entry_with_private_key() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let other = IdentityGenerator::default().generate_identity("dev-1").unwrap();

        let entries = vec![
            entry_without_key(&other),
            ContainerEntry {
                certificate: b64().encode(identity.certificate().der()),
                private_key: Some(b64().encode(identity.private_key_der())),
            },
        ];
        let restored = select_private(entries, "dev-1").unwrap();
        assert_eq!(restored.certificate().der(), identity.certificate().der());
    }

    #[test]
    fn test_no_private_key_is_corrupt() {
        let identity = IdentityGenerator::default().generate_identity("dev-1").unwrap();
        let entries = vec![entry_without_key(&identity)];

        assert!(matches!(
            select_private(entries, "dev-1"),
            Err(ProvisioningError::CorruptBundle { .. })
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            open(b"not json", "dev-1", "pw"),
            Err(ProvisioningError::CorruptBundle { .. })
        ));
    }
}
