//! # Hub Certificate Trust
//!
//! Trust anchors for hub connections: either a PEM bundle of CA
//! certificates loaded from disk, or (development only) a verifier that
//! accepts whatever the hub presents.

use std::path::Path;

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tracing::{debug, warn};

use shared::error::{ProvisioningError, ProvisioningResult};

use crate::identity::certificates_from_pem;

/// Decode every certificate block of a PEM bundle
pub fn pem_certificates(pem: &str) -> ProvisioningResult<Vec<CertificateDer<'static>>> {
    let blocks = certificates_from_pem(pem)
        .map_err(|e| ProvisioningError::ConfigurationError(format!("bad CA bundle: {}", e)))?;
    Ok(blocks.into_iter().map(CertificateDer::from).collect())
}

/// Load a root store from a PEM bundle on disk
pub fn load_root_store(path: &Path) -> ProvisioningResult<RootCertStore> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        ProvisioningError::ConfigurationError(format!("cannot read CA bundle {}: {}", path.display(), e))
    })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(pem_certificates(&pem)?);

    if ignored > 0 {
        warn!(path = ?path, ignored, "Some CA certificates could not be parsed");
    }
    if added == 0 {
        return Err(ProvisioningError::ConfigurationError(format!(
            "CA bundle {} holds no usable certificates",
            path.display()
        )));
    }

    debug!(path = ?path, added, "Loaded hub CA bundle");
    Ok(roots)
}

/// Certificate verifier that accepts any hub certificate
///
/// Only reachable through `HubConfig::accept_invalid_certs`.
#[derive(Debug)]
pub struct AcceptAnyCertVerifier;

impl ServerCertVerifier for AcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityGenerator;
    use std::io::Write;

    #[test]
    fn test_pem_bundle_parsing() {
        let generator = IdentityGenerator::default();
        let a = generator.generate_identity("ca-a").unwrap();
        let b = generator.generate_identity("ca-b").unwrap();

        let bundle = format!("{}\n{}\n", a.certificate().to_pem(), b.certificate().to_pem());
        let certificates = pem_certificates(&bundle).unwrap();

        assert_eq!(certificates.len(), 2);
        assert_eq!(certificates[0].as_ref(), a.certificate().der());
        assert_eq!(certificates[1].as_ref(), b.certificate().der());
    }

    #[test]
    fn test_empty_bundle_has_no_certificates() {
        assert!(pem_certificates("no certificates here").unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_block_rejected() {
        let result = pem_certificates("-----BEGIN CERTIFICATE-----\nAAAA\n");
        assert!(matches!(result, Err(ProvisioningError::ConfigurationError(_))));
    }

    #[test]
    fn test_load_root_store() {
        let identity = IdentityGenerator::default().generate_identity("hub-ca").unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(identity.certificate().to_pem().as_bytes()).unwrap();

        let roots = load_root_store(file.path()).unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn test_missing_bundle_is_configuration_error() {
        let result = load_root_store(Path::new("/nonexistent/ca.pem"));
        assert!(matches!(result, Err(ProvisioningError::ConfigurationError(_))));
    }
}
