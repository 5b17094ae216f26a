//! This module handles loading certificates for use in TLS.

use std::fs;
use std::path::Path;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, pem::PemObject};

use crate::common::app_config::AppConfig;

pub type TlsIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Loads the certificate chain and private key named by the config. Files
/// ending in `.der` are read as raw DER, anything else as PEM.
pub fn load_identity(config: &AppConfig) -> anyhow::Result<TlsIdentity> {
    tracing::debug!(
        "Loading certificates from {:?} and {:?}",
        config.cert.to_str(),
        config.key.to_str()
    );
    let key = load_private_key(&config.key)?;
    let cert_chain = load_cert_chain(&config.cert)?;
    tracing::info!(
        "Created certificate chain with {} certificate",
        cert_chain.len()
    );
    Ok((cert_chain, key))
}

fn is_der(path: &Path) -> bool {
    path.extension().is_some_and(|x| x == "der")
}

pub fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    if is_der(path) {
        Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            fs::read(path).context("failed to read private key file")?,
        )))
    } else {
        PrivateKeyDer::from_pem_file(path).context("failed to read PEM from private key file")
    }
}

pub fn load_cert_chain(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    if is_der(path) {
        Ok(vec![CertificateDer::from(
            fs::read(path).context("failed to read certificate chain file")?,
        )])
    } else {
        CertificateDer::pem_file_iter(path)
            .context("failed to read PEM from certificate chain file")?
            .collect::<Result<_, _>>()
            .context("invalid PEM-encoded certificate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (rcgen::Certificate, rcgen::KeyPair) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        (cert, key_pair)
    }

    #[test]
    fn loads_pem_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key_pair) = self_signed();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        let chain = load_cert_chain(&cert_path).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].as_ref(), cert.der().as_ref());
        assert!(load_private_key(&key_path).is_ok());
    }

    #[test]
    fn loads_der_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key_pair) = self_signed();
        let cert_path = dir.path().join("cert.der");
        let key_path = dir.path().join("key.der");
        fs::write(&cert_path, cert.der()).unwrap();
        fs::write(&key_path, key_pair.serialize_der()).unwrap();

        assert_eq!(load_cert_chain(&cert_path).unwrap().len(), 1);
        assert!(matches!(
            load_private_key(&key_path).unwrap(),
            PrivateKeyDer::Pkcs8(_)
        ));
    }

    #[test]
    fn missing_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cert_chain(&dir.path().join("absent.pem")).is_err());
        assert!(load_private_key(&dir.path().join("absent.der")).is_err());
    }
}
