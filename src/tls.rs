//! TLS termination.
//!
//! Optional: most deployments terminate TLS at a reverse proxy. When enabled
//! the server wraps each accepted connection with `tokio-rustls` before
//! handing it to hyper. ALPN offers `h2` and `http/1.1`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use tokio_rustls::TlsAcceptor;

use crate::error::Error;

/// Certificate and key locations, PEM encoded.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// e.g. `localhost.pem`
    #[serde(default)]
    pub cert_filepath: PathBuf,
    /// e.g. `localhost-key.pem`
    #[serde(default)]
    pub key_filepath: PathBuf,
}

impl TlsConfig {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self { enabled: true, cert_filepath: cert.into(), key_filepath: key.into() }
    }

    /// Both paths are required once TLS is enabled. A disabled config is
    /// always valid.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.cert_filepath.as_os_str().is_empty() {
            return Err(Error::Tls("cert file path not set".to_owned()));
        }
        if self.key_filepath.as_os_str().is_empty() {
            return Err(Error::Tls("cert key file path not set".to_owned()));
        }
        Ok(())
    }

    /// Reads the PEM files and builds the acceptor.
    pub(crate) fn acceptor(&self) -> Result<TlsAcceptor, Error> {
        self.validate()?;
        let certs = load_certs(&self.cert_filepath)?;
        let key = load_key(&self.key_filepath)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_is_always_valid() {
        assert!(TlsConfig::default().validate().is_ok());
    }

    #[test]
    fn enabled_config_needs_both_paths() {
        let no_cert = TlsConfig { enabled: true, key_filepath: "key.pem".into(), ..Default::default() };
        assert_eq!(no_cert.validate().unwrap_err().to_string(), "tls: cert file path not set");

        let no_key = TlsConfig { enabled: true, cert_filepath: "cert.pem".into(), ..Default::default() };
        assert_eq!(no_key.validate().unwrap_err().to_string(), "tls: cert key file path not set");

        assert!(TlsConfig::new("cert.pem", "key.pem").validate().is_ok());
    }

    #[test]
    fn missing_files_fail_when_building_the_acceptor() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TlsConfig::new(dir.path().join("cert.pem"), dir.path().join("key.pem"));
        assert!(matches!(cfg.acceptor(), Err(Error::Tls(_))));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, "not a pem file").unwrap();
        let err = load_certs(&cert).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }
}
