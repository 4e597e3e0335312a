//! TLS material for the listener and for outbound clients.
//!
//! The listener serves the PEM certificate chain and private key given on the
//! command line, read once at startup. CA bundles for the identity provider
//! and the cluster API are loaded as [`reqwest::Certificate`]s.

use anyhow::{Context, Result, anyhow};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct TlsPaths {
    cert: PathBuf,
    key: PathBuf,
}

impl TlsPaths {
    #[must_use]
    pub fn new(cert: PathBuf, key: PathBuf) -> Self {
        Self { cert, key }
    }

    #[must_use]
    pub fn cert_path(&self) -> &Path {
        &self.cert
    }

    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key
    }
}

/// Load the listener's TLS configuration, offering `h2` and `http/1.1`.
///
/// # Errors
/// Returns an error if the certificate or key cannot be read or parsed, or if
/// they do not belong together.
pub fn load_server_config(paths: &TlsPaths) -> Result<ServerConfig> {
    let cert_chain = load_cert_chain(paths.cert_path())?;
    let key = load_private_key(paths.key_path())?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .with_context(|| {
            format!(
                "TLS key {} does not match certificate {}",
                paths.key_path().display(),
                paths.cert_path().display()
            )
        })?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Load a PEM CA bundle for an outbound `reqwest` client.
///
/// # Errors
/// Returns an error if the file cannot be read or holds no certificate.
pub fn load_reqwest_ca(path: &Path) -> Result<reqwest::Certificate> {
    let pem = std::fs::read(path)
        .with_context(|| format!("Failed to read CA bundle: {}", path.display()))?;
    if load_cert_chain(path)?.is_empty() {
        return Err(anyhow!("CA bundle is empty: {}", path.display()));
    }
    reqwest::Certificate::from_pem(&pem)
        .with_context(|| format!("Failed to parse CA bundle: {}", path.display()))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open TLS certificate: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read TLS certificate: {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("TLS certificate is empty: {}", path.display()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let open = || -> Result<BufReader<File>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open TLS key: {}", path.display()))?;
        Ok(BufReader::new(file))
    };

    let mut keys = pkcs8_private_keys(&mut open()?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read PKCS#8 TLS key: {}", path.display()))?;
    if let Some(key) = keys.pop() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let mut keys = rsa_private_keys(&mut open()?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read PKCS#1 TLS key: {}", path.display()))?;
    if let Some(key) = keys.pop() {
        return Ok(PrivateKeyDer::Pkcs1(key));
    }

    let mut keys = ec_private_keys(&mut open()?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read SEC1 TLS key: {}", path.display()))?;
    if let Some(key) = keys.pop() {
        return Ok(PrivateKeyDer::Sec1(key));
    }

    Err(anyhow!("TLS private key not found: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bridge-tls-test-{label}-{}", Ulid::new()))
    }

    #[test]
    fn load_private_key_missing_fails() {
        assert!(load_private_key(&temp_path("key")).is_err());
    }

    #[test]
    fn load_cert_chain_missing_fails() {
        assert!(load_cert_chain(&temp_path("cert")).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn load_cert_chain_rejects_non_pem() {
        let path = temp_path("garbage");
        std::fs::write(&path, b"not a certificate").unwrap();
        let result = load_cert_chain(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn load_private_key_reads_pkcs8() {
        let path = temp_path("pkcs8");
        std::fs::write(&path, crate::auth::verifier::TEST_PRIVATE_KEY_PEM).unwrap();
        let key = load_private_key(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(key.unwrap(), PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn load_reqwest_ca_rejects_empty_bundle() {
        let path = temp_path("ca");
        std::fs::write(&path, b"").unwrap();
        let result = load_reqwest_ca(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn load_server_config_rejects_key_without_certificate() {
        let cert = temp_path("cert-garbage");
        let key = temp_path("key-ok");
        std::fs::write(&cert, b"not a certificate").unwrap();
        std::fs::write(&key, crate::auth::verifier::TEST_PRIVATE_KEY_PEM).unwrap();
        let result = load_server_config(&TlsPaths::new(cert.clone(), key.clone()));
        let _ = std::fs::remove_file(&cert);
        let _ = std::fs::remove_file(&key);
        assert!(result.is_err());
    }

    #[test]
    fn load_server_config_missing_files_fails() {
        let paths = TlsPaths::new(temp_path("cert"), temp_path("key"));
        assert!(load_server_config(&paths).is_err());
    }
}
