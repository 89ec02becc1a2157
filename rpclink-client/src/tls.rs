//! TLS settings and connector construction for the dial path.

use crate::error::ClientError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// TLS settings for the client link.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// PEM-encoded CA certificate(s). System roots are used when unset.
    pub ca_cert_path: Option<PathBuf>,
    /// PEM-encoded client certificate, for mutual TLS.
    pub client_cert_path: Option<PathBuf>,
    /// PEM-encoded client private key, for mutual TLS.
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate.
    pub insecure: bool,
    /// SNI name, defaults to the dialed host.
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier that accepts every peer certificate.
    pub fn permissive() -> Self {
        Self::new().with_insecure()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Builds the connector and SNI name for dialing `host`.
pub fn create_tls_connector(
    config: &TlsClientConfig,
    host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let builder = if config.insecure {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PermissiveVerifier))
    } else {
        rustls::ClientConfig::builder().with_root_certificates(root_store(config)?)
    };

    let client_config = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::TlsConfig(format!("invalid client cert/key: {}", e)))?
        }
        _ => builder.with_no_client_auth(),
    };

    let name = config.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", name)))?;

    Ok((TlsConnector::from(Arc::new(client_config)), server_name))
}

fn root_store(config: &TlsClientConfig) -> Result<RootCertStore, ClientError> {
    let mut store = RootCertStore::empty();
    match config.ca_cert_path {
        Some(ref ca_path) => {
            for cert in load_certs(ca_path)? {
                store
                    .add(cert)
                    .map_err(|e| ClientError::TlsConfig(format!("invalid CA cert: {}", e)))?;
            }
        }
        None => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(store)
}

#[derive(Debug)]
struct PermissiveVerifier;

impl ServerCertVerifier for PermissiveVerifier {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        .ok_or_else(|| ClientError::TlsConfig(format!("no private key found in {:?}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_connector_uses_host_as_sni() {
        let (_, name) = create_tls_connector(&TlsClientConfig::permissive(), "rpc.internal").unwrap();
        assert_eq!(name.to_str(), "rpc.internal");
    }

    #[test]
    fn test_server_name_override() {
        let config = TlsClientConfig::permissive().with_server_name("api.example.com");
        let (_, name) = create_tls_connector(&config, "10.0.0.5").unwrap();
        assert_eq!(name.to_str(), "api.example.com");
    }

    #[test]
    fn test_system_roots_by_default() {
        assert!(create_tls_connector(&TlsClientConfig::new(), "example.com").is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let config = TlsClientConfig::new().with_ca_cert("/nonexistent/ca.pem");
        let err = create_tls_connector(&config, "example.com").err().expect("connector creation should fail");
        assert!(matches!(err, ClientError::TlsConfig(_)));
        assert!(err.to_string().contains("cannot open"));
    }

    #[test]
    fn test_load_invalid_key_path() {
        let result = load_private_key(Path::new("/nonexistent/key.pem"));
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }
}
