// rustls client configuration shared by the control and data sockets
use std::sync::Arc;

use log::{debug, warn};
use rustls::client::{ClientSessionMemoryCache, ClientSessionStore, Resumption};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};

use crate::core_tls::error::TlsError;

/// Number of TLS sessions remembered for data channel resumption.
const SESSION_CACHE_SIZE: usize = 32;

// Verifier that accepts any server certificate, for self-signed test servers.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
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

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[derive(Clone)]
pub struct TlsConfig {
    /// Certificates trusted on top of (or instead of) the platform roots.
    roots: Vec<CertificateDer<'static>>,

    /// Accept any server certificate.
    insecure_skip_verify: bool,

    /// Client session cache shared by every socket of a connector, so the
    /// data channel resumes the control channel session.
    session_store: Arc<dyn ClientSessionStore>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new(Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE)))
    }
}

impl TlsConfig {
    pub fn new(session_store: Arc<dyn ClientSessionStore>) -> Self {
        Self {
            roots: Vec::new(),
            insecure_skip_verify: false,
            session_store,
        }
    }

    pub fn new_session_store() -> Arc<dyn ClientSessionStore> {
        Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE))
    }

    pub fn set_insecure_skip_verify(&mut self, insecure: bool) {
        self.insecure_skip_verify = insecure;
    }

    pub fn trusted_count(&self) -> usize {
        self.roots.len()
    }

    /// Adds the certificates found in a PEM bundle. Bytes holding no PEM
    /// block are taken as a single DER certificate.
    ///
    /// # Returns
    ///
    /// The number of certificates added.
    pub fn add_certificate(&mut self, bytes: &[u8]) -> Result<usize, TlsError> {
        if bytes.is_empty() {
            return Err(TlsError::CertificateLoadError(
                "empty certificate".to_string(),
            ));
        }

        let mut reader = bytes;
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;

        if certs.is_empty() {
            self.roots.push(CertificateDer::from(bytes.to_vec()));
            return Ok(1);
        }

        let count = certs.len();
        self.roots.extend(certs);
        Ok(count)
    }

    /// Builds the rustls client configuration.
    pub fn build(&self) -> Result<Arc<ClientConfig>, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::TlsConfigError(e.to_string()))?;

        let mut config = if self.insecure_skip_verify {
            warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            for cert in &self.roots {
                root_store
                    .add(cert.clone())
                    .map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;
            }

            if root_store.is_empty() {
                let loaded = rustls_native_certs::load_native_certs();
                for cert in loaded.certs {
                    root_store.add(cert).ok();
                }
                if !loaded.errors.is_empty() {
                    warn!(
                        "Failed to load some native certificates: {:?}",
                        loaded.errors
                    );
                }
                debug!("Using {} platform root certificates", root_store.len());
            }

            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        config.resumption = Resumption::store(Arc::clone(&self.session_store));
        Ok(Arc::new(config))
    }
}

/// Converts a host name or IP literal to the name verified during the handshake.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_der_certificate_is_kept_as_is() {
        let mut config = TlsConfig::default();
        assert_eq!(config.add_certificate(&[0x30, 0x82, 0x01, 0x0a]).unwrap(), 1);
        assert_eq!(config.trusted_count(), 1);
    }

    #[test]
    fn test_empty_certificate_is_rejected() {
        let mut config = TlsConfig::default();
        assert!(config.add_certificate(&[]).is_err());
        assert_eq!(config.trusted_count(), 0);
    }

    #[test]
    fn test_insecure_config_builds() {
        let mut config = TlsConfig::default();
        config.set_insecure_skip_verify(true);
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("ftp.example.com").is_ok());
        assert!(server_name("192.0.2.10").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
