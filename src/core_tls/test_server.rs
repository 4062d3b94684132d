// Self-signed rustls server side, for tests
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

pub(crate) struct TestCert {
    pub der: CertificateDer<'static>,
    pub config: Arc<ServerConfig>,
}

/// A fresh certificate for "localhost" and a server configuration using it.
pub(crate) fn self_signed() -> TestCert {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let der = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![der.clone()], key)
        .unwrap();

    TestCert {
        der,
        config: Arc::new(config),
    }
}

/// Wraps `sock` in a server TLS stream. The handshake runs on first I/O.
pub(crate) fn server_tls(sock: TcpStream, config: Arc<ServerConfig>) -> StreamOwned<ServerConnection, TcpStream> {
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    StreamOwned::new(ServerConnection::new(config).unwrap(), sock)
}

/// Accepts one connection and wraps it in a server TLS stream.
pub(crate) fn server_stream(
    listener: &TcpListener,
    config: Arc<ServerConfig>,
) -> StreamOwned<ServerConnection, TcpStream> {
    let (sock, _) = listener.accept().unwrap();
    server_tls(sock, config)
}
