//! Transport adapter: a text-frame-oriented, full-duplex connection.
//!
//! The only component touching raw sockets. `WsTransport` dials the
//! server's WebSocket endpoint, negotiates the `xmpp-framing` sub-protocol
//! and exchanges whole stanzas as text frames. There is no retry logic:
//! a failed connect or an unexpected close surfaces immediately.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Sub-protocol identifier required by RFC 7395 servers.
const WS_SUBPROTOCOL: &str = "xmpp-framing";

/// One send/receive/close surface over the framed connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;
    /// Next text frame. `TransportError::Closed` when the peer closes.
    async fn receive(&mut self) -> Result<String, TransportError>;
    async fn close(&mut self);
}

/// Initialize rustls crypto provider (must be called once before TLS use).
fn init_crypto_provider() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// TLS certificate verifier that accepts all certificates without validation.
///
/// **DANGEROUS**: used unless `--verify-tls` is set. The target deployment
/// presents certificates that do not validate against public roots.
#[derive(Debug)]
struct InsecureCertVerifier(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_client_config(verify_tls: bool) -> Result<ClientConfig, TransportError> {
    if !verify_tls {
        warn!("TLS certificate verification DISABLED (pass --verify-tls to enable)");
        let provider = rustls::crypto::ring::default_provider();
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier(Arc::new(provider))))
            .with_no_client_auth();
        return Ok(config);
    }

    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    if native_certs.certs.is_empty() {
        return Err(TransportError::Connect(
            "no system root certificates found; install CA certificates or drop --verify-tls"
                .to_string(),
        ));
    }
    for cert in native_certs.certs {
        root_store
            .add(cert)
            .map_err(|e| TransportError::Connect(format!("failed to add root cert: {e}")))?;
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// WebSocket transport over TLS.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(endpoint: &str, verify_tls: bool) -> Result<Self, TransportError> {
        init_crypto_provider();

        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid endpoint {endpoint}: {e}")))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WS_SUBPROTOCOL),
        );

        let connector = Connector::Rustls(Arc::new(tls_client_config(verify_tls)?));
        let (ws, response) = connect_async_tls_with_config(request, None, false, Some(connector))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(status = %response.status(), endpoint, "WebSocket connection established");
        Ok(Self { ws })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                // Pings are answered by tungstenite; binary frames do not
                // occur with xmpp-framing.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
