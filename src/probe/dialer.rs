//! Native probe transport
//!
//! Opens a fresh connection to the proxy for every attempt and speaks just
//! enough of each protocol to learn the target's status code:
//!
//! - HTTP: absolute-form `GET` for `http://` targets, `CONNECT` + TLS for `https://`
//! - HTTPS: TLS to the proxy itself, then as HTTP
//! - SOCKS4: SOCKS4a `CONNECT`, then a direct request over the tunnel
//! - SOCKS5: no-auth `CONNECT`, then a direct request over the tunnel

use super::{ProbeTransport, Protocol, Target};
use crate::common::net::{connect_tcp, Address};
use crate::common::socks::{socks4_connect, socks5_connect};
use crate::common::Endpoint;
use crate::{Error, Result};
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Redirects followed within one attempt
const MAX_REDIRECTS: usize = 5;

/// Upper bound on a response head
const MAX_HEAD_SIZE: usize = 16 * 1024;

const DEFAULT_USER_AGENT: &str = concat!("proxyman-rust/", env!("CARGO_PKG_VERSION"));

/// Status line and the one header a probe cares about
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResponseHead {
    status: u16,
    location: Option<String>,
}

/// Transport that dials proxies directly over TCP
pub struct ProxyDialer {
    /// Verifies target certificates
    verified: TlsConnector,
    /// TLS to the proxy itself; public proxies rarely carry valid certificates
    insecure: TlsConnector,
    user_agent: String,
}

impl ProxyDialer {
    pub fn new() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let verified = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(Self::get_root_store())
            .with_no_client_auth();

        let insecure = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
            .with_no_client_auth();

        Ok(ProxyDialer {
            verified: TlsConnector::from(Arc::new(verified)),
            insecure: TlsConnector::from(Arc::new(insecure)),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    fn get_root_store() -> RootCertStore {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        root_store
    }

    async fn handshake<S>(
        &self,
        connector: &TlsConnector,
        host: &Address,
        stream: S,
    ) -> Result<tokio_rustls::client::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let server_name: ServerName<'static> = ServerName::try_from(host.to_host())
            .map_err(|_| Error::tls(format!("Invalid server name: {}", host)))?;

        connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", host, e)))
    }

    /// One request, one fresh connection
    async fn fetch_once(&self, endpoint: &Endpoint, protocol: Protocol, target: &Target) -> Result<ResponseHead> {
        let (host, port) = endpoint.host_port()?;
        let mut stream = connect_tcp(&host, port).await?;

        match protocol {
            Protocol::Http => self.via_forward_proxy(stream, target).await,
            Protocol::Https => {
                let tls = self.handshake(&self.insecure, &host, stream).await?;
                self.via_forward_proxy(tls, target).await
            }
            Protocol::Socks4 => {
                socks4_connect(&mut stream, target.host(), target.port()).await?;
                self.via_tunnel(stream, target).await
            }
            Protocol::Socks5 => {
                socks5_connect(&mut stream, target.host(), target.port()).await?;
                self.via_tunnel(stream, target).await
            }
        }
    }

    /// Talk to an HTTP forward proxy
    async fn via_forward_proxy<S>(&self, mut stream: S, target: &Target) -> Result<ResponseHead>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if target.is_tls() {
            http_connect(&mut stream, target).await?;
            self.via_tunnel(stream, target).await
        } else {
            send_get(&mut stream, &target.absolute_form(), target, &self.user_agent).await
        }
    }

    /// Talk to the origin over an established tunnel
    async fn via_tunnel<S>(&self, mut stream: S, target: &Target) -> Result<ResponseHead>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if target.is_tls() {
            let mut tls = self.handshake(&self.verified, target.host(), stream).await?;
            send_get(&mut tls, &target.origin_form(), target, &self.user_agent).await
        } else {
            send_get(&mut stream, &target.origin_form(), target, &self.user_agent).await
        }
    }
}

#[async_trait]
impl ProbeTransport for ProxyDialer {
    async fn attempt(&self, endpoint: &Endpoint, protocol: Protocol, target: &Target) -> Result<u16> {
        let mut current = target.clone();

        for _ in 0..=MAX_REDIRECTS {
            let head = self.fetch_once(endpoint, protocol, &current).await?;
            match (head.status, head.location) {
                (301 | 302 | 303 | 307 | 308, Some(location)) => {
                    debug!("{} via {}: {} redirected to {}", endpoint, protocol, current, location);
                    current = current.join(&location)?;
                }
                (status, _) => return Ok(status),
            }
        }

        Err(Error::protocol(format!("Too many redirects from {}", target)))
    }
}

/// Perform HTTP CONNECT handshake
async fn http_connect<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, target: &Target) -> Result<()> {
    let authority = target.host().to_string_with_port(target.port());
    let request = format!(
        "CONNECT {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Proxy-Connection: keep-alive\r\n\
         \r\n",
        authority, authority
    );

    stream.write_all(request.as_bytes()).await.map_err(|e| {
        Error::connection(format!("Failed to send CONNECT request: {}", e))
    })?;
    stream.flush().await?;

    let head = read_response_head(stream).await?;
    if (200..300).contains(&head.status) {
        Ok(())
    } else {
        Err(Error::connection(format!("CONNECT failed with status {}", head.status)))
    }
}

async fn send_get<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    request_target: &str,
    target: &Target,
    user_agent: &str,
) -> Result<ResponseHead> {
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         \r\n",
        request_target,
        target.authority(),
        user_agent
    );

    stream.write_all(request.as_bytes()).await.map_err(|e| {
        Error::connection(format!("Failed to send request: {}", e))
    })?;
    stream.flush().await?;

    read_response_head(stream).await
}

/// Read until the header block is complete and parse it
async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<ResponseHead> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await.map_err(|e| {
            Error::connection(format!("Failed to read response: {}", e))
        })?;
        if n == 0 {
            return Err(Error::connection("Connection closed before response head"));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 96];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let status = response
                    .code
                    .ok_or_else(|| Error::protocol("Response without status code"))?;
                let location = response
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("location"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .map(|v| v.trim().to_string());
                return Ok(ResponseHead { status, location });
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_SIZE {
                    return Err(Error::protocol("Response head too large"));
                }
            }
            Err(e) => {
                return Err(Error::protocol(format!("Malformed response: {}", e)));
            }
        }
    }
}

/// Certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
