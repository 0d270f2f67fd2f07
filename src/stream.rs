//! Transport under a connection: plain TCP for `ws://`, rustls for `wss://`.
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};
use url::{Host, Url};

/// A TCP stream, optionally wrapped in a TLS session.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Opens the transport for `url`.
///
/// `wss` URLs use `connector`, or one trusting the webpki roots when `None`.
pub(crate) async fn connect(
    url: Url,
    connector: Option<TlsConnector>,
    no_delay: bool,
) -> io::Result<MaybeTlsStream> {
    let port = url
        .port_or_known_default()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown port"))?;

    let (tcp_stream, server_name) = match url.host() {
        Some(Host::Domain(domain)) => (
            TcpStream::connect((domain, port)).await?,
            domain.to_owned(),
        ),
        Some(Host::Ipv4(ip)) => (TcpStream::connect((ip, port)).await?, ip.to_string()),
        Some(Host::Ipv6(ip)) => (TcpStream::connect((ip, port)).await?, ip.to_string()),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "url has no host",
            ))
        }
    };
    tcp_stream.set_nodelay(no_delay)?;

    log::debug!(
        "tcp connected to {}",
        tcp_stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| server_name.clone())
    );

    if url.scheme() != "wss" {
        return Ok(MaybeTlsStream::Plain(tcp_stream));
    }

    let connector = match connector {
        Some(connector) => connector,
        None => tls_connector()?,
    };
    let domain = ServerName::try_from(server_name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

    let tls_stream = connector.connect(domain, tcp_stream).await?;
    Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
}

/// Creates a TLS connector trusting the webpki root certificates.
///
/// Uses the process-wide crypto provider when one is installed, otherwise
/// [*ring*](https://github.com/briansmith/ring).
pub fn tls_connector() -> io::Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
