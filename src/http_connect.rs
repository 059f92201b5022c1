use std::future::Future;
use std::io;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch::Receiver;
use tokio::time::timeout;

use crate::config::ProxyConfig;
use crate::types::{Address, ProxyConnectError, ProxyHandshakeError, HANDSHAKE_FAILED};

/// Only the first read of the proxy's answer is inspected.
pub const RESPONSE_BUFFER_SIZE: usize = 512;

const SUCCESS_MARKER: &str = "200";

/// `base64(user:pass)` for the `Proxy-Authorization: Basic` header.
pub fn basic_auth(user: &str, pass: &str) -> String {
    STANDARD.encode(format!("{}:{}", user, pass))
}

/// Render the CONNECT request for `target`.
///
/// ```text
/// CONNECT host:port HTTP/1.0\r\n
/// Proxy-Authorization: Basic <base64(user:pass)>\r\n   (only with credentials)
/// \r\n
/// ```
pub fn build_connect_request(target: &Address, credentials: Option<(&str, &str)>) -> String {
    let mut request = format!("CONNECT {} HTTP/1.0\r\n", target);
    if let Some((user, pass)) = credentials {
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            basic_auth(user, pass)
        ));
    }
    request.push_str("\r\n");
    request
}

/// Opens tunnels to arbitrary destinations through one HTTP proxy.
#[derive(Debug, Clone)]
pub struct ProxyConnector {
    config: ProxyConfig,
}

impl ProxyConnector {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Build a connector from the `HTTP_PROXY_*` environment variables.
    pub fn from_env() -> Result<Self, ProxyConnectError> {
        Ok(Self::new(ProxyConfig::from_env()?))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn get_socket(&self, host: &str, port: u16) -> Result<TcpStream, ProxyConnectError> {
        self.connect(&Address::from((host, port))).await
    }

    /// Connect to the proxy, ask it to open a tunnel to `target` and return
    /// the stream once the proxy has agreed.
    ///
    /// The returned stream is positioned right after the proxy's answer. On
    /// any failure the connection to the proxy is shut down before returning.
    pub async fn connect(&self, target: &Address) -> Result<TcpStream, ProxyConnectError> {
        let proxy = self.config.proxy_address();
        debug!("HTTP CONNECT {} via proxy {}", target, proxy);

        let mut stream = within(
            self.config.timeout(),
            TcpStream::connect((self.config.proxy_host(), self.config.proxy_port())),
        )
        .await?;
        trace!("connected to proxy {}", proxy);

        match within(self.config.timeout(), self.handshake(&mut stream, target)).await {
            Ok(()) => {
                info!("HTTP [TCP] {} tunnel established via {}", target, proxy);
                Ok(stream)
            }
            Err(e) => {
                debug!("HTTP CONNECT {} via {} failed: {}", target, proxy, e);
                if let Err(err) = stream.shutdown().await {
                    warn!("Failed to shutdown TcpStream: {:?}", err);
                }
                Err(e)
            }
        }
    }

    /// Like [`ProxyConnector::connect`], but gives up as soon as `true` is
    /// published on `cancel`. The half-open proxy connection is dropped.
    pub async fn connect_until(
        &self,
        target: &Address,
        cancel: &mut Receiver<bool>,
    ) -> Result<TcpStream, ProxyConnectError> {
        if *cancel.borrow_and_update() {
            return Err(ProxyConnectError::Cancelled);
        }
        tokio::select! {
            res = self.connect(target) => res,
            _ = cancelled(cancel) => {
                debug!("HTTP CONNECT {} cancelled", target);
                Err(ProxyConnectError::Cancelled)
            }
        }
    }

    async fn handshake(
        &self,
        stream: &mut TcpStream,
        target: &Address,
    ) -> Result<(), ProxyConnectError> {
        let request = build_connect_request(target, self.config.credentials());
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        let len = stream.read(&mut buf).await?;
        if len == 0 {
            return Err(ProxyConnectError::InvalidResponse);
        }
        let response = String::from_utf8_lossy(&buf[..len]);
        trace!("proxy response: {:?}", response);

        // Expecting HTTP/1.x 200
        if !response.contains(SUCCESS_MARKER) {
            return Err(ProxyHandshakeError::new(HANDSHAKE_FAILED, response.into_owned()).into());
        }

        let skipped = discard_available(stream)?;
        if skipped > 0 {
            trace!("discarded {} buffered bytes after proxy response", skipped);
        }
        Ok(())
    }
}

async fn within<F, T, E>(limit: Option<Duration>, fut: F) -> Result<T, ProxyConnectError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ProxyConnectError>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| ProxyConnectError::Timeout)?
            .map_err(Into::into),
        None => fut.await.map_err(Into::into),
    }
}

/// Resolves once `true` is sent. A dropped sender never cancels.
async fn cancelled(cancel: &mut Receiver<bool>) {
    loop {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *cancel.borrow_and_update() {
            return;
        }
    }
}

/// Read and drop whatever is already buffered, without waiting for more.
fn discard_available(stream: &TcpStream) -> io::Result<usize> {
    let mut scratch = [0u8; RESPONSE_BUFFER_SIZE];
    let mut total = 0;
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}
