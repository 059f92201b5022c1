#![forbid(unsafe_code)]

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::num::ParseIntError;
use std::str::FromStr;

use snafu::{OptionExt, ResultExt, Snafu};
use thiserror::Error;

/// Message carried by [`ProxyHandshakeError`] when the proxy refuses the tunnel.
pub const HANDSHAKE_FAILED: &str = "failed to create connection";

#[derive(Error, Debug)]
pub enum ProxyConnectError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid response from proxy")]
    InvalidResponse,

    #[error(transparent)]
    Handshake(#[from] ProxyHandshakeError),

    #[error("proxy handshake timed out")]
    Timeout,

    #[error("proxy handshake cancelled")]
    Cancelled,
}

impl ProxyConnectError {
    /// The proxy's rejection, if that is what ended the handshake.
    pub fn handshake(&self) -> Option<&ProxyHandshakeError> {
        match self {
            ProxyConnectError::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

/// The proxy answered the CONNECT request without a success status.
///
/// `response` holds the text the proxy sent back, decoded as UTF-8, so the
/// caller can log why the tunnel was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProxyHandshakeError {
    message: String,
    response: String,
}

impl ProxyHandshakeError {
    pub fn new(message: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: response.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response(&self) -> &str {
        &self.response
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
/// Problems found while building a [`crate::ProxyConfig`]
pub enum ConfigError {
    #[snafu(display("missing proxy setting {}", key))]
    Missing { key: &'static str },

    #[snafu(display("invalid proxy port {:?}: {}", value, source))]
    InvalidPort { value: String, source: ParseIntError },

    #[snafu(display("invalid proxy timeout {:?}: {}", value, source))]
    InvalidTimeout { value: String, source: ParseIntError },

    #[snafu(display("invalid proxy url: {}", source))]
    InvalidUrl { source: url::ParseError },

    #[snafu(display("unsupported proxy scheme {:?}", scheme))]
    UnsupportedScheme { scheme: String },
}

#[derive(Debug, Snafu)]
/// A `host:port` string that could not be turned into an [`Address`]
pub enum AddressError {
    #[snafu(display("missing port in address {:?}", input))]
    NoPort { input: String },

    #[snafu(display("invalid port in address {:?}: {}", input, source))]
    BadPort { input: String, source: ParseIntError },
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Socket address (IP Address)
    SocketAddress(SocketAddr),
    /// Domain name address, resolved by the proxy
    DomainNameAddress(String, u16),
}

impl Address {
    pub fn port(&self) -> u16 {
        match *self {
            Address::SocketAddress(ref addr) => addr.port(),
            Address::DomainNameAddress(_, port) => port,
        }
    }
}

impl fmt::Debug for Address {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Address::SocketAddress(ref addr) => write!(f, "{addr}"),
            Address::DomainNameAddress(ref addr, ref port) => write!(f, "{addr}:{port}"),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::SocketAddress(addr)
    }
}

impl From<(IpAddr, u16)> for Address {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Address::SocketAddress(SocketAddr::new(ip, port))
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        // RFC3986 indicates that IPv6 address should be wrapped in [ and ]
        if host.starts_with('[') && host.ends_with(']') {
            if let Ok(ip) = host[1..host.len() - 1].parse::<Ipv6Addr>() {
                return Address::from((IpAddr::V6(ip), port));
            }
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => Address::from((ip, port)),
            // Let the proxy's DNS deal with it.
            Err(..) => Address::DomainNameAddress(host.to_owned(), port),
        }
    }
}

impl From<(String, u16)> for Address {
    fn from((host, port): (String, u16)) -> Self {
        Address::from((host.as_str(), port))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Parse `host:port`, with IPv6 hosts written as `[addr]:port`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (host, port) = input
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .context(NoPortSnafu { input })?;
        // An unbracketed IPv6 literal has no port we can split off
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return NoPortSnafu { input }.fail();
        }
        let port = port.parse::<u16>().context(BadPortSnafu { input })?;
        Ok(Address::from((host, port)))
    }
}
