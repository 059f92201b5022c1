mod config;
mod http_connect;
mod types;

pub use config::{
    ProxyConfig, PROXY_HOST_KEY, PROXY_PASS_KEY, PROXY_PORT_KEY, PROXY_TIMEOUT_KEY,
    PROXY_USER_KEY,
};
pub use http_connect::{basic_auth, build_connect_request, ProxyConnector, RESPONSE_BUFFER_SIZE};
pub use types::{
    Address, AddressError, ConfigError, ProxyConnectError, ProxyHandshakeError, HANDSHAKE_FAILED,
};
