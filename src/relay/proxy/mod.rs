//! Front-end proxy protocols spoken by local applications
//!
//! A protocol instance belongs to exactly one connection. It is fed with the first packets
//! read from the local socket until `is_ready()` returns `true`, producing
//!
//! - replies that have to be written back to the local client (`local_reply`)
//! - buffers to be sent to the shadowsocks server (`remote_envelope`), the first one always
//!   starts with the target address header `ATYP | ADDR | PORT`

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use bytes::Bytes;

pub use self::{
    auto::AutoProxy,
    http::HttpProxy,
    socks5::{Socks5Proxy, Socks5Stage},
};

mod auto;
mod http;
mod socks5;

/// Errors while negotiating with local clients
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unable to determine proxy protocol from {0} bytes")]
    UnrecognizedProtocol(usize),
    #[error("socks5 request too short ({0} bytes)")]
    Socks5RequestTooShort(usize),
    #[error("malformed http request: {0}")]
    MalformedHttpRequest(String),
    #[error("invalid http request, {0}")]
    InvalidHttpRequest(#[from] httparse::Error),
    #[error("http request without target host")]
    MissingHost,
    #[error("invalid port \"{0}\"")]
    InvalidPort(String),
    #[error("{0}")]
    Address(#[from] crate::relay::socks5::Error),
}

/// Protocol spoken with local applications
///
/// Each packet is passed to `local_reply` first, then to `remote_envelope`.
pub trait ProxyProtocol: Send {
    fn proxy_type(&self) -> ProxyType;

    /// Handshake finished, further data goes to the server untouched
    fn is_ready(&self) -> bool;

    /// Reply for the local client, if this packet requires one
    fn local_reply(&mut self, data: &[u8]) -> Result<Option<Bytes>, ProtocolError>;

    /// Buffers for the server once the target is known, the first one is the address header
    fn remote_envelope(&mut self, data: &[u8]) -> Result<Option<Vec<Bytes>>, ProtocolError>;

    /// Checks whether `data` looks like the first packet of this protocol
    fn sniff(&self, data: &[u8]) -> bool;
}

/// Proxy protocol type
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProxyType {
    Socks5,
    Http,
    Auto,
}

#[rustfmt::skip]
const AVAILABLE_PROXY_TYPES: &[(&str, ProxyType)] = &[
    ("socks5", ProxyType::Socks5),
    ("http",   ProxyType::Http),
    ("auto",   ProxyType::Auto),
];

/// Error while parsing `ProxyType` from string
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown proxy type \"{0}\", expecting one of socks5, http, auto")]
pub struct ProxyTypeError(String);

impl ProxyType {
    /// Creates a fresh protocol state machine for one connection
    pub fn new_protocol(self) -> Box<dyn ProxyProtocol> {
        match self {
            ProxyType::Socks5 => Box::new(Socks5Proxy::new()),
            ProxyType::Http => Box::new(HttpProxy::new()),
            ProxyType::Auto => Box::new(AutoProxy::new()),
        }
    }

    /// Concrete protocols, in the order `Auto` tries them
    pub fn sniffable() -> impl Iterator<Item = ProxyType> {
        AVAILABLE_PROXY_TYPES
            .iter()
            .map(|(_, t)| *t)
            .filter(|t| *t != ProxyType::Auto)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::Http => "http",
            ProxyType::Auto => "auto",
        }
    }
}

impl Default for ProxyType {
    fn default() -> ProxyType {
        ProxyType::Socks5
    }
}

impl FromStr for ProxyType {
    type Err = ProxyTypeError;

    fn from_str(s: &str) -> Result<ProxyType, ProxyTypeError> {
        AVAILABLE_PROXY_TYPES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, t)| *t)
            .ok_or_else(|| ProxyTypeError(s.to_owned()))
    }
}

impl Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
