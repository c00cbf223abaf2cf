//! Shared server context

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use log::debug;

use crate::{
    config::{Config, Error, ErrorKind, ProxyType, ServerAddr},
    crypto::{CipherSession, CipherType},
};

/// Validated configuration shared by every connection of a server
///
/// The key is derived from the password once, sessions only clone it.
#[derive(Debug)]
pub struct Context {
    method: CipherType,
    key: Bytes,
    proxy_type: ProxyType,
    server_addr: SocketAddr,
    timeout: Option<Duration>,
}

pub type SharedContext = Arc<Context>;

impl Context {
    /// Checks `config` and resolves the server address
    pub fn new(config: &Config) -> Result<Context, Error> {
        config.check_integrity()?;

        let server_addr = match config.server {
            Some(ServerAddr::SocketAddr(addr)) => addr,
            Some(ServerAddr::DomainName(ref host, port)) => resolve_server(host, port)?,
            None => {
                return Err(Error::new(ErrorKind::MissingField, "missing `server`", None));
            }
        };

        Ok(Context {
            method: config.method,
            key: config.method.bytes_to_key(config.password.as_bytes()),
            proxy_type: config.proxy_type,
            server_addr,
            timeout: config.timeout,
        })
    }

    pub fn new_shared(config: &Config) -> Result<SharedContext, Error> {
        Context::new(config).map(Arc::new)
    }

    pub fn method(&self) -> CipherType {
        self.method
    }

    pub fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    /// Resolved address of the shadowsocks server
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Idle timeout of relayed sockets
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fresh cipher session for one connection
    pub fn new_cipher_session(&self) -> CipherSession {
        CipherSession::new(self.method, self.key.clone())
    }
}

fn resolve_server(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let mut addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            return Err(Error::new(
                ErrorKind::Invalid,
                "unable to resolve `server`",
                Some(format!("{host}:{port}, {err}")),
            ));
        }
    };

    match addrs.next() {
        Some(addr) => {
            debug!("resolved server {}:{} to {}", host, port, addr);
            Ok(addr)
        }
        None => Err(Error::new(
            ErrorKind::Invalid,
            "unable to resolve `server`",
            Some(format!("{host}:{port}")),
        )),
    }
}
