//! shadowsocks local client built on a dual non-blocking reactor.
//!
//! Accepts SOCKS5 or HTTP proxy connections from local applications and tunnels them to
//! a shadowsocks server with one of the classic stream ciphers (IV prepended to each
//! direction of the stream).
//!
//! ## Usage
//!
//! Write your server in a configuration file:
//!
//! ```json
//! {
//!    "server": "my_server_ip",
//!    "server_port": 8388,
//!    "local_address": "127.0.0.1",
//!    "local_port": 1080,
//!    "password": "mypassword",
//!    "method": "aes-256-cfb",
//!    "protocol": "auto"
//! }
//! ```
//!
//! and run the local proxy with
//!
//! ```bash
//! cargo run --bin sslocal -- -c shadowsocks.json
//! ```
//!
//! ## API Usage
//!
//! ```no_run
//! use shadowsocks_nio::{Config, LocalServer};
//!
//! let config = Config::load_from_file("shadowsocks.json").unwrap();
//! let server = LocalServer::new(&config).unwrap();
//! server.run().unwrap();
//! ```

/// ShadowSocks version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when server exits unexpectedly
pub const EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY: u8 = 50;
/// Exit code when server aborted
pub const EXIT_CODE_SERVER_ABORTED: u8 = 51;
/// Exit code when loading configuration from file fails
pub const EXIT_CODE_LOAD_CONFIG_FAILURE: u8 = 52;
/// Exit code when insufficient params are passed via CLI
pub const EXIT_CODE_INSUFFICIENT_PARAMS: u8 = 64;

pub use self::{
    config::{Config, ProxyType, ServerAddr, ServerMode},
    context::{Context, SharedContext},
    relay::{blocking::BlockingLocalServer, local::LocalServer, socks5::Address},
};

pub mod config;
pub mod context;
pub mod crypto;
#[cfg(feature = "logging")]
pub mod logging;
pub mod monitor;
pub mod relay;
pub mod service;
mod vparser;
