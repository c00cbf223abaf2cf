//! Relay for local clients
//!
//! Two servers share the proxy protocols and the cipher sessions. `local::LocalServer`
//! multiplexes every connection on two reactors, `blocking::BlockingLocalServer` spends two
//! threads on each connection.

pub mod blocking;
pub mod local;
pub mod pipe;
pub mod proxy;
pub mod reactor;
pub mod socks5;
