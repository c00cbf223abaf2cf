//! Command line argument parsers

use std::net::SocketAddr;

use crate::config::{ProxyType, ServerAddr};

macro_rules! value_parser_type {
    ($name:ident, $ty:ty, $help:expr) => {
        pub fn $name(v: &str) -> Result<$ty, String> {
            match v.parse::<$ty>() {
                Ok(t) => Ok(t),
                Err(..) => Err($help.to_owned()),
            }
        }
    };
}

value_parser_type!(parse_server_addr, ServerAddr, "should be either ip:port or domain:port");
value_parser_type!(parse_socket_addr, SocketAddr, "should be ip:port");
value_parser_type!(parse_proxy_type, ProxyType, "should be \"socks5\", \"http\" or \"auto\"");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_parsers() {
        assert!(parse_server_addr("example.com:8388").is_ok());
        assert_eq!(
            parse_server_addr("example.com").unwrap_err(),
            "should be either ip:port or domain:port"
        );
        assert!(parse_socket_addr("127.0.0.1:1080").is_ok());
        assert!(parse_socket_addr("localhost:1080").is_err());
        assert_eq!(parse_proxy_type("AUTO").unwrap(), ProxyType::Auto);
    }
}
