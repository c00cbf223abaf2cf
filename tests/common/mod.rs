#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    thread::{self, JoinHandle},
    time::Duration,
};

use shadowsocks_nio::{
    config::{Config, ProxyType, ServerAddr},
    crypto::{CipherSession, CipherType},
};

pub const PASSWORD: &str = "test-password";
pub const WAIT: Duration = Duration::from_secs(5);

/// What the fake shadowsocks server saw from the client
pub struct RelayRecord {
    /// Decrypted stream, address header first
    pub received: Vec<u8>,
    /// The client closed the connection after the response
    pub closed_by_peer: bool,
}

/// Shadowsocks server accepting one connection
///
/// Decrypts until `expected_len` bytes arrived, answers with `response` and waits for the
/// connection to be closed.
pub fn spawn_fake_relay(
    method: CipherType,
    expected_len: usize,
    response: &'static [u8],
) -> (SocketAddr, JoinHandle<RelayRecord>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();

        let mut session = CipherSession::with_password(method, PASSWORD);
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];

        while received.len() < expected_len {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "client closed after {} bytes", received.len());
            received.extend_from_slice(&session.decrypt(&buf[..n]).unwrap());
        }

        let encrypted = session.encrypt(response).unwrap();
        // Returned stream starts with its own IV
        assert_eq!(encrypted.len(), method.iv_size() + response.len());
        stream.write_all(&encrypted).unwrap();

        let closed_by_peer = loop {
            match stream.read(&mut buf) {
                Ok(0) => break true,
                Ok(n) => received.extend_from_slice(&session.decrypt(&buf[..n]).unwrap()),
                Err(..) => break false,
            }
        };

        RelayRecord {
            received,
            closed_by_peer,
        }
    });

    (addr, handle)
}

pub fn local_config(relay_addr: SocketAddr, method: CipherType, proxy_type: ProxyType) -> Config {
    let mut config = Config::default();
    config.server = Some(ServerAddr::from(relay_addr));
    config.local_addr = "127.0.0.1:0".parse().unwrap();
    config.password = PASSWORD.to_owned();
    config.method = method;
    config.proxy_type = proxy_type;
    config
}

/// SOCKS5 CONNECT request for `example.org:443`, and the envelope the server must receive
pub fn socks5_connect_request() -> (Vec<u8>, Vec<u8>) {
    let mut envelope = vec![0x03, 11];
    envelope.extend_from_slice(b"example.org");
    envelope.extend_from_slice(&[0x01, 0xbb]);

    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(&envelope);

    (request, envelope)
}
