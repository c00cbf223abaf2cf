//! HTTP proxy, both plain requests and `CONNECT` tunnels
//!
//! Plain requests are rewritten before being sent to the server:
//!
//! - `GET http://example.com/index.html HTTP/1.1` becomes `GET /index.html HTTP/1.1`
//! - `Proxy-Connection` becomes `Connection`
//! - `Cache-Control` becomes `Pragma: no-cache` and `Cache-Control: no-cache`
//! - `If-None-Match` and `If-Modified-Since` are removed

use std::mem;

use bytes::{BufMut, Bytes, BytesMut};
use httparse::Status;
use log::{debug, trace};

use super::{ProtocolError, ProxyProtocol, ProxyType};
use crate::relay::socks5::Address;

const HTTP_METHODS: &[&str] = &[
    "OPTIONS", "GET", "HEAD", "POST", "PUT", "DELETE", "TRACE", "PATCH", "CONNECT",
];

const HTTP_DEFAULT_PORT: u16 = 80;

const MAX_HEADERS: usize = 100;
/// Incomplete request heads larger than this are rejected
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Request head parsed from the first packets
#[derive(Debug, Clone)]
struct RequestHead {
    method: String,
    path: String,
    version: u8,
    address: Address,
    headers: Vec<(String, Bytes)>,
    body: Bytes,
}

impl RequestHead {
    fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Parses the head at the start of `data`, `None` until the blank line has arrived
    fn parse(data: &[u8]) -> Result<Option<RequestHead>, ProtocolError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let head_len = match req.parse(data)? {
            Status::Complete(n) => n,
            Status::Partial => return Ok(None),
        };

        let (method, target, version) = match (req.method, req.path, req.version) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => return Err(ProtocolError::MalformedHttpRequest("incomplete request line".to_owned())),
        };
        debug!("http request {} {} HTTP/1.{}", method, target, version);

        if !is_http_method(method) {
            return Err(ProtocolError::MalformedHttpRequest(format!("unsupported method {method}")));
        }

        let headers: Vec<(String, Bytes)> = req
            .headers
            .iter()
            .map(|h| (h.name.to_owned(), Bytes::copy_from_slice(h.value)))
            .collect();

        let (authority, path) = if method.eq_ignore_ascii_case("CONNECT") {
            (target.to_owned(), String::new())
        } else if target.starts_with('/') {
            let host = headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("host"))
                .ok_or(ProtocolError::MissingHost)?;
            let host = std::str::from_utf8(&host.1)
                .map_err(|_| ProtocolError::MalformedHttpRequest("non-ascii Host header".to_owned()))?;
            (host.to_owned(), target.to_owned())
        } else {
            let without_scheme = match target.find("://") {
                Some(pos) => &target[pos + 3..],
                None => target,
            };
            match without_scheme.find('/') {
                Some(pos) => (without_scheme[..pos].to_owned(), without_scheme[pos..].to_owned()),
                None => (without_scheme.to_owned(), "/".to_owned()),
            }
        };

        let address = parse_authority(&authority)?;

        Ok(Some(RequestHead {
            method: method.to_owned(),
            path,
            version,
            address,
            headers,
            body: Bytes::copy_from_slice(&data[head_len..]),
        }))
    }

    /// Request head as it should reach the origin server
    fn rewrite(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(256);
        out.put_slice(format!("{} {} HTTP/1.{}\r\n", self.method, self.path, self.version).as_bytes());

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("proxy-connection") {
                put_header(&mut out, "Connection", value);
            } else if name.eq_ignore_ascii_case("cache-control") {
                out.put_slice(b"Pragma: no-cache\r\nCache-Control: no-cache\r\n");
            } else if name.eq_ignore_ascii_case("if-none-match") || name.eq_ignore_ascii_case("if-modified-since") {
                continue;
            } else {
                put_header(&mut out, name, value);
            }
        }

        out.put_slice(b"\r\n");
        out
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}

fn is_http_method(m: &str) -> bool {
    HTTP_METHODS.contains(&m)
}

/// `host[:port]`, IPv6 literals in brackets
fn parse_authority(authority: &str) -> Result<Address, ProtocolError> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, "")) => (host, None),
            Some((host, port)) => (host, Some(port.trim_start_matches(':'))),
            None => return Err(ProtocolError::MalformedHttpRequest(authority.to_owned())),
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            Some(..) => (authority, None),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(ProtocolError::MissingHost);
    }

    let port = match port {
        None => HTTP_DEFAULT_PORT,
        Some(p) => p.parse::<u16>().map_err(|_| ProtocolError::InvalidPort(p.to_owned()))?,
    };

    Ok(Address::from_host(host, port)?)
}

fn connect_established_reply() -> Bytes {
    Bytes::from(format!(
        "HTTP/1.0 200 Connection established\r\nProxy-agent: {}/{}\r\n\r\n",
        env!("CARGO_PKG_NAME"),
        crate::VERSION
    ))
}

/// HTTP proxy handshake
///
/// A request head split across several reads is buffered until it is complete. Every packet
/// goes through `local_reply` and then `remote_envelope`, it is buffered only once.
pub struct HttpProxy {
    ready: bool,
    pending: BytesMut,
    buffered: bool,
    request: Option<RequestHead>,
}

impl HttpProxy {
    pub fn new() -> HttpProxy {
        HttpProxy {
            ready: false,
            pending: BytesMut::new(),
            buffered: false,
            request: None,
        }
    }

    /// Appends `data` to the head received so far, returns the request once it is complete
    fn feed(&mut self, data: &[u8]) -> Result<Option<&RequestHead>, ProtocolError> {
        if self.request.is_none() {
            self.pending.extend_from_slice(data);

            match RequestHead::parse(&self.pending)? {
                Some(request) => {
                    self.pending.clear();
                    self.request = Some(request);
                }
                None if self.pending.len() > MAX_HEAD_SIZE => {
                    return Err(ProtocolError::MalformedHttpRequest(format!(
                        "request head exceeds {MAX_HEAD_SIZE} bytes"
                    )));
                }
                None => trace!("http request head incomplete, {} bytes buffered", self.pending.len()),
            }
        }

        Ok(self.request.as_ref())
    }
}

impl Default for HttpProxy {
    fn default() -> HttpProxy {
        HttpProxy::new()
    }
}

impl ProxyProtocol for HttpProxy {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn local_reply(&mut self, data: &[u8]) -> Result<Option<Bytes>, ProtocolError> {
        if self.ready {
            return Ok(None);
        }

        let connect = self.feed(data)?.map(RequestHead::is_connect);
        self.buffered = true;

        match connect {
            Some(true) => Ok(Some(connect_established_reply())),
            _ => Ok(None),
        }
    }

    fn remote_envelope(&mut self, data: &[u8]) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        if self.ready {
            return Ok(None);
        }

        let request = if mem::take(&mut self.buffered) {
            self.request.as_ref()
        } else {
            self.feed(data)?
        };
        let request = match request {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut header = BytesMut::with_capacity(request.address.serialized_len());
        request.address.write_to_buf(&mut header);

        let mut envelope = vec![header.freeze()];
        if request.is_connect() {
            if !request.body.is_empty() {
                envelope.push(request.body.clone());
            }
        } else {
            let mut payload = request.rewrite();
            trace!("http rewritten request head {:?}", payload);
            payload.put_slice(&request.body);
            envelope.push(payload.freeze());
        }

        self.ready = true;
        Ok(Some(envelope))
    }

    fn sniff(&self, data: &[u8]) -> bool {
        let end = data.iter().position(|b| *b == b' ').unwrap_or(data.len());
        match std::str::from_utf8(&data[..end]) {
            Ok(method) => is_http_method(method),
            Err(..) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;

    fn envelope_address(buf: &[u8]) -> Address {
        let mut cur = std::io::Cursor::new(buf);
        Address::read_cursor(&mut cur).unwrap()
    }

    #[test]
    fn test_http_absolute_uri_rewrite() {
        let request = b"GET http://example.com:8080/index.html?q=1 HTTP/1.1\r\n\
Host: example.com:8080\r\n\
Proxy-Connection: keep-alive\r\n\
Cache-Control: max-age=0\r\n\
If-None-Match: \"abc\"\r\n\
If-Modified-Since: Sat, 29 Oct 1994 19:43:31 GMT\r\n\
Accept: */*\r\n\
\r\n";

        let mut p = HttpProxy::new();
        assert!(p.sniff(request));
        assert!(p.local_reply(request).unwrap().is_none());
        assert!(!p.is_ready());

        let envelope = p.remote_envelope(request).unwrap().unwrap();
        assert!(p.is_ready());
        assert_eq!(envelope.len(), 2);
        assert_eq!(
            envelope_address(&envelope[0]),
            Address::DomainNameAddress("example.com".to_owned(), 8080)
        );

        let expected = "GET /index.html?q=1 HTTP/1.1\r\n\
Host: example.com:8080\r\n\
Connection: keep-alive\r\n\
Pragma: no-cache\r\n\
Cache-Control: no-cache\r\n\
Accept: */*\r\n\
\r\n";
        assert_eq!(std::str::from_utf8(&envelope[1]).unwrap(), expected);
    }

    #[test]
    fn test_http_default_port_and_path() {
        let request = b"GET http://example.com HTTP/1.0\r\n\r\n";
        let mut p = HttpProxy::new();
        let envelope = p.remote_envelope(request).unwrap().unwrap();
        assert_eq!(
            envelope_address(&envelope[0]),
            Address::DomainNameAddress("example.com".to_owned(), 80)
        );
        assert!(envelope[1].starts_with(b"GET / HTTP/1.0\r\n"));
    }

    #[test]
    fn test_http_origin_form_uses_host_header() {
        let request = b"POST /submit HTTP/1.1\r\nhost: 10.1.2.3:81\r\nContent-Length: 4\r\n\r\nbody";
        let mut p = HttpProxy::new();
        let envelope = p.remote_envelope(request).unwrap().unwrap();

        let addr: SocketAddr = "10.1.2.3:81".parse().unwrap();
        assert_eq!(envelope_address(&envelope[0]), Address::SocketAddress(addr));
        assert_eq!(envelope[0][0], 0x01);
        assert!(envelope[1].starts_with(b"POST /submit HTTP/1.1\r\n"));
        assert!(envelope[1].ends_with(b"\r\n\r\nbody"));
    }

    #[test]
    fn test_http_connect() {
        let request = b"CONNECT example.org:443 HTTP/1.1\r\nHost: example.org:443\r\n\r\n";
        let mut p = HttpProxy::new();
        assert!(p.sniff(request));

        let reply = p.local_reply(request).unwrap().unwrap();
        assert!(reply.starts_with(b"HTTP/1.0 200"));
        assert!(reply.ends_with(b"\r\n\r\n"));
        assert!(String::from_utf8_lossy(&reply).contains("Proxy-agent: "));

        let envelope = p.remote_envelope(request).unwrap().unwrap();
        assert_eq!(envelope.len(), 1);
        assert_eq!(
            envelope_address(&envelope[0]),
            Address::DomainNameAddress("example.org".to_owned(), 443)
        );
        assert!(p.is_ready());
    }

    #[test]
    fn test_http_connect_ipv6() {
        let request = b"CONNECT [::1]:8443 HTTP/1.1\r\n\r\n";
        let mut p = HttpProxy::new();
        let envelope = p.remote_envelope(request).unwrap().unwrap();
        let addr: SocketAddr = "[::1]:8443".parse().unwrap();
        assert_eq!(envelope_address(&envelope[0]), Address::SocketAddress(addr));
    }

    #[test]
    fn test_http_head_split_across_packets() {
        let mut p = HttpProxy::new();
        let first = b"GET http://example.com/ HTTP/1.1\r\nHost: exa";
        assert!(p.local_reply(first).unwrap().is_none());
        assert!(p.remote_envelope(first).unwrap().is_none());
        assert!(!p.is_ready());

        let second = b"mple.com\r\nProxy-Connection: close\r\n\r\n";
        assert!(p.local_reply(second).unwrap().is_none());
        let envelope = p.remote_envelope(second).unwrap().unwrap();
        assert!(p.is_ready());
        assert_eq!(
            envelope_address(&envelope[0]),
            Address::DomainNameAddress("example.com".to_owned(), 80)
        );
        assert_eq!(
            &envelope[1][..],
            b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_http_connect_split_with_early_data() {
        let mut p = HttpProxy::new();
        assert!(p.remote_envelope(b"CONNECT example.org:443 HT").unwrap().is_none());

        let rest = b"TP/1.1\r\nHost: example.org:443\r\n\r\n\x16\x03\x01";
        let reply = p.local_reply(rest).unwrap().unwrap();
        assert!(reply.starts_with(b"HTTP/1.0 200"));

        let envelope = p.remote_envelope(rest).unwrap().unwrap();
        assert_eq!(envelope.len(), 2);
        assert_eq!(
            envelope_address(&envelope[0]),
            Address::DomainNameAddress("example.org".to_owned(), 443)
        );
        assert_eq!(&envelope[1][..], b"\x16\x03\x01");
    }

    #[test]
    fn test_http_oversized_head() {
        let mut p = HttpProxy::new();
        let mut head = b"GET http://example.com/ HTTP/1.1\r\nX-Filler: ".to_vec();
        head.resize(MAX_HEAD_SIZE + 1, b'a');
        assert!(matches!(
            p.remote_envelope(&head),
            Err(ProtocolError::MalformedHttpRequest(..))
        ));
    }

    #[test]
    fn test_http_unknown_method() {
        let p = HttpProxy::new();
        assert!(!p.sniff(b"BREW /pot HTTP/1.1\r\n\r\n"));
        assert!(!p.sniff(&[0x05, 0x01, 0x00]));
        assert!(!p.sniff(b""));

        let mut p = HttpProxy::new();
        assert!(matches!(
            p.local_reply(b"BREW /pot HTTP/1.1\r\n\r\n"),
            Err(ProtocolError::MalformedHttpRequest(..))
        ));
    }

    #[test]
    fn test_http_missing_host() {
        let mut p = HttpProxy::new();
        assert!(matches!(
            p.remote_envelope(b"GET /index.html HTTP/1.1\r\nAccept: */*\r\n\r\n"),
            Err(ProtocolError::MissingHost)
        ));
    }

    #[test]
    fn test_http_invalid_port() {
        let mut p = HttpProxy::new();
        assert!(matches!(
            p.remote_envelope(b"GET http://example.com:99999/ HTTP/1.1\r\n\r\n"),
            Err(ProtocolError::InvalidPort(..))
        ));
    }
}
