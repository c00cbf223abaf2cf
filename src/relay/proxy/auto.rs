//! Picks SOCKS5 or HTTP from the first packet of a connection

use bytes::Bytes;
use log::{debug, error};

use super::{ProtocolError, ProxyProtocol, ProxyType};

pub struct AutoProxy {
    delegate: Option<Box<dyn ProxyProtocol>>,
}

impl AutoProxy {
    pub fn new() -> AutoProxy {
        AutoProxy { delegate: None }
    }

    /// Protocol this connection has been bound to
    pub fn bound_type(&self) -> Option<ProxyType> {
        self.delegate.as_ref().map(|p| p.proxy_type())
    }

    pub fn is_bound(&self) -> bool {
        self.delegate.is_some()
    }

    fn delegate(&mut self, data: &[u8]) -> Result<&mut Box<dyn ProxyProtocol>, ProtocolError> {
        let delegate = match self.delegate.take() {
            Some(d) => d,
            None => {
                let d = ProxyType::sniffable()
                    .map(ProxyType::new_protocol)
                    .find(|p| p.sniff(data))
                    .ok_or_else(|| {
                        error!("unable to determine proxy protocol from {} bytes", data.len());
                        ProtocolError::UnrecognizedProtocol(data.len())
                    })?;
                debug!("proxy protocol (auto): {}", d.proxy_type());
                d
            }
        };
        Ok(self.delegate.insert(delegate))
    }
}

impl Default for AutoProxy {
    fn default() -> AutoProxy {
        AutoProxy::new()
    }
}

impl ProxyProtocol for AutoProxy {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Auto
    }

    fn is_ready(&self) -> bool {
        match self.delegate {
            Some(ref d) => d.is_ready(),
            None => false,
        }
    }

    fn local_reply(&mut self, data: &[u8]) -> Result<Option<Bytes>, ProtocolError> {
        self.delegate(data)?.local_reply(data)
    }

    fn remote_envelope(&mut self, data: &[u8]) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        self.delegate(data)?.remote_envelope(data)
    }

    fn sniff(&self, data: &[u8]) -> bool {
        match self.delegate {
            Some(ref d) => d.sniff(data),
            None => ProxyType::sniffable().any(|t| t.new_protocol().sniff(data)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_auto_binds_socks5() {
        let mut p = AutoProxy::new();
        assert!(!p.is_bound());

        let reply = p.local_reply(&[0x05, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(&reply[..], &[0x05, 0x00]);
        assert_eq!(p.bound_type(), Some(ProxyType::Socks5));
        assert!(!p.is_ready());

        // Later packets go to the bound protocol even if they would sniff differently
        let request = [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];
        p.local_reply(&request).unwrap();
        assert!(p.is_ready());
        assert_eq!(p.bound_type(), Some(ProxyType::Socks5));
    }

    #[test]
    fn test_auto_binds_http() {
        let request = b"CONNECT example.org:443 HTTP/1.1\r\n\r\n";
        let mut p = AutoProxy::new();
        assert!(p.sniff(request));

        let reply = p.local_reply(request).unwrap().unwrap();
        assert!(reply.starts_with(b"HTTP/1.0 200"));
        assert_eq!(p.bound_type(), Some(ProxyType::Http));

        let envelope = p.remote_envelope(request).unwrap().unwrap();
        assert_eq!(envelope.len(), 1);
        assert!(p.is_ready());
    }

    #[test]
    fn test_auto_unrecognized() {
        let mut p = AutoProxy::new();
        let garbage = b"\x16\x03\x01 hello";
        assert!(!p.sniff(garbage));
        assert!(matches!(
            p.local_reply(garbage),
            Err(ProtocolError::UnrecognizedProtocol(..))
        ));
        assert!(!p.is_bound());
        assert!(!p.is_ready());
    }
}
