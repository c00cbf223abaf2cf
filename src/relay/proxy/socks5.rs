//! SOCKS5 handshake, no authentication and CONNECT only

use bytes::Bytes;
use log::{trace, warn};

use super::{ProtocolError, ProxyProtocol, ProxyType};
use crate::relay::socks5::consts;

/// Handshake progress
///
/// ```plain
/// Hello  --(greeting)-->  Ack  --(connect request)-->  Ready
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Socks5Stage {
    Hello,
    Ack,
    Ready,
}

/// `VER | CMD | RSV` prefix of a request, stripped before the address
const REQUEST_PREFIX_LEN: usize = 3;

pub struct Socks5Proxy {
    stage: Socks5Stage,
}

impl Socks5Proxy {
    pub fn new() -> Socks5Proxy {
        Socks5Proxy {
            stage: Socks5Stage::Hello,
        }
    }

    pub fn stage(&self) -> Socks5Stage {
        self.stage
    }
}

impl Default for Socks5Proxy {
    fn default() -> Socks5Proxy {
        Socks5Proxy::new()
    }
}

impl ProxyProtocol for Socks5Proxy {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks5
    }

    fn is_ready(&self) -> bool {
        self.stage == Socks5Stage::Ready
    }

    fn local_reply(&mut self, data: &[u8]) -> Result<Option<Bytes>, ProtocolError> {
        match self.stage {
            Socks5Stage::Hello => {
                // Clients that are not speaking SOCKS5 get a SOCKS4 rejection, they will close the connection
                let reply = if self.sniff(data) {
                    [consts::SOCKS5_VERSION, consts::SOCKS5_AUTH_METHOD_NONE]
                } else {
                    warn!("socks5 greeting with unexpected version {:?}", data.first());
                    [0x00, consts::SOCKS4_REPLY_REJECTED]
                };
                self.stage = Socks5Stage::Ack;
                Ok(Some(Bytes::copy_from_slice(&reply)))
            }
            Socks5Stage::Ack => {
                match data.get(1) {
                    Some(&consts::SOCKS5_CMD_TCP_CONNECT) => {}
                    cmd => warn!("socks5 command {:?} is not supported, treating as CONNECT", cmd),
                }

                // Bound address is always reported as 0.0.0.0:0
                #[rustfmt::skip]
                let reply = [
                    consts::SOCKS5_VERSION, consts::SOCKS5_REPLY_SUCCEEDED, 0x00,
                    consts::SOCKS5_ADDR_TYPE_IPV4, 0, 0, 0, 0,
                    0, 0,
                ];
                self.stage = Socks5Stage::Ready;
                Ok(Some(Bytes::copy_from_slice(&reply)))
            }
            Socks5Stage::Ready => {
                trace!("socks5 already established, no reply for {} bytes", data.len());
                Ok(None)
            }
        }
    }

    fn remote_envelope(&mut self, data: &[u8]) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        if self.stage != Socks5Stage::Ready {
            return Ok(None);
        }

        // ATYP and at least one more byte of address
        if data.len() < REQUEST_PREFIX_LEN + 2 {
            return Err(ProtocolError::Socks5RequestTooShort(data.len()));
        }

        // Everything after the prefix, which may include pipelined payload
        Ok(Some(vec![Bytes::copy_from_slice(&data[REQUEST_PREFIX_LEN..])]))
    }

    fn sniff(&self, data: &[u8]) -> bool {
        data.first() == Some(&consts::SOCKS5_VERSION)
    }
}
