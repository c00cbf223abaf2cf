//! Reactor owning the outbound sockets to the shadowsocks server

use std::io::{self, ErrorKind};

use log::debug;
use mio::Token;

use super::{ReactorCore, ReactorRole};
use crate::relay::pipe::Direction;

/// Completes non-blocking connects, accepts nothing
#[derive(Debug, Default)]
pub struct RemoteRole;

impl ReactorRole for RemoteRole {
    const NAME: &'static str = "remote";
    const DIRECTION: Direction = Direction::FromRemote;

    fn handle_acceptable(&mut self, _core: &mut ReactorCore) -> io::Result<()> {
        Ok(())
    }

    fn handle_connectable(&mut self, core: &mut ReactorCore, token: Token) -> io::Result<bool> {
        let stream = match core.channel_stream(token) {
            Some(s) => s,
            None => return Ok(false),
        };

        if let Some(err) = stream.take_error()? {
            return Err(err);
        }

        match stream.peer_addr() {
            Ok(addr) => {
                debug!("connected to server {} ({:?})", addr, token);
                Ok(true)
            }
            // Still in progress, another event will follow
            Err(ref err) if err.kind() == ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }
}
