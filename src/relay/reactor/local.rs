//! Reactor owning the listener and the sockets accepted from local clients

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    thread,
};

use log::{debug, error, trace};
use mio::{
    net::{TcpListener, TcpStream},
    Interest,
    Registry,
    Token,
};

use super::{next_token, ChangeRequest, ReactorCore, ReactorHandle, ReactorRole, LISTENER_TOKEN};
use crate::{
    context::SharedContext,
    relay::pipe::{Direction, Pipe},
};

/// Accepts local clients and pairs each with an outbound socket on the remote reactor
pub struct LocalRole {
    listener: TcpListener,
    context: SharedContext,
    remote: ReactorHandle,
}

impl LocalRole {
    pub fn new(listener: TcpListener, context: SharedContext, remote: ReactorHandle) -> LocalRole {
        LocalRole {
            listener,
            context,
            remote,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn accept_connection(&self, core: &mut ReactorCore, stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        if let Err(err) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY for {}, {}", peer_addr, err);
        }

        let server_addr = self.context.server_addr();
        let remote_stream = TcpStream::connect(server_addr)?;

        let local_token = next_token();
        let remote_token = next_token();
        let description = format!("local: {peer_addr} <-> remote: {server_addr}");

        let (pipe, handle) = Pipe::new(
            &self.context,
            local_token,
            remote_token,
            core.handle(),
            self.remote.clone(),
            description,
        );

        // A worker blocks on its pipe's queue for the whole connection, so each pipe gets its own thread
        thread::Builder::new()
            .name(format!("pipe-{}", local_token.0))
            .spawn(move || pipe.run())?;

        if let Err(err) = core.add_channel(local_token, stream, Interest::READABLE, handle.clone(), false) {
            handle.request_close();
            return Err(err);
        }

        let req = ChangeRequest::RegisterChannel {
            token: remote_token,
            stream: remote_stream,
            interest: Interest::WRITABLE,
            pipe: handle.clone(),
        };
        if let Err(err) = self.remote.send(req) {
            handle.request_close();
            return Err(err);
        }

        trace!("accepted {}", handle);
        Ok(())
    }
}

impl ReactorRole for LocalRole {
    const NAME: &'static str = "local";
    const DIRECTION: Direction = Direction::FromLocal;

    fn attach(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)
    }

    fn handle_acceptable(&mut self, core: &mut ReactorCore) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = match self.listener.accept() {
                Ok(s) => s,
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            if let Err(err) = self.accept_connection(core, stream, peer_addr) {
                error!("failed to relay connection from {}, {}", peer_addr, err);
            }
        }
    }

    fn handle_connectable(&mut self, _core: &mut ReactorCore, _token: Token) -> io::Result<bool> {
        // Accepted sockets are connected already
        Ok(true)
    }
}
