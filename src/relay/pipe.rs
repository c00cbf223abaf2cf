//! Connection pipe between one local client and the shadowsocks server
//!
//! Reactors never run protocol or cipher code. They copy whatever they read into the pipe's
//! queue, and the pipe's worker thread turns it into write requests for the opposite reactor.
//!
//! ```plain
//! local reactor --(FromLocal)--> +------+ --(encrypted)--> remote reactor
//!                                | Pipe |
//! local reactor <--(decrypted)-- +------+ <--(FromRemote)- remote reactor
//! ```

use std::{
    fmt::{self, Display},
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace};
use mio::{Interest, Token};

use super::{
    proxy::{ProtocolError, ProxyProtocol},
    reactor::{ChangeRequest, ReactorHandle},
    socks5::{self, Address},
};
use crate::{
    context::Context,
    crypto::{cipher, CipherSession},
};

/// Which socket the data was read from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Plain text from the local client
    FromLocal,
    /// Cipher text from the shadowsocks server
    FromRemote,
}

/// Inbound event, `data` is `None` for a wake up sentinel
#[derive(Debug)]
pub struct PipeEvent {
    pub data: Option<Bytes>,
    pub direction: Direction,
}

/// Lifecycle of a pipe
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipeState {
    /// Proxy handshake with the local client in progress
    Negotiating,
    /// Relaying data in both directions
    Established,
    /// Close requested, draining the queue
    Closing,
    Closed,
}

/// Errors that terminate a pipe
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("proxy protocol error, {0}")]
    Protocol(#[from] ProtocolError),
    #[error("cipher error, {0}")]
    Cipher(#[from] cipher::Error),
    #[error("invalid target address, {0}")]
    Address(#[from] socks5::Error),
    #[error("i/o error, {0}")]
    Io(#[from] io::Error),
}

/// Part of a `Pipe` shared with reactors
///
/// Reactors hold it in their channel table, keyed by token, to feed the pipe and to
/// notify it when a socket is gone.
#[derive(Debug)]
pub struct PipeHandle {
    tx: Sender<PipeEvent>,
    close_requested: AtomicBool,
    description: String,
    /// Both sockets of the pipe and the reactors owning them
    endpoints: Vec<(ReactorHandle, Token)>,
}

impl PipeHandle {
    /// Copies `data` into the pipe's queue
    pub fn enqueue(&self, direction: Direction, data: &[u8]) {
        let event = PipeEvent {
            data: Some(Bytes::copy_from_slice(data)),
            direction,
        };
        if self.tx.send(event).is_err() {
            trace!("pipe {} already finished, dropped {} bytes", self.description, data.len());
        }
    }

    /// Asks the worker to close both sockets once everything queued has been processed
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        let _ = self.tx.send(PipeEvent {
            data: None,
            direction: Direction::FromLocal,
        });
    }

    /// Closes both sockets without flushing them, then finishes like `request_close`
    ///
    /// Called by a reactor shutting down, which has dropped its own socket already. The other
    /// socket is aborted on the next iteration of its reactor.
    pub fn force_close(&self) {
        info!("pipe force closed, {}", self.description);
        for (reactor, token) in &self.endpoints {
            // Stopped reactors have closed their sockets
            let _ = reactor.send(ChangeRequest::AbortChannel { token: *token });
        }
        self.request_close();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
impl PipeHandle {
    /// Handle without a worker, events are left in the returned receiver
    pub(crate) fn detached(
        description: &str,
        endpoints: Vec<(ReactorHandle, Token)>,
    ) -> (Arc<PipeHandle>, Receiver<PipeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = Arc::new(PipeHandle {
            tx,
            close_requested: AtomicBool::new(false),
            description: description.to_owned(),
            endpoints,
        });
        (handle, rx)
    }
}

impl Display for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// One logical client <-> server connection, driven by its own worker thread
pub struct Pipe {
    local_token: Token,
    remote_token: Token,
    local: ReactorHandle,
    remote: ReactorHandle,
    protocol: Box<dyn ProxyProtocol>,
    session: CipherSession,
    rx: Receiver<PipeEvent>,
    handle: Arc<PipeHandle>,
    state: PipeState,
}

impl Pipe {
    /// Creates a pipe for sockets `local_token` (owned by `local`) and `remote_token` (owned by `remote`)
    pub fn new(
        context: &Context,
        local_token: Token,
        remote_token: Token,
        local: ReactorHandle,
        remote: ReactorHandle,
        description: String,
    ) -> (Pipe, Arc<PipeHandle>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = Arc::new(PipeHandle {
            tx,
            close_requested: AtomicBool::new(false),
            description,
            endpoints: vec![(local.clone(), local_token), (remote.clone(), remote_token)],
        });

        let pipe = Pipe {
            local_token,
            remote_token,
            local,
            remote,
            protocol: context.proxy_type().new_protocol(),
            session: context.new_cipher_session(),
            rx,
            handle: handle.clone(),
            state: PipeState::Negotiating,
        };

        (pipe, handle)
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    /// Worker loop, returns after both sockets have been asked to close
    pub fn run(mut self) {
        loop {
            // Everything queued before the close request must be processed first
            if self.rx.is_empty() && self.handle.is_close_requested() {
                self.close();
                break;
            }

            let event = match self.rx.recv() {
                Ok(e) => e,
                Err(..) => break,
            };

            let data = match event.data {
                Some(d) => d,
                None => continue,
            };

            if self.state == PipeState::Closing {
                trace!("pipe {} closing, dropped {} bytes", self.handle, data.len());
                continue;
            }

            if let Err(err) = self.process(event.direction, &data) {
                error!("pipe {} failed, {}", self.handle, err);
                self.state = PipeState::Closing;
                self.handle.request_close();
            }
        }

        debug!("pipe {} finished", self.handle);
    }

    fn process(&mut self, direction: Direction, data: &[u8]) -> Result<(), PipeError> {
        match direction {
            Direction::FromLocal if !self.protocol.is_ready() => self.negotiate(data),
            Direction::FromLocal => {
                let encrypted = self.session.encrypt(data)?;
                self.send_remote(encrypted)
            }
            Direction::FromRemote => {
                let decrypted = self.session.decrypt(data)?;
                if decrypted.is_empty() {
                    return Ok(());
                }
                self.send_local(decrypted)
            }
        }
    }

    fn negotiate(&mut self, data: &[u8]) -> Result<(), PipeError> {
        if let Some(reply) = self.protocol.local_reply(data)? {
            self.send_local(reply)?;
        }

        let envelope = match self.protocol.remote_envelope(data)? {
            Some(e) => e,
            None => return Ok(()),
        };

        if let Some(header) = envelope.first() {
            let mut cur = io::Cursor::new(&header[..]);
            let addr = Address::read_cursor(&mut cur)?;
            info!("connected to {}, {}", addr, self.handle);
        }

        for buf in envelope {
            let encrypted = self.session.encrypt(&buf)?;
            self.send_remote(encrypted)?;
        }

        self.state = PipeState::Established;
        Ok(())
    }

    fn send_local(&self, payload: Bytes) -> Result<(), PipeError> {
        self.local.send(ChangeRequest::ChangeInterestOps {
            token: self.local_token,
            interest: Interest::WRITABLE,
            payload: Some(payload),
        })?;
        Ok(())
    }

    fn send_remote(&self, payload: Bytes) -> Result<(), PipeError> {
        self.remote.send(ChangeRequest::ChangeInterestOps {
            token: self.remote_token,
            interest: Interest::WRITABLE,
            payload: Some(payload),
        })?;
        Ok(())
    }

    fn close(&mut self) {
        self.state = PipeState::Closing;
        debug!("pipe {} closing", self.handle);

        // Reactors ignore tokens they have already closed
        let _ = self.local.send(ChangeRequest::CloseChannel { token: self.local_token });
        let _ = self.remote.send(ChangeRequest::CloseChannel { token: self.remote_token });

        self.state = PipeState::Closed;
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use super::*;
    use crate::{
        config::{Config, ProxyType},
        crypto::CipherType,
    };

    fn test_context(proxy_type: ProxyType) -> Context {
        let mut config = Config::default();
        config.server = Some("127.0.0.1:8388".parse().unwrap());
        config.password = "password".to_owned();
        config.method = CipherType::Aes128Cfb;
        config.proxy_type = proxy_type;
        Context::new(&config).unwrap()
    }

    fn recv_payload(rx: &Receiver<ChangeRequest>) -> (Token, Bytes) {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ChangeRequest::ChangeInterestOps {
                token,
                interest,
                payload: Some(payload),
            } => {
                assert_eq!(interest, Interest::WRITABLE);
                (token, payload)
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    fn recv_close(rx: &Receiver<ChangeRequest>) -> Token {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ChangeRequest::CloseChannel { token } => token,
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_pipe_socks5_flow() {
        let _ = env_logger::try_init();

        let context = test_context(ProxyType::Socks5);
        let (local, local_rx, _local_poll) = ReactorHandle::detached().unwrap();
        let (remote, remote_rx, _remote_poll) = ReactorHandle::detached().unwrap();

        let (pipe, handle) = Pipe::new(&context, Token(100), Token(101), local, remote, "test".to_owned());
        let worker = thread::spawn(move || pipe.run());

        handle.enqueue(Direction::FromLocal, &[0x05, 0x01, 0x00]);
        let (token, reply) = recv_payload(&local_rx);
        assert_eq!(token, Token(100));
        assert_eq!(&reply[..], &[0x05, 0x00]);

        let request = [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1f, 0x90, b'h', b'i'];
        handle.enqueue(Direction::FromLocal, &request);
        let (_, ack) = recv_payload(&local_rx);
        assert_eq!(ack.len(), 10);

        let (token, envelope) = recv_payload(&remote_rx);
        assert_eq!(token, Token(101));

        let mut server = context.new_cipher_session();
        let plain = server.decrypt(&envelope).unwrap();
        assert_eq!(&plain[..], &request[3..]);

        // Steady state, both directions
        handle.enqueue(Direction::FromLocal, b"more");
        let (_, more) = recv_payload(&remote_rx);
        assert_eq!(more.len(), 4);
        assert_eq!(&server.decrypt(&more).unwrap()[..], b"more");

        let response = server.encrypt(b"response").unwrap();
        handle.enqueue(Direction::FromRemote, &response);
        let (token, plain) = recv_payload(&local_rx);
        assert_eq!(token, Token(100));
        assert_eq!(&plain[..], b"response");

        handle.request_close();
        assert_eq!(recv_close(&local_rx), Token(100));
        assert_eq!(recv_close(&remote_rx), Token(101));
        worker.join().unwrap();
    }

    #[test]
    fn test_pipe_drains_queue_before_close() {
        let context = test_context(ProxyType::Http);
        let (local, local_rx, _local_poll) = ReactorHandle::detached().unwrap();
        let (remote, remote_rx, _remote_poll) = ReactorHandle::detached().unwrap();

        let (pipe, handle) = Pipe::new(&context, Token(200), Token(201), local, remote, "test".to_owned());

        // Queued before the worker starts, close must not overtake the data
        handle.enqueue(Direction::FromLocal, b"GET http://example.com/ HTTP/1.1\r\n\r\n");
        handle.request_close();

        let worker = thread::spawn(move || pipe.run());

        let (_, header) = recv_payload(&remote_rx);
        let (_, request) = recv_payload(&remote_rx);
        let mut server = context.new_cipher_session();
        let header = server.decrypt(&header).unwrap();
        assert_eq!(header[0], 0x03);
        assert!(server.decrypt(&request).unwrap().starts_with(b"GET / HTTP/1.1\r\n"));

        assert_eq!(recv_close(&local_rx), Token(200));
        assert_eq!(recv_close(&remote_rx), Token(201));
        worker.join().unwrap();
    }

    #[test]
    fn test_pipe_force_close_aborts_both_sockets() {
        let context = test_context(ProxyType::Socks5);
        let (local, local_rx, _local_poll) = ReactorHandle::detached().unwrap();
        let (remote, remote_rx, _remote_poll) = ReactorHandle::detached().unwrap();

        let (pipe, handle) = Pipe::new(&context, Token(400), Token(401), local, remote, "test".to_owned());
        let worker = thread::spawn(move || pipe.run());

        handle.force_close();
        for (rx, expected) in [(&local_rx, Token(400)), (&remote_rx, Token(401))] {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ChangeRequest::AbortChannel { token } => assert_eq!(token, expected),
                other => panic!("unexpected request {other:?}"),
            }
        }

        // The worker still unwinds through the usual close
        assert_eq!(recv_close(&local_rx), Token(400));
        assert_eq!(recv_close(&remote_rx), Token(401));
        worker.join().unwrap();
    }

    #[test]
    fn test_pipe_protocol_error_closes() {
        let context = test_context(ProxyType::Auto);
        let (local, local_rx, _local_poll) = ReactorHandle::detached().unwrap();
        let (remote, remote_rx, _remote_poll) = ReactorHandle::detached().unwrap();

        let (pipe, handle) = Pipe::new(&context, Token(300), Token(301), local, remote, "test".to_owned());
        let worker = thread::spawn(move || pipe.run());

        handle.enqueue(Direction::FromLocal, b"\x16\x03\x01 not a proxy request");
        assert_eq!(recv_close(&local_rx), Token(300));
        assert_eq!(recv_close(&remote_rx), Token(301));
        worker.join().unwrap();
        assert!(handle.is_close_requested());
    }
}
