//! Non-blocking socket reactors
//!
//! Two reactors run on their own threads. The local one owns the listener and accepted client
//! sockets, the remote one owns outbound sockets to the shadowsocks server. Other threads never
//! touch a socket directly, they send a `ChangeRequest` through a `ReactorHandle`, which wakes
//! the reactor up. Pending requests are applied before each poll.
//!
//! Readiness is edge-triggered, so a readable socket is read until it would block, and a
//! socket with pending writes is watched for writability only until its queue is drained.

use std::{
    collections::HashMap,
    io::{self, ErrorKind, Read},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, trace, warn};
use mio::{event::Event, net::TcpStream, Events, Interest, Poll, Registry, Token, Waker};

pub use self::{
    local::LocalRole,
    remote::RemoteRole,
    write_queue::{FlushStatus, WriteQueue},
};
use super::pipe::{Direction, PipeHandle};

mod local;
mod remote;
mod write_queue;

/// Token of the listening socket
pub const LISTENER_TOKEN: Token = Token(0);
/// Token of the reactor's waker
pub const WAKER_TOKEN: Token = Token(1);

const READ_BUFFER_SIZE: usize = 16 * 1024;
const EVENTS_CAPACITY: usize = 1024;
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(2);

/// Allocates a token unique across all reactors of this process
pub fn next_token() -> Token {
    Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
}

/// State change applied by the reactor owning the socket
#[derive(Debug)]
pub enum ChangeRequest {
    /// Takes ownership of an outbound socket whose connection is in progress
    RegisterChannel {
        token: Token,
        stream: TcpStream,
        interest: Interest,
        pipe: Arc<PipeHandle>,
    },
    /// Appends `payload` to the socket's write queue and switches its interest
    ChangeInterestOps {
        token: Token,
        interest: Interest,
        payload: Option<Bytes>,
    },
    /// Closes the socket after its write queue is flushed
    CloseChannel { token: Token },
    /// Closes the socket at once, pending writes are discarded
    AbortChannel { token: Token },
    /// Closes every socket and stops the reactor, then signals `done`
    Shutdown { done: Sender<()> },
}

/// Sends `ChangeRequest`s to a reactor from any thread
#[derive(Clone, Debug)]
pub struct ReactorHandle {
    tx: Sender<ChangeRequest>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Queues `req` and wakes the reactor up
    pub fn send(&self, req: ChangeRequest) -> io::Result<()> {
        self.tx
            .send(req)
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "reactor stopped"))?;
        self.waker.wake()
    }

    /// Asks the reactor to close all of its sockets and stop
    ///
    /// The returned receiver gets a message, or is disconnected, once the reactor has done so.
    pub fn shutdown(&self) -> io::Result<Receiver<()>> {
        let (done, finished) = crossbeam_channel::bounded(1);
        self.send(ChangeRequest::Shutdown { done })?;
        Ok(finished)
    }

    /// Handle without a running reactor, requests are left in the returned receiver
    #[cfg(test)]
    pub(crate) fn detached() -> io::Result<(ReactorHandle, Receiver<ChangeRequest>, Poll)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = crossbeam_channel::unbounded();
        Ok((ReactorHandle { tx, waker }, rx, poll))
    }
}

/// What makes a reactor local or remote
pub trait ReactorRole: Send + 'static {
    /// Name in logs and thread names
    const NAME: &'static str;
    /// Data read by this reactor flows in this direction
    const DIRECTION: Direction;

    /// Registers sockets owned by the role itself, e.g. the listener
    fn attach(&mut self, _registry: &Registry) -> io::Result<()> {
        Ok(())
    }

    /// `LISTENER_TOKEN` is ready
    fn handle_acceptable(&mut self, core: &mut ReactorCore) -> io::Result<()>;

    /// A connecting channel got an event, returns `true` if the connection is established
    fn handle_connectable(&mut self, core: &mut ReactorCore, token: Token) -> io::Result<bool>;
}

/// Socket registered in a reactor
struct Channel {
    stream: TcpStream,
    pipe: Arc<PipeHandle>,
    queue: WriteQueue,
    connecting: bool,
    closing: bool,
    last_active: Instant,
}

/// Reactor state shared with its role
pub struct ReactorCore {
    name: &'static str,
    direction: Direction,
    registry: Registry,
    handle: ReactorHandle,
    rx: Receiver<ChangeRequest>,
    channels: HashMap<Token, Channel>,
    buffer: Box<[u8]>,
    idle_timeout: Option<Duration>,
    shutdown_waiters: Vec<Sender<()>>,
}

impl ReactorCore {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle of this reactor
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Registers `stream` and starts tracking it as `token`
    pub fn add_channel(
        &mut self,
        token: Token,
        mut stream: TcpStream,
        interest: Interest,
        pipe: Arc<PipeHandle>,
        connecting: bool,
    ) -> io::Result<()> {
        self.registry.register(&mut stream, token, interest)?;
        trace!("{} reactor registered channel {:?}, {}", self.name, token, pipe);

        self.channels.insert(
            token,
            Channel {
                stream,
                pipe,
                queue: WriteQueue::new(),
                connecting,
                closing: false,
                last_active: Instant::now(),
            },
        );
        Ok(())
    }

    /// Socket of channel `token`
    pub fn channel_stream(&self, token: Token) -> Option<&TcpStream> {
        self.channels.get(&token).map(|ch| &ch.stream)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Applies all queued requests, returns `false` if the reactor has to stop
    fn process_pending_requests(&mut self) -> bool {
        loop {
            let req = match self.rx.try_recv() {
                Ok(req) => req,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };

            match req {
                ChangeRequest::RegisterChannel {
                    token,
                    stream,
                    interest,
                    pipe,
                } => {
                    if let Err(err) = self.add_channel(token, stream, interest, pipe.clone(), true) {
                        error!("{} reactor failed to register {:?}, {}", self.name, token, err);
                        pipe.request_close();
                    }
                }
                ChangeRequest::ChangeInterestOps {
                    token,
                    interest,
                    payload,
                } => self.change_interest(token, interest, payload),
                ChangeRequest::CloseChannel { token } => {
                    let flush_first = match self.channels.get_mut(&token) {
                        Some(ch) if ch.queue.is_empty() => false,
                        Some(ch) => {
                            ch.closing = true;
                            if ch.connecting {
                                // Flushed and closed once connected
                                continue;
                            }
                            true
                        }
                        None => {
                            trace!("{} reactor channel {:?} already closed", self.name, token);
                            continue;
                        }
                    };

                    if flush_first {
                        // Last writes, then close
                        self.write_channel(token);
                    } else {
                        self.close_channel(token);
                    }
                }
                ChangeRequest::AbortChannel { token } => self.close_channel(token),
                ChangeRequest::Shutdown { done } => {
                    self.shutdown_waiters.push(done);
                    return false;
                }
            }
        }
    }

    fn change_interest(&mut self, token: Token, interest: Interest, payload: Option<Bytes>) {
        let ch = match self.channels.get_mut(&token) {
            Some(ch) => ch,
            None => {
                trace!(
                    "{} reactor dropped {} bytes for closed channel {:?}",
                    self.name,
                    payload.map(|p| p.len()).unwrap_or(0),
                    token
                );
                return;
            }
        };

        if let Some(payload) = payload {
            ch.queue.push(payload);
        }

        // Interest is restored after the connection completes
        if ch.connecting {
            return;
        }

        if let Err(err) = self.registry.reregister(&mut ch.stream, token, interest) {
            error!("{} reactor failed to change interest of {:?}, {}", self.name, token, err);
            self.clean_up(token);
        }
    }

    fn handle_channel_event<R: ReactorRole>(&mut self, role: &mut R, event: &Event) {
        let token = event.token();

        let connecting = match self.channels.get(&token) {
            Some(ch) => ch.connecting,
            None => {
                trace!("{} reactor event for closed channel {:?}", self.name, token);
                return;
            }
        };

        if connecting {
            if !(event.is_writable() || event.is_error() || event.is_write_closed()) {
                return;
            }

            match role.handle_connectable(self, token) {
                Ok(true) => self.finish_connect(token),
                Ok(false) => {}
                Err(err) => {
                    error!("{} reactor connect of {:?} failed, {}", self.name, token, err);
                    self.clean_up(token);
                }
            }
            return;
        }

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.read_channel(token);
        }

        if event.is_writable() {
            self.write_channel(token);
        }
    }

    fn finish_connect(&mut self, token: Token) {
        let has_pending = match self.channels.get_mut(&token) {
            Some(ch) => {
                ch.connecting = false;
                ch.last_active = Instant::now();
                !ch.queue.is_empty()
            }
            None => return,
        };

        if has_pending {
            self.write_channel(token);
        } else {
            self.reregister(token, Interest::READABLE);
        }
    }

    fn read_channel(&mut self, token: Token) {
        loop {
            let ch = match self.channels.get_mut(&token) {
                Some(ch) => ch,
                None => return,
            };

            match ch.stream.read(&mut self.buffer) {
                Ok(0) => {
                    debug!("{} reactor channel {:?} closed by peer, {}", self.name, token, ch.pipe);
                    self.clean_up(token);
                    return;
                }
                Ok(n) => {
                    ch.last_active = Instant::now();
                    ch.pipe.enqueue(self.direction, &self.buffer[..n]);
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("{} reactor read {:?} failed, {}", self.name, token, err);
                    self.clean_up(token);
                    return;
                }
            }
        }
    }

    fn write_channel(&mut self, token: Token) {
        let ch = match self.channels.get_mut(&token) {
            Some(ch) => ch,
            None => return,
        };

        if ch.connecting {
            return;
        }

        match ch.queue.flush(&mut ch.stream) {
            Ok(FlushStatus::Drained) => {
                ch.last_active = Instant::now();
                if ch.closing {
                    self.close_channel(token);
                } else {
                    self.reregister(token, Interest::READABLE);
                }
            }
            Ok(FlushStatus::Pending) => {
                ch.last_active = Instant::now();
                if ch.closing {
                    // Writable interest may not be set yet for a channel closed right after a read
                    self.reregister(token, Interest::WRITABLE);
                }
            }
            Err(err) => {
                debug!("{} reactor write {:?} failed, {}", self.name, token, err);
                self.clean_up(token);
            }
        }
    }

    fn reregister(&mut self, token: Token, interest: Interest) {
        let result = match self.channels.get_mut(&token) {
            Some(ch) => self.registry.reregister(&mut ch.stream, token, interest),
            None => return,
        };

        if let Err(err) = result {
            error!("{} reactor failed to reregister {:?}, {}", self.name, token, err);
            self.clean_up(token);
        }
    }

    /// Closes the socket and tells its pipe, which closes the other side
    fn clean_up(&mut self, token: Token) {
        if let Some(mut ch) = self.channels.remove(&token) {
            let _ = self.registry.deregister(&mut ch.stream);
            trace!("{} reactor cleaned up {:?}, {}", self.name, token, ch.pipe);
            ch.pipe.request_close();
        }
    }

    /// Closes the socket on its pipe's request
    fn close_channel(&mut self, token: Token) {
        if let Some(mut ch) = self.channels.remove(&token) {
            let _ = self.registry.deregister(&mut ch.stream);
            if ch.queue.pending_bytes() > 0 {
                warn!(
                    "{} reactor closed {:?} with {} bytes unsent",
                    self.name,
                    token,
                    ch.queue.pending_bytes()
                );
            }
            trace!("{} reactor closed {:?}, {}", self.name, token, ch.pipe);
        }
    }

    fn sweep_idle(&mut self) {
        let timeout = match self.idle_timeout {
            Some(t) => t,
            None => return,
        };

        let expired: Vec<Token> = self
            .channels
            .iter()
            .filter(|(_, ch)| !ch.connecting && ch.last_active.elapsed() >= timeout)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            debug!("{} reactor channel {:?} idle for {:?}, closing", self.name, token, timeout);
            self.clean_up(token);
        }
    }

    fn shutdown(&mut self) {
        for (_, mut ch) in self.channels.drain() {
            let _ = self.registry.deregister(&mut ch.stream);
            drop(ch.stream);
            ch.pipe.force_close();
        }

        // Nothing queued is applied anymore, shutdown requests behind the first one are answered too
        while let Ok(req) = self.rx.try_recv() {
            match req {
                ChangeRequest::RegisterChannel { pipe, .. } => pipe.force_close(),
                ChangeRequest::Shutdown { done } => self.shutdown_waiters.push(done),
                _ => {}
            }
        }
        for done in self.shutdown_waiters.drain(..) {
            let _ = done.send(());
        }
    }
}

/// Event loop parameterized by its role
pub struct Reactor<R: ReactorRole> {
    poll: Poll,
    core: ReactorCore,
    role: R,
}

impl<R: ReactorRole> Reactor<R> {
    /// Creates a reactor, sockets idle longer than `idle_timeout` are closed
    pub fn new(mut role: R, idle_timeout: Option<Duration>) -> io::Result<Reactor<R>> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let registry = poll.registry().try_clone()?;
        let (tx, rx) = crossbeam_channel::unbounded();

        role.attach(&registry)?;

        let core = ReactorCore {
            name: R::NAME,
            direction: R::DIRECTION,
            registry,
            handle: ReactorHandle { tx, waker },
            rx,
            channels: HashMap::new(),
            buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            idle_timeout,
            shutdown_waiters: Vec::new(),
        };

        Ok(Reactor { poll, core, role })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.core.handle()
    }

    /// Runs until a `Shutdown` request arrives
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let poll_timeout = self.core.idle_timeout.map(|t| t.min(IDLE_CHECK_INTERVAL));

        debug!("{} reactor started", R::NAME);

        loop {
            if !self.core.process_pending_requests() {
                info!(
                    "{} reactor stopped, closing {} channels",
                    R::NAME,
                    self.core.channel_count()
                );
                self.core.shutdown();
                return Ok(());
            }

            if let Err(err) = self.poll.poll(&mut events, poll_timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("{} reactor poll failed, {}", R::NAME, err);
                self.core.shutdown();
                return Err(err);
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => {
                        if let Err(err) = self.role.handle_acceptable(&mut self.core) {
                            error!("{} reactor accept failed, {}", R::NAME, err);
                        }
                    }
                    _ => self.core.handle_channel_event(&mut self.role, event),
                }
            }

            self.core.sweep_idle();
        }
    }
}
