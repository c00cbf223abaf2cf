//! Local server with blocking sockets
//!
//! Every accepted connection gets two threads. The local one runs the proxy handshake and
//! encrypts towards the server, the remote one decrypts towards the client. Sockets have a
//! read timeout so both threads notice when the other side has finished.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, trace};

use super::{pipe::PipeError, socks5::Address};
use crate::{
    config::Config,
    context::{Context, SharedContext},
    crypto::{Decryptor, Encryptor},
};

/// Read timeout when the configuration has none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const BUFFER_SIZE: usize = 16 * 1024;

/// Thread per direction local proxy server
pub struct BlockingLocalServer {
    context: SharedContext,
    listener: TcpListener,
}

impl BlockingLocalServer {
    pub fn new(config: &Config) -> io::Result<BlockingLocalServer> {
        let context = Context::new_shared(config).map_err(|err| io::Error::new(ErrorKind::InvalidInput, err))?;
        BlockingLocalServer::with_context(context, config.local_addr)
    }

    pub fn with_context(context: SharedContext, local_addr: SocketAddr) -> io::Result<BlockingLocalServer> {
        let listener = TcpListener::bind(local_addr)?;
        Ok(BlockingLocalServer { context, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever
    pub fn run(self) -> io::Result<()> {
        info!(
            "shadowsocks {} local (blocking) listening on {}, server {}, method {}",
            self.context.proxy_type(),
            self.listener.local_addr()?,
            self.context.server_addr(),
            self.context.method()
        );

        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(err) => {
                    error!("accept failed with error: {}", err);
                    continue;
                }
            };

            let context = self.context.clone();
            let spawned = thread::Builder::new()
                .name("blocking-local".to_owned())
                .spawn(move || {
                    if let Err(err) = serve_client(context, stream) {
                        debug!("failed to relay connection, {}", err);
                    }
                });

            if let Err(err) = spawned {
                error!("failed to spawn relay thread, {}", err);
            }
        }

        Ok(())
    }
}

/// Both sockets of one connection
struct Connection {
    local: TcpStream,
    remote: TcpStream,
    closed: Arc<AtomicBool>,
    description: Arc<String>,
}

impl Connection {
    fn try_clone(&self) -> io::Result<Connection> {
        Ok(Connection {
            local: self.local.try_clone()?,
            remote: self.remote.try_clone()?,
            closed: self.closed.clone(),
            description: self.description.clone(),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts down both sockets, which wakes the other thread up
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing {}", self.description);
        }
        let _ = self.local.shutdown(Shutdown::Both);
        let _ = self.remote.shutdown(Shutdown::Both);
    }
}

/// Reads into `buf`, `None` on end of stream. Timeouts are retried until the connection closes.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8], conn: &Connection) -> io::Result<Option<usize>> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(None),
            Ok(n) => return Ok(Some(n)),
            Err(ref err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if conn.is_closed() {
                    return Ok(None);
                }
                trace!("read timed out, {}", conn.description);
            }
            Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

fn serve_client(context: SharedContext, local: TcpStream) -> io::Result<()> {
    let peer_addr = local.peer_addr()?;
    let server_addr = context.server_addr();
    let timeout = context.timeout().unwrap_or(DEFAULT_TIMEOUT);

    let remote = TcpStream::connect_timeout(&server_addr, timeout)?;
    for s in [&local, &remote] {
        s.set_read_timeout(Some(timeout))?;
        s.set_nodelay(true)?;
    }

    let conn = Connection {
        local,
        remote,
        closed: Arc::new(AtomicBool::new(false)),
        description: Arc::new(format!("local: {peer_addr} <-> remote: {server_addr}")),
    };
    trace!("accepted {}", conn.description);

    let (encryptor, decryptor) = context.new_cipher_session().split();

    let downstream = conn.try_clone()?;
    thread::Builder::new()
        .name("blocking-remote".to_owned())
        .spawn(move || {
            if let Err(err) = relay_remote_to_local(&downstream, decryptor) {
                debug!("{} remote -> local failed, {}", downstream.description, err);
            }
            downstream.close();
        })?;

    if let Err(err) = relay_local_to_remote(&context, &conn, encryptor) {
        error!("{} local -> remote failed, {}", conn.description, err);
    }
    conn.close();

    Ok(())
}

fn relay_local_to_remote(context: &Context, conn: &Connection, mut encryptor: Encryptor) -> Result<(), PipeError> {
    let mut protocol = context.proxy_type().new_protocol();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let (mut local_reader, mut local_writer, mut remote_writer) = (&conn.local, &conn.local, &conn.remote);

    while let Some(n) = read_some(&mut local_reader, &mut buf, conn)? {
        let data = &buf[..n];

        if protocol.is_ready() {
            remote_writer.write_all(&encryptor.encrypt(data)?)?;
            continue;
        }

        if let Some(reply) = protocol.local_reply(data)? {
            local_writer.write_all(&reply)?;
        }

        if let Some(envelope) = protocol.remote_envelope(data)? {
            if let Some(header) = envelope.first() {
                let addr = Address::read_cursor(&mut io::Cursor::new(&header[..]))?;
                info!("connected to {}, {}", addr, conn.description);
            }

            for b in envelope {
                remote_writer.write_all(&encryptor.encrypt(&b)?)?;
            }
        }
    }

    Ok(())
}

fn relay_remote_to_local(conn: &Connection, mut decryptor: Decryptor) -> Result<(), PipeError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let (mut remote_reader, mut local_writer) = (&conn.remote, &conn.local);

    while let Some(n) = read_some(&mut remote_reader, &mut buf, conn)? {
        let plain = decryptor.decrypt(&buf[..n])?;
        if !plain.is_empty() {
            local_writer.write_all(&plain)?;
        }
    }

    Ok(())
}
