//! Local server on two non-blocking reactors

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};
use mio::net::TcpListener;

use super::reactor::{LocalRole, Reactor, ReactorHandle, ReactorRole, RemoteRole};
use crate::{
    config::Config,
    context::{Context, SharedContext},
};

/// Longest wait for one reactor in `ShutdownTrigger::shutdown`
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports the end of a reactor thread, panics included
struct ExitNotifier {
    name: &'static str,
    tx: Sender<&'static str>,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let _ = self.tx.send(self.name);
    }
}

/// Local proxy server
///
/// ```plain
/// clients <--> local reactor <--> pipe workers <--> remote reactor <--> server
/// ```
pub struct LocalServer {
    context: SharedContext,
    listener: TcpListener,
}

impl LocalServer {
    /// Validates `config` and binds the listener, no connection is made yet
    pub fn new(config: &Config) -> io::Result<LocalServer> {
        let context = Context::new_shared(config).map_err(|err| io::Error::new(ErrorKind::InvalidInput, err))?;
        LocalServer::with_context(context, config.local_addr)
    }

    pub fn with_context(context: SharedContext, local_addr: SocketAddr) -> io::Result<LocalServer> {
        let listener = TcpListener::bind(local_addr)?;
        Ok(LocalServer { context, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts both reactors on their own threads
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let timeout = self.context.timeout();

        let remote = Reactor::new(RemoteRole, timeout)?;
        let remote_handle = remote.handle();

        let local_role = LocalRole::new(self.listener, self.context.clone(), remote_handle.clone());
        let local = Reactor::new(local_role, timeout)?;
        let local_handle = local.handle();

        let (exit_tx, exited) = crossbeam_channel::bounded(2);
        let remote_exit = ExitNotifier {
            name: RemoteRole::NAME,
            tx: exit_tx.clone(),
        };
        let local_exit = ExitNotifier {
            name: LocalRole::NAME,
            tx: exit_tx,
        };

        let remote_thread = thread::Builder::new()
            .name("remote-reactor".to_owned())
            .spawn(move || {
                let _exit = remote_exit;
                remote.run()
            })?;

        let local_thread = match thread::Builder::new()
            .name("local-reactor".to_owned())
            .spawn(move || {
                let _exit = local_exit;
                local.run()
            }) {
            Ok(t) => t,
            Err(err) => {
                let _ = remote_handle.shutdown();
                return Err(err);
            }
        };

        info!(
            "shadowsocks {} local listening on {}, server {}, method {}",
            self.context.proxy_type(),
            local_addr,
            self.context.server_addr(),
            self.context.method()
        );

        Ok(ServerHandle {
            local_addr,
            trigger: ShutdownTrigger {
                local: local_handle,
                remote: remote_handle,
            },
            threads: vec![local_thread, remote_thread],
            exited,
        })
    }

    /// Runs until the server is shut down
    pub fn run(self) -> io::Result<()> {
        self.spawn()?.join()
    }
}

/// Stops a running `LocalServer` from any thread
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    local: ReactorHandle,
    remote: ReactorHandle,
}

impl ShutdownTrigger {
    /// Closes every socket, pending pipes are force closed
    ///
    /// Returns once both reactors have stopped. The remote reactor is only asked after the local
    /// one is done, so it still applies the aborts sent by pipes the local reactor force closed.
    pub fn shutdown(&self) {
        for reactor in [&self.local, &self.remote] {
            // Stopped reactors reject the request
            if let Ok(done) = reactor.shutdown() {
                let _ = done.recv_timeout(SHUTDOWN_TIMEOUT);
            }
        }
    }
}

/// Running `LocalServer`
pub struct ServerHandle {
    local_addr: SocketAddr,
    trigger: ShutdownTrigger,
    threads: Vec<JoinHandle<io::Result<()>>>,
    exited: Receiver<&'static str>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn shutdown(&self) {
        self.trigger.shutdown();
    }

    /// Waits for both reactors, the first one to stop brings the other down
    pub fn join(self) -> io::Result<()> {
        if let Ok(name) = self.exited.recv() {
            debug!("{} reactor exited, stopping the server", name);
        }
        self.trigger.shutdown();

        let mut result = Ok(());
        for t in self.threads {
            let r = match t.join() {
                Ok(r) => r,
                Err(..) => Err(io::Error::new(ErrorKind::Other, "reactor thread panicked")),
            };

            if let Err(err) = r {
                error!("reactor exited with error, {}", err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}
