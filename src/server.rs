//! Listener and accept loop.
//!
//! The server owns everything shared between connections (the session
//! table, the command handler, statistics) and spawns one task per
//! accepted stream. On shutdown it stops accepting, tells every
//! connection to finish, waits out a grace period and aborts whatever
//! is left.

use crate::commands::CommandHandler;
use crate::config::{Config, Network};
use crate::connection::{handle_connection, ConnectionSettings, ConnectionStats};
use crate::session::SessionTable;
use crate::storage::Registry;
use anyhow::Context;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept so errors like EMFILE don't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

/// An accepted client stream.
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    /// The bound TCP address, if this is a TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix { .. } => None,
        }
    }

    async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Stream::Tcp(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Stream::Unix(stream), path.display().to_string()))
            }
        }
    }

    /// Removes the socket file of a Unix listener.
    fn cleanup(&self) {
        #[cfg(unix)]
        if let Listener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

/// The key-value server.
pub struct Server {
    handler: CommandHandler,
    settings: ConnectionSettings,
    stats: Arc<ConnectionStats>,
    shutdown_grace: Duration,
}

impl Server {
    pub fn new(registry: Arc<Registry>, settings: ConnectionSettings) -> Self {
        let sessions = Arc::new(SessionTable::new(registry));
        Self {
            handler: CommandHandler::new(sessions),
            settings,
            stats: Arc::new(ConnectionStats::new()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Builds a server with `config.db_num + 1` fresh databases.
    pub fn from_config(config: &Config) -> Self {
        let registry = Arc::new(Registry::new(config.db_num));
        Self::new(registry, config.connection_settings())
            .with_shutdown_grace(config.shutdown_grace())
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        self.handler.sessions()
    }

    /// Binds the socket described by `config`.
    ///
    /// For Unix sockets a stale socket file at the path is removed first.
    /// Any other kind of file at the path is left alone and binding fails.
    pub async fn bind(config: &Config) -> anyhow::Result<Listener> {
        match config.network {
            Network::Tcp => {
                let listener = TcpListener::bind(&config.address)
                    .await
                    .with_context(|| format!("failed to bind tcp {}", config.address))?;
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            Network::Unix => {
                let path = PathBuf::from(&config.address);
                remove_stale_socket(&path)?;
                let listener = UnixListener::bind(&path)
                    .with_context(|| format!("failed to bind unix {}", path.display()))?;
                Ok(Listener::Unix { listener, path })
            }
            #[cfg(not(unix))]
            Network::Unix => anyhow::bail!("unix sockets are not supported on this platform"),
        }
    }

    /// Serves connections until `shutdown` resolves.
    ///
    /// Returns once every connection task has finished or been aborted.
    pub async fn run(
        &self,
        listener: Listener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        match listener.local_addr() {
            Some(addr) => info!(address = %addr, "Listening"),
            None => info!("Listening on unix socket"),
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.spawn_connection(&mut connections, stream, peer, &shutdown_rx);
                    }
                    Err(e) => accept_failed(e).await,
                },
                // Reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(active = connections.len(), "Shutting down, closing connections");
        listener.cleanup();
        drop(listener);
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Grace period elapsed, aborting connections"
            );
            connections.shutdown().await;
        }

        Ok(())
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        stream: Stream,
        peer: String,
        shutdown: &watch::Receiver<bool>,
    ) {
        let id = self.sessions().next_id();
        let handler = self.handler.clone();
        let stats = Arc::clone(&self.stats);
        let shutdown = shutdown.clone();

        match stream {
            Stream::Tcp(stream) => connections.spawn(handle_connection(
                stream,
                peer,
                id,
                handler,
                self.settings,
                stats,
                shutdown,
            )),
            #[cfg(unix)]
            Stream::Unix(stream) => connections.spawn(handle_connection(
                stream,
                peer,
                id,
                handler,
                self.settings,
                stats,
                shutdown,
            )),
        };
    }
}

/// Logs a failed accept and backs off before the next attempt.
async fn accept_failed(err: io::Error) {
    error!(error = %err, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Removes a leftover socket file at `path`, refusing to touch anything else.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to inspect {}", path.display()))
        }
    };

    if !metadata.file_type().is_socket() {
        anyhow::bail!(
            "refusing to replace {}: it exists and is not a socket",
            path.display()
        );
    }

    std::fs::remove_file(path)
        .with_context(|| format!("failed to remove stale socket {}", path.display()))
}
