//! TCP server receiving length-prefixed photos.
//!
//! One task runs the accept loop and one task is spawned per accepted
//! connection. Each connection carries exactly one photo: header, payload,
//! store, notify, acknowledge, close.

use bytes::Bytes;
use chrono::{DateTime, Local};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ServerError, TransferError};
use crate::frame::{read_exact_frame, read_header, ACK};
use crate::sink::{PhotoNotification, PhotoSink, SinkDispatcher, SinkHandle};
use crate::storage::PhotoStore;

/// Pending connections queued by the OS before `accept`.
const LISTEN_BACKLOG: i32 = 5;

/// A fully received photo. Immutable once built.
#[derive(Debug, Clone)]
pub struct ReceivedPayload {
    pub data: Bytes,
    /// Length announced by the framing header.
    pub declared_size: u32,
    pub peer: SocketAddr,
    pub received_at: DateTime<Local>,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Stopped,
}

/// Resources owned while the accept loop is live.
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    dispatcher: SinkDispatcher,
}

enum Lifecycle<S> {
    Idle(S),
    Running(Running),
    Stopped,
}

/// Everything a connection task needs, shared read-only.
struct ConnectionContext {
    store: PhotoStore,
    sink: SinkHandle,
    max_payload: Option<u32>,
}

/// Photo server: `Idle -> Running -> Stopped`, never back.
pub struct PhotoServer<S: PhotoSink> {
    config: Config,
    store: PhotoStore,
    state: Lifecycle<S>,
}

impl<S: PhotoSink> PhotoServer<S> {
    /// Create an idle server. No socket is opened until [`start`](Self::start).
    pub fn new(config: Config, sink: S) -> Self {
        let store = PhotoStore::new(&config.data_dir);

        PhotoServer {
            config,
            store,
            state: Lifecycle::Idle(sink),
        }
    }

    pub fn state(&self) -> ServerState {
        match self.state {
            Lifecycle::Idle(_) => ServerState::Idle,
            Lifecycle::Running(_) => ServerState::Running,
            Lifecycle::Stopped => ServerState::Stopped,
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            Lifecycle::Running(running) => Some(running.local_addr),
            _ => None,
        }
    }

    /// Bind, listen and start accepting in a background task.
    ///
    /// Returns the bound address. Bind failures leave the server idle.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        match self.state {
            Lifecycle::Running(_) => return Err(ServerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ServerError::Stopped),
            Lifecycle::Idle(_) => {}
        }

        let bind_address = self.config.bind_address();
        let addr = resolve(&bind_address)
            .await
            .map_err(|source| ServerError::InvalidAddress {
                addr: bind_address.clone(),
                source,
            })?;

        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let sink = match std::mem::replace(&mut self.state, Lifecycle::Stopped) {
            Lifecycle::Idle(sink) => sink,
            // Checked above
            other => {
                self.state = other;
                return Err(ServerError::AlreadyStarted);
            }
        };

        let dispatcher = SinkDispatcher::spawn(sink);
        let ctx = Arc::new(ConnectionContext {
            store: self.store.clone(),
            sink: dispatcher.handle(),
            max_payload: self.config.max_payload,
        });
        let limit = self
            .config
            .max_connections
            .map(|n| Arc::new(Semaphore::new(n)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx, limit));

        info!(
            address = %local_addr,
            data_dir = %self.store.root().display(),
            max_connections = ?self.config.max_connections,
            "Server listening"
        );

        self.state = Lifecycle::Running(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            dispatcher,
        });

        Ok(local_addr)
    }

    /// Stop accepting, close the listening socket and shut the sink down.
    ///
    /// Returns once the listener is closed, so the address can be bound
    /// again. Connection tasks already running are not waited for.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.state, Lifecycle::Stopped) {
            Lifecycle::Running(running) => {
                info!("Stopping server");
                let _ = running.shutdown_tx.send(true);
                if let Err(e) = running.accept_task.await {
                    error!(error = %e, "Accept task failed");
                }
                running.dispatcher.shutdown().await;
            }
            Lifecycle::Idle(mut sink) => sink.on_shutdown(),
            Lifecycle::Stopped => {}
        }
    }

    /// Wait for `signal`, then [`stop`](Self::stop). A failed signal still stops.
    pub async fn stop_on<F>(&mut self, signal: F)
    where
        F: Future<Output = io::Result<()>>,
    {
        if let Err(e) = signal.await {
            error!(error = %e, "Shutdown signal failed, stopping");
        }
        self.stop().await;
    }
}

/// First address `host:port` resolves to.
async fn resolve(bind_address: &str) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(bind_address)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved"))
}

/// Create a listening socket with SO_REUSEADDR so a restart right after a
/// stop does not hit "address in use".
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Accept until shutdown is signalled or accept fails. The listener is
/// dropped, and its socket closed, when this returns.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<bool>,
    limit: Option<Arc<Semaphore>>,
) {
    loop {
        // Wait for a connection slot when fan-out is capped
        let permit = match &limit {
            Some(semaphore) => tokio::select! {
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            },
            None => None,
        };

        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, &ctx).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    break;
                }
            },
        }
    }

    info!("Server stopped accepting connections");
}

/// Run one transfer and close the connection, whatever the outcome.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ConnectionContext) {
    match receive_photo(&mut stream, peer, ctx).await {
        Ok(path) => debug!(peer = %peer, path = %path.display(), "Transfer complete"),
        Err(e @ TransferError::IncompleteStream { .. }) => {
            debug!(peer = %peer, error = %e, "Client disconnected mid-transfer")
        }
        Err(e) => warn!(peer = %peer, error = %e, "Transfer aborted"),
    }
    // `stream` drops here, closing the socket without a response on failure
}

/// Receive one framed photo, store it, notify the sink and acknowledge.
///
/// Nothing is written to disk unless the full payload arrived.
async fn receive_photo<T>(
    stream: &mut T,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<PathBuf, TransferError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let header = read_header(stream).await?;
    debug!(peer = %peer, size = header.payload_len, "Receiving photo");

    if let Some(limit) = ctx.max_payload {
        if header.payload_len > limit {
            return Err(TransferError::PayloadTooLarge {
                declared: header.payload_len,
                limit,
            });
        }
    }

    let data = read_exact_frame(stream, header.payload_len as usize).await?;
    let photo = ReceivedPayload {
        data,
        declared_size: header.payload_len,
        peer,
        received_at: Local::now(),
    };

    let path = ctx.store.save_at(&photo.data, &photo.received_at).await?;
    ctx.sink.notify(PhotoNotification {
        photo,
        path: path.clone(),
    });

    stream.write_all(ACK).await?;
    stream.flush().await?;

    Ok(path)
}
