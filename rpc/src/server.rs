//! TCP front end for a [`Router`].
//!
//! Every accepted connection is one identity. Per-connection reader and
//! writer tasks do the socket I/O; decoded frames from all connections are
//! funnelled into the single serve loop, which owns the router and replies
//! through the writer of the identity the frame came from. The loop never
//! waits on a connection: a peer whose reply queue is full is dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use trellis_types::{DefaultProtocol, Protocol};
use uuid::Uuid;

use crate::codec::{Frame, FrameReader, FrameWriter};
use crate::router::Router;

const WRITER_CHANNEL_CAPACITY: usize = 64;

const INBOUND_CHANNEL_CAPACITY: usize = 256;

pub(crate) enum WriterCommand {
    Send(Frame),
    Shutdown,
}

/// What connection tasks report to the serve loop.
enum Inbound {
    Frame {
        identity: String,
        sequence: u64,
        body: Vec<u8>,
        reply: mpsc::Sender<WriterCommand>,
        close: Arc<watch::Sender<bool>>,
    },
    Closed {
        identity: String,
    },
}

/// Stops a running [`Server`] from another task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

pub struct Server<P: Protocol = DefaultProtocol> {
    listener: TcpListener,
    router: Router<P>,
    stop: Arc<watch::Sender<bool>>,
}

impl<P: Protocol> Server<P> {
    pub async fn bind(addr: impl ToSocketAddrs, router: Router<P>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("binding listener")?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listener,
            router,
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("reading local address")
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Accept connections and answer frames until stopped. Failures of a
    /// single request or connection are logged and never end the loop.
    pub async fn serve(mut self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "Serving");

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CHANNEL_CAPACITY);
        let mut stop_rx = self.stop.subscribe();

        loop {
            tokio::select! {
                () = stopped(&mut stop_rx) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        spawn_connection(stream, peer, inbound_tx.clone(), self.stop.subscribe());
                    }
                    Err(e) => tracing::error!("Accept failed: {e}"),
                },
                Some(inbound) = inbound_rx.recv() => self.dispatch(inbound),
            }
        }

        tracing::info!(%addr, "Server stopped");
        Ok(())
    }

    fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame {
                identity,
                sequence,
                body,
                reply,
                close,
            } => {
                let body = self.router.handle(&identity, &body);
                match reply.try_send(WriterCommand::Send(Frame::new(sequence, body))) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(%identity, "Reply queue full, dropping connection");
                        close.send_replace(true);
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(%identity, "Connection gone before reply");
                    }
                }
            }
            Inbound::Closed { identity } => {
                self.router.disconnect(&identity);
            }
        }
    }
}

/// Resolves once the flag behind `rx` is set. A sender dropped without
/// setting it never resolves.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let set = rx.wait_for(|stopped| *stopped).await.is_ok();
    if !set {
        std::future::pending::<()>().await;
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    inbound_tx: mpsc::Sender<Inbound>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let identity = Uuid::new_v4().to_string();
    tracing::info!(%identity, %peer, "Connection opened");

    let (read_half, write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
    let (close, _) = watch::channel(false);
    let close = Arc::new(close);

    let writer_identity = identity.clone();
    let mut writer_close = close.subscribe();
    tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half);
        loop {
            let frame = tokio::select! {
                () = stopped(&mut writer_close) => break,
                cmd = writer_rx.recv() => match cmd {
                    Some(WriterCommand::Send(frame)) => frame,
                    Some(WriterCommand::Shutdown) | None => break,
                },
            };
            // A peer that stopped reading must not pin this task.
            tokio::select! {
                () = stopped(&mut writer_close) => break,
                written = writer.write_frame(&frame) => {
                    if let Err(e) = written {
                        tracing::warn!(identity = %writer_identity, "Write error: {e:#}");
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
    });

    // On stop the writer drains queued replies before shutting down; on
    // close it abandons them.
    let mut reader_close = close.subscribe();
    tokio::spawn(async move {
        let mut reader = FrameReader::new(read_half);
        loop {
            tokio::select! {
                () = stopped(&mut stop_rx) => {
                    if writer_tx.try_send(WriterCommand::Shutdown).is_err() {
                        close.send_replace(true);
                    }
                    break;
                }
                () = stopped(&mut reader_close) => break,
                frame = reader.read_frame() => match frame {
                    Ok(Some(frame)) => {
                        let inbound = Inbound::Frame {
                            identity: identity.clone(),
                            sequence: frame.sequence,
                            body: frame.body,
                            reply: writer_tx.clone(),
                            close: close.clone(),
                        };
                        if inbound_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(%identity, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(%identity, "Read error: {e:#}");
                        break;
                    }
                },
            }
        }
        let _ = inbound_tx.send(Inbound::Closed { identity }).await;
    });
}
