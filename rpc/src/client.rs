//! Client side of the request/response transport.
//!
//! [`Client`] owns one connection. Requests are written by a writer task and
//! replies are matched to their request by the frame sequence number, since
//! request ids are assigned by the server. [`RequestQueue`] puts a run loop
//! in front of a client, and [`SyncClient`] wraps one for blocking callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use trellis_types::{Context, DefaultProtocol, Protocol, RequestOf, ResponseOf};

use crate::codec::{Frame, FrameReader, FrameWriter};
use crate::server::WriterCommand;

const WRITER_CHANNEL_CAPACITY: usize = 64;

const QUEUE_CAPACITY: usize = 64;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Exchanges kept by [`Client::history`] before the oldest is dropped.
pub const HISTORY_LIMIT: usize = 256;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>>;

pub struct Client<P: Protocol = DefaultProtocol> {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Pending,
    next_sequence: u64,
    timeout: Duration,
    history: VecDeque<(RequestOf<P>, ResponseOf<P>)>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl<P: Protocol> Client<P> {
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connecting to server")?;
        let (read_half, write_half) = stream.into_split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(write_half);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Client write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        let reader_pending = pending.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        let sender = reader_pending.lock().await.remove(&frame.sequence);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(frame.body);
                            }
                            None => tracing::debug!(
                                sequence = frame.sequence,
                                "Reply matches no pending request"
                            ),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Server closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Client read error: {e:#}");
                        break;
                    }
                }
            }
            // Wake every waiter; their receivers now report a dropped channel.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            writer_tx,
            pending,
            next_sequence: 1,
            timeout,
            history: VecDeque::new(),
            reader_handle,
            writer_handle,
        })
    }

    /// Send one request and wait for its reply, up to the request timeout.
    pub async fn send(&mut self, request: RequestOf<P>) -> Result<ResponseOf<P>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let body = serde_json::to_vec(&request).context("serializing request")?;
        tracing::debug!(sequence, %request, "Sending request");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(sequence, tx);

        if self
            .writer_tx
            .send(WriterCommand::Send(Frame::new(sequence, body)))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&sequence);
            bail!("writer channel closed");
        }

        let body = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&sequence);
                bail!("connection closed before reply");
            }
            Err(_) => {
                self.pending.lock().await.remove(&sequence);
                bail!("request timed out after {:?}", self.timeout);
            }
        };

        let response: ResponseOf<P> =
            serde_json::from_slice(&body).context("decoding response")?;
        self.history.push_back((request, response.clone()));
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        Ok(response)
    }

    pub async fn request_workflow(
        &mut self,
        entity: &str,
        workflow: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.send(RequestOf::<P>::workflow(entity, workflow).with_ctx(ctx)).await
    }

    pub async fn request_task(
        &mut self,
        service: &str,
        task: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.send(RequestOf::<P>::task(service, task).with_ctx(ctx)).await
    }

    /// Requests sent and the responses they got, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &(RequestOf<P>, ResponseOf<P>)> {
        self.history.iter()
    }

    /// Close the connection. Consumes self.
    pub async fn stop(self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        let _ = self.writer_handle.await;
        self.reader_handle.abort();
    }

    /// Hand the client to a run loop that serves queued requests in order.
    #[must_use]
    pub fn start(self) -> RequestQueue<P> {
        let (queue_tx, mut queue_rx) = mpsc::channel::<Queued<P>>(QUEUE_CAPACITY);
        let mut client = self;
        let handle = tokio::spawn(async move {
            while let Some(Queued { request, done }) = queue_rx.recv().await {
                let outcome = client.send(request).await;
                if let Err(e) = &outcome {
                    tracing::warn!("Queued request failed: {e:#}");
                }
                let _ = done.send(outcome);
            }
            client
        });
        RequestQueue { queue_tx, handle }
    }
}

struct Queued<P: Protocol> {
    request: RequestOf<P>,
    done: oneshot::Sender<Result<ResponseOf<P>>>,
}

/// Enqueue side of a client run loop.
pub struct RequestQueue<P: Protocol = DefaultProtocol> {
    queue_tx: mpsc::Sender<Queued<P>>,
    handle: JoinHandle<Client<P>>,
}

impl<P: Protocol> RequestQueue<P> {
    /// Queue a request. The returned receiver fires once its reply arrived
    /// or the send failed.
    pub async fn enqueue(
        &self,
        request: RequestOf<P>,
    ) -> Result<oneshot::Receiver<Result<ResponseOf<P>>>> {
        let (done, rx) = oneshot::channel();
        self.queue_tx
            .send(Queued { request, done })
            .await
            .map_err(|_| anyhow!("request queue closed"))?;
        Ok(rx)
    }

    /// Queue a request and wait for its reply.
    pub async fn request(&self, request: RequestOf<P>) -> Result<ResponseOf<P>> {
        self.enqueue(request)
            .await?
            .await
            .map_err(|_| anyhow!("run loop dropped the request"))?
    }

    pub async fn request_workflow(
        &self,
        entity: &str,
        workflow: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.request(RequestOf::<P>::workflow(entity, workflow).with_ctx(ctx)).await
    }

    pub async fn request_task(
        &self,
        service: &str,
        task: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.request(RequestOf::<P>::task(service, task).with_ctx(ctx)).await
    }

    /// Drain the queue and hand the client back.
    pub async fn finish(self) -> Result<Client<P>> {
        drop(self.queue_tx);
        self.handle.await.context("client run loop panicked")
    }

    /// Drain the queue and close the connection.
    pub async fn stop(self) -> Result<()> {
        self.finish().await?.stop().await;
        Ok(())
    }
}

/// Blocking client for callers outside an async runtime.
pub struct SyncClient<P: Protocol = DefaultProtocol> {
    runtime: tokio::runtime::Runtime,
    client: Client<P>,
}

impl<P: Protocol> SyncClient<P> {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building client runtime")?;
        let client = runtime.block_on(Client::connect(addr, timeout))?;
        Ok(Self { runtime, client })
    }

    pub fn send(&mut self, request: RequestOf<P>) -> Result<ResponseOf<P>> {
        self.runtime.block_on(self.client.send(request))
    }

    pub fn request_workflow(
        &mut self,
        entity: &str,
        workflow: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.runtime.block_on(self.client.request_workflow(entity, workflow, ctx))
    }

    pub fn request_task(
        &mut self,
        service: &str,
        task: &str,
        ctx: Context,
    ) -> Result<ResponseOf<P>> {
        self.runtime.block_on(self.client.request_task(service, task, ctx))
    }

    #[must_use]
    pub fn client(&self) -> &Client<P> {
        &self.client
    }

    pub fn stop(self) {
        self.runtime.block_on(self.client.stop());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use trellis_types::{Request, Response, Status};

    /// Answers each frame after `delay` with its sequence number as result.
    async fn echo_server(delay: Duration) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half);
            let mut writer = FrameWriter::new(write_half);
            while let Ok(Some(frame)) = reader.read_frame().await {
                tokio::time::sleep(delay).await;
                let request: Request = serde_json::from_slice(&frame.body).unwrap();
                let mut response: Response = Response::from_request(request, Status::Pending);
                response.set_result(frame.sequence).unwrap();
                response.set_status(Status::Completed);
                let body = serde_json::to_vec(&response).unwrap();
                if writer
                    .write_frame(&Frame::new(frame.sequence, body))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn replies_are_matched_by_sequence() {
        let addr = echo_server(Duration::ZERO).await;
        let mut client: Client = Client::connect(addr, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        let first = client
            .request_task("uno", "A", Context::new())
            .await
            .unwrap();
        let second = client
            .request_workflow("einz", "einzy", Context::new())
            .await
            .unwrap();

        assert_eq!(first.result, 1);
        assert_eq!(second.result, 2);
        assert_eq!(second.request.unwrap().entity.as_deref(), Some("einz"));
        let sent: Vec<_> = client
            .history()
            .map(|(request, _)| request.task.clone())
            .collect();
        assert_eq!(sent, [Some("A".to_string()), None]);
        let (request, response) = client.history().nth(1).unwrap();
        assert_eq!(request.workflow.as_deref(), Some("einzy"));
        assert_eq!(response.result, 2);
        client.stop().await;
    }

    #[tokio::test]
    async fn timed_out_requests_leave_no_pending_entry() {
        let addr = echo_server(Duration::from_secs(5)).await;
        let mut client: Client = Client::connect(addr, Duration::from_millis(50))
            .await
            .unwrap();

        let err = client
            .request_task("uno", "A", Context::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(client.pending.lock().await.is_empty());
        assert_eq!(client.history().count(), 0);
        client.stop().await;
    }

    #[tokio::test]
    async fn queue_serves_requests_in_order() {
        let addr = echo_server(Duration::ZERO).await;
        let client: Client = Client::connect(addr, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
        let queue = client.start();

        let first = queue.enqueue(Request::task("uno", "A")).await.unwrap();
        let second = queue.enqueue(Request::task("uno", "B")).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap().result, 1);
        assert_eq!(second.await.unwrap().unwrap().result, 2);

        let client = queue.finish().await.unwrap();
        assert_eq!(client.history().count(), 2);
        client.stop().await;
    }

    #[tokio::test]
    async fn closed_connection_fails_waiters() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = FrameReader::new(stream);
            let _ = reader.read_frame().await;
        });

        let mut client: Client = Client::connect(addr, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
        let err = client
            .request_task("uno", "A", Context::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
