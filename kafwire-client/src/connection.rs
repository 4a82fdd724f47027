//! Broker connections and the request multiplexer
//!
//! Each [`Connection`] owns one task that owns the socket and the in-flight
//! table. Callers never touch either: they hand the task an encoded frame and
//! a completer through a command channel and wait on their own oneshot.
//!
//! Brokers answer requests on a connection in the order they were written, so
//! the in-flight table is a queue and every response must carry the
//! correlation id at its front. Requests that timed out or were cancelled stay
//! in the queue as discardable placeholders until their response arrives.
//!
//! Writes go through a second task that owns the sink, so a large request
//! being written never stops the connection task from reading responses.

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use kafwire::protocol::kafka::messages::{
    encode_request, ApiMessage, ApiRequest, ApiVersionsRequest, MetadataBroker, ResponseHeader,
};
use kafwire::protocol::kafka::{api_key_name, ApiVersionRegistry};
use kafwire::{CodecError, PacketDecoder};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::metrics::{global_metrics, ClientMetrics};
use crate::transport::{map_codec_error, BoxedStream, Dialer, FrameSink, FrameStream, FrameTransport};

/// Per-connection settings taken from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub client_id: Option<String>,
    pub request_timeout: Duration,
    pub max_frame_size: usize,
    pub negotiate_api_versions: bool,
}

impl From<&ClientConfig> for ConnectionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            request_timeout: config.request_timeout,
            max_frame_size: config.max_frame_size,
            negotiate_api_versions: config.negotiate_api_versions,
        }
    }
}

type Completer = Box<dyn FnOnce(Result<Bytes, ClientError>) + Send>;

enum Reply {
    /// Registered in the in-flight table; completed by the matching response.
    Response(Completer),
    /// Not registered; completed once the frame is written.
    Written(oneshot::Sender<Result<(), ClientError>>),
}

struct Outbound {
    correlation_id: i32,
    api_key: i16,
    frame: Bytes,
    timeout: Duration,
    reply: Reply,
}

enum Command {
    Send(Outbound),
    Cancel { correlation_id: i32 },
    Close,
}

/// One multiplexed connection to a broker.
pub struct Connection {
    broker: String,
    options: ConnectionOptions,
    next_correlation_id: AtomicI32,
    commands: mpsc::UnboundedSender<Command>,
    api_versions: RwLock<Option<ApiVersionRegistry>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start the connection task over an established stream.
    pub fn new(broker: impl Into<String>, stream: BoxedStream, options: ConnectionOptions) -> Self {
        Self::with_metrics(broker, stream, options, global_metrics())
    }

    pub fn with_metrics(
        broker: impl Into<String>,
        stream: BoxedStream,
        options: ConnectionOptions,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let broker = broker.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (sink, stream) = FrameTransport::new(broker.clone(), stream, options.max_frame_size).split();
        let (writer, jobs) = mpsc::unbounded_channel();
        let (failed, write_failed) = oneshot::channel();
        let writer_task = tokio::spawn(write_frames(
            broker.clone(),
            sink,
            jobs,
            failed,
            metrics.clone(),
        ));

        let task = ConnectionTask {
            broker: broker.clone(),
            writer,
            write_failed,
            writer_task,
            stream,
            commands: command_rx,
            in_flight: VecDeque::new(),
            metrics,
        };
        let handle = tokio::spawn(task.run());

        Self {
            broker,
            options,
            next_correlation_id: AtomicI32::new(0),
            commands,
            api_versions: RwLock::new(None),
            task: Mutex::new(Some(handle)),
        }
    }

    /// Start the connection and, if configured, negotiate API versions.
    pub async fn connect(
        broker: impl Into<String>,
        stream: BoxedStream,
        options: ConnectionOptions,
    ) -> Result<Self, ClientError> {
        let negotiate = options.negotiate_api_versions;
        let connection = Self::new(broker, stream, options);
        if negotiate {
            connection.load_api_versions().await?;
        }
        Ok(connection)
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Ask the broker for its supported versions and cache them.
    pub async fn load_api_versions(&self) -> Result<ApiVersionRegistry, ClientError> {
        let response = self.send(&ApiVersionsRequest::new(0)).await?;
        if !response.error().is_ok() {
            return Err(ClientError::broker(response.error(), "api versions"));
        }
        let registry = ApiVersionRegistry::from_response(&response);
        debug!(broker = %self.broker, apis = response.api_keys.len(), "negotiated api versions");
        *self.api_versions.write() = Some(registry.clone());
        Ok(registry)
    }

    /// Broker-advertised ranges, if negotiation ran.
    pub fn api_versions(&self) -> Option<ApiVersionRegistry> {
        self.api_versions.read().clone()
    }

    /// Version to use for `R`: the highest both sides support, or the
    /// client's highest when the broker's ranges are unknown.
    pub fn negotiate_version<R: ApiRequest>(&self) -> Result<i16, ClientError> {
        match self.api_versions.read().as_ref() {
            Some(registry) => Ok(registry.negotiate(R::API_KEY, R::VERSIONS)?),
            None => Ok(R::VERSIONS.max),
        }
    }

    /// Send a request and wait for its response.
    pub async fn send<R: ApiRequest>(&self, request: &R) -> Result<R::Response, ClientError> {
        self.dispatch(request)?.wait().await
    }

    pub async fn send_with_timeout<R: ApiRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, ClientError> {
        self.dispatch_with_timeout(request, timeout)?.wait().await
    }

    /// Queue a request without waiting for it.
    pub fn dispatch<R: ApiRequest>(&self, request: &R) -> Result<ResponseHandle<R>, ClientError> {
        self.dispatch_with_timeout(request, self.options.request_timeout)
    }

    pub fn dispatch_with_timeout<R: ApiRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<ResponseHandle<R>, ClientError> {
        if !request.expects_response() {
            return Err(ClientError::invalid_config(format!(
                "{} request has no response; use send_oneway",
                api_key_name(R::API_KEY)
            )));
        }

        let version = request.version();
        let (correlation_id, frame) = self.encode(request)?;
        let (tx, rx) = oneshot::channel();
        let completer: Completer = Box::new(move |result: Result<Bytes, ClientError>| {
            let decoded = result.and_then(|body| {
                R::Response::from_bytes(&body, version).map_err(ClientError::from)
            });
            let _ = tx.send(decoded);
        });

        self.submit(Outbound {
            correlation_id,
            api_key: R::API_KEY,
            frame,
            timeout,
            reply: Reply::Response(completer),
        })?;

        Ok(ResponseHandle {
            correlation_id,
            broker: self.broker.clone(),
            rx,
            commands: self.commands.clone(),
            finished: false,
            _request: PhantomData,
        })
    }

    /// Write a request the broker will not answer (produce with `acks = 0`).
    /// Resolves once the frame is written.
    pub async fn send_oneway<R: ApiRequest>(&self, request: &R) -> Result<(), ClientError> {
        let (correlation_id, frame) = self.encode(request)?;
        let (tx, rx) = oneshot::channel();
        self.submit(Outbound {
            correlation_id,
            api_key: R::API_KEY,
            frame,
            timeout: self.options.request_timeout,
            reply: Reply::Written(tx),
        })?;
        rx.await
            .unwrap_or_else(|_| Err(ClientError::connection_closed(&self.broker)))
    }

    /// Frames above `max_frame_size` fail here, before anything is queued.
    fn encode<R: ApiRequest>(&self, request: &R) -> Result<(i32, Bytes), ClientError> {
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(request, correlation_id, self.options.client_id.as_deref())?;
        if frame.len() > self.options.max_frame_size {
            debug!(
                broker = %self.broker,
                api = api_key_name(R::API_KEY),
                size = frame.len(),
                max = self.options.max_frame_size,
                "request frame too large"
            );
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: self.options.max_frame_size,
            }
            .into());
        }
        Ok((correlation_id, frame))
    }

    fn submit(&self, outbound: Outbound) -> Result<(), ClientError> {
        self.commands
            .send(Command::Send(outbound))
            .map_err(|_| ClientError::connection_closed(&self.broker))
    }

    /// False once the connection task has started tearing down.
    pub fn is_healthy(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Close the connection, failing every pending request.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("broker", &self.broker)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// A request that has been queued on a connection.
pub struct ResponseHandle<R: ApiRequest> {
    correlation_id: i32,
    broker: String,
    rx: oneshot::Receiver<Result<R::Response, ClientError>>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
    _request: PhantomData<fn() -> R>,
}

impl<R: ApiRequest> ResponseHandle<R> {
    pub fn correlation_id(&self) -> i32 {
        self.correlation_id
    }

    pub async fn wait(mut self) -> Result<R::Response, ClientError> {
        let result = (&mut self.rx).await;
        self.finished = true;
        result.unwrap_or_else(|_| Err(ClientError::connection_closed(&self.broker)))
    }

    /// Abandon the request. Its response, if it still arrives, is dropped.
    pub fn cancel(mut self) {
        self.finished = true;
        let _ = self.commands.send(Command::Cancel {
            correlation_id: self.correlation_id,
        });
    }
}

impl<R: ApiRequest> Drop for ResponseHandle<R> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.commands.send(Command::Cancel {
                correlation_id: self.correlation_id,
            });
        }
    }
}

impl<R: ApiRequest> fmt::Debug for ResponseHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("broker", &self.broker)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

struct InFlight {
    correlation_id: i32,
    api_key: i16,
    deadline: Instant,
    timeout: Duration,
    /// `None` once the caller gave up; the response is then discarded.
    completer: Option<Completer>,
}

struct WriteJob {
    frame: Bytes,
    /// Set for requests that are not registered in the in-flight table.
    written: Option<oneshot::Sender<Result<(), ClientError>>>,
}

/// Write queued frames in order. Stops at the first failed write and reports
/// it; closes the sink once the job channel is closed.
async fn write_frames(
    broker: String,
    mut sink: FrameSink,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    failed: oneshot::Sender<ClientError>,
    metrics: Arc<ClientMetrics>,
) {
    while let Some(WriteJob { frame, written }) = jobs.recv().await {
        match sink.send(frame).await {
            Ok(()) => {
                metrics.record_request_sent();
                if let Some(done) = written {
                    let _ = done.send(Ok(()));
                }
            }
            Err(e) => {
                if let Some(done) = written {
                    let _ = done.send(Err(ClientError::connection_closed(&broker)));
                }
                let _ = failed.send(map_codec_error(&broker, e));
                return;
            }
        }
    }
    let _ = sink.close().await;
}

const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(1);

struct ConnectionTask {
    broker: String,
    writer: mpsc::UnboundedSender<WriteJob>,
    write_failed: oneshot::Receiver<ClientError>,
    writer_task: JoinHandle<()>,
    stream: FrameStream,
    commands: mpsc::UnboundedReceiver<Command>,
    in_flight: VecDeque<InFlight>,
    metrics: Arc<ClientMetrics>,
}

impl ConnectionTask {
    async fn run(mut self) {
        info!(broker = %self.broker, "connection opened");

        let reason = loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(outbound)) => {
                        if let Err(e) = self.write(outbound) {
                            break e;
                        }
                    }
                    Some(Command::Cancel { correlation_id }) => self.discard(correlation_id),
                    Some(Command::Close) | None => {
                        break ClientError::connection_closed(&self.broker);
                    }
                },

                frame = self.stream.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.on_frame(frame) {
                            break e;
                        }
                    }
                    Some(Err(e)) => break map_codec_error(&self.broker, e),
                    None => break ClientError::connection_closed(&self.broker),
                },

                failure = &mut self.write_failed => {
                    break failure.unwrap_or_else(|_| ClientError::connection_closed(&self.broker));
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire(Instant::now());
                }
            }
        };

        self.teardown(reason).await;
    }

    fn write(&mut self, outbound: Outbound) -> Result<(), ClientError> {
        let Outbound {
            correlation_id,
            api_key,
            frame,
            timeout,
            reply,
        } = outbound;

        trace!(
            broker = %self.broker,
            correlation_id,
            api = api_key_name(api_key),
            "dispatching request"
        );

        // Registered before the write is queued, so the response can never
        // arrive ahead of its entry.
        let written = match reply {
            Reply::Response(completer) => {
                self.in_flight.push_back(InFlight {
                    correlation_id,
                    api_key,
                    deadline: Instant::now() + timeout,
                    timeout,
                    completer: Some(completer),
                });
                None
            }
            Reply::Written(done) => Some(done),
        };
        self.writer
            .send(WriteJob { frame, written })
            .map_err(|_| ClientError::connection_closed(&self.broker))
    }

    fn on_frame(&mut self, frame: Bytes) -> Result<(), ClientError> {
        let correlation_id = ResponseHeader::decode(&mut PacketDecoder::new(&frame))
            .map_err(|e| self.violation(format!("unreadable response header: {}", e)))?
            .correlation_id;

        let expected = self.in_flight.front().map(|entry| entry.correlation_id);
        if expected != Some(correlation_id) {
            let message = match expected {
                Some(expected) => format!(
                    "response correlation id {} does not match oldest outstanding {}",
                    correlation_id, expected
                ),
                None => format!(
                    "response correlation id {} with no request outstanding",
                    correlation_id
                ),
            };
            return Err(self.violation(message));
        }

        let Some(entry) = self.in_flight.pop_front() else {
            return Ok(());
        };
        self.metrics.record_response_received();

        match entry.completer {
            Some(complete) => {
                trace!(
                    broker = %self.broker,
                    correlation_id,
                    api = api_key_name(entry.api_key),
                    "matched response"
                );
                complete(Ok(frame.slice(4..)));
            }
            None => {
                debug!(broker = %self.broker, correlation_id, "discarding abandoned response");
            }
        }
        Ok(())
    }

    fn violation(&self, message: String) -> ClientError {
        error!(broker = %self.broker, %message, "protocol violation");
        self.metrics.record_protocol_violation();
        ClientError::protocol_violation(&self.broker, message)
    }

    fn discard(&mut self, correlation_id: i32) {
        if let Some(entry) = self
            .in_flight
            .iter_mut()
            .find(|entry| entry.correlation_id == correlation_id)
        {
            entry.completer = None;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter(|entry| entry.completer.is_some())
            .map(|entry| entry.deadline)
            .min()
    }

    fn expire(&mut self, now: Instant) {
        for entry in self.in_flight.iter_mut() {
            if entry.deadline > now {
                continue;
            }
            if let Some(complete) = entry.completer.take() {
                warn!(
                    broker = %self.broker,
                    correlation_id = entry.correlation_id,
                    api = api_key_name(entry.api_key),
                    timeout_ms = entry.timeout.as_millis() as u64,
                    "request timed out"
                );
                self.metrics.record_request_timeout();
                complete(Err(ClientError::RequestTimeout {
                    broker: self.broker.clone(),
                    correlation_id: entry.correlation_id,
                    timeout_ms: entry.timeout.as_millis() as u64,
                }));
            }
        }
    }

    async fn teardown(mut self, reason: ClientError) {
        match &reason {
            ClientError::ConnectionClosed { .. } => {
                info!(broker = %self.broker, pending = self.in_flight.len(), "connection closed")
            }
            other => {
                warn!(broker = %self.broker, error = %other, pending = self.in_flight.len(), "connection failed")
            }
        }

        // Refuse new commands before failing what is queued.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Send(outbound) = command {
                match outbound.reply {
                    Reply::Response(complete) => {
                        complete(Err(ClientError::connection_closed(&self.broker)))
                    }
                    Reply::Written(done) => {
                        let _ = done.send(Err(ClientError::connection_closed(&self.broker)));
                    }
                }
            }
        }
        for entry in self.in_flight.drain(..) {
            if let Some(complete) = entry.completer {
                complete(Err(ClientError::connection_closed(&self.broker)));
            }
        }

        drop(self.writer);
        let mut writer_task = self.writer_task;
        if tokio::time::timeout(WRITER_CLOSE_GRACE, &mut writer_task)
            .await
            .is_err()
        {
            debug!(broker = %self.broker, "writer did not drain in time, aborting");
            writer_task.abort();
        }
        self.metrics.record_connection_closed();
    }
}

/// Live connections keyed by broker address, plus the node id → address map
/// learned from metadata.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: DashMap<String, Arc<Connection>>,
    bootstrap: RwLock<Vec<String>>,
    nodes: DashMap<i32, String>,
    dialer: Arc<dyn Dialer>,
    options: ConnectionOptions,
    metrics: Arc<ClientMetrics>,
}

impl ConnectionPool {
    pub fn new(brokers: Vec<String>, dialer: Arc<dyn Dialer>, options: ConnectionOptions) -> Self {
        Self {
            connections: DashMap::new(),
            bootstrap: RwLock::new(brokers),
            nodes: DashMap::new(),
            dialer,
            options,
            metrics: global_metrics(),
        }
    }

    /// Get a connection to any available broker
    pub async fn get_connection(&self) -> Result<Arc<Connection>, ClientError> {
        let brokers = self.bootstrap.read().clone();
        if brokers.is_empty() {
            return Err(ClientError::NoBrokersAvailable);
        }

        for broker in &brokers {
            if let Some(conn) = self.live(broker) {
                return Ok(conn);
            }
        }

        for broker in &brokers {
            match self.get_connection_to(broker).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(broker = %broker, error = %e, "failed to connect to bootstrap broker");
                    continue;
                }
            }
        }

        Err(ClientError::NoBrokersAvailable)
    }

    /// Get a connection to a specific broker address
    pub async fn get_connection_to(&self, broker: &str) -> Result<Arc<Connection>, ClientError> {
        if let Some(conn) = self.live(broker) {
            return Ok(conn);
        }

        let conn = Arc::new(self.create_connection(broker).await?);
        self.connections.insert(broker.to_string(), conn.clone());
        Ok(conn)
    }

    /// Get a connection to a broker by node id
    pub async fn get_node(&self, node_id: i32) -> Result<Arc<Connection>, ClientError> {
        let address = self
            .node_address(node_id)
            .ok_or_else(|| {
                ClientError::broker(
                    kafwire::KafkaErrorCode::BrokerNotAvailable,
                    format!("no address known for node {}", node_id),
                )
            })?;
        self.get_connection_to(&address).await
    }

    pub fn node_address(&self, node_id: i32) -> Option<String> {
        self.nodes.get(&node_id).map(|entry| entry.value().clone())
    }

    pub fn set_node(&self, node_id: i32, address: impl Into<String>) {
        self.nodes.insert(node_id, address.into());
    }

    /// Record broker addresses from a metadata response.
    pub fn update_nodes(&self, brokers: &[MetadataBroker]) {
        for broker in brokers {
            self.set_node(broker.node_id, broker.address());
        }
    }

    /// Replace the bootstrap list
    pub fn update_brokers(&self, brokers: Vec<String>) {
        *self.bootstrap.write() = brokers;
    }

    /// Drop the cached connection to `broker`, closing it.
    pub async fn invalidate(&self, broker: &str) {
        if let Some((_, conn)) = self.connections.remove(broker) {
            conn.close().await;
        }
    }

    /// Close all connections
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.invalidate(&key).await;
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn live(&self, broker: &str) -> Option<Arc<Connection>> {
        let conn = self.connections.get(broker).map(|entry| entry.value().clone())?;
        if conn.is_healthy() {
            Some(conn)
        } else {
            debug!(broker = %broker, "dropping dead connection");
            self.connections.remove(broker);
            None
        }
    }

    async fn create_connection(&self, broker: &str) -> Result<Connection, ClientError> {
        debug!(broker = %broker, "creating connection");
        let stream = match self.dialer.dial(broker).await {
            Ok(stream) => stream,
            Err(e) => {
                self.metrics.record_connection_failed();
                return Err(e);
            }
        };
        let connection = Connection::connect(broker, stream, self.options.clone()).await;
        match &connection {
            Ok(_) => self.metrics.record_connection_created(),
            Err(_) => self.metrics.record_connection_failed(),
        }
        connection
    }
}
