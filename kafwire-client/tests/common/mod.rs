//! Fake brokers over in-memory duplex streams

#![allow(dead_code)]

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use kafwire::protocol::kafka::messages::{
    encode_response, ApiMessage, ApiVersionsResponse, ApiVersionsResponseKey, MetadataBroker,
    MetadataPartition, MetadataResponse, MetadataTopic, RequestHeader,
};
use kafwire::protocol::kafka::API_KEY_API_VERSIONS;
use kafwire::{KafkaFrameCodec, PacketDecoder};
use kafwire_client::transport::{BoxedStream, Dialer};
use kafwire_client::{ClientConfig, ClientError, RetryConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use tokio_util::codec::Framed;

pub const BROKER: &str = "broker:9092";

/// One request as the broker saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub header: RequestHeader,
    pub body: Bytes,
}

impl Received {
    pub fn parse(frame: Bytes) -> Self {
        let mut dec = PacketDecoder::new(&frame);
        let header = RequestHeader::decode(&mut dec).expect("request header");
        let offset = dec.position();
        Self {
            header,
            body: frame.slice(offset..),
        }
    }

    pub fn api_key(&self) -> i16 {
        self.header.api_key
    }

    pub fn version(&self) -> i16 {
        self.header.api_version
    }

    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }

    pub fn decode<M: ApiMessage>(&self) -> M {
        M::from_bytes(&self.body, self.header.api_version).expect("request body")
    }

    /// Encoded response frame answering this request.
    pub fn respond<M: ApiMessage>(&self, response: &M) -> Option<Bytes> {
        Some(encode_response(response, self.header.correlation_id).expect("response"))
    }
}

/// Hand-driven broker end of a single connection.
pub struct ManualBroker {
    framed: Framed<DuplexStream, KafkaFrameCodec>,
}

impl ManualBroker {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, KafkaFrameCodec::new()),
        }
    }

    pub async fn recv(&mut self) -> Received {
        let frame = self
            .framed
            .next()
            .await
            .expect("client hung up")
            .expect("frame");
        Received::parse(frame)
    }

    pub async fn reply<M: ApiMessage>(&mut self, correlation_id: i32, response: &M) {
        let frame = encode_response(response, correlation_id).expect("response");
        self.framed.send(frame).await.expect("send");
    }

    pub async fn send_raw(&mut self, frame: Bytes) {
        self.framed.send(frame).await.expect("send");
    }
}

/// Answers one request: `Some(frame)` to reply, `None` to stay silent.
pub type Handler = dyn Fn(&str, &Received) -> Option<Bytes> + Send + Sync;

/// Dialer whose every broker is a task running `handler`. ApiVersions is
/// answered automatically with the full client ranges.
#[derive(Clone)]
pub struct FakeCluster {
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<Received>>>,
    dials: Arc<AtomicUsize>,
    refused: Arc<Mutex<Vec<String>>>,
}

impl fmt::Debug for FakeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeCluster").finish()
    }
}

impl FakeCluster {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Received) -> Option<Bytes> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            log: Arc::new(Mutex::new(Vec::new())),
            dials: Arc::new(AtomicUsize::new(0)),
            refused: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received, ApiVersions excluded, in arrival order.
    pub fn requests(&self) -> Vec<Received> {
        self.log.lock().clone()
    }

    pub fn count(&self, api_key: i16) -> usize {
        self.log.lock().iter().filter(|r| r.api_key() == api_key).count()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, address: &str) {
        self.refused.lock().push(address.to_string());
    }

    async fn serve(
        address: String,
        stream: DuplexStream,
        handler: Arc<Handler>,
        log: Arc<Mutex<Vec<Received>>>,
    ) {
        let mut framed = Framed::new(stream, KafkaFrameCodec::new());
        while let Some(Ok(frame)) = framed.next().await {
            let request = Received::parse(frame);
            let reply = if request.api_key() == API_KEY_API_VERSIONS {
                request.respond(&api_versions_response(request.version()))
            } else {
                log.lock().push(request.clone());
                handler(&address, &request)
            };
            if let Some(frame) = reply {
                if framed.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Dialer for FakeCluster {
    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<BoxedStream, ClientError>> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.refused.lock().iter().any(|a| a == address) {
                return Err(ClientError::connection_closed(address));
            }
            let (client, server) = duplex(1 << 20);
            tokio::spawn(Self::serve(
                address.to_string(),
                server,
                self.handler.clone(),
                self.log.clone(),
            ));
            Ok(Box::new(client) as BoxedStream)
        })
    }
}

pub fn api_versions_response(version: i16) -> ApiVersionsResponse {
    let mut response = ApiVersionsResponse::new(version);
    for (api_key, max_version) in [
        (0, 7),
        (1, 7),
        (3, 7),
        (8, 7),
        (9, 5),
        (10, 2),
        (11, 5),
        (12, 3),
        (13, 3),
        (14, 3),
        (18, 2),
    ] {
        response.api_keys.push(ApiVersionsResponseKey {
            api_key,
            min_version: 0,
            max_version,
        });
    }
    response
}

/// Metadata naming `BROKER` as node 1 and leader of every partition.
pub fn metadata_response(version: i16, topics: &[(&str, i32)]) -> MetadataResponse {
    let mut response = MetadataResponse::new(version);
    response.brokers.push(MetadataBroker {
        node_id: 1,
        host: "broker".to_string(),
        port: 9092,
        rack: None,
    });
    response.controller_id = 1;
    for (name, partitions) in topics {
        response.topics.push(MetadataTopic {
            error_code: 0,
            name: name.to_string(),
            is_internal: false,
            partitions: (0..*partitions)
                .map(|p| MetadataPartition {
                    partition_index: p,
                    leader_id: 1,
                    replica_nodes: vec![1],
                    isr_nodes: vec![1],
                    ..MetadataPartition::default()
                })
                .collect(),
        });
    }
    response
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        brokers: vec![BROKER.to_string()],
        client_id: Some("test-client".to_string()),
        connection_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        ..ClientConfig::default()
    }
}
