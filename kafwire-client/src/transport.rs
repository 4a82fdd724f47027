//! Byte-stream transport to a broker
//!
//! A [`Dialer`] opens streams, [`FrameTransport`] turns one into a sequence of
//! whole Kafka frames using [`KafkaFrameCodec`]. Anything implementing
//! `AsyncRead + AsyncWrite` can stand in for a socket, which is how the tests
//! drive connections over `tokio::io::duplex`.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kafwire::{CodecError, KafkaFrameCodec};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::ClientError;

/// A duplex byte stream to a broker.
pub trait BrokerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> BrokerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn BrokerStream>;

/// Opens streams to broker addresses.
pub trait Dialer: Send + Sync + fmt::Debug {
    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<BoxedStream, ClientError>>;
}

/// Plain TCP with `TCP_NODELAY`.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connection_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connection_timeout: Duration) -> Self {
        Self { connection_timeout }
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<BoxedStream, ClientError>> {
        Box::pin(async move {
            debug!(broker = %address, "dialing broker");
            let stream = timeout(self.connection_timeout, TcpStream::connect(address))
                .await
                .map_err(|_| ClientError::timeout(self.connection_timeout.as_millis() as u64))??;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

pub type FramedStream = Framed<BoxedStream, KafkaFrameCodec>;
pub type FrameSink = SplitSink<FramedStream, Bytes>;
pub type FrameStream = SplitStream<FramedStream>;

/// Whole-frame reads and writes over one broker stream.
pub struct FrameTransport {
    broker: String,
    framed: FramedStream,
}

impl FrameTransport {
    pub fn new(broker: impl Into<String>, stream: BoxedStream, max_frame_size: usize) -> Self {
        Self {
            broker: broker.into(),
            framed: Framed::new(stream, KafkaFrameCodec::with_max_frame_size(max_frame_size)),
        }
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Write one frame payload; the length prefix is added here.
    pub async fn write_frame(&mut self, frame: Bytes) -> Result<(), ClientError> {
        self.framed
            .send(frame)
            .await
            .map_err(|e| map_codec_error(&self.broker, e))
    }

    /// Read the next complete frame payload.
    pub async fn read_frame(&mut self) -> Result<Bytes, ClientError> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(map_codec_error(&self.broker, e)),
            None => Err(ClientError::connection_closed(&self.broker)),
        }
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.framed
            .close()
            .await
            .map_err(|e| map_codec_error(&self.broker, e))
    }

    /// Separate write and read halves.
    pub fn split(self) -> (FrameSink, FrameStream) {
        self.framed.split()
    }
}

impl fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTransport")
            .field("broker", &self.broker)
            .finish()
    }
}

/// Classify a codec failure on a broker stream. A peer that went away is a
/// closed connection; any other frame the codec refuses is a protocol
/// violation.
pub fn map_codec_error(broker: &str, error: CodecError) -> ClientError {
    match error {
        CodecError::Io(e) if is_disconnect(&e) => ClientError::connection_closed(broker),
        CodecError::Io(e) => ClientError::Io(e),
        CodecError::FrameTooLarge { size, max } => ClientError::FrameTooLarge {
            broker: broker.to_string(),
            size,
            max,
        },
        other => ClientError::protocol_violation(broker, other.to_string()),
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
