//! Transport selection.
//!
//! A [`TransportSelector`] pairs a framing (binary or HTTP) with an injected
//! [`Serializer`] and yields matching client and server pipelines. Both are
//! `tokio_util` codecs, so they run over any `AsyncRead + AsyncWrite`.

pub mod binary;
pub mod http;

pub use crate::domain::config::TransportKind;

use crate::adapters::serializer_for;
use crate::domain::config::{ConfigError, TransportConfig};
use crate::domain::error::{RpcError, RpcResult};
use crate::ports::Serializer;
use binary::BinaryFraming;
use bytes::BytesMut;
use http::{HttpClientFraming, HttpServerFraming};
use shared_types::{Request, Response};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::info;

/// Builds client/server pipelines for a transport kind.
pub struct TransportSelector {
    serializer: Arc<dyn Serializer>,
    max_frame_size: usize,
}

impl TransportSelector {
    pub fn new(serializer: Arc<dyn Serializer>, max_frame_size: usize) -> Self {
        Self {
            serializer,
            max_frame_size,
        }
    }

    /// Pipelines for the configured transport and serializer.
    pub fn from_config(config: &TransportConfig) -> RpcResult<Pipelines> {
        Self::new(serializer_for(config.serializer), config.max_frame_size).build(config.kind)
    }

    pub fn build(&self, kind: TransportKind) -> RpcResult<Pipelines> {
        if kind == TransportKind::Http && !self.serializer.is_text() {
            return Err(ConfigError::IncompatibleSerializer {
                transport: kind,
                serializer: self.serializer.kind(),
            }
            .into());
        }

        info!(
            transport = %kind,
            serializer = %self.serializer.kind(),
            max_frame_size = self.max_frame_size,
            "Selected transport"
        );

        let settings = PipelineSettings {
            kind,
            serializer: Arc::clone(&self.serializer),
            max_frame_size: self.max_frame_size,
        };
        Ok(Pipelines {
            client: ClientPipeline(settings.clone()),
            server: ServerPipeline(settings),
        })
    }
}

#[derive(Clone)]
struct PipelineSettings {
    kind: TransportKind,
    serializer: Arc<dyn Serializer>,
    max_frame_size: usize,
}

/// Matching client and server ends of one transport.
#[derive(Clone)]
pub struct Pipelines {
    pub client: ClientPipeline,
    pub server: ServerPipeline,
}

/// Encodes requests, decodes responses.
#[derive(Clone)]
pub struct ClientPipeline(PipelineSettings);

impl ClientPipeline {
    pub fn kind(&self) -> TransportKind {
        self.0.kind
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.0.serializer
    }

    pub fn codec(&self, peer: SocketAddr) -> ClientCodec {
        let framing = match self.0.kind {
            TransportKind::Binary => ClientFraming::Binary(BinaryFraming::new(self.0.max_frame_size)),
            TransportKind::Http => {
                ClientFraming::Http(HttpClientFraming::new(peer, self.0.max_frame_size))
            }
        };
        ClientCodec {
            serializer: Arc::clone(&self.0.serializer),
            framing,
        }
    }

    pub fn frame<T>(&self, io: T, peer: SocketAddr) -> Framed<T, ClientCodec>
    where
        T: AsyncRead + AsyncWrite,
    {
        Framed::new(io, self.codec(peer))
    }
}

impl fmt::Debug for ClientPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPipeline")
            .field("kind", &self.0.kind)
            .field("serializer", &self.0.serializer.kind())
            .finish()
    }
}

/// Decodes requests, encodes responses.
#[derive(Clone)]
pub struct ServerPipeline(PipelineSettings);

impl ServerPipeline {
    pub fn kind(&self) -> TransportKind {
        self.0.kind
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.0.serializer
    }

    pub fn codec(&self) -> ServerCodec {
        let framing = match self.0.kind {
            TransportKind::Binary => ServerFraming::Binary(BinaryFraming::new(self.0.max_frame_size)),
            TransportKind::Http => ServerFraming::Http(HttpServerFraming::new(self.0.max_frame_size)),
        };
        ServerCodec {
            serializer: Arc::clone(&self.0.serializer),
            framing,
        }
    }

    pub fn frame<T>(&self, io: T) -> Framed<T, ServerCodec>
    where
        T: AsyncRead + AsyncWrite,
    {
        Framed::new(io, self.codec())
    }
}

impl fmt::Debug for ServerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPipeline")
            .field("kind", &self.0.kind)
            .field("serializer", &self.0.serializer.kind())
            .finish()
    }
}

enum ClientFraming {
    Binary(BinaryFraming),
    Http(HttpClientFraming),
}

/// Client codec: `Request` out, `Response` in.
pub struct ClientCodec {
    serializer: Arc<dyn Serializer>,
    framing: ClientFraming,
}

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, RpcError> {
        let frame = match &mut self.framing {
            ClientFraming::Binary(f) => f.decode(src)?,
            ClientFraming::Http(f) => f.decode(src)?,
        };
        frame
            .map(|payload| self.serializer.decode_response(&payload))
            .transpose()
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = RpcError;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<(), RpcError> {
        let payload = self.serializer.encode_request(&request)?;
        match &mut self.framing {
            ClientFraming::Binary(f) => f.encode(payload, dst),
            ClientFraming::Http(f) => f.encode(payload, dst),
        }
    }
}

enum ServerFraming {
    Binary(BinaryFraming),
    Http(HttpServerFraming),
}

/// Server codec: `Request` in, `Response` out.
pub struct ServerCodec {
    serializer: Arc<dyn Serializer>,
    framing: ServerFraming,
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, RpcError> {
        let frame = match &mut self.framing {
            ServerFraming::Binary(f) => f.decode(src)?,
            ServerFraming::Http(f) => f.decode(src)?,
        };
        frame
            .map(|payload| self.serializer.decode_request(&payload))
            .transpose()
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = RpcError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), RpcError> {
        let payload = self.serializer.encode_response(&response)?;
        match &mut self.framing {
            ServerFraming::Binary(f) => f.encode(payload, dst),
            ServerFraming::Http(f) => f.encode(payload, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BincodeSerializer, JsonSerializer};
    use crate::domain::config::SerializerKind;
    use futures::{SinkExt, StreamExt};
    use shared_types::{RequestId, TypeDescriptor, Value};

    fn peer() -> SocketAddr {
        "127.0.0.1:7070".parse().unwrap()
    }

    fn request() -> Request {
        Request::builder("UserService", "getUser")
            .id("abc")
            .arg(TypeDescriptor::I64, 42i64)
            .arg(TypeDescriptor::String, "name")
            .arg(TypeDescriptor::Bool, true)
            .build()
    }

    async fn round_trip(pipelines: Pipelines) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = pipelines.client.frame(a, peer());
        let mut server = pipelines.server.frame(b);

        client.send(request()).await.unwrap();
        let received = server.next().await.unwrap().unwrap();
        assert_eq!(received, request());

        let response = Response::success(
            received.id().clone(),
            Value::record([("id", Value::Int(42))]),
            TypeDescriptor::record("User"),
        );
        server.send(response.clone()).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), response);
    }

    #[tokio::test]
    async fn test_binary_bincode_round_trip() {
        let selector = TransportSelector::new(Arc::new(BincodeSerializer), 1 << 20);
        round_trip(selector.build(TransportKind::Binary).unwrap()).await;
    }

    #[tokio::test]
    async fn test_binary_json_round_trip() {
        let selector = TransportSelector::new(Arc::new(JsonSerializer), 1 << 20);
        round_trip(selector.build(TransportKind::Binary).unwrap()).await;
    }

    #[tokio::test]
    async fn test_http_json_round_trip() {
        let selector = TransportSelector::new(Arc::new(JsonSerializer), 1 << 20);
        round_trip(selector.build(TransportKind::Http).unwrap()).await;
    }

    #[test]
    fn test_http_with_binary_serializer_rejected() {
        let selector = TransportSelector::new(Arc::new(BincodeSerializer), 1 << 20);
        assert!(matches!(
            selector.build(TransportKind::Http),
            Err(RpcError::Config(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = TransportConfig {
            kind: TransportKind::Http,
            serializer: SerializerKind::Json,
            max_frame_size: 1024,
        };
        let pipelines = TransportSelector::from_config(&config).unwrap();
        assert_eq!(pipelines.client.kind(), TransportKind::Http);
        assert!(pipelines.server.serializer().is_text());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_protocol_error() {
        let selector = TransportSelector::new(Arc::new(JsonSerializer), 1 << 20);
        let pipelines = selector.build(TransportKind::Binary).unwrap();
        let mut codec = pipelines.server.codec();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, b'x', b'y', b'z'][..]);
        assert!(matches!(codec.decode(&mut buf), Err(RpcError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_pipelined_responses() {
        let selector = TransportSelector::new(Arc::new(JsonSerializer), 1 << 20);
        let pipelines = selector.build(TransportKind::Http).unwrap();
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = pipelines.client.frame(a, peer());
        let mut server = pipelines.server.frame(b);

        for id in ["one", "two"] {
            let response = Response::success(RequestId::from(id), Value::Unit, TypeDescriptor::Unit);
            server.send(response).await.unwrap();
        }
        let first = client.next().await.unwrap().unwrap();
        let second = client.next().await.unwrap().unwrap();
        assert_eq!(first.request_id().as_str(), "one");
        assert_eq!(second.request_id().as_str(), "two");
    }
}
