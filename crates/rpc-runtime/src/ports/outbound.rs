//! Outbound ports for the RPC runtime.

use crate::domain::config::SerializerKind;
use crate::domain::error::RpcResult;
use async_trait::async_trait;
use bytes::Bytes;
use shared_types::{Request, Response};
use std::net::SocketAddr;

/// Payload encoding for requests and responses.
///
/// A decode failure means the peer sent something unreadable; the transport
/// treats it as a protocol error and closes the channel.
pub trait Serializer: Send + Sync {
    fn kind(&self) -> SerializerKind;

    /// Whether the encoded payload is printable text (required by HTTP).
    fn is_text(&self) -> bool {
        self.kind().is_text()
    }

    fn encode_request(&self, request: &Request) -> RpcResult<Bytes>;

    fn decode_request(&self, payload: &[u8]) -> RpcResult<Request>;

    fn encode_response(&self, response: &Response) -> RpcResult<Bytes>;

    fn decode_response(&self, payload: &[u8]) -> RpcResult<Response>;
}

/// Service discovery collaborator.
///
/// The server registers every published service after binding and
/// unregisters them on shutdown.
#[async_trait]
pub trait ServiceRegistrar: Send + Sync {
    async fn register(&self, service: &str, addr: SocketAddr) -> RpcResult<()>;

    async fn unregister(&self, service: &str, addr: SocketAddr) -> RpcResult<()>;
}
