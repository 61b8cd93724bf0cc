//! Client side: channels, the connection registry and the [`RpcClient`]
//! facade.

pub mod connections;
pub mod dispatcher;

pub use connections::ConnectionRegistry;
pub use dispatcher::ClientDispatcher;

use crate::domain::config::{ClientConfig, RpcConfig};
use crate::domain::error::{RpcError, RpcResult};
use crate::domain::ticket::CallTicket;
use crate::transport::{ClientPipeline, TransportSelector};
use serde::de::DeserializeOwned;
use shared_types::{Request, Response, TypeDescriptor, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Client facade: owns the connection registry and the transport pipeline.
pub struct RpcClient {
    config: ClientConfig,
    pipeline: ClientPipeline,
    registry: Arc<ConnectionRegistry>,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> RpcResult<Self> {
        config.validate()?;
        let pipelines = TransportSelector::from_config(&config.transport)?;
        Self::with_pipeline(pipelines.client, config.client.clone())
    }

    pub fn with_pipeline(pipeline: ClientPipeline, config: ClientConfig) -> RpcResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pipeline,
            registry: ConnectionRegistry::new(),
        })
    }

    /// Connect to `addr`, reusing a live channel if there is one.
    pub async fn connect(&self, addr: SocketAddr) -> RpcResult<Arc<ClientDispatcher>> {
        if let Some(channel) = self.registry.get(&addr).filter(|c| c.is_active()) {
            return Ok(channel);
        }
        ClientDispatcher::connect(addr, &self.pipeline, &self.config, &self.registry).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn channel(&self) -> RpcResult<Arc<ClientDispatcher>> {
        self.registry
            .select()
            .ok_or_else(|| RpcError::Transport("no live connection".into()))
    }

    /// Send a prepared request on the next live channel.
    pub fn send(&self, request: Request) -> RpcResult<CallTicket> {
        Ok(self.channel()?.send_request(request))
    }

    pub async fn call_request(&self, request: Request) -> RpcResult<Response> {
        let channel = self.channel()?;
        debug!(request_id = %request.id(), peer = %channel.peer(), "Calling {}", request.signature());
        channel.call(request).await
    }

    /// Call `service.method(args)` and return its result. A failed response
    /// becomes [`RpcError::Remote`].
    pub async fn call<I>(&self, service: &str, method: &str, args: I) -> RpcResult<Value>
    where
        I: IntoIterator<Item = (TypeDescriptor, Value)>,
    {
        let request = args
            .into_iter()
            .fold(Request::builder(service, method), |builder, (descriptor, value)| {
                builder.arg(descriptor, value)
            })
            .build();
        let response = self.call_request(request).await?;
        response.into_result().map_err(RpcError::Remote)
    }

    /// [`call`](Self::call), deserializing the result into `T`.
    pub async fn call_typed<T, I>(&self, service: &str, method: &str, args: I) -> RpcResult<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = (TypeDescriptor, Value)>,
    {
        let value = self.call(service, method, args).await?;
        value
            .deserialize_into()
            .map_err(|e| RpcError::Deserialization(e.to_string()))
    }

    /// Blocking call for threads outside the async runtime.
    pub fn call_blocking(&self, request: Request) -> RpcResult<Response> {
        self.send(request)?.wait_blocking()
    }

    /// Close every channel; pending calls fail with
    /// [`RpcError::ConnectionLost`].
    pub fn shutdown(&self) {
        self.registry.close_all();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonSerializer;
    use crate::domain::config::ConfigError;
    use crate::transport::TransportKind;
    use std::time::Duration;

    fn pipeline() -> ClientPipeline {
        TransportSelector::new(Arc::new(JsonSerializer), 1 << 20)
            .build(TransportKind::Binary)
            .unwrap()
            .client
    }

    #[test]
    fn test_with_pipeline_rejects_zero_write_queue() {
        let config = ClientConfig {
            write_queue: 0,
            ..ClientConfig::default()
        };
        let err = RpcClient::with_pipeline(pipeline(), config).err().unwrap();
        assert!(matches!(err, RpcError::Config(_)));
    }

    #[test]
    fn test_with_pipeline_rejects_zero_sweep_interval() {
        let config = ClientConfig {
            sweep_interval: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "client.sweep_interval", .. })
        ));
        assert!(RpcClient::with_pipeline(pipeline(), config).is_err());
    }

    #[test]
    fn test_with_pipeline_accepts_defaults() {
        let client = RpcClient::with_pipeline(pipeline(), ClientConfig::default()).unwrap();
        assert!(client.registry().is_empty());
    }
}
