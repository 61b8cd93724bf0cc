//! Server side: binding, the accept loop and the dispatch pipeline.

pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod pool;

pub use coordinator::{AsyncCoordinator, OutboundResponse, SubmitHandle};
pub use dispatcher::InvocationDispatcher;
pub use pool::{PoolSnapshot, WorkerPool};

use crate::adapters::registrar_for;
use crate::admin::AdminState;
use crate::domain::chain::{Interceptor, InterceptorChain};
use crate::domain::config::{RpcConfig, ServerConfig};
use crate::domain::error::{RpcError, RpcResult};
use crate::domain::services::{ServiceDef, ServiceTable};
use crate::middleware::RuntimeMetrics;
use crate::ports::ServiceRegistrar;
use crate::transport::TransportSelector;
use connection::{serve_connection, ConnectionContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build the multi-threaded I/O runtime with `server.io_threads` workers.
pub fn io_runtime(config: &ServerConfig) -> RpcResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads)
        .thread_name("rpc-io")
        .enable_all()
        .build()
        .map_err(|e| RpcError::Config(format!("cannot start I/O runtime: {e}")))
}

#[derive(Default)]
pub struct RpcServerBuilder {
    config: RpcConfig,
    services: Vec<ServiceDef>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    registrar: Option<Arc<dyn ServiceRegistrar>>,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl RpcServerBuilder {
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn service(mut self, def: ServiceDef) -> Self {
        self.services.push(def);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Overrides the registrar selected by `registry.kind`.
    pub fn registrar(mut self, registrar: Arc<dyn ServiceRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate configuration, build the dispatch pipeline, bind the listener
    /// and publish every service to the registrar.
    pub async fn bind(self) -> RpcResult<RpcServer> {
        let config = self.config;
        config.validate()?;
        let pipelines = TransportSelector::from_config(&config.transport)?;

        let services = Arc::new(ServiceTable::new(self.services)?);
        let chain = Arc::new(InterceptorChain::new(self.interceptors));
        let metrics = self.metrics.unwrap_or_default();
        let pool = Arc::new(WorkerPool::new(&config.workers)?);
        let dispatcher = Arc::new(InvocationDispatcher::new(
            Arc::clone(&services),
            chain,
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(AsyncCoordinator::new(
            dispatcher,
            Arc::clone(&pool),
            Arc::clone(&metrics),
        ));

        let listener = listen(&config.server)?;
        let local_addr = listener.local_addr()?;

        let registrar = self
            .registrar
            .unwrap_or_else(|| registrar_for(config.registry.kind));
        for name in services.service_names() {
            registrar.register(&name, local_addr).await?;
        }

        info!(
            addr = %local_addr,
            transport = %config.transport.kind,
            serializer = %config.transport.serializer,
            services = ?services.service_names(),
            "RPC server bound"
        );

        Ok(RpcServer {
            local_addr,
            listener,
            context: Arc::new(ConnectionContext {
                pipeline: pipelines.server,
                coordinator,
                metrics,
                write_queue: config.server.write_queue,
            }),
            services,
            pool,
            registrar,
            drain_timeout: config.workers.drain_timeout,
            config,
        })
    }
}

fn listen(config: &ServerConfig) -> RpcResult<TcpListener> {
    let addr = SocketAddr::new(config.host, config.port);
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(config.keepalive)?;
    socket.bind(addr)?;
    Ok(socket.listen(config.backlog)?)
}

/// A bound server, ready to accept connections.
pub struct RpcServer {
    local_addr: SocketAddr,
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    services: Arc<ServiceTable>,
    pool: Arc<WorkerPool>,
    registrar: Arc<dyn ServiceRegistrar>,
    drain_timeout: Duration,
    config: RpcConfig,
}

impl RpcServer {
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::default()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.context.metrics
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Shared state for the admin router.
    pub fn admin_state(&self) -> AdminState {
        AdminState::new(
            self.local_addr,
            self.config.transport.clone(),
            Arc::clone(&self.services),
            Arc::clone(&self.pool),
            Arc::clone(&self.context.metrics),
        )
    }

    /// Accept connections until `shutdown` fires, then unregister every
    /// service and drain the worker pool.
    pub async fn run(self, shutdown: CancellationToken) -> RpcResult<()> {
        info!(addr = %self.local_addr, "RPC server accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        self.context.metrics.record_connect();
                        info!(peer = %peer, "Accepted connection");
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.context),
                            shutdown.child_token(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }

        info!(addr = %self.local_addr, "RPC server shutting down");
        for name in self.services.service_names() {
            if let Err(e) = self.registrar.unregister(&name, self.local_addr).await {
                warn!(service = %name, error = %e, "Failed to unregister service");
            }
        }
        self.pool.shutdown(self.drain_timeout).await;
        Ok(())
    }
}
