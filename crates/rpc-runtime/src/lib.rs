//! RPC runtime - call correlation, transport selection and worker-pool
//! dispatch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── client ────────────────────────┐
//! │  RpcClient → ClientDispatcher (one per channel)        │
//! │     │  register CallTicket      ▲ complete by id       │
//! │     ▼                           │                      │
//! │  writer task ── ClientCodec ── reader task             │
//! └─────────┬───────────────────────▲──────────────────────┘
//!           │   binary frames / HTTP POST /rpc             │
//! ┌─────────▼────────────────────── server ────────────────┐
//! │  connection reader ── ServerCodec ── connection writer │
//! │     │ submit                       ▲ completion order  │
//! │     ▼                              │                   │
//! │  AsyncCoordinator → WorkerPool (rayon)                 │
//! │     → InvocationDispatcher → InterceptorChain → method │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rpc_runtime::{RpcClient, RpcConfig, RpcServer, ServiceDef};
//!
//! let server = RpcServer::builder()
//!     .config(config.clone())
//!     .service(user_service())
//!     .bind()
//!     .await?;
//! let addr = server.local_addr();
//! tokio::spawn(server.run(shutdown.clone()));
//!
//! let client = RpcClient::new(&config)?;
//! client.connect(addr).await?;
//! let user = client.call("UserService", "getUser", [(TypeDescriptor::I64, 42i64.into())]).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod admin;
pub mod client;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod server;
pub mod transport;

// Re-exports for public API
pub use adapters::{BincodeSerializer, InMemoryRegistrar, JsonSerializer, NoopRegistrar};
pub use admin::{admin_router, serve_admin, AdminState};
pub use client::{ClientDispatcher, ConnectionRegistry, RpcClient};
pub use domain::*;
pub use middleware::{MetricsSnapshot, RuntimeMetrics, TimingInterceptor};
pub use ports::{Serializer, ServiceRegistrar};
pub use server::{io_runtime, RpcServer, RpcServerBuilder};
pub use transport::{Pipelines, TransportSelector};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
