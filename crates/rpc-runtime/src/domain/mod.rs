//! Domain types for the RPC runtime.
//!
//! Configuration, the error taxonomy, call tickets, the service table and the
//! interceptor chain. Nothing here performs network I/O.

pub mod chain;
pub mod config;
pub mod error;
pub mod services;
pub mod ticket;

// Re-exports for convenience
pub use chain::{Interceptor, InterceptorChain, Invocation, InvocationError, InvokeResult, Next};
pub use config::{
    AdminConfig, ClientConfig, ConfigError, RegistryConfig, RegistryKind, RpcConfig,
    SerializerKind, ServerConfig, TransportConfig, TransportKind, WorkerPoolConfig,
};
pub use error::{RpcError, RpcResult};
pub use services::{Handler, MethodDef, ServiceDef, ServiceTable};
pub use ticket::{
    sweep_expired, CallOutcome, CallTicket, PendingCalls, PendingSnapshot, PendingStats,
    TicketState,
};
