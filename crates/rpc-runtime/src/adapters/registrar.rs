//! Service registrar adapters.

use crate::domain::config::RegistryKind;
use crate::domain::error::RpcResult;
use crate::ports::ServiceRegistrar;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Build the registrar for a configured kind.
pub fn registrar_for(kind: RegistryKind) -> Arc<dyn ServiceRegistrar> {
    match kind {
        RegistryKind::None => Arc::new(NoopRegistrar),
        RegistryKind::Memory => Arc::new(InMemoryRegistrar::new()),
    }
}

/// Publishes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

#[async_trait]
impl ServiceRegistrar for NoopRegistrar {
    async fn register(&self, _service: &str, _addr: SocketAddr) -> RpcResult<()> {
        Ok(())
    }

    async fn unregister(&self, _service: &str, _addr: SocketAddr) -> RpcResult<()> {
        Ok(())
    }
}

/// Keeps the published `(service, address)` set in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistrar {
    entries: Mutex<BTreeSet<(String, SocketAddr)>>,
}

impl InMemoryRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, SocketAddr)> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn is_registered(&self, service: &str, addr: SocketAddr) -> bool {
        self.entries.lock().contains(&(service.to_string(), addr))
    }

    /// Addresses currently publishing `service`.
    pub fn lookup(&self, service: &str) -> Vec<SocketAddr> {
        self.entries
            .lock()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, addr)| *addr)
            .collect()
    }
}

#[async_trait]
impl ServiceRegistrar for InMemoryRegistrar {
    async fn register(&self, service: &str, addr: SocketAddr) -> RpcResult<()> {
        if self.entries.lock().insert((service.to_string(), addr)) {
            info!(service, %addr, "Registered service");
        }
        Ok(())
    }

    async fn unregister(&self, service: &str, addr: SocketAddr) -> RpcResult<()> {
        if self.entries.lock().remove(&(service.to_string(), addr)) {
            info!(service, %addr, "Unregistered service");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registrar = InMemoryRegistrar::new();
        let addr: SocketAddr = "127.0.0.1:7070".parse().unwrap();

        registrar.register("UserService", addr).await.unwrap();
        registrar.register("UserService", addr).await.unwrap();
        assert_eq!(registrar.entries().len(), 1);
        assert_eq!(registrar.lookup("UserService"), vec![addr]);

        registrar.unregister("UserService", addr).await.unwrap();
        assert!(!registrar.is_registered("UserService", addr));
        // idempotent
        registrar.unregister("UserService", addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_noop() {
        let registrar = registrar_for(RegistryKind::None);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(registrar.register("X", addr).await.is_ok());
    }
}
