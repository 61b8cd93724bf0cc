//! Live client channels keyed by remote address.

use crate::client::dispatcher::ClientDispatcher;
use crate::domain::error::{RpcError, RpcResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of active channels.
///
/// Removing a channel closes it, which fails every call still pending on it
/// with [`RpcError::ConnectionLost`].
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: DashMap<SocketAddr, Arc<ClientDispatcher>>,
    cursor: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, channel: Arc<ClientDispatcher>) -> RpcResult<()> {
        match self.channels.entry(channel.peer()) {
            Entry::Occupied(entry) => Err(RpcError::AlreadyRegistered(format!(
                "connection to {}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                info!(peer = %channel.peer(), "Registered connection");
                entry.insert(channel);
                Ok(())
            }
        }
    }

    /// Remove and close the channel for `addr`. Idempotent.
    pub fn remove(&self, addr: &SocketAddr) -> Option<Arc<ClientDispatcher>> {
        let (_, channel) = self.channels.remove(addr)?;
        info!(peer = %addr, "Removed connection");
        channel.close();
        Some(channel)
    }

    /// Remove `channel` only if it is still the one registered for its address.
    pub(crate) fn detach(&self, channel: &ClientDispatcher) {
        let removed = self
            .channels
            .remove_if(&channel.peer(), |_, c| std::ptr::eq(c.as_ref(), channel));
        if removed.is_some() {
            debug!(peer = %channel.peer(), "Detached inactive connection");
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<ClientDispatcher>> {
        self.channels.get(addr).map(|c| Arc::clone(c.value()))
    }

    pub fn all(&self) -> Vec<Arc<ClientDispatcher>> {
        self.channels.iter().map(|c| Arc::clone(c.value())).collect()
    }

    /// Round-robin over live channels.
    pub fn select(&self) -> Option<Arc<ClientDispatcher>> {
        let mut live: Vec<Arc<ClientDispatcher>> =
            self.all().into_iter().filter(|c| c.is_active()).collect();
        if live.is_empty() {
            return None;
        }
        live.sort_by_key(|c| c.peer());
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        Some(live.swap_remove(index))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Close every channel.
    pub fn close_all(&self) {
        let addrs: Vec<SocketAddr> = self.channels.iter().map(|c| *c.key()).collect();
        for addr in addrs {
            self.remove(&addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::BincodeSerializer;
    use crate::domain::config::ClientConfig;
    use crate::transport::{TransportKind, TransportSelector};
    use shared_types::Request;

    fn attach(registry: &Arc<ConnectionRegistry>, port: u16) -> RpcResult<(Arc<ClientDispatcher>, tokio::io::DuplexStream)> {
        let pipelines = TransportSelector::new(Arc::new(BincodeSerializer), 1 << 20)
            .build(TransportKind::Binary)
            .unwrap();
        let (local, remote) = tokio::io::duplex(4096);
        let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let channel = ClientDispatcher::attach(
            local,
            peer,
            &pipelines.client,
            &ClientConfig::default(),
            registry,
        )?;
        Ok((channel, remote))
    }

    #[tokio::test]
    async fn test_register_duplicate_address() {
        let registry = ConnectionRegistry::new();
        let (_first, _r1) = attach(&registry, 1).unwrap();
        let err = attach(&registry, 1).unwrap_err();
        assert!(matches!(err, RpcError::AlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_fails_pending_calls() {
        let registry = ConnectionRegistry::new();
        let (channel, _remote) = attach(&registry, 2).unwrap();
        let ticket = channel.send_request(Request::builder("Svc", "m").id("abc").build());

        let addr = channel.peer();
        assert!(registry.remove(&addr).is_some());
        assert!(registry.remove(&addr).is_none());
        assert!(matches!(
            ticket.wait().await,
            Err(RpcError::ConnectionLost { .. })
        ));
        assert!(!channel.is_active());
    }

    #[tokio::test]
    async fn test_round_robin_select() {
        let registry = ConnectionRegistry::new();
        let (_a, _ra) = attach(&registry, 10).unwrap();
        let (_b, _rb) = attach(&registry, 11).unwrap();

        let first = registry.select().unwrap().peer();
        let second = registry.select().unwrap().peer();
        let third = registry.select().unwrap().peer();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = attach(&registry, 20).unwrap();
        let (b, _rb) = attach(&registry, 21).unwrap();
        registry.close_all();
        assert!(registry.is_empty());
        assert!(!a.is_active() && !b.is_active());
        assert!(registry.select().is_none());
    }
}
