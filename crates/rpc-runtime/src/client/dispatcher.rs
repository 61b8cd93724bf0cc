//! Client call dispatcher - one per network channel.
//!
//! Outgoing requests get a [`CallTicket`] and are queued for the writer task.
//! The reader task decodes responses and completes tickets by request id, so
//! responses may arrive in any order.

use crate::client::connections::ConnectionRegistry;
use crate::domain::config::ClientConfig;
use crate::domain::error::{RpcError, RpcResult};
use crate::domain::ticket::{sweep_expired, CallTicket, PendingCalls, PendingSnapshot, TicketState};
use crate::transport::ClientPipeline;
use futures::{SinkExt, StreamExt};
use shared_types::{Request, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ClientDispatcher {
    peer: SocketAddr,
    pending: Arc<PendingCalls>,
    outbound: mpsc::Sender<Request>,
    active: AtomicBool,
    shutdown: CancellationToken,
    registry: Weak<ConnectionRegistry>,
}

impl std::fmt::Debug for ClientDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDispatcher")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ClientDispatcher {
    /// Open a TCP channel to `addr` and register it.
    pub async fn connect(
        addr: SocketAddr,
        pipeline: &ClientPipeline,
        config: &ClientConfig,
        registry: &Arc<ConnectionRegistry>,
    ) -> RpcResult<Arc<Self>> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RpcError::Transport(format!(
                    "connect to {addr} timed out after {:?}",
                    config.connect_timeout
                ))
            })??;
        stream.set_nodelay(true)?;
        Self::attach(stream, addr, pipeline, config, registry)
    }

    /// Run a channel over an established stream.
    ///
    /// Registers the channel, then spawns the reader, writer and expiry
    /// sweeper tasks.
    pub fn attach<T>(
        io: T,
        peer: SocketAddr,
        pipeline: &ClientPipeline,
        config: &ClientConfig,
        registry: &Arc<ConnectionRegistry>,
    ) -> RpcResult<Arc<Self>>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (outbound, mut queue) = mpsc::channel::<Request>(config.write_queue);
        let channel = Arc::new(Self {
            peer,
            pending: PendingCalls::new(config.call_timeout),
            outbound,
            active: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            registry: Arc::downgrade(registry),
        });
        registry.register(Arc::clone(&channel))?;

        let (mut sink, mut stream) = pipeline.frame(io, peer).split();

        let writer = Arc::clone(&channel);
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = writer.shutdown.cancelled() => break,
                    request = queue.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };
                let id = request.id().clone();
                if let Err(e) = sink.send(request).await {
                    if e.is_channel_failure() {
                        warn!(peer = %writer.peer, error = %e, "Write failed, closing channel");
                        writer.close();
                        break;
                    }
                    writer.pending.fail(&id, e);
                }
            }
        });

        let reader = Arc::clone(&channel);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader.shutdown.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(response)) => reader.on_response(response),
                        Some(Err(e)) => {
                            error!(peer = %reader.peer, error = %e, "Channel error, closing");
                            break;
                        }
                        None => {
                            debug!(peer = %reader.peer, "Peer closed channel");
                            break;
                        }
                    },
                }
            }
            reader.close();
        });

        tokio::spawn(sweep_expired(
            Arc::clone(&channel.pending),
            config.sweep_interval,
            channel.shutdown.child_token(),
        ));

        info!(peer = %peer, transport = %pipeline.kind(), "Channel active");
        Ok(channel)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> PendingSnapshot {
        self.pending.snapshot()
    }

    /// Register a ticket and queue the request. Never blocks: a full write
    /// queue or a dead channel fails the ticket instead.
    pub fn send_request(&self, request: Request) -> CallTicket {
        self.send_with_timeout(request, None)
    }

    pub fn send_with_timeout(&self, request: Request, timeout: Option<Duration>) -> CallTicket {
        let id = request.id().clone();
        let ticket = self.pending.register(id.clone(), timeout);
        if ticket.state() != TicketState::Pending {
            return ticket;
        }

        // checked after registering so a concurrent close cannot miss the ticket
        if !self.is_active() {
            self.pending.fail(&id, RpcError::connection_lost(self.peer));
            return ticket;
        }

        match self.outbound.try_send(request) {
            Ok(()) => debug!(request_id = %id, peer = %self.peer, "Queued request"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(request_id = %id, peer = %self.peer, "Write queue full");
                self.pending.fail(
                    &id,
                    RpcError::Overloaded(format!("write queue to {} is full", self.peer)),
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.fail(&id, RpcError::connection_lost(self.peer));
            }
        }
        ticket
    }

    pub async fn call(&self, request: Request) -> RpcResult<Response> {
        self.send_request(request).wait().await
    }

    /// Close the channel. Every pending call fails with
    /// [`RpcError::ConnectionLost`]. Idempotent.
    pub fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self);
        }
        let failed = self.pending.fail_all(&RpcError::connection_lost(self.peer));
        info!(peer = %self.peer, failed, "Channel inactive");
    }

    fn on_response(&self, response: Response) {
        let id = response.request_id().clone();
        let response = if response.is_success() && !response.result().is_unit() {
            match response.return_type().coerce(response.result().clone()) {
                Ok(value) => response.with_result(value),
                Err(e) => {
                    warn!(request_id = %id, error = %e, "Response does not match declared return type");
                    self.pending.fail(&id, e.into());
                    return;
                }
            }
        } else {
            response
        };
        self.pending.complete(response);
    }
}

impl Drop for ClientDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
