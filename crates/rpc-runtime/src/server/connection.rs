//! Per-connection server loop.
//!
//! The reader decodes one frame at a time and submits it to the
//! coordinator; the writer task encodes responses as they complete. At most
//! `write_queue` responses per connection are outstanding: once that many
//! are executing or waiting to be written, the reader stops pulling frames.

use crate::domain::error::RpcError;
use crate::middleware::RuntimeMetrics;
use crate::server::coordinator::{AsyncCoordinator, OutboundResponse};
use crate::transport::ServerPipeline;
use futures::{SinkExt, StreamExt};
use shared_types::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ConnectionContext {
    pub pipeline: ServerPipeline,
    pub coordinator: Arc<AsyncCoordinator>,
    pub metrics: Arc<RuntimeMetrics>,
    pub write_queue: usize,
}

pub async fn serve_connection<T>(
    io: T,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
    shutdown: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut sink, mut stream) = ctx.pipeline.frame(io).split();
    let (reply, mut responses) = mpsc::channel::<OutboundResponse>(ctx.write_queue);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = responses.recv().await {
            let id = outbound.response.request_id().clone();
            let mut result = sink.send(outbound.response).await;
            if let Err(e @ RpcError::Serialization(_)) = &result {
                warn!(request_id = %id, peer = %peer, error = %e, "Response not encodable, sending failure");
                let failure = Response::failure(id.clone(), e.to_wire());
                result = sink.send(failure).await;
            }
            let channel_gone = matches!(&result, Err(e) if e.is_channel_failure());
            if let Err(e) = &result {
                warn!(request_id = %id, peer = %peer, error = %e, "Failed to write response");
            }
            if let Some(written) = outbound.written {
                let _ = written.send(result);
            }
            if channel_gone {
                break;
            }
        }
    });

    // one slot per response not yet written; no slot, no further reads
    let slots = Arc::new(Semaphore::new(ctx.write_queue));

    loop {
        let slot = tokio::select! {
            _ = shutdown.cancelled() => break,
            slot = Arc::clone(&slots).acquire_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(request)) => {
                    debug!(
                        request_id = %request.id(),
                        peer = %peer,
                        "Received {}",
                        request.signature()
                    );
                    ctx.coordinator.submit_holding(request, reply.clone(), Some(slot));
                }
                Some(Err(e)) => {
                    error!(peer = %peer, error = %e, "Protocol error, closing connection");
                    ctx.metrics.record_protocol_error();
                    writer.abort();
                    break;
                }
                None => {
                    debug!(peer = %peer, "Client closed connection");
                    break;
                }
            },
        }
    }

    ctx.metrics.record_disconnect();
    info!(peer = %peer, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonSerializer;
    use crate::domain::chain::InterceptorChain;
    use crate::domain::config::WorkerPoolConfig;
    use crate::domain::services::{ServiceDef, ServiceTable};
    use crate::server::dispatcher::InvocationDispatcher;
    use crate::server::pool::WorkerPool;
    use crate::transport::{TransportKind, TransportSelector};
    use shared_types::{Request, TypeDescriptor, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_peer_stops_intake() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let services = ServiceTable::new([ServiceDef::new("Echo").handler(
            "echo",
            vec![TypeDescriptor::String],
            TypeDescriptor::String,
            move |p| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(p[0].clone())
            },
        )])
        .unwrap();
        let metrics = Arc::new(RuntimeMetrics::new());
        let dispatcher = Arc::new(InvocationDispatcher::new(
            Arc::new(services),
            Arc::new(InterceptorChain::default()),
            Arc::clone(&metrics),
        ));
        let pool = Arc::new(
            WorkerPool::new(&WorkerPoolConfig {
                threads: 4,
                queue_capacity: 64,
                drain_timeout: Duration::from_secs(1),
            })
            .unwrap(),
        );
        let pipelines = TransportSelector::new(Arc::new(JsonSerializer), 1 << 20)
            .build(TransportKind::Binary)
            .unwrap();
        let ctx = Arc::new(ConnectionContext {
            pipeline: pipelines.server,
            coordinator: Arc::new(AsyncCoordinator::new(dispatcher, pool, Arc::clone(&metrics))),
            metrics,
            write_queue: 2,
        });

        // a tiny pipe: no response fits until the client reads
        let (client_io, server_io) = tokio::io::duplex(256);
        let peer: SocketAddr = "127.0.0.1:7070".parse().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve_connection(server_io, peer, ctx, shutdown.clone()));

        let (mut sink, mut stream) = pipelines.client.frame(client_io, peer).split();
        let payload = "x".repeat(4096);
        let sender = tokio::spawn(async move {
            for i in 0..10 {
                let request = Request::builder("Echo", "echo")
                    .arg(TypeDescriptor::String, payload.clone())
                    .id(format!("r{i}"))
                    .build();
                if sink.send(request).await.is_err() {
                    break;
                }
            }
            sink
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let executed = calls.load(Ordering::SeqCst);
        assert!(executed <= 2, "{executed} requests executed against 2 slots");

        let mut answered = 0;
        while answered < 10 {
            let response = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(response.result().as_str().map(str::len), Some(4096));
            answered += 1;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        let _sink = sender.await.unwrap();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unencodable_response_becomes_failure() {
        let services = ServiceTable::new([ServiceDef::new("Big").handler(
            "blob",
            vec![],
            TypeDescriptor::String,
            |_| Ok(Value::from("y".repeat(2048))),
        )])
        .unwrap();
        let metrics = Arc::new(RuntimeMetrics::new());
        let dispatcher = Arc::new(InvocationDispatcher::new(
            Arc::new(services),
            Arc::new(InterceptorChain::default()),
            Arc::clone(&metrics),
        ));
        let pool = Arc::new(WorkerPool::new(&WorkerPoolConfig::default()).unwrap());
        let pipelines = TransportSelector::new(Arc::new(JsonSerializer), 1024)
            .build(TransportKind::Binary)
            .unwrap();
        let ctx = Arc::new(ConnectionContext {
            pipeline: pipelines.server,
            coordinator: Arc::new(AsyncCoordinator::new(dispatcher, pool, Arc::clone(&metrics))),
            metrics,
            write_queue: 4,
        });

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:7070".parse().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve_connection(server_io, peer, ctx, shutdown.clone()));

        let mut client = pipelines.client.frame(client_io, peer);
        client
            .send(Request::builder("Big", "blob").id("b1").build())
            .await
            .unwrap();
        let response = client.next().await.unwrap().unwrap();
        assert_eq!(response.request_id().as_str(), "b1");
        assert_eq!(response.error().unwrap().kind, shared_types::FailureKind::Internal);

        // the connection survives
        client
            .send(Request::builder("Big", "missing").id("b2").build())
            .await
            .unwrap();
        let response = client.next().await.unwrap().unwrap();
        assert_eq!(response.request_id().as_str(), "b2");
        shutdown.cancel();
    }
}
