//! Async execution coordinator.
//!
//! Moves each decoded request off the I/O threads onto the worker pool and
//! hands the finished response back to the connection's writer task.

use crate::domain::error::{RpcError, RpcResult};
use crate::middleware::RuntimeMetrics;
use crate::server::dispatcher::InvocationDispatcher;
use crate::server::pool::WorkerPool;
use shared_types::{FailureKind, Request, RequestId, Response, WireFailure};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A response on its way to a connection writer. The writer reports the
/// outcome of the write through `written`.
#[derive(Debug)]
pub struct OutboundResponse {
    pub response: Response,
    pub written: Option<oneshot::Sender<RpcResult<()>>>,
}

/// Resolves once the response for one submitted request has been written.
#[derive(Debug)]
pub struct SubmitHandle {
    request_id: RequestId,
    task: JoinHandle<RpcResult<()>>,
}

impl SubmitHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub async fn written(self) -> RpcResult<()> {
        self.task
            .await
            .map_err(|e| RpcError::Transport(format!("response task failed: {e}")))?
    }
}

pub struct AsyncCoordinator {
    dispatcher: Arc<InvocationDispatcher>,
    pool: Arc<WorkerPool>,
    metrics: Arc<RuntimeMetrics>,
}

impl AsyncCoordinator {
    pub fn new(
        dispatcher: Arc<InvocationDispatcher>,
        pool: Arc<WorkerPool>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Schedule `request` on the worker pool. The response goes to `reply`
    /// in completion order, not arrival order.
    pub fn submit(&self, request: Request, reply: mpsc::Sender<OutboundResponse>) -> SubmitHandle {
        self.submit_holding(request, reply, None)
    }

    /// [`submit`](Self::submit), keeping `slot` until the response has been
    /// written or has failed to write.
    pub fn submit_holding(
        &self,
        request: Request,
        reply: mpsc::Sender<OutboundResponse>,
        slot: Option<OwnedSemaphorePermit>,
    ) -> SubmitHandle {
        let request_id = request.id().clone();
        let (done_tx, done_rx) = oneshot::channel();

        let request = Arc::new(request);
        let dispatcher = Arc::clone(&self.dispatcher);
        let metrics = Arc::clone(&self.metrics);
        let rejected = self
            .pool
            .try_spawn(move || {
                let id = request.id().clone();
                let response = match catch_unwind(AssertUnwindSafe(|| dispatcher.handle(&request))) {
                    Ok(response) => response,
                    Err(panic) => {
                        metrics.record_panic();
                        let message = panic_message(panic.as_ref());
                        error!(request_id = %id, panic = %message, "Service method panicked");
                        Response::failure(
                            id,
                            WireFailure::new(FailureKind::Internal, format!("method panicked: {message}")),
                        )
                    }
                };
                let _ = done_tx.send(response);
            })
            .err();

        if let Some(e) = &rejected {
            self.metrics.record_rejection();
            warn!(request_id = %request_id, error = %e, "Rejected request");
        }

        let id = request_id.clone();
        let task = tokio::spawn(async move {
            let _slot = slot;
            let response = match rejected {
                Some(e) => Response::failure(id.clone(), e.to_wire()),
                None => done_rx.await.unwrap_or_else(|_| {
                    Response::failure(
                        id.clone(),
                        WireFailure::new(FailureKind::Internal, "worker dropped the request"),
                    )
                }),
            };

            let (written_tx, written_rx) = oneshot::channel();
            reply
                .send(OutboundResponse {
                    response,
                    written: Some(written_tx),
                })
                .await
                .map_err(|_| RpcError::connection_lost("response writer closed"))?;

            let result = written_rx
                .await
                .map_err(|_| RpcError::connection_lost("response writer closed"))?;
            match &result {
                Ok(()) => debug!(request_id = %id, "Response written"),
                Err(e) => warn!(request_id = %id, error = %e, "Response not written"),
            }
            result
        });

        SubmitHandle { request_id, task }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
