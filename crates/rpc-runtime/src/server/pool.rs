//! Bounded worker pool for application logic.
//!
//! A rayon thread pool, independent of the I/O threads, guarded by a
//! semaphore of `threads + queue_capacity` permits. A submission that cannot
//! get a permit is rejected instead of queued.

use crate::domain::config::WorkerPoolConfig;
use crate::domain::error::{RpcError, RpcResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    permits: Arc<Semaphore>,
    capacity: u32,
    threads: usize,
    closed: AtomicBool,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolSnapshot {
    pub threads: usize,
    pub capacity: u32,
    pub in_flight: u32,
    pub closed: bool,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> RpcResult<Self> {
        let capacity = u32::try_from(config.threads + config.queue_capacity)
            .map_err(|_| RpcError::Config("worker pool capacity too large".into()))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("rpc-worker-{i}"))
            .panic_handler(|_| error!("Worker job panicked outside the invocation guard"))
            .build()
            .map_err(|e| RpcError::Config(format!("cannot start worker pool: {e}")))?;

        info!(
            threads = config.threads,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            pool,
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            threads: config.threads,
            closed: AtomicBool::new(false),
        })
    }

    /// Run `job` on a worker, or reject it with [`RpcError::Overloaded`]
    /// when the pool is saturated or shutting down.
    pub fn try_spawn<F>(&self, job: F) -> RpcResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Overloaded("worker pool is shutting down".into()));
        }
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| RpcError::Overloaded("worker pool queue is full".into()))?;

        self.pool.spawn(move || {
            let _permit = permit;
            job();
        });
        Ok(())
    }

    pub fn in_flight(&self) -> u32 {
        self.capacity - self.permits.available_permits() as u32
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            threads: self.threads,
            capacity: self.capacity,
            in_flight: self.in_flight(),
            closed: self.closed.load(Ordering::Acquire),
        }
    }

    /// Stop admitting work and wait for in-flight jobs. Returns false if
    /// jobs were still running when `timeout` elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        match tokio::time::timeout(timeout, self.permits.acquire_many(self.capacity)).await {
            Ok(Ok(_all)) => {
                info!("Worker pool drained");
                true
            }
            _ => {
                warn!(in_flight = self.in_flight(), "Worker pool drain timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config(threads: usize, queue_capacity: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            threads,
            queue_capacity,
            drain_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = WorkerPool::new(&config(2, 4)).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            pool.try_spawn(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..3).map(|_| rx.recv().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rejects_when_saturated() {
        let pool = WorkerPool::new(&config(1, 1)).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));

        for _ in 0..2 {
            let release_rx = Arc::clone(&release_rx);
            pool.try_spawn(move || {
                let _ = release_rx.lock().recv();
            })
            .unwrap();
        }
        assert!(matches!(
            pool.try_spawn(|| {}),
            Err(RpcError::Overloaded(_))
        ));
        assert_eq!(pool.in_flight(), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert!(pool.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_admission() {
        let pool = WorkerPool::new(&config(1, 0)).unwrap();
        assert!(pool.shutdown(Duration::from_millis(100)).await);
        assert!(pool.try_spawn(|| {}).is_err());
        assert!(pool.snapshot().closed);
    }
}
