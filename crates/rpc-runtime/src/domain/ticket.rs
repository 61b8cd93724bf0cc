//! Call tickets - the client-side handle for one in-flight request.
//!
//! Maps request ids to waiting callers until the matching response arrives.
//!
//! Flow:
//! 1. The dispatcher calls [`PendingCalls::register`] with the request id
//! 2. The request is queued for writing and the [`CallTicket`] is returned
//! 3. The reader task decodes a response and calls [`PendingCalls::complete`]
//! 4. The caller resumes in [`CallTicket::wait`], unblocks in
//!    [`CallTicket::wait_blocking`], or its [`CallTicket::on_complete`]
//!    callback runs on the completing thread
//!
//! Every ticket resolves exactly once. Later terminal operations are logged
//! and ignored.

use crate::domain::error::RpcError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use shared_types::{RequestId, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome delivered to a waiter or callback.
pub type CallOutcome = Result<Response, RpcError>;

type Callback = Box<dyn FnOnce(CallOutcome) + Send + 'static>;

/// Lifecycle of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

struct Slot {
    state: TicketState,
    outcome: Option<CallOutcome>,
    callback: Option<Callback>,
}

/// Deadlines past the platform's `Instant` range are clamped to this.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Shared completion slot behind a ticket.
struct TicketCell {
    id: RequestId,
    timeout: Duration,
    deadline: Instant,
    slot: Mutex<Slot>,
    blocking: Condvar,
    notify: Notify,
}

impl TicketCell {
    fn new(id: RequestId, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            deadline: deadline_after(timeout),
            slot: Mutex::new(Slot {
                state: TicketState::Pending,
                outcome: None,
                callback: None,
            }),
            blocking: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Move the ticket to its terminal state. Returns false if it was
    /// already resolved.
    fn resolve(&self, outcome: CallOutcome) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != TicketState::Pending {
            warn!(
                request_id = %self.id,
                state = ?slot.state,
                "Ignoring second resolution of call ticket"
            );
            return false;
        }

        slot.state = match &outcome {
            Ok(_) => TicketState::Completed,
            Err(RpcError::Cancelled(_)) => TicketState::Cancelled,
            Err(_) => TicketState::Failed,
        };

        match slot.callback.take() {
            Some(callback) => {
                drop(slot);
                callback(outcome);
            }
            None => {
                slot.outcome = Some(outcome);
                drop(slot);
                self.blocking.notify_one();
                self.notify.notify_one();
            }
        }
        true
    }

    fn timeout_error(&self) -> RpcError {
        RpcError::Timeout {
            request_id: self.id.clone(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Handle for one in-flight call.
///
/// Consumed by exactly one of [`wait`](Self::wait),
/// [`wait_blocking`](Self::wait_blocking) or
/// [`on_complete`](Self::on_complete).
pub struct CallTicket {
    cell: Arc<TicketCell>,
    owner: Weak<PendingCalls>,
}

impl CallTicket {
    pub fn id(&self) -> &RequestId {
        &self.cell.id
    }

    pub fn state(&self) -> TicketState {
        self.cell.slot.lock().state
    }

    pub fn deadline(&self) -> Instant {
        self.cell.deadline
    }

    /// Suspend until the ticket resolves or its deadline passes.
    pub async fn wait(self) -> CallOutcome {
        let deadline = tokio::time::Instant::from_std(self.cell.deadline);
        loop {
            let ready = self.cell.slot.lock().outcome.take();
            if let Some(outcome) = ready {
                return outcome;
            }
            if tokio::time::timeout_at(deadline, self.cell.notify.notified())
                .await
                .is_err()
            {
                self.expire();
            }
        }
    }

    /// Block the calling thread until the ticket resolves or its deadline
    /// passes. Must not be called from inside the async runtime.
    pub fn wait_blocking(self) -> CallOutcome {
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(outcome) = slot.outcome.take() {
                return outcome;
            }
            if self
                .cell
                .blocking
                .wait_until(&mut slot, self.cell.deadline)
                .timed_out()
                && slot.state == TicketState::Pending
            {
                drop(slot);
                self.expire();
                slot = self.cell.slot.lock();
            }
        }
    }

    /// Register the continuation. Runs immediately on the calling thread if
    /// the ticket already resolved, otherwise on the resolving thread.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(CallOutcome) + Send + 'static,
    {
        let mut slot = self.cell.slot.lock();
        match slot.outcome.take() {
            Some(outcome) => {
                drop(slot);
                callback(outcome);
            }
            None => slot.callback = Some(Box::new(callback)),
        }
    }

    /// Cancel the call. The ticket leaves the pending table; a response
    /// arriving later is dropped.
    pub fn cancel(&self) -> bool {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(&self.cell);
        }
        let cancelled = self
            .cell
            .resolve(Err(RpcError::Cancelled(self.cell.id.clone())));
        if cancelled {
            if let Some(owner) = self.owner.upgrade() {
                owner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
        cancelled
    }

    fn expire(&self) {
        match self.owner.upgrade() {
            Some(owner) => owner.expire(&self.cell),
            None => {
                self.cell.resolve(Err(self.cell.timeout_error()));
            }
        }
    }
}

impl std::fmt::Debug for CallTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTicket")
            .field("id", &self.cell.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Statistics for the pending-call table
#[derive(Debug, Default)]
pub struct PendingStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingSnapshot {
    pub in_flight: usize,
    pub registered: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

/// Table of in-flight calls for one channel, keyed by request id.
pub struct PendingCalls {
    calls: DashMap<RequestId, Arc<TicketCell>>,
    default_timeout: Duration,
    stats: PendingStats,
}

impl PendingCalls {
    pub fn new(default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: DashMap::new(),
            default_timeout,
            stats: PendingStats::default(),
        })
    }

    /// Register a ticket for `id`.
    ///
    /// If `id` is already in flight the original ticket is left untouched and
    /// the returned ticket is already failed.
    pub fn register(self: &Arc<Self>, id: RequestId, timeout: Option<Duration>) -> CallTicket {
        let cell = Arc::new(TicketCell::new(
            id.clone(),
            timeout.unwrap_or(self.default_timeout),
        ));

        match self.calls.entry(id) {
            Entry::Occupied(entry) => {
                warn!(request_id = %entry.key(), "Duplicate request id already in flight");
                cell.resolve(Err(RpcError::AlreadyRegistered(format!(
                    "request [{}]",
                    entry.key()
                ))));
                CallTicket {
                    cell,
                    owner: Weak::new(),
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&cell));
                self.stats.registered.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %cell.id, "Registered call ticket");
                CallTicket {
                    cell,
                    owner: Arc::downgrade(self),
                }
            }
        }
    }

    /// Remove and complete the ticket matching the response id.
    ///
    /// Returns false for unknown, late or duplicate ids.
    pub fn complete(&self, response: Response) -> bool {
        let Some((_, cell)) = self.calls.remove(response.request_id()) else {
            debug!(
                request_id = %response.request_id(),
                "Dropping response for unknown or expired request"
            );
            return false;
        };
        let resolved = cell.resolve(Ok(response));
        if resolved {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        resolved
    }

    /// Remove and fail the ticket for `id`.
    pub fn fail(&self, id: &RequestId, error: RpcError) -> bool {
        let Some((_, cell)) = self.calls.remove(id) else {
            debug!(request_id = %id, "No pending call to fail");
            return false;
        };
        let resolved = cell.resolve(Err(error));
        if resolved {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        resolved
    }

    /// Fail every pending ticket with a copy of `error`.
    pub fn fail_all(&self, error: &RpcError) -> usize {
        let ids: Vec<RequestId> = self.calls.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.fail(id, error.clone()))
            .count()
    }

    /// Fail tickets whose deadline has passed. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<TicketCell>> = self
            .calls
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut removed = 0;
        for cell in expired {
            if self.calls.remove_if(&cell.id, |_, c| Arc::ptr_eq(c, &cell)).is_some() {
                warn!(
                    request_id = %cell.id,
                    timeout_ms = cell.timeout.as_millis() as u64,
                    "Removing expired call ticket"
                );
                if cell.resolve(Err(cell.timeout_error())) {
                    self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                }
                removed += 1;
            }
        }
        removed
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            in_flight: self.calls.len(),
            registered: self.stats.registered.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
        }
    }

    fn detach(&self, cell: &Arc<TicketCell>) {
        self.calls.remove_if(&cell.id, |_, c| Arc::ptr_eq(c, cell));
    }

    fn expire(&self, cell: &Arc<TicketCell>) {
        self.detach(cell);
        if cell.resolve(Err(cell.timeout_error())) {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %cell.id, "Call ticket timed out");
        }
    }
}

/// Background task failing expired tickets, for callers that registered a
/// callback and never wait.
pub async fn sweep_expired(calls: Arc<PendingCalls>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = calls.remove_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired call tickets");
                }
            }
        }
    }
}
