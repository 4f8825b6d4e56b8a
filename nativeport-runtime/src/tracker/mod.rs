//! Allocation tracker - deallocation registry plus throttled admission
//!
//! Design:
//! - One coarse `parking_lot::Mutex` guards the live-entry list and the byte
//!   total; checking a ceiling and charging the bytes happen under it, so
//!   concurrent admissions can never overshoot together.
//! - Handles dropped without an explicit deallocate post their pending
//!   release to a `crossbeam` channel. The `nativeport-deallocator` thread
//!   drains it; `collect()` drains it synchronously.
//! - With `no_pointer_gc` there is no queue consumer and drops release inline.
//! - Sleeping between retries happens outside the lock, on a condvar that
//!   releases and `interrupt()` both signal.

mod list;

#[cfg(test)]
mod tests;

pub use list::EntryId;

use crate::config::{self, RuntimeConfig};
use crate::error::{Ceiling, Error, Result};
use crate::handle::Deallocator;
use crate::logging::{
    log_admission_refused, log_admission_retry, log_admission_settled, log_deallocation, log_reclaimer,
};
use crate::memory;
use crossbeam::channel::{self, Receiver, Sender};
use list::DeallocationList;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static GLOBAL: Lazy<Arc<AllocationTracker>> = Lazy::new(|| {
    let config = config::get();
    let tracker = AllocationTracker::new(config);
    if !config.no_pointer_gc {
        if let Err(err) = tracker.spawn_reclaimer() {
            warn!(
                target: "nativeport::tracker",
                error = %err,
                "could not start deallocator thread, dropped handles wait for collect()"
            );
        }
    }
    tracker
});

/// Process-wide tracker configured from [`config::get`]
pub fn global() -> &'static Arc<AllocationTracker> {
    &GLOBAL
}

/// How dropped, still-registered handles get released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimMode {
    /// Queue the release for the deallocator thread or `collect()`
    Deferred,
    /// Release on the dropping thread
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_bytes: usize,
    pub max_physical_bytes: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl From<&RuntimeConfig> for Limits {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_physical_bytes: config.max_physical_bytes,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

/// Snapshot of tracker bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub total_bytes: usize,
    pub live_entries: usize,
    pub pending_releases: usize,
}

pub struct AllocationTracker {
    limits: Limits,
    mode: ReclaimMode,
    list: Mutex<DeallocationList>,
    released: Condvar,
    interrupts: AtomicU64,
    reclaimer_running: AtomicBool,
    queue_tx: Sender<PendingRelease>,
    queue_rx: Receiver<PendingRelease>,
}

impl AllocationTracker {
    pub fn new(config: &RuntimeConfig) -> Arc<Self> {
        let mode = if config.no_pointer_gc {
            ReclaimMode::Inline
        } else {
            ReclaimMode::Deferred
        };
        Self::with_limits(Limits::from(config), mode)
    }

    pub fn with_limits(limits: Limits, mode: ReclaimMode) -> Arc<Self> {
        let (queue_tx, queue_rx) = channel::unbounded();
        Arc::new(Self {
            limits,
            mode,
            list: Mutex::new(DeallocationList::new()),
            released: Condvar::new(),
            interrupts: AtomicU64::new(0),
            reclaimer_running: AtomicBool::new(false),
            queue_tx,
            queue_rx,
        })
    }

    #[inline]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[inline]
    pub fn mode(&self) -> ReclaimMode {
        self.mode
    }

    /// Start the background deallocator thread (idempotent)
    pub fn spawn_reclaimer(&self) -> std::io::Result<()> {
        if self.mode == ReclaimMode::Inline || self.reclaimer_running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let queue = self.queue_rx.clone();
        let spawned = std::thread::Builder::new()
            .name("nativeport-deallocator".to_string())
            .spawn(move || {
                log_reclaimer(true);
                for pending in queue.iter() {
                    pending.run();
                }
                log_reclaimer(false);
            });
        if spawned.is_err() {
            self.reclaimer_running.store(false, Ordering::Release);
        }
        spawned.map(|_| ())
    }

    /// Charge `bytes` against the ceilings, retrying under memory pressure.
    ///
    /// Each retry drains the reclamation queue, waits up to `retry_delay`
    /// (cut short by any release), and trims the C heap before re-checking.
    pub fn try_admit(self: &Arc<Self>, handle_id: u64, bytes: usize) -> Result<Registration> {
        let epoch = self.interrupts.load(Ordering::Acquire);
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            let physical = self.physical_probe();
            let refusal = {
                let mut list = self.list.lock();
                match self.check(list.total_bytes(), bytes, physical) {
                    Ok(()) => {
                        let id = list.add(handle_id, bytes);
                        if attempt > 0 {
                            log_admission_settled(attempt, bytes, started.elapsed(), true);
                        }
                        return Ok(Registration {
                            tracker: Arc::clone(self),
                            id,
                            bytes,
                        });
                    }
                    Err(refusal) => refusal,
                }
            };

            let interrupted = self.interrupts.load(Ordering::Acquire) != epoch;
            if interrupted {
                warn!(
                    target: "nativeport::tracker",
                    attempt,
                    requested = bytes,
                    "admission retry loop interrupted"
                );
            }
            if interrupted || attempt >= self.limits.max_retries {
                let err = refusal.into_error(bytes);
                if attempt > 0 {
                    log_admission_settled(attempt, bytes, started.elapsed(), false);
                }
                log_admission_refused(&err.to_string());
                return Err(err);
            }

            attempt += 1;
            log_admission_retry(attempt, bytes, refusal.current, physical);
            if self.collect() == 0 {
                self.wait_for_release();
            }
            memory::trim_memory();
        }
    }

    fn physical_probe(&self) -> Option<usize> {
        if self.limits.max_physical_bytes > 0 {
            memory::physical_bytes()
        } else {
            None
        }
    }

    fn check(&self, total: usize, bytes: usize, physical: Option<usize>) -> core::result::Result<(), Refusal> {
        let max_bytes = self.limits.max_bytes;
        if max_bytes > 0 && total.checked_add(bytes).map_or(true, |sum| sum > max_bytes) {
            return Err(Refusal {
                ceiling: Ceiling::TrackedBytes,
                current: total,
                limit: max_bytes,
            });
        }
        let max_physical = self.limits.max_physical_bytes;
        match physical {
            Some(physical) if max_physical > 0 && physical > max_physical => Err(Refusal {
                ceiling: Ceiling::PhysicalBytes,
                current: physical,
                limit: max_physical,
            }),
            _ => Ok(()),
        }
    }

    fn wait_for_release(&self) {
        let mut list = self.list.lock();
        self.released.wait_for(&mut list, self.limits.retry_delay);
    }

    /// Abort every retry loop currently waiting in `try_admit`
    pub fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::AcqRel);
        self.released.notify_all();
    }

    /// Run every queued release on this thread; returns how many ran
    pub fn collect(&self) -> usize {
        let mut count = 0;
        while let Ok(pending) = self.queue_rx.try_recv() {
            pending.run();
            count += 1;
        }
        if count > 0 {
            debug!(target: "nativeport::tracker", released = count, "collected pending releases");
        }
        count
    }

    /// Hand over the release of a handle nobody references anymore
    pub(crate) fn dispose(&self, pending: PendingRelease) {
        match self.mode {
            ReclaimMode::Inline => pending.run(),
            ReclaimMode::Deferred => {
                if let Err(channel::SendError(pending)) = self.queue_tx.send(pending) {
                    pending.run();
                }
            }
        }
    }

    fn remove(&self, id: EntryId) -> Option<usize> {
        let removed = self.list.lock().remove(id);
        if removed.is_some() {
            self.released.notify_all();
        }
        removed
    }

    pub fn total_bytes(&self) -> usize {
        self.list.lock().total_bytes()
    }

    pub fn is_registered(&self, id: EntryId) -> bool {
        self.list.lock().contains(id)
    }

    pub fn stats(&self) -> TrackerStats {
        let list = self.list.lock();
        TrackerStats {
            total_bytes: list.total_bytes(),
            live_entries: list.len(),
            pending_releases: self.queue_rx.len(),
        }
    }

    /// Live `(handle_id, bytes)` pairs, newest first
    pub fn live_entries(&self) -> Vec<(u64, usize)> {
        self.list.lock().iter().collect()
    }
}

impl core::fmt::Debug for AllocationTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllocationTracker")
            .field("limits", &self.limits)
            .field("mode", &self.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Refusal {
    ceiling: Ceiling,
    current: usize,
    limit: usize,
}

impl Refusal {
    fn into_error(self, attempted: usize) -> Error {
        Error::OutOfMemory {
            ceiling: self.ceiling,
            attempted,
            current: self.current,
            limit: self.limit,
        }
    }
}

/// Admitted bytes; dropping it removes the registry entry
#[derive(Debug)]
pub struct Registration {
    tracker: Arc<AllocationTracker>,
    id: EntryId,
    bytes: usize,
}

impl Registration {
    #[inline]
    pub fn id(&self) -> EntryId {
        self.id
    }

    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        &self.tracker
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}

/// A release waiting for the deallocator thread
pub(crate) struct PendingRelease {
    pub label: String,
    pub deallocator: Box<dyn Deallocator>,
    pub registration: Registration,
}

impl PendingRelease {
    /// Clear (run the deallocator once) then remove the registry entry
    pub fn run(self) {
        let PendingRelease {
            label,
            mut deallocator,
            registration,
        } = self;
        deallocator.deallocate();
        log_deallocation(&label, registration.bytes(), true);
        drop(registration);
    }
}
