//! Single-fulfilment rendezvous between build observers and waiting calls.
//!
//! A waiter is registered under `(job, queue id)` and later re-keyed to
//! `(job, build number)`. Pollers and webhooks race to fulfil it; the
//! orchestrator's deadline races them both. Every slot carries one atomic
//! state word and the first compare-and-swap away from `PENDING` wins.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jenkins_mcp_core::{BuildPhase, BuildResult, Error, PendingWait, Result};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long a terminal event with no waiter is kept around.
pub const DEFAULT_ORPHAN_TTL: Duration = Duration::from_secs(120);

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const EXPIRED: u8 = 2;
const ABANDONED: u8 = 3;

// =============================================================================
// Keys
// =============================================================================

/// Identifier half of a correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKey {
    Queue(u64),
    Build(u64),
}

/// `(job, queue id)` or `(job, build number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub job: String,
    pub id: WaitKey,
}

impl CorrelationKey {
    pub fn queue(job: impl Into<String>, queue_id: u64) -> Self {
        Self {
            job: job.into(),
            id: WaitKey::Queue(queue_id),
        }
    }

    pub fn build(job: impl Into<String>, build_number: u64) -> Self {
        Self {
            job: job.into(),
            id: WaitKey::Build(build_number),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            WaitKey::Queue(id) => write!(f, "{} (queue item {})", self.job, id),
            WaitKey::Build(n) => write!(f, "{} #{}", self.job, n),
        }
    }
}

// =============================================================================
// Slots
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode_phase(phase: BuildPhase) -> u8 {
    match phase {
        BuildPhase::Queued => 0,
        BuildPhase::Running => 1,
        BuildPhase::Complete => 2,
    }
}

fn decode_phase(raw: u8) -> BuildPhase {
    match raw {
        0 => BuildPhase::Queued,
        1 => BuildPhase::Running,
        _ => BuildPhase::Complete,
    }
}

struct Slot {
    state: AtomicU8,
    phase: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<BuildResult>>>,
    origin: CorrelationKey,
    key: Mutex<CorrelationKey>,
    created_at: Instant,
    deadline: Instant,
}

impl Slot {
    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Move out of `PENDING`. Only one caller ever gets `true`.
    fn settle(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fulfill(&self, result: BuildResult) -> bool {
        if !self.settle(FULFILLED) {
            return false;
        }
        self.phase
            .store(encode_phase(result.phase), Ordering::Release);
        if let Some(sender) = lock(&self.sender).take() {
            // The receiver may already be gone; the result is simply dropped.
            let _ = sender.send(result);
        }
        true
    }

    fn observe(&self, phase: BuildPhase) {
        self.phase
            .fetch_max(encode_phase(phase), Ordering::AcqRel);
    }

    fn current_key(&self) -> CorrelationKey {
        lock(&self.key).clone()
    }

    fn snapshot(&self, now: Instant) -> PendingWait {
        let key = self.current_key();
        let queue_id = match (self.origin.id, key.id) {
            (_, WaitKey::Queue(id)) | (WaitKey::Queue(id), _) => Some(id),
            _ => None,
        };
        let build_number = match key.id {
            WaitKey::Build(n) => Some(n),
            WaitKey::Queue(_) => None,
        };
        PendingWait {
            job: key.job,
            queue_id,
            build_number,
            phase: decode_phase(self.phase.load(Ordering::Acquire)),
            age_ms: millis(now.saturating_duration_since(self.created_at)),
            remaining_ms: millis(self.deadline.saturating_duration_since(now)),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Receiving end of a waiter. Exactly one exists per registered waiter.
pub struct WaiterHandle {
    slot: Arc<Slot>,
    receiver: Option<oneshot::Receiver<BuildResult>>,
}

impl WaiterHandle {
    /// A shareable view of this waiter for observers.
    pub fn watcher(&self) -> WaiterRef {
        WaiterRef(Arc::clone(&self.slot))
    }

    pub fn key(&self) -> CorrelationKey {
        self.slot.current_key()
    }

    pub fn deadline(&self) -> Instant {
        self.slot.deadline
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        // Nobody can receive the result any more; let sweep() reclaim the slot.
        if self.receiver.is_some() {
            self.slot.settle(ABANDONED);
        }
    }
}

impl fmt::Debug for WaiterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterHandle")
            .field("key", &self.slot.current_key())
            .field("state", &self.slot.state.load(Ordering::Acquire))
            .finish()
    }
}

/// Observer-side reference to a waiter, used by the poll loop.
#[derive(Clone)]
pub struct WaiterRef(Arc<Slot>);

impl WaiterRef {
    /// True once the waiter was fulfilled, expired or abandoned.
    pub fn is_settled(&self) -> bool {
        !self.0.is_pending()
    }

    pub fn current_key(&self) -> CorrelationKey {
        self.0.current_key()
    }

    pub fn deadline(&self) -> Instant {
        self.0.deadline
    }
}

struct Orphan {
    result: BuildResult,
    received_at: Instant,
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent map of pending waiters.
///
/// Sharded by key; no registry-wide lock is taken on resolve or wait.
pub struct CorrelationRegistry {
    waiters: DashMap<CorrelationKey, Arc<Slot>>,
    orphans: DashMap<CorrelationKey, Orphan>,
    orphan_ttl: Duration,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_orphan_ttl(DEFAULT_ORPHAN_TTL)
    }

    pub fn with_orphan_ttl(orphan_ttl: Duration) -> Self {
        Self {
            waiters: DashMap::new(),
            orphans: DashMap::new(),
            orphan_ttl,
        }
    }

    /// Register a waiter that must be settled by `deadline`.
    ///
    /// Fails with `Conflict` if another waiter for the same key is still
    /// pending. A terminal event that arrived before registration fulfils the
    /// new waiter immediately.
    pub fn register(&self, key: CorrelationKey, deadline: Instant) -> Result<WaiterHandle> {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Slot {
            state: AtomicU8::new(PENDING),
            phase: AtomicU8::new(encode_phase(BuildPhase::Queued)),
            sender: Mutex::new(Some(sender)),
            origin: key.clone(),
            key: Mutex::new(key.clone()),
            created_at: Instant::now(),
            deadline,
        });

        match self.waiters.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_pending() {
                    return Err(Error::Conflict(format!(
                        "a call is already waiting on {}",
                        key
                    )));
                }
                entry.insert(Arc::clone(&slot));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&slot));
            }
        }

        debug!(key = %key, "Waiter registered");
        self.claim_orphan(&key, &slot);

        Ok(WaiterHandle {
            slot,
            receiver: Some(receiver),
        })
    }

    /// Deliver a terminal result to the waiter under `key`.
    ///
    /// Returns `true` only if this call fulfilled the waiter. `false` means
    /// unknown, already settled or not terminal; callers treat it as a no-op.
    /// A terminal result nobody is waiting for is kept for the orphan TTL.
    pub fn resolve(&self, key: &CorrelationKey, result: BuildResult) -> bool {
        if !result.is_terminal() {
            self.observe(key, result.phase);
            return false;
        }

        if let Some(slot) = self.slot_for(key) {
            return self.fulfill_slot(&slot, result);
        }

        debug!(key = %key, "No waiter for terminal result, keeping as orphan");
        self.orphans.insert(
            key.clone(),
            Orphan {
                result,
                received_at: Instant::now(),
            },
        );
        // A waiter may have been registered between the lookup and the insert.
        if let Some(slot) = self.slot_for(key) {
            self.claim_orphan(key, &slot);
        }
        false
    }

    /// Fulfil the waiter behind `watcher`, whatever key it currently has.
    pub fn resolve_waiter(&self, watcher: &WaiterRef, result: BuildResult) -> bool {
        self.fulfill_slot(&watcher.0, result)
    }

    /// Wait for the result or the deadline, whichever comes first.
    ///
    /// Cancel-safe: dropping the future leaves the handle usable.
    pub async fn wait(&self, handle: &mut WaiterHandle) -> Result<BuildResult> {
        let slot = Arc::clone(&handle.slot);
        let waited = slot.deadline.saturating_duration_since(slot.created_at);

        let receiver = handle.receiver.as_mut().ok_or_else(|| {
            Error::Conflict(format!("waiter for {} was already consumed", slot.current_key()))
        })?;

        let received = match tokio::time::timeout_at(slot.deadline, &mut *receiver).await {
            Ok(received) => received,
            Err(_) if slot.settle(EXPIRED) => {
                handle.receiver = None;
                self.remove_keys(&slot);
                debug!(key = %slot.current_key(), "Waiter expired");
                return Err(Error::Timeout { waited });
            }
            // A resolver won the race against the deadline; its send is
            // imminent.
            Err(_) => receiver.await,
        };

        handle.receiver = None;
        self.remove_keys(&slot);
        received.map_err(|_| Error::Timeout { waited })
    }

    /// Move a waiter from `old` to `new` (queue id promoted to build number).
    ///
    /// Deadline and creation time are kept. Returns whether a pending waiter
    /// now lives under `new`.
    pub fn rekey(&self, old: &CorrelationKey, new: CorrelationKey) -> bool {
        match self.slot_for(old) {
            Some(slot) => self.rekey_slot(&slot, new),
            None => self.slot_for(&new).is_some_and(|slot| slot.is_pending()),
        }
    }

    /// Re-key the waiter behind `watcher`.
    pub fn rekey_waiter(&self, watcher: &WaiterRef, new: CorrelationKey) -> bool {
        self.rekey_slot(&watcher.0, new)
    }

    /// Record a non-terminal phase for the waiter under `key`.
    pub fn observe(&self, key: &CorrelationKey, phase: BuildPhase) -> bool {
        match self.slot_for(key) {
            Some(slot) if slot.is_pending() => {
                slot.observe(phase);
                true
            }
            _ => false,
        }
    }

    pub fn observe_waiter(&self, watcher: &WaiterRef, phase: BuildPhase) {
        watcher.0.observe(phase);
    }

    /// Give up on a waiter, e.g. because polling hit a fatal error.
    ///
    /// If an observer fulfilled it first, that result is returned.
    pub async fn abandon(&self, handle: &mut WaiterHandle) -> Option<BuildResult> {
        let slot = Arc::clone(&handle.slot);
        let receiver = handle.receiver.take();
        self.remove_keys(&slot);

        if slot.settle(ABANDONED) {
            lock(&slot.sender).take();
            debug!(key = %slot.current_key(), "Waiter abandoned");
            return None;
        }
        match receiver {
            Some(receiver) => receiver.await.ok(),
            None => None,
        }
    }

    /// Whether a pending waiter exists under `key`.
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.slot_for(key).is_some_and(|slot| slot.is_pending())
    }

    /// Inspect the pending waiter under `key`.
    pub fn lookup(&self, key: &CorrelationKey) -> Option<PendingWait> {
        self.slot_for(key)
            .filter(|slot| slot.is_pending())
            .map(|slot| slot.snapshot(Instant::now()))
    }

    /// Snapshot of all pending waiters.
    pub fn pending(&self) -> Vec<PendingWait> {
        let now = Instant::now();
        let mut seen = HashSet::new();
        let mut out: Vec<PendingWait> = self
            .waiters
            .iter()
            .filter(|entry| entry.value().is_pending())
            .filter(|entry| seen.insert(Arc::as_ptr(entry.value())))
            .map(|entry| entry.value().snapshot(now))
            .collect();
        out.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        out
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Drop settled slots, waiters past their deadline and stale orphans.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.waiters.len() + self.orphans.len();

        self.waiters.retain(|key, slot| {
            if slot.is_pending() && slot.deadline <= now && slot.settle(EXPIRED) {
                // Dropping the sender wakes a receiver that missed its timer.
                lock(&slot.sender).take();
                warn!(key = %key, "Reclaimed expired waiter");
            }
            slot.is_pending()
        });
        let ttl = self.orphan_ttl;
        self.orphans
            .retain(|_, orphan| now.saturating_duration_since(orphan.received_at) < ttl);

        let removed = before.saturating_sub(self.waiters.len() + self.orphans.len());
        if removed > 0 {
            debug!(removed, "Registry sweep");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn slot_for(&self, key: &CorrelationKey) -> Option<Arc<Slot>> {
        self.waiters.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn fulfill_slot(&self, slot: &Arc<Slot>, result: BuildResult) -> bool {
        let phase = result.phase;
        if !slot.fulfill(result) {
            return false;
        }
        self.remove_keys(slot);
        debug!(key = %slot.current_key(), phase = %phase, "Waiter fulfilled");
        true
    }

    fn remove_keys(&self, slot: &Arc<Slot>) {
        let keys = [slot.origin.clone(), slot.current_key()];
        for key in keys.iter() {
            self.waiters
                .remove_if(key, |_, existing| Arc::ptr_eq(existing, slot));
        }
    }

    fn rekey_slot(&self, slot: &Arc<Slot>, new: CorrelationKey) -> bool {
        if !slot.is_pending() {
            return false;
        }
        let old = slot.current_key();
        if old == new {
            return true;
        }

        match self.waiters.entry(new.clone()) {
            Entry::Occupied(mut entry) => {
                if Arc::ptr_eq(entry.get(), slot) {
                    // Already promoted by another observer.
                } else if entry.get().is_pending() {
                    warn!(from = %old, to = %new, "Rekey target already has a waiter");
                    return false;
                } else {
                    entry.insert(Arc::clone(slot));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(slot));
            }
        }

        *lock(&slot.key) = new.clone();
        self.waiters
            .remove_if(&old, |_, existing| Arc::ptr_eq(existing, slot));
        debug!(from = %old, to = %new, "Waiter re-keyed");

        self.claim_orphan(&new, slot);
        true
    }

    /// Hand a stored orphan for `key` to `slot`, if one is fresh.
    fn claim_orphan(&self, key: &CorrelationKey, slot: &Arc<Slot>) {
        if !slot.is_pending() {
            return;
        }
        let Some((_, orphan)) = self.orphans.remove(key) else {
            return;
        };
        if Instant::now().saturating_duration_since(orphan.received_at) >= self.orphan_ttl {
            return;
        }
        debug!(key = %key, "Claiming early terminal event");
        self.fulfill_slot(slot, orphan.result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenkins_mcp_core::BuildOutcome;

    fn done(job: &str, number: u64) -> BuildResult {
        BuildResult::complete(job, number, BuildOutcome::Success)
    }

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_resolve_delivers_result_once() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::build("build-api", 7);
        let mut handle = registry.register(key.clone(), in_secs(10)).unwrap();

        assert!(registry.resolve(&key, done("build-api", 7)));
        assert!(!registry.resolve(&key, done("build-api", 7)));

        let result = registry.wait(&mut handle).await.unwrap();
        assert_eq!(result.build_number, Some(7));
        assert!(!registry.contains(&key));
    }

    #[tokio::test]
    async fn test_register_conflicts_with_pending_waiter() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);
        let _first = registry.register(key.clone(), in_secs(10)).unwrap();

        let err = registry.register(key, in_secs(10)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_replaces_settled_waiter() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);
        let first = registry.register(key.clone(), in_secs(10)).unwrap();
        drop(first);

        assert!(registry.register(key, in_secs(10)).is_ok());
    }

    #[tokio::test]
    async fn test_non_terminal_resolve_only_observes() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);
        let _handle = registry.register(key.clone(), in_secs(10)).unwrap();

        assert!(!registry.resolve(&key, BuildResult::running("build-api", 7)));
        let pending = registry.lookup(&key).unwrap();
        assert_eq!(pending.phase, BuildPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_at_deadline() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);
        let start = Instant::now();
        let mut handle = registry
            .register(key.clone(), start + Duration::from_millis(100))
            .unwrap();

        let err = registry.wait(&mut handle).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));

        // Late result after expiry is a no-op.
        assert!(!registry.resolve(&key, done("build-api", 7)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_have_one_winner() {
        let registry = Arc::new(CorrelationRegistry::new());
        let key = CorrelationKey::build("build-api", 7);
        let mut handle = registry.register(key.clone(), in_secs(10)).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                tokio::spawn(async move { registry.resolve(&key, done("build-api", 7)) })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(registry.wait(&mut handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_rekey_preserves_deadline_and_routes_build_events() {
        let registry = CorrelationRegistry::new();
        let queue_key = CorrelationKey::queue("build-api", 42);
        let build_key = CorrelationKey::build("build-api", 7);
        let deadline = in_secs(10);
        let mut handle = registry.register(queue_key.clone(), deadline).unwrap();

        assert!(registry.rekey(&queue_key, build_key.clone()));
        assert_eq!(handle.key(), build_key);
        assert_eq!(handle.deadline(), deadline);
        assert!(!registry.contains(&queue_key));

        assert!(registry.resolve(&build_key, done("build-api", 7)));
        assert_eq!(
            registry.wait(&mut handle).await.unwrap().build_number,
            Some(7)
        );
    }

    #[tokio::test]
    async fn test_webhook_before_rekey_is_claimed_on_rekey() {
        let registry = CorrelationRegistry::new();
        let queue_key = CorrelationKey::queue("build-api", 42);
        let build_key = CorrelationKey::build("build-api", 7);
        let mut handle = registry.register(queue_key.clone(), in_secs(10)).unwrap();

        // The webhook only knows the build number and beats the poller.
        assert!(!registry.resolve(&build_key, done("build-api", 7)));
        assert!(registry.contains(&queue_key));

        registry.rekey_waiter(&handle.watcher(), build_key);
        let result = registry.wait(&mut handle).await.unwrap();
        assert_eq!(result.outcome, BuildOutcome::Success);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_rekey_is_idempotent() {
        let registry = CorrelationRegistry::new();
        let queue_key = CorrelationKey::queue("build-api", 42);
        let build_key = CorrelationKey::build("build-api", 7);
        let handle = registry.register(queue_key.clone(), in_secs(10)).unwrap();

        assert!(registry.rekey(&queue_key, build_key.clone()));
        assert!(registry.rekey(&queue_key, build_key.clone()));
        assert!(registry.rekey_waiter(&handle.watcher(), build_key));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_early_event_fulfils_later_registration() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);

        assert!(!registry.resolve(&key, done("build-api", 7)));
        let mut handle = registry.register(key, in_secs(10)).unwrap();
        assert!(handle.watcher().is_settled());
        assert!(registry.wait(&mut handle).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_orphans_are_swept() {
        let registry = CorrelationRegistry::with_orphan_ttl(Duration::from_millis(10));
        let key = CorrelationKey::queue("build-api", 42);
        registry.resolve(&key, done("build-api", 7));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.sweep(), 1);

        let handle = registry.register(key, in_secs(10)).unwrap();
        assert!(!handle.watcher().is_settled());
    }

    #[tokio::test]
    async fn test_abandon_pending_and_fulfilled() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::queue("build-api", 42);

        let mut handle = registry.register(key.clone(), in_secs(10)).unwrap();
        assert!(registry.abandon(&mut handle).await.is_none());
        assert!(!registry.resolve(&key, done("build-api", 7)));

        let other = CorrelationKey::queue("build-api", 43);
        let mut handle = registry.register(other.clone(), in_secs(10)).unwrap();
        assert!(registry.resolve(&other, done("build-api", 8)));
        let result = registry.abandon(&mut handle).await.unwrap();
        assert_eq!(result.build_number, Some(8));
    }

    #[tokio::test]
    async fn test_pending_snapshot_and_sweep() {
        let registry = CorrelationRegistry::new();
        let queue_key = CorrelationKey::queue("build-api", 42);
        let handle = registry.register(queue_key.clone(), in_secs(10)).unwrap();
        registry.rekey(&queue_key, CorrelationKey::build("build-api", 7));
        let _other = registry
            .register(CorrelationKey::queue("deploy", 50), in_secs(10))
            .unwrap();

        let pending = registry.pending();
        assert_eq!(pending.len(), 2);
        let build = pending.iter().find(|p| p.job == "build-api").unwrap();
        assert_eq!(build.queue_id, Some(42));
        assert_eq!(build.build_number, Some(7));
        assert!(build.remaining_ms > 0);

        drop(handle);
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.pending().len(), 1);
    }
}
