//! `ClauseExchange` payloads and the bounded producer/consumer databases that
//! pass them between solvers.
//!
//! Layer L0 (allocation + refcounting) and L1 (`ClauseDatabase`) of the
//! orchestration core. See `painless-solver` for the capability that
//! produces and consumes these payloads, and `painless-sharing` for the
//! diffusion policy built on top of `ClauseDatabase::select`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use log::trace;

/// Sentinel producer id for clauses with no originating solver (e.g. clauses
/// received over the distributed transport).
pub const EXTERNAL_PRODUCER: i32 = -1;

/// The payload of a learned (or initial) clause as exchanged between
/// solvers. Immutable after construction; literals are non-zero, negative
/// meaning negated.
#[derive(Debug)]
pub struct ClauseExchange {
    literals: Vec<i32>,
    lbd: u32,
    from: i32,
}

impl ClauseExchange {
    pub fn literals(&self) -> &[i32] {
        &self.literals
    }

    pub fn size(&self) -> usize {
        self.literals.len()
    }

    pub fn lbd(&self) -> u32 {
        self.lbd
    }

    pub fn from(&self) -> i32 {
        self.from
    }
}

/// An ownership-typed handle to a `ClauseExchange`. Cloning `acquire`s a
/// reference; dropping `release`s it. The literal payload itself is never
/// copied — only the `Arc` is shared.
pub struct SharedClause(Arc<ClauseExchange>);

impl SharedClause {
    pub fn literals(&self) -> &[i32] {
        self.0.literals()
    }

    pub fn size(&self) -> usize {
        self.0.size()
    }

    pub fn lbd(&self) -> u32 {
        self.0.lbd()
    }

    pub fn from(&self) -> i32 {
        self.0.from()
    }

    /// Strong-count of the underlying payload; mostly useful for tests
    /// asserting the refcounting invariant.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Clone for SharedClause {
    fn clone(&self) -> Self {
        ClauseManager::record_acquire();
        SharedClause(Arc::clone(&self.0))
    }
}

impl Drop for SharedClause {
    fn drop(&mut self) {
        ClauseManager::record_release();
    }
}

/// Allocates `ClauseExchange` payloads. Keeps a free-list of literal buffers
/// to avoid reallocating on every clause, mirroring the locality concerns of
/// the original `ClauseAllocator`.
pub struct ClauseAllocator {
    free_list: Mutex<Vec<Vec<i32>>>,
}

impl ClauseAllocator {
    pub fn new() -> Self {
        ClauseAllocator {
            free_list: Mutex::new(Vec::new()),
        }
    }

    /// Allocates a new `SharedClause` with refcount 1. `literals` must be
    /// non-empty (`size >= 1`); an empty clause is a load-time error, not an
    /// allocator concern (see `painless-coordinator::dimacs`).
    pub fn allocate(&self, literals: Vec<i32>, lbd: u32, from: i32) -> SharedClause {
        debug_assert!(!literals.is_empty(), "clause size must be >= 1");
        ClauseManager::record_acquire();
        SharedClause(Arc::new(ClauseExchange {
            literals,
            lbd,
            from,
        }))
    }

    /// Reclaims a literal buffer for reuse by a future `allocate` call with
    /// capacity `>= buf.capacity()`. Callers hand this a buffer they own
    /// outright (e.g. a scratch `Vec` about to be dropped).
    pub fn recycle(&self, mut buf: Vec<i32>) {
        buf.clear();
        let mut fl = self.free_list.lock();
        if fl.len() < 256 {
            fl.push(buf);
        }
    }

    /// Takes a recycled buffer if one is available, otherwise a fresh one.
    pub fn scratch_buffer(&self) -> Vec<i32> {
        self.free_list.lock().pop().unwrap_or_default()
    }
}

impl Default for ClauseAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide owner of the `ClauseAllocator` and the global acquire/release
/// counters used to check refcount soundness: every acquire must eventually
/// be matched by a release. `init()`/`join()` frame the allocator's
/// lifetime.
pub struct ClauseManager;

static NB_ACQUIRED: AtomicU64 = AtomicU64::new(0);
static NB_RELEASED: AtomicU64 = AtomicU64::new(0);
static OUTSTANDING: AtomicI64 = AtomicI64::new(0);

impl ClauseManager {
    /// Resets the global counters. Call once at process start; tests call it
    /// at the start of each test to get an isolated view of the invariant.
    pub fn init() {
        NB_ACQUIRED.store(0, Ordering::SeqCst);
        NB_RELEASED.store(0, Ordering::SeqCst);
        OUTSTANDING.store(0, Ordering::SeqCst);
    }

    /// Asserts the refcount-soundness invariant and returns the counts for
    /// diagnostics. Call after every worker/sharer/transport thread has
    /// joined, so no further acquire/release can race the check.
    pub fn join() -> (u64, u64) {
        let acquired = NB_ACQUIRED.load(Ordering::SeqCst);
        let released = NB_RELEASED.load(Ordering::SeqCst);
        #[cfg(feature = "logging")]
        trace!(
            "clause manager join: acquired={} released={} outstanding={}",
            acquired,
            released,
            OUTSTANDING.load(Ordering::SeqCst)
        );
        (acquired, released)
    }

    pub fn outstanding() -> i64 {
        OUTSTANDING.load(Ordering::SeqCst)
    }

    fn record_acquire() {
        NB_ACQUIRED.fetch_add(1, Ordering::Relaxed);
        OUTSTANDING.fetch_add(1, Ordering::Relaxed);
    }

    fn record_release() {
        NB_RELEASED.fetch_add(1, Ordering::Relaxed);
        OUTSTANDING.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The final verdict of a run: either `Unsat`, or `Sat` carrying the model
/// that witnesses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalVerdict {
    Sat(Vec<i32>),
    Unsat,
}

/// The shared, single-write "first wins" publication point plus the
/// process-local `globalEnding` flag, passed by reference to every thread
/// in the process (working-tree workers, sharers, the distributed
/// transport) rather than kept as ambient globals. Lives in this crate
/// because it is the one dependency every other crate in the workspace
/// already has.
pub struct CoordinationContext {
    global_ending: std::sync::atomic::AtomicBool,
    winner_set: std::sync::atomic::AtomicBool,
    verdict: Mutex<Option<FinalVerdict>>,
}

impl CoordinationContext {
    pub fn new() -> Self {
        CoordinationContext {
            global_ending: std::sync::atomic::AtomicBool::new(false),
            winner_set: std::sync::atomic::AtomicBool::new(false),
            verdict: Mutex::new(None),
        }
    }

    pub fn is_global_ending(&self) -> bool {
        self.global_ending.load(Ordering::Acquire)
    }

    /// Used by the Coordinator's timeout path and by transport-received
    /// external termination, neither of which carries a verdict.
    pub fn set_global_ending(&self) {
        self.global_ending.store(true, Ordering::Release);
    }

    /// Attempts to publish the final verdict. Returns `true` if this call
    /// won the race (i.e. no prior verdict was published); subsequent
    /// calls are no-ops that return `false`. Publishing also sets
    /// `global_ending`.
    pub fn try_publish(&self, verdict: FinalVerdict) -> bool {
        if self
            .winner_set
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            *self.verdict.lock() = Some(verdict);
            self.global_ending.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn final_verdict(&self) -> Option<FinalVerdict> {
        self.verdict.lock().clone()
    }
}

impl Default for CoordinationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An unbounded, multi-producer/multi-consumer append-only queue of shared
/// clauses, plus the budgeted `select` byproduct operation used by
/// `painless-sharing`.
///
/// No ordering guarantee is made between concurrent producers; `select`'s
/// ascending-LBD / insertion-order preference only orders clauses that are
/// already queued at the time `select` runs.
pub struct ClauseDatabase {
    queue: Mutex<VecDeque<SharedClause>>,
}

impl ClauseDatabase {
    pub fn new() -> Self {
        ClauseDatabase {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add(&self, clause: SharedClause) {
        self.queue.lock().push_back(clause);
    }

    pub fn add_many(&self, clauses: Vec<SharedClause>) {
        let mut q = self.queue.lock();
        q.extend(clauses);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves every pending clause into `out`, leaving the database empty.
    pub fn drain(&self, out: &mut Vec<SharedClause>) {
        let mut q = self.queue.lock();
        out.extend(q.drain(..));
    }

    /// Removes clauses totaling at most `budget_literals` literals,
    /// preferring lower-LBD clauses first (ties broken by insertion order).
    /// Clauses skipped because the budget is exceeded remain queued.
    pub fn select(&self, budget_literals: usize, out: &mut Vec<SharedClause>) -> usize {
        let mut q = self.queue.lock();

        // Stable sort by (lbd, original index) without disturbing relative
        // order of equal-LBD clauses — `VecDeque` is already in insertion
        // order, so a stable sort on lbd alone preserves the tie-break.
        let mut staged: Vec<SharedClause> = q.drain(..).collect();
        staged.sort_by_key(|c| c.lbd());

        let mut budget_used = 0usize;
        let mut selected_count = 0usize;
        let mut leftover = VecDeque::new();

        for clause in staged {
            let size = clause.size();
            if budget_used + size <= budget_literals {
                budget_used += size;
                selected_count += 1;
                out.push(clause);
            } else {
                leftover.push_back(clause);
            }
        }

        *q = leftover;
        selected_count
    }
}

impl Default for ClauseDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc() -> ClauseAllocator {
        ClauseManager::init();
        ClauseAllocator::new()
    }

    #[test]
    fn add_and_drain_roundtrip() {
        let ca = alloc();
        let db = ClauseDatabase::new();
        db.add(ca.allocate(vec![1, -2], 3, 0));
        db.add(ca.allocate(vec![3], 1, 0));
        assert_eq!(db.len(), 2);

        let mut out = Vec::new();
        db.drain(&mut out);
        assert_eq!(out.len(), 2);
        assert!(db.is_empty());
    }

    #[test]
    fn select_prefers_low_lbd_within_budget() {
        let ca = alloc();
        let db = ClauseDatabase::new();
        db.add(ca.allocate(vec![1, 2, 3], 5, 0)); // size 3, lbd 5
        db.add(ca.allocate(vec![4, 5], 1, 0)); // size 2, lbd 1
        db.add(ca.allocate(vec![6], 2, 0)); // size 1, lbd 2

        let mut out = Vec::new();
        let n = db.select(3, &mut out);
        // low-lbd first: [4,5] (lbd1, size2) then [6] (lbd2, size1) = budget 3
        assert_eq!(n, 2);
        assert_eq!(out[0].lbd(), 1);
        assert_eq!(out[1].lbd(), 2);
        // the size-3 lbd-5 clause didn't fit and stays queued
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn select_budget_smaller_than_any_clause_selects_nothing() {
        let ca = alloc();
        let db = ClauseDatabase::new();
        db.add(ca.allocate(vec![1, 2, 3], 1, 0));

        let mut out = Vec::new();
        let n = db.select(1, &mut out);
        assert_eq!(n, 0);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn refcount_soundness_after_many_clones_and_drops() {
        let ca = alloc();
        let c = ca.allocate(vec![1, 2], 1, 0);
        let clones: Vec<_> = (0..10).map(|_| c.clone()).collect();
        assert_eq!(c.refcount(), 11);
        drop(clones);
        assert_eq!(c.refcount(), 1);
        drop(c);
        let (acquired, released) = ClauseManager::join();
        assert_eq!(acquired, released);
        assert_eq!(ClauseManager::outstanding(), 0);
    }

    #[test]
    fn allocator_recycles_buffers() {
        let ca = alloc();
        ca.recycle(vec![0; 64]);
        let buf = ca.scratch_buffer();
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn coordination_context_first_publish_wins() {
        let ctx = CoordinationContext::new();
        assert!(!ctx.is_global_ending());
        assert!(ctx.try_publish(FinalVerdict::Sat(vec![1, -2])));
        assert!(ctx.is_global_ending());
        assert!(!ctx.try_publish(FinalVerdict::Unsat));
        assert_eq!(ctx.final_verdict(), Some(FinalVerdict::Sat(vec![1, -2])));
    }

    #[test]
    fn coordination_context_set_global_ending_without_verdict() {
        let ctx = CoordinationContext::new();
        ctx.set_global_ending();
        assert!(ctx.is_global_ending());
        assert!(ctx.final_verdict().is_none());
    }
}
