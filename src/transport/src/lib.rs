//! Cross-process clause and termination exchange.
//!
//! There is no real message-passing runtime available to depend on, so
//! `Fabric` simulates a fixed-size rank group in-process with
//! `crossbeam-channel` for point-to-point delivery and `std::sync::Barrier`
//! for the synchronous variant's all-gather/all-to-all rendezvous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

#[cfg(feature = "logging")]
use log::{debug, warn};

use painless_clauses::{
    ClauseAllocator, ClauseDatabase, CoordinationContext, FinalVerdict, SharedClause,
    EXTERNAL_PRODUCER,
};
use painless_solver::{SatResult, Solver, SolverError, SolverStats};
use std::path::Path;

/// The wire-level shape of one clause: `[size, lbd, lit_1..lit_size]`
/// collapsed to its two meaningful fields since `Fabric` moves structured
/// values rather than raw bytes -- what a real message-passing send would
/// serialize, the simulated fabric preserves without the serialization
/// step.
#[derive(Debug, Clone)]
pub struct ClausePayload {
    pub literals: Vec<i32>,
    pub lbd: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationVerdict {
    Sat,
    Unsat,
    /// The ending rank has no verdict of its own (e.g. it hit the
    /// Coordinator's wall-clock timeout before any worker returned SAT or
    /// UNSAT). Peers receiving this must converge `globalEnding` without
    /// publishing a verdict, not guess UNSAT.
    Unknown,
}

/// A message on the wire. `Termination` is a distinct variant rather than
/// a `size == -1` sentinel mixed into the clause stream, so a corrupt or
/// truncated clause payload can never be misread as a termination signal.
#[derive(Debug, Clone)]
pub enum TransportMessage {
    Clauses(Vec<ClausePayload>),
    Termination {
        verdict: TerminationVerdict,
        model: Vec<i32>,
    },
}

/// One rank's handle onto a simulated communicator of fixed size. Cloning
/// the underlying channels is cheap and each handle is exclusively owned by
/// one rank, so there is no multi-threaded-access hazard on the fabric
/// itself to guard against. `Fabric` is `Clone` so a single rank can hand
/// one copy to its transport thread and keep another for the Coordinator's
/// own heartbeat collective without the two contending over ownership.
#[derive(Clone)]
pub struct Fabric {
    rank: usize,
    size: usize,
    peer_senders: Vec<Sender<TransportMessage>>,
    inbox: Receiver<TransportMessage>,
    round_slots: Arc<Mutex<Vec<Option<TransportMessage>>>>,
    write_barrier: Arc<Barrier>,
    read_barrier: Arc<Barrier>,
    heartbeat_slots: Arc<Mutex<Vec<bool>>>,
    heartbeat_write: Arc<Barrier>,
    heartbeat_read: Arc<Barrier>,
}

impl Fabric {
    /// Builds a fabric of `ranks` communicating participants, returning one
    /// handle per rank.
    pub fn build(ranks: usize) -> Vec<Fabric> {
        assert!(ranks >= 1, "fabric must have at least one rank");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..ranks).map(|_| unbounded()).unzip();
        let round_slots = Arc::new(Mutex::new(vec![None; ranks]));
        let write_barrier = Arc::new(Barrier::new(ranks));
        let read_barrier = Arc::new(Barrier::new(ranks));
        let heartbeat_slots = Arc::new(Mutex::new(vec![false; ranks]));
        let heartbeat_write = Arc::new(Barrier::new(ranks));
        let heartbeat_read = Arc::new(Barrier::new(ranks));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Fabric {
                rank,
                size: ranks,
                peer_senders: senders.clone(),
                inbox,
                round_slots: round_slots.clone(),
                write_barrier: write_barrier.clone(),
                read_barrier: read_barrier.clone(),
                heartbeat_slots: heartbeat_slots.clone(),
                heartbeat_write: heartbeat_write.clone(),
                heartbeat_read: heartbeat_read.clone(),
            })
            .collect()
    }

    /// All-gather of one boolean, used by the Coordinator's once-per-second
    /// termination poll -- a separate rendezvous from `rendezvous` so the
    /// two collectives never contend on the same barrier generation.
    pub fn allgather_bool(&self, local: bool) -> Vec<bool> {
        {
            let mut slots = self.heartbeat_slots.lock().unwrap();
            slots[self.rank] = local;
        }
        self.heartbeat_write.wait();
        let snapshot = self.heartbeat_slots.lock().unwrap().clone();
        self.heartbeat_read.wait();
        snapshot
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// All-gather-of-size followed by all-to-all exchange, collapsed into
    /// one rendezvous since the simulated fabric need not size buffers up
    /// front. Publishes `payload` into this rank's slot, waits for every
    /// rank to publish, then returns every other rank's payload (a rank
    /// never receives its own, matching "each rank sends 0 bytes to
    /// itself").
    pub fn rendezvous(&self, payload: TransportMessage) -> Vec<TransportMessage> {
        {
            let mut slots = self.round_slots.lock().unwrap();
            slots[self.rank] = Some(payload);
        }
        self.write_barrier.wait();

        let collected: Vec<TransportMessage> = {
            let slots = self.round_slots.lock().unwrap();
            (0..self.size)
                .filter(|&r| r != self.rank)
                .map(|r| {
                    slots[r]
                        .clone()
                        .expect("every rank publishes before rendezvous completes")
                })
                .collect()
        };

        // Every rank must finish reading before the next round overwrites
        // the slots.
        self.read_barrier.wait();
        collected
    }

    pub fn send_to(&self, peer: usize, msg: TransportMessage) {
        let _ = self.peer_senders[peer].send(msg);
    }

    pub fn try_recv(&self) -> Option<TransportMessage> {
        self.inbox.try_recv().ok()
    }
}

/// Converts queued `SharedClause`s into wire payloads, consuming the
/// drained buffer.
fn to_payloads(drained: &[painless_clauses::SharedClause]) -> Vec<ClausePayload> {
    drained
        .iter()
        .map(|c| ClausePayload {
            literals: c.literals().to_vec(),
            lbd: c.lbd(),
        })
        .collect()
}

fn import_payloads(
    payloads: Vec<ClausePayload>,
    allocator: &ClauseAllocator,
    clauses_to_import: &ClauseDatabase,
) {
    for p in payloads {
        if p.literals.is_empty() {
            continue;
        }
        clauses_to_import.add(allocator.allocate(p.literals, p.lbd, EXTERNAL_PRODUCER));
    }
}

/// The capability the Coordinator drives; both variants below implement it.
pub trait DistributedTransport: Send + Sync {
    /// Blocks the calling thread until shutdown. Intended to be run on a
    /// dedicated thread spawned by the Coordinator.
    fn run(&self);

    fn shutdown(&self);
}

/// The synchronous (all-gather + all-to-all) variant: one thread per
/// process.
pub struct SyncTransport {
    fabric: Fabric,
    sleep: Duration,
    ctx: Arc<CoordinationContext>,
    clauses_to_export: Arc<ClauseDatabase>,
    clauses_to_import: Arc<ClauseDatabase>,
    allocator: Arc<ClauseAllocator>,
}

impl SyncTransport {
    pub fn new(
        fabric: Fabric,
        sleep: Duration,
        ctx: Arc<CoordinationContext>,
        clauses_to_export: Arc<ClauseDatabase>,
        clauses_to_import: Arc<ClauseDatabase>,
        allocator: Arc<ClauseAllocator>,
    ) -> Self {
        SyncTransport {
            fabric,
            sleep,
            ctx,
            clauses_to_export,
            clauses_to_import,
            allocator,
        }
    }
}

impl DistributedTransport for SyncTransport {
    fn run(&self) {
        loop {
            thread::sleep(self.sleep);

            let local_ending = self.ctx.is_global_ending();
            let payload = if local_ending {
                match self.ctx.final_verdict() {
                    Some(FinalVerdict::Sat(model)) => TransportMessage::Termination {
                        verdict: TerminationVerdict::Sat,
                        model,
                    },
                    Some(FinalVerdict::Unsat) => TransportMessage::Termination {
                        verdict: TerminationVerdict::Unsat,
                        model: Vec::new(),
                    },
                    // Ending with no verdict (e.g. Coordinator timeout):
                    // announce Unknown rather than guessing Unsat.
                    None => TransportMessage::Termination {
                        verdict: TerminationVerdict::Unknown,
                        model: Vec::new(),
                    },
                }
            } else {
                let mut drained = Vec::new();
                self.clauses_to_export.drain(&mut drained);
                TransportMessage::Clauses(to_payloads(&drained))
            };

            let incoming = self.fabric.rendezvous(payload);

            if local_ending {
                #[cfg(feature = "logging")]
                debug!("sync transport rank {} exiting after final round", self.fabric.rank());
                return;
            }

            for msg in incoming {
                match msg {
                    TransportMessage::Termination { verdict, model } => {
                        match verdict {
                            TerminationVerdict::Sat => {
                                self.ctx.try_publish(FinalVerdict::Sat(model));
                            }
                            TerminationVerdict::Unsat => {
                                self.ctx.try_publish(FinalVerdict::Unsat);
                            }
                            // No verdict to publish; just converge this
                            // rank's ending flag so it exits alongside the
                            // peer that timed out instead of looping again.
                            TerminationVerdict::Unknown => {
                                self.ctx.set_global_ending();
                            }
                        }
                    }
                    TransportMessage::Clauses(payloads) => {
                        import_payloads(payloads, &self.allocator, &self.clauses_to_import);
                    }
                }
            }

            if self.ctx.is_global_ending() {
                return;
            }
        }
    }

    fn shutdown(&self) {
        self.ctx.set_global_ending();
    }
}

/// The asynchronous (non-blocking probe/send) variant: separate import and
/// export threads. Termination on this channel is not signalled by a
/// message; the Coordinator's own all-gather poll is what converges the
/// ending flag across ranks.
pub struct AsyncTransport {
    fabric: Arc<Fabric>,
    sleep: Duration,
    ctx: Arc<CoordinationContext>,
    clauses_to_export: Arc<ClauseDatabase>,
    clauses_to_import: Arc<ClauseDatabase>,
    allocator: Arc<ClauseAllocator>,
    literal_budget: usize,
    external_ending: Arc<AtomicBool>,
    export_signal: Arc<(Mutex<bool>, Condvar)>,
}

impl AsyncTransport {
    pub fn new(
        fabric: Fabric,
        sleep: Duration,
        ctx: Arc<CoordinationContext>,
        clauses_to_export: Arc<ClauseDatabase>,
        clauses_to_import: Arc<ClauseDatabase>,
        allocator: Arc<ClauseAllocator>,
        literal_budget: usize,
    ) -> Self {
        AsyncTransport {
            fabric: Arc::new(fabric),
            sleep,
            ctx,
            clauses_to_export,
            clauses_to_import,
            allocator,
            literal_budget,
            external_ending: Arc::new(AtomicBool::new(false)),
            export_signal: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Called whenever new clauses are queued for export, to wake the
    /// export thread via a condition variable rather than have it poll.
    pub fn notify_export_ready(&self) {
        let (lock, cvar) = &*self.export_signal;
        let mut ready = lock.lock().unwrap();
        *ready = true;
        cvar.notify_one();
    }

    fn spawn_import_thread(&self) -> JoinHandle<()> {
        let fabric = self.fabric.clone();
        let sleep = self.sleep;
        let clauses_to_import = self.clauses_to_import.clone();
        let allocator = self.allocator.clone();
        let external_ending = self.external_ending.clone();
        thread::Builder::new()
            .name("transport-import".into())
            .spawn(move || {
                while !external_ending.load(Ordering::Acquire) {
                    match fabric.try_recv() {
                        Some(TransportMessage::Clauses(payloads)) => {
                            import_payloads(payloads, &allocator, &clauses_to_import);
                        }
                        Some(TransportMessage::Termination { .. }) => {
                            // No termination message is ever sent on this channel; ignore.
                        }
                        None => thread::sleep(sleep),
                    }
                }
            })
            .expect("failed to spawn transport import thread")
    }

    fn spawn_export_thread(&self) -> JoinHandle<()> {
        let fabric = self.fabric.clone();
        let clauses_to_export = self.clauses_to_export.clone();
        let literal_budget = self.literal_budget;
        let external_ending = self.external_ending.clone();
        let export_signal = self.export_signal.clone();
        let staging = ClauseDatabase::new();

        thread::Builder::new()
            .name("transport-export".into())
            .spawn(move || {
                while !external_ending.load(Ordering::Acquire) {
                    {
                        let (lock, cvar) = &*export_signal;
                        let mut ready = lock.lock().unwrap();
                        while !*ready && !external_ending.load(Ordering::Acquire) {
                            ready = cvar.wait(ready).unwrap();
                        }
                        *ready = false;
                    }
                    if external_ending.load(Ordering::Acquire) {
                        break;
                    }

                    let mut drained = Vec::new();
                    clauses_to_export.drain(&mut drained);
                    drained.retain(|c| c.lbd() <= MAX_SYNC_LBD);
                    staging.add_many(drained);

                    let mut selected = Vec::new();
                    staging.select(literal_budget, &mut selected);
                    if selected.is_empty() {
                        continue;
                    }
                    let payloads = to_payloads(&selected);

                    for peer in 0..fabric.size() {
                        if peer == fabric.rank() {
                            continue;
                        }
                        fabric.send_to(peer, TransportMessage::Clauses(payloads.clone()));
                    }

                    #[cfg(feature = "logging")]
                    debug!("async export: sent {} clauses to {} peers", payloads.len(), fabric.size() - 1);
                }
            })
            .expect("failed to spawn transport export thread")
    }
}

/// Only clauses at or below this LBD ever cross process boundaries.
pub const MAX_SYNC_LBD: u32 = 2;

impl DistributedTransport for AsyncTransport {
    fn run(&self) {
        let import = self.spawn_import_thread();
        let export = self.spawn_export_thread();
        // Block the caller (typically its own dedicated thread) until
        // shutdown is requested.
        while !self.external_ending.load(Ordering::Acquire) && !self.ctx.is_global_ending() {
            thread::sleep(self.sleep);
        }
        self.shutdown();
        let _ = import.join();
        let _ = export.join();
    }

    fn shutdown(&self) {
        self.external_ending.store(true, Ordering::Release);
        self.notify_export_ready();
        #[cfg(feature = "logging")]
        warn!("async transport shutting down");
    }
}

/// Lets the distributed transport sit in a `Sharer`'s producer/consumer
/// sets exactly like a real engine. Draining it hands the Sharer clauses
/// received from remote peers; feeding it a learned clause queues that
/// clause for the export thread to ship to remote peers. Every other
/// `Solver` operation has no real backing implementation, so each returns a
/// sentinel (empty model, `Unknown`, zero variables) rather than being left
/// undefined.
pub struct VirtualSolver {
    id: i32,
    received_from_network: Arc<ClauseDatabase>,
    bound_for_network: Arc<ClauseDatabase>,
}

impl VirtualSolver {
    pub fn new(
        id: i32,
        received_from_network: Arc<ClauseDatabase>,
        bound_for_network: Arc<ClauseDatabase>,
    ) -> Self {
        VirtualSolver {
            id,
            received_from_network,
            bound_for_network,
        }
    }
}

impl Solver for VirtualSolver {
    fn id(&self) -> i32 {
        self.id
    }

    fn load_formula(&self, _path: &Path) -> Result<(), SolverError> {
        Ok(())
    }

    fn variables_count(&self) -> usize {
        0
    }

    fn set_phase(&self, _var: i32, _value: bool) {}

    fn diversify(&self, _seed: u64) {}

    fn interrupt(&self) {}

    fn clear_interrupt(&self) {}

    fn is_interrupted(&self) -> bool {
        false
    }

    fn add_initial_clauses(&self, _clauses: &[Vec<i32>]) {}

    fn add_clause(&self, _clause: SharedClause) {}

    fn add_learned_clause(&self, clause: SharedClause) {
        self.bound_for_network.add(clause);
    }

    fn drain_learned_clauses(&self, out: &mut Vec<SharedClause>) {
        self.received_from_network.drain(out);
    }

    fn solve(&self, _cube: &[i32]) -> SatResult {
        SatResult::Unknown
    }

    fn model(&self) -> Vec<i32> {
        Vec::new()
    }

    fn statistics(&self) -> SolverStats {
        SolverStats::default()
    }

    fn increase_clause_production(&self) {}

    fn decrease_clause_production(&self) {}
}
