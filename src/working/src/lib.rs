//! The working-strategy tree: `Portfolio` and `SequentialWorker`.
//! `WorkingStrategy` is the uniform interrupt-propagating interface;
//! `CoordinationContext` (in `painless-clauses`) is the shared first-wins
//! latch every leaf publishes to.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(feature = "logging")]
use log::info;

use painless_clauses::{CoordinationContext, FinalVerdict};
use painless_solver::{SatResult, Solver, SolverRole};

/// A node in the working-strategy tree. `start` launches the subtree's
/// threads and returns immediately; `join` blocks until every spawned
/// thread has exited, which happens only after interruption or a published
/// verdict.
pub trait WorkingStrategy: Send + Sync {
    fn start(&self, cube: &[i32]);
    fn set_interrupt(&self);
    fn join(&self);
}

/// A leaf: one `Solver`, one worker thread. Loops calling `engine.solve`
/// until it gets a final verdict or is interrupted; on UNKNOWN it retries
/// unless the interrupt came from the shared ending flag rather than a
/// fresh hard clause.
pub struct SequentialWorker {
    engine: Arc<dyn Solver>,
    ctx: Arc<CoordinationContext>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SequentialWorker {
    pub fn new(engine: Arc<dyn Solver>, ctx: Arc<CoordinationContext>) -> Arc<Self> {
        Arc::new(SequentialWorker {
            engine,
            ctx,
            handle: std::sync::Mutex::new(None),
        })
    }
}

impl WorkingStrategy for SequentialWorker {
    fn start(&self, cube: &[i32]) {
        // A Reducer never searches for a verdict; it only participates in
        // clause sharing. Starting it as a worker thread would be pointless
        // busy-work, so it's simply skipped here -- the Coordinator still
        // wires it into `Sharer`'s producer set.
        if self.engine.role() == SolverRole::Reducer {
            return;
        }

        let engine = self.engine.clone();
        let ctx = self.ctx.clone();
        let cube = cube.to_vec();
        let handle = thread::Builder::new()
            .name(format!("worker-{}", engine.id()))
            .spawn(move || loop {
                if ctx.is_global_ending() {
                    return;
                }
                match engine.solve(&cube) {
                    SatResult::Sat => {
                        let model = engine.model();
                        ctx.try_publish(FinalVerdict::Sat(model));
                        #[cfg(feature = "logging")]
                        info!("worker {} found SAT", engine.id());
                        return;
                    }
                    SatResult::Unsat => {
                        ctx.try_publish(FinalVerdict::Unsat);
                        #[cfg(feature = "logging")]
                        info!("worker {} found UNSAT", engine.id());
                        return;
                    }
                    SatResult::Unknown => {
                        if ctx.is_global_ending() {
                            return;
                        }
                        // interrupted but not globally ending: the engine
                        // was kicked by a new hard clause; clear and retry.
                        engine.clear_interrupt();
                    }
                }
            })
            .expect("failed to spawn worker thread");
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn set_interrupt(&self) {
        self.engine.interrupt();
    }

    fn join(&self) {
        if let Some(h) = self.handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

/// An internal node: dispatches `start` to every child, and interrupts the
/// remaining siblings as soon as any one reports a final verdict.
/// Interruption of siblings is driven by `CoordinationContext` rather than
/// polled explicitly: every leaf checks `is_global_ending` itself, and
/// `Portfolio::join` waits for all children to notice.
pub struct Portfolio {
    children: Vec<Arc<dyn WorkingStrategy>>,
    ctx: Arc<CoordinationContext>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Portfolio {
    pub fn new(children: Vec<Arc<dyn WorkingStrategy>>, ctx: Arc<CoordinationContext>) -> Arc<Self> {
        Arc::new(Portfolio {
            children,
            ctx,
            watcher: std::sync::Mutex::new(None),
        })
    }
}

impl WorkingStrategy for Portfolio {
    fn start(&self, cube: &[i32]) {
        for child in &self.children {
            child.start(cube);
        }

        // A background watcher interrupts every child the moment the
        // first verdict lands, so siblings don't run to their own
        // completion needlessly.
        let children = self.children.clone();
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name("portfolio-watcher".into())
            .spawn(move || {
                loop {
                    if ctx.is_global_ending() {
                        for child in &children {
                            child.set_interrupt();
                        }
                        return;
                    }
                    thread::sleep(std::time::Duration::from_millis(20));
                }
            })
            .expect("failed to spawn portfolio watcher thread");
        *self.watcher.lock().unwrap() = Some(handle);
    }

    fn set_interrupt(&self) {
        for child in &self.children {
            child.set_interrupt();
        }
    }

    fn join(&self) {
        for child in &self.children {
            child.join();
        }
        if let Some(h) = self.watcher.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use painless_solver::{SolverError, SolverStats};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct ScriptedSolver {
        id: i32,
        role: SolverRole,
        verdict: SatResult,
        interrupted: AtomicBool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedSolver {
        fn new(id: i32, verdict: SatResult) -> Arc<Self> {
            Arc::new(ScriptedSolver {
                id,
                role: SolverRole::Search,
                verdict,
                interrupted: AtomicBool::new(false),
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }
    }

    impl Solver for ScriptedSolver {
        fn id(&self) -> i32 {
            self.id
        }
        fn role(&self) -> SolverRole {
            self.role
        }
        fn load_formula(&self, _path: &Path) -> Result<(), SolverError> {
            Ok(())
        }
        fn variables_count(&self) -> usize {
            1
        }
        fn set_phase(&self, _var: i32, _value: bool) {}
        fn diversify(&self, _seed: u64) {}
        fn interrupt(&self) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        fn clear_interrupt(&self) {
            self.interrupted.store(false, Ordering::SeqCst);
        }
        fn is_interrupted(&self) -> bool {
            self.interrupted.load(Ordering::SeqCst)
        }
        fn add_initial_clauses(&self, _clauses: &[Vec<i32>]) {}
        fn add_clause(&self, _clause: painless_clauses::SharedClause) {}
        fn add_learned_clause(&self, _clause: painless_clauses::SharedClause) {}
        fn drain_learned_clauses(&self, _out: &mut Vec<painless_clauses::SharedClause>) {}
        fn solve(&self, _cube: &[i32]) -> SatResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.interrupted.load(Ordering::SeqCst) {
                return SatResult::Unknown;
            }
            self.verdict
        }
        fn model(&self) -> Vec<i32> {
            vec![1]
        }
        fn statistics(&self) -> SolverStats {
            SolverStats::default()
        }
        fn increase_clause_production(&self) {}
        fn decrease_clause_production(&self) {}
    }

    #[test]
    fn sequential_worker_publishes_sat_verdict() {
        let ctx = Arc::new(CoordinationContext::new());
        let engine = ScriptedSolver::new(0, SatResult::Sat);
        let worker = SequentialWorker::new(engine, ctx.clone());
        worker.start(&[]);
        worker.join();
        assert_eq!(ctx.final_verdict(), Some(FinalVerdict::Sat(vec![1])));
    }

    #[test]
    fn reducer_never_starts_a_worker_thread() {
        let ctx = Arc::new(CoordinationContext::new());
        let engine = Arc::new(ScriptedSolver {
            id: 1,
            role: SolverRole::Reducer,
            verdict: SatResult::Sat,
            interrupted: AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let worker = SequentialWorker::new(engine.clone(), ctx.clone());
        worker.start(&[]);
        worker.join();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert!(ctx.final_verdict().is_none());
    }

    #[test]
    fn portfolio_takes_first_verdict_and_interrupts_siblings() {
        let ctx = Arc::new(CoordinationContext::new());
        let fast = ScriptedSolver::new(0, SatResult::Sat);
        let slow = Arc::new(ScriptedSolver {
            id: 1,
            role: SolverRole::Search,
            verdict: SatResult::Unknown,
            interrupted: AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let w1 = SequentialWorker::new(fast, ctx.clone());
        let w2 = SequentialWorker::new(slow.clone(), ctx.clone());
        let portfolio = Portfolio::new(
            vec![w1 as Arc<dyn WorkingStrategy>, w2.clone() as Arc<dyn WorkingStrategy>],
            ctx.clone(),
        );

        portfolio.start(&[]);
        // give the watcher a moment to observe the published verdict and
        // interrupt the slow sibling
        for _ in 0..200 {
            if slow.is_interrupted() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        portfolio.set_interrupt();
        portfolio.join();

        assert!(matches!(ctx.final_verdict(), Some(FinalVerdict::Sat(_))));
    }
}
