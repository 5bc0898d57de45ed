//! `Sharer`: periodic, quality-filtered, bandwidth-capped diffusion of
//! learned clauses from a set of producer solvers to a set of consumer
//! solvers.
//!
//! A Sharer owns no clause state of its own beyond a scratch staging
//! database; producers and consumers are arbitrary `Solver` trait objects,
//! so a `DistributedTransport`'s virtual-solver adapter can sit in either
//! set exactly like a real engine.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(feature = "logging")]
use log::debug;

use painless_clauses::{ClauseDatabase, CoordinationContext};
use painless_solver::Solver;

/// LBD above which a clause is never worth sharing at all, even locally.
/// The distributed transport boundary additionally refuses anything above
/// this; `Sharer` enforces the same bound so local and cross-process
/// diffusion agree on what counts as shareable.
pub const MAX_SHAREABLE_LBD: u32 = 2;

/// One round of a `Sharer`: drain every producer, select within budget,
/// deliver to every consumer but the clause's own producer.
pub struct Sharer {
    producers: Vec<Arc<dyn Solver>>,
    consumers: Vec<Arc<dyn Solver>>,
    sleep: Duration,
    literal_budget: usize,
    staging: ClauseDatabase,
}

impl Sharer {
    pub fn new(
        producers: Vec<Arc<dyn Solver>>,
        consumers: Vec<Arc<dyn Solver>>,
        sleep: Duration,
        literal_budget: usize,
    ) -> Self {
        Sharer {
            producers,
            consumers,
            sleep,
            literal_budget,
            staging: ClauseDatabase::new(),
        }
    }

    /// Runs a single round: drain producers into staging, select up to the
    /// literal budget (preferring low LBD), deliver to every consumer other
    /// than the originating producer. Returns the number of clauses
    /// delivered (counting one delivery per consumer, matching the
    /// original's `nbClausesShared` accounting).
    pub fn run_round(&self) -> usize {
        let mut drained = Vec::new();
        for producer in &self.producers {
            producer.drain_learned_clauses(&mut drained);
        }
        drained.retain(|c| c.lbd() <= MAX_SHAREABLE_LBD);
        self.staging.add_many(drained);

        let mut selected = Vec::new();
        let n = self.staging.select(self.literal_budget, &mut selected);
        if n == 0 {
            return 0;
        }

        let mut delivered = 0;
        for consumer in &self.consumers {
            let copies: Vec<_> = selected
                .iter()
                .filter(|c| c.from() != consumer.id())
                .cloned()
                .collect();
            delivered += copies.len();
            consumer.add_learned_clauses(copies);
        }

        #[cfg(feature = "logging")]
        debug!(
            "sharer round: selected={} delivered={}",
            selected.len(),
            delivered
        );

        delivered
    }

    /// Spawns a dedicated thread that runs rounds until `ctx.is_global_ending()`
    /// is observed true, sleeping `sleep` between rounds.
    pub fn spawn(self, ctx: Arc<CoordinationContext>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("sharer".into())
            .spawn(move || {
                while !ctx.is_global_ending() {
                    thread::sleep(self.sleep);
                    self.run_round();
                }
                // final drain so in-flight clauses aren't silently dropped
                self.run_round();
            })
            .expect("failed to spawn sharer thread")
    }
}

/// Splits a solver set into producer/consumer pairings per `-shr-strat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingStrategy {
    /// Two sharers, each covering half the solver set.
    SplitInTwo,
    /// A single sharer covering every solver.
    Single,
}

/// Builds the `Sharer`s for a solver set according to `strategy`. Every
/// sharer treats its whole assigned set as both producers and consumers
/// (a solver may receive a clause originally produced by a sibling in the
/// same set, but never one it produced itself — enforced in `run_round`).
pub fn wire_sharers(
    solvers: &[Arc<dyn Solver>],
    strategy: SharingStrategy,
    sleep: Duration,
    literal_budget: usize,
) -> Vec<Sharer> {
    match strategy {
        SharingStrategy::Single => {
            vec![Sharer::new(
                solvers.to_vec(),
                solvers.to_vec(),
                sleep,
                literal_budget,
            )]
        }
        SharingStrategy::SplitInTwo => {
            let mid = solvers.len() / 2;
            let (first, second) = solvers.split_at(mid);
            vec![
                Sharer::new(first.to_vec(), first.to_vec(), sleep, literal_budget),
                Sharer::new(second.to_vec(), second.to_vec(), sleep, literal_budget),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use painless_clauses::{ClauseAllocator, ClauseManager};
    use painless_solver::{dimacs::DimacsError, SatResult, SolverStats};
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeSolver {
        id: i32,
        export: ClauseDatabase,
        imported: Mutex<Vec<Vec<i32>>>,
    }

    impl FakeSolver {
        fn new(id: i32) -> Arc<Self> {
            Arc::new(FakeSolver {
                id,
                export: ClauseDatabase::new(),
                imported: Mutex::new(Vec::new()),
            })
        }
    }

    impl Solver for FakeSolver {
        fn id(&self) -> i32 {
            self.id
        }
        fn load_formula(&self, _path: &Path) -> Result<(), painless_solver::SolverError> {
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
        fn add_clause(&self, _clause: painless_clauses::SharedClause) {}
        fn add_learned_clause(&self, clause: painless_clauses::SharedClause) {
            self.imported.lock().unwrap().push(clause.literals().to_vec());
        }
        fn drain_learned_clauses(&self, out: &mut Vec<painless_clauses::SharedClause>) {
            self.export.drain(out);
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

    #[allow(dead_code)]
    fn silence_unused(_e: DimacsError) {}

    #[test]
    fn delivers_to_consumers_but_not_back_to_producer() {
        ClauseManager::init();
        let alloc = ClauseAllocator::new();
        let producer = FakeSolver::new(1);
        let other = FakeSolver::new(2);
        producer
            .export
            .add(alloc.allocate(vec![1, 2], 1, producer.id()));

        let sharer = Sharer::new(
            vec![producer.clone() as Arc<dyn Solver>, other.clone() as Arc<dyn Solver>],
            vec![producer.clone() as Arc<dyn Solver>, other.clone() as Arc<dyn Solver>],
            Duration::from_millis(0),
            1024,
        );
        let delivered = sharer.run_round();
        assert_eq!(delivered, 1);
        assert!(producer.imported.lock().unwrap().is_empty());
        assert_eq!(other.imported.lock().unwrap().len(), 1);
    }

    #[test]
    fn filters_clauses_above_lbd_threshold() {
        ClauseManager::init();
        let alloc = ClauseAllocator::new();
        let producer = FakeSolver::new(1);
        let other = FakeSolver::new(2);
        producer.export.add(alloc.allocate(vec![1, 2], 9, 1));

        let sharer = Sharer::new(
            vec![producer.clone() as Arc<dyn Solver>],
            vec![other.clone() as Arc<dyn Solver>],
            Duration::from_millis(0),
            1024,
        );
        let delivered = sharer.run_round();
        assert_eq!(delivered, 0);
        assert!(other.imported.lock().unwrap().is_empty());
    }

    #[test]
    fn respects_literal_budget() {
        ClauseManager::init();
        let alloc = ClauseAllocator::new();
        let producer = FakeSolver::new(1);
        let other = FakeSolver::new(2);
        producer.export.add(alloc.allocate(vec![1, 2], 1, 1));
        producer.export.add(alloc.allocate(vec![3, 4, 5], 1, 1));

        let sharer = Sharer::new(
            vec![producer.clone() as Arc<dyn Solver>],
            vec![other.clone() as Arc<dyn Solver>],
            Duration::from_millis(0),
            2,
        );
        sharer.run_round();
        assert_eq!(other.imported.lock().unwrap().len(), 1);
    }

    #[test]
    fn wire_sharers_single_covers_everyone() {
        let a = FakeSolver::new(1) as Arc<dyn Solver>;
        let b = FakeSolver::new(2) as Arc<dyn Solver>;
        let sharers = wire_sharers(&[a, b], SharingStrategy::Single, Duration::from_millis(0), 16);
        assert_eq!(sharers.len(), 1);
    }

    #[test]
    fn wire_sharers_split_in_two_halves_the_set() {
        let solvers: Vec<Arc<dyn Solver>> = (0..4).map(|i| FakeSolver::new(i) as Arc<dyn Solver>).collect();
        let sharers = wire_sharers(&solvers, SharingStrategy::SplitInTwo, Duration::from_millis(0), 16);
        assert_eq!(sharers.len(), 2);
    }
}
