//! A small reference CDCL-lite engine implementing `painless_solver::Solver`.
//!
//! The orchestration layer treats solvers as black boxes; this engine
//! exists so the orchestration layer has *something* conforming to drive
//! in tests and in the default binary. See `cdcl` for the search core.

mod cdcl;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use painless_clauses::{ClauseAllocator, ClauseDatabase, SharedClause, EXTERNAL_PRODUCER};
use painless_solver::dimacs::load_dimacs;
use painless_solver::{SatResult, Solver, SolverError, SolverRole, SolverStats};

use cdcl::{Outcome, Search};

const MIN_LBD_LIMIT: u32 = 2;

/// A reference engine. One instance per portfolio slot; `Arc<ReferenceEngine>`
/// is shared between the owning `SequentialWorker` thread (which calls
/// `solve`/`model`) and the `Sharer`/transport threads (which only call the
/// `&self` import/export queue methods).
pub struct ReferenceEngine {
    id: i32,
    role: SolverRole,
    search: Mutex<Search>,
    interrupt: AtomicBool,
    lbd_limit: AtomicU32,

    clauses_to_add: ClauseDatabase,
    clauses_to_import: ClauseDatabase,
    units_to_import: ClauseDatabase,
    clauses_to_export: ClauseDatabase,
    allocator: ClauseAllocator,
}

impl ReferenceEngine {
    pub fn new(id: i32) -> Self {
        Self::with_role(id, SolverRole::Search)
    }

    pub fn with_role(id: i32, role: SolverRole) -> Self {
        ReferenceEngine {
            id,
            role,
            search: Mutex::new(Search::new()),
            interrupt: AtomicBool::new(false),
            lbd_limit: AtomicU32::new(MIN_LBD_LIMIT),
            clauses_to_add: ClauseDatabase::new(),
            clauses_to_import: ClauseDatabase::new(),
            units_to_import: ClauseDatabase::new(),
            clauses_to_export: ClauseDatabase::new(),
            allocator: ClauseAllocator::new(),
        }
    }

    pub fn set_initial_lbd_limit(&self, limit: u32) {
        self.lbd_limit.store(limit.max(MIN_LBD_LIMIT), Ordering::Relaxed);
    }

    /// Drains `clauses_to_add` (hard clauses queued via `add_clause`) and
    /// `clauses_to_import`/`units_to_import` into the search's clause
    /// database. Called once at the start of every `solve`, and again
    /// periodically during search via the `on_learnt`/poll hook below.
    fn ingest_pending(&self, search: &mut Search) {
        let mut buf = Vec::new();

        self.clauses_to_add.drain(&mut buf);
        for c in buf.drain(..) {
            search.add_clause(c.literals().to_vec(), false);
        }

        self.units_to_import.drain(&mut buf);
        for c in buf.drain(..) {
            search.add_clause(c.literals().to_vec(), false);
        }

        self.clauses_to_import.drain(&mut buf);
        for c in buf.drain(..) {
            search.add_clause(c.literals().to_vec(), true);
        }
    }
}

impl Solver for ReferenceEngine {
    fn id(&self) -> i32 {
        self.id
    }

    fn role(&self) -> SolverRole {
        self.role
    }

    fn load_formula(&self, path: &Path) -> Result<(), SolverError> {
        let cnf = load_dimacs(path)?;
        let mut search = self.search.lock();
        search.ensure_vars(cnf.num_vars);
        for clause in cnf.clauses {
            search.add_clause(clause, false);
        }
        Ok(())
    }

    fn variables_count(&self) -> usize {
        self.search.lock().num_vars
    }

    fn set_phase(&self, var: i32, value: bool) {
        if var <= 0 {
            return;
        }
        self.search.lock().set_phase((var - 1) as usize, value);
    }

    fn diversify(&self, seed: u64) {
        let mut search = self.search.lock();
        search.reseed(seed.max(1));
        // Even seeds keep phase saving; odd seeds branch with random
        // polarity -- a cheap two-mode split of the portfolio into two
        // heuristic families.
        search.rnd_pol = seed % 2 == 1;
    }

    fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn add_initial_clauses(&self, clauses: &[Vec<i32>]) {
        let mut search = self.search.lock();
        for c in clauses {
            search.add_clause(c.clone(), false);
        }
    }

    fn add_clause(&self, clause: SharedClause) {
        self.clauses_to_add.add(clause);
        self.interrupt();
    }

    fn add_learned_clause(&self, clause: SharedClause) {
        if clause.size() == 1 {
            self.units_to_import.add(clause);
        } else {
            self.clauses_to_import.add(clause);
        }
    }

    fn drain_learned_clauses(&self, out: &mut Vec<SharedClause>) {
        self.clauses_to_export.drain(out);
    }

    fn solve(&self, cube: &[i32]) -> SatResult {
        let mut search = self.search.lock();
        self.ingest_pending(&mut search);

        let lbd_limit = self.lbd_limit.load(Ordering::Relaxed);
        let allocator = &self.allocator;
        let export_db = &self.clauses_to_export;
        let id = self.id;

        let outcome = search.solve(
            cube,
            &|| self.interrupt.load(Ordering::SeqCst),
            |learnt: &[i32]| {
                let lbd = learnt.len() as u32;
                if lbd <= lbd_limit {
                    let clause = allocator.allocate(learnt.to_vec(), lbd, id);
                    export_db.add(clause);
                }
            },
        );

        match outcome {
            Outcome::Sat => SatResult::Sat,
            Outcome::Unsat => SatResult::Unsat,
            Outcome::Unknown => SatResult::Unknown,
        }
    }

    fn model(&self) -> Vec<i32> {
        self.search.lock().model()
    }

    fn statistics(&self) -> SolverStats {
        let search = self.search.lock();
        SolverStats {
            conflicts: search.conflicts,
            propagations: search.propagations,
            decisions: search.decisions_made,
            restarts: search.restarts,
        }
    }

    fn increase_clause_production(&self) {
        let cur = self.lbd_limit.load(Ordering::Relaxed);
        self.lbd_limit.store(cur + 1, Ordering::Relaxed);
    }

    fn decrease_clause_production(&self) {
        let cur = self.lbd_limit.load(Ordering::Relaxed);
        if cur > MIN_LBD_LIMIT {
            self.lbd_limit.store(cur - 1, Ordering::Relaxed);
        }
    }
}

/// A pseudo-solver whose backing implementation never actually searches --
/// the distributed transport plugs itself in as one of these so it can sit
/// in a `Sharer`'s producer/consumer sets. Every operation that has no real
/// backing implementation is a no-op returning a sentinel value rather than
/// left undefined.
pub struct NullEngine {
    id: i32,
}

impl NullEngine {
    pub fn new(id: i32) -> Self {
        NullEngine { id }
    }
}

impl Solver for NullEngine {
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

    fn add_learned_clause(&self, _clause: SharedClause) {}

    fn drain_learned_clauses(&self, _out: &mut Vec<SharedClause>) {}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_unit_clause() {
        painless_clauses::ClauseManager::init();
        let e = ReferenceEngine::new(0);
        let clause = ClauseAllocator::new().allocate(vec![1], 1, EXTERNAL_PRODUCER);
        e.add_initial_clauses(&[clause.literals().to_vec()]);
        assert_eq!(e.solve(&[]), SatResult::Sat);
        assert_eq!(e.model(), vec![1]);
    }

    #[test]
    fn exports_clauses_within_lbd_limit() {
        painless_clauses::ClauseManager::init();
        let e = ReferenceEngine::new(1);
        e.set_initial_lbd_limit(2);
        e.add_initial_clauses(&[
            vec![1, 2],
            vec![-1, 2],
            vec![1, -2],
            vec![-1, -2],
        ]);
        assert_eq!(e.solve(&[]), SatResult::Unsat);
        let mut out = Vec::new();
        e.drain_learned_clauses(&mut out);
        assert!(!out.is_empty());
        for c in &out {
            assert!(c.lbd() <= 2);
        }
    }

    #[test]
    fn interrupt_during_solve_yields_unknown_and_add_clause_triggers_it() {
        painless_clauses::ClauseManager::init();
        let e = ReferenceEngine::new(2);
        e.interrupt();
        assert_eq!(e.solve(&[]), SatResult::Unknown);
        e.clear_interrupt();
        assert!(!e.is_interrupted());
        let clause = ClauseAllocator::new().allocate(vec![1], 1, EXTERNAL_PRODUCER);
        e.add_clause(clause);
        assert!(e.is_interrupted());
    }

    #[test]
    fn null_engine_is_inert() {
        let e = NullEngine::new(9);
        assert_eq!(e.solve(&[]), SatResult::Unknown);
        assert_eq!(e.variables_count(), 0);
        assert!(e.model().is_empty());
    }
}
