//! The search core: unit propagation, chronological backtracking with an
//! explicit decision stack, and decision-negation clause learning.
//!
//! This is deliberately a "CDCL-lite": every conflict still yields a sound
//! learned clause (the negation of the current decision path, which the
//! formula logically entails once a conflict under those decisions is
//! derived), but backjumping is chronological rather than driven by
//! first-UIP resolution. Completeness comes from the explicit
//! try-both-branches decision stack, independent of the learned clauses --
//! the learned clauses are a pure bonus used for propagation pruning and for
//! export to the sharing engine. Good enough to be exercised by the
//! orchestration layer without pulling in a full CDCL implementation.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lbool {
    True,
    False,
    Undef,
}

/// Clause literals are stored inline up to 4 wide, the common case for
/// learned clauses shared between workers; longer clauses (most input
/// formulas) spill to the heap transparently.
#[derive(Debug, Clone)]
pub struct Clause {
    pub lits: SmallVec<[i32; 4]>,
    pub learnt: bool,
}

struct DecisionFrame {
    trail_pos: usize,
    lit: i32,
    tried_other: bool,
}

pub enum Outcome {
    Sat,
    Unsat,
    Unknown,
}

fn var_of(lit: i32) -> usize {
    (lit.unsigned_abs() - 1) as usize
}

enum ClauseStatus {
    Satisfied,
    Conflict,
    Unit(i32),
    Unresolved,
}

/// Everything the search touches between `solve` calls. Clauses (input and
/// learnt) persist across calls; the trail and decision stack reset at the
/// start of each `solve`, treating it as one invocation of the engine over
/// possibly-new assumptions.
pub struct Search {
    pub num_vars: usize,
    pub clauses: Vec<Clause>,
    pub ok: bool,

    assigns: Vec<Lbool>,
    level: Vec<i32>,
    reason: Vec<Option<usize>>,
    trail: Vec<i32>,
    decisions: Vec<DecisionFrame>,
    polarity: Vec<bool>,
    activity: Vec<f64>,
    var_inc: f64,

    pub rnd_pol: bool,
    rng: StdRng,
    pub conflicts: u64,
    pub propagations: u64,
    pub decisions_made: u64,
    pub restarts: u64,
}

impl Search {
    pub fn new() -> Self {
        Search {
            num_vars: 0,
            clauses: Vec::new(),
            ok: true,
            assigns: Vec::new(),
            level: Vec::new(),
            reason: Vec::new(),
            trail: Vec::new(),
            decisions: Vec::new(),
            polarity: Vec::new(),
            activity: Vec::new(),
            var_inc: 1.0,
            rnd_pol: false,
            rng: StdRng::seed_from_u64(0xC0FFEE),
            conflicts: 0,
            propagations: 0,
            decisions_made: 0,
            restarts: 0,
        }
    }

    pub fn ensure_vars(&mut self, n: usize) {
        if n > self.num_vars {
            self.assigns.resize(n, Lbool::Undef);
            self.level.resize(n, -1);
            self.reason.resize(n, None);
            self.polarity.resize(n, true);
            self.activity.resize(n, 0.0);
            self.num_vars = n;
        }
    }

    /// Adds a clause to the database. An empty clause makes the formula
    /// unconditionally UNSAT. A unit clause is recorded like any other
    /// clause — the next `propagate()` call will turn it into an assignment.
    pub fn add_clause(&mut self, lits: Vec<i32>, learnt: bool) {
        if lits.is_empty() {
            self.ok = false;
            return;
        }
        for &l in &lits {
            self.ensure_vars(var_of(l) + 1);
        }
        self.clauses.push(Clause {
            lits: SmallVec::from_vec(lits),
            learnt,
        });
    }

    fn value(&self, var: usize) -> Lbool {
        self.assigns[var]
    }

    fn value_lit(&self, lit: i32) -> Lbool {
        match self.value(var_of(lit)) {
            Lbool::Undef => Lbool::Undef,
            Lbool::True => {
                if lit > 0 {
                    Lbool::True
                } else {
                    Lbool::False
                }
            }
            Lbool::False => {
                if lit > 0 {
                    Lbool::False
                } else {
                    Lbool::True
                }
            }
        }
    }

    fn assign(&mut self, lit: i32, reason: Option<usize>) {
        let var = var_of(lit);
        self.assigns[var] = if lit > 0 { Lbool::True } else { Lbool::False };
        self.level[var] = self.decisions.len() as i32;
        self.reason[var] = reason;
        self.polarity[var] = lit > 0;
        self.trail.push(lit);
    }

    fn undo_to(&mut self, pos: usize) {
        while self.trail.len() > pos {
            let lit = self.trail.pop().unwrap();
            let var = var_of(lit);
            self.assigns[var] = Lbool::Undef;
            self.reason[var] = None;
            self.level[var] = -1;
        }
    }

    fn clause_status(&self, c: &Clause) -> ClauseStatus {
        let mut unassigned: Option<i32> = None;
        let mut unassigned_count = 0;
        for &lit in c.lits.iter() {
            match self.value_lit(lit) {
                Lbool::True => return ClauseStatus::Satisfied,
                Lbool::Undef => {
                    unassigned_count += 1;
                    unassigned = Some(lit);
                }
                Lbool::False => {}
            }
        }
        match unassigned_count {
            0 => ClauseStatus::Conflict,
            1 => ClauseStatus::Unit(unassigned.unwrap()),
            _ => ClauseStatus::Unresolved,
        }
    }

    /// Unit-propagates to a fixpoint. Returns the index of a falsified
    /// clause on conflict. Deliberately a simple re-scan rather than
    /// two-watched-literal propagation — see module docs.
    fn propagate(&mut self) -> Option<usize> {
        loop {
            let mut changed = false;
            for idx in 0..self.clauses.len() {
                match self.clause_status(&self.clauses[idx]) {
                    ClauseStatus::Conflict => return Some(idx),
                    ClauseStatus::Unit(lit) => {
                        self.assign(lit, Some(idx));
                        self.propagations += 1;
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                return None;
            }
        }
    }

    /// The sound, if weak, learned clause for a conflict reached under the
    /// current decision path: the negation of every currently-assigned
    /// decision literal.
    fn decision_negation_clause(&self) -> Vec<i32> {
        self.decisions.iter().map(|f| -f.lit).collect()
    }

    fn bump_decision_vars(&mut self) {
        for f in &self.decisions {
            let var = var_of(f.lit);
            self.activity[var] += self.var_inc;
        }
        self.var_inc *= 1.05;
        if self.var_inc > 1e100 {
            for a in &mut self.activity {
                *a *= 1e-100;
            }
            self.var_inc *= 1e-100;
        }
    }

    /// Pops exhausted decision frames and flips the first not-yet-flipped
    /// one. Returns `false` once the whole search space has been exhausted
    /// (the formula is UNSAT).
    fn backtrack(&mut self) -> bool {
        while let Some(frame) = self.decisions.last() {
            if frame.tried_other {
                let pos = frame.trail_pos;
                self.undo_to(pos);
                self.decisions.pop();
                continue;
            } else {
                let pos = frame.trail_pos;
                let neg = -frame.lit;
                self.undo_to(pos);
                {
                    let top = self.decisions.last_mut().unwrap();
                    top.tried_other = true;
                    top.lit = neg;
                }
                self.assign(neg, None);
                return true;
            }
        }
        false
    }

    fn pick_unassigned_var(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut best_act = -1.0;
        for v in 0..self.num_vars {
            if self.assigns[v] == Lbool::Undef {
                match best_act.partial_cmp(&self.activity[v]) {
                    Some(Ordering::Less) | None => {
                        best_act = self.activity[v];
                        best = Some(v);
                    }
                    _ => {}
                }
            }
        }
        best
    }

    fn phase(&mut self, var: usize) -> bool {
        if self.rnd_pol {
            self.rng.gen_bool(0.5)
        } else {
            self.polarity[var]
        }
    }

    /// Reseeds the random-polarity generator; called by `diversify` so each
    /// portfolio slot branches with an independent stream.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Runs search to completion (Sat/Unsat) or until `interrupted` reports
    /// true, in which case `Unknown` is returned. `cube` literals are
    /// asserted as decisions before ordinary search begins; a contradictory
    /// cube is handled exactly like any other conflict.
    ///
    /// `on_learnt` is invoked with every clause learned during this call,
    /// for the caller to filter-and-export.
    pub fn solve(
        &mut self,
        cube: &[i32],
        interrupted: &dyn Fn() -> bool,
        mut on_learnt: impl FnMut(&[i32]),
    ) -> Outcome {
        self.trail.clear();
        self.decisions.clear();
        for v in 0..self.num_vars {
            self.assigns[v] = Lbool::Undef;
            self.level[v] = -1;
            self.reason[v] = None;
        }

        if !self.ok {
            return Outcome::Unsat;
        }

        // Cube literals are pushed as decision frames so propagation sees
        // them immediately; `backtrack()` could in principle flip one if
        // every free decision above it is exhausted. The coordinator never
        // issues a non-empty cube (no search-splitting module is in scope),
        // so this never triggers in practice.
        for &lit in cube {
            self.ensure_vars(var_of(lit) + 1);
            let trail_pos = self.trail.len();
            self.decisions.push(DecisionFrame {
                trail_pos,
                lit,
                tried_other: false,
            });
            self.assign(lit, None);
        }

        let mut since_interrupt_check = 0u32;
        loop {
            since_interrupt_check += 1;
            if since_interrupt_check >= 64 {
                since_interrupt_check = 0;
                if interrupted() {
                    return Outcome::Unknown;
                }
            }

            match self.propagate() {
                Some(conflict_idx) => {
                    self.conflicts += 1;
                    let _ = conflict_idx;
                    if self.decisions.len() <= cube.len() {
                        // conflict doesn't depend on any free decision —
                        // unsatisfiable under the given cube/formula.
                        self.ok = self.decisions.is_empty();
                        return Outcome::Unsat;
                    }
                    let learnt = self.decision_negation_clause();
                    on_learnt(&learnt);
                    self.bump_decision_vars();
                    self.add_clause(learnt, true);
                    if !self.backtrack() {
                        return Outcome::Unsat;
                    }
                }
                None => match self.pick_unassigned_var() {
                    Some(var) => {
                        let lit = if self.phase(var) {
                            (var + 1) as i32
                        } else {
                            -((var + 1) as i32)
                        };
                        let trail_pos = self.trail.len();
                        self.decisions.push(DecisionFrame {
                            trail_pos,
                            lit,
                            tried_other: false,
                        });
                        self.decisions_made += 1;
                        self.assign(lit, None);
                    }
                    None => return Outcome::Sat,
                },
            }
        }
    }

    pub fn model(&self) -> Vec<i32> {
        (0..self.num_vars)
            .map(|v| {
                let sign = match self.assigns[v] {
                    Lbool::True => 1,
                    _ => -1,
                };
                sign * (v as i32 + 1)
            })
            .collect()
    }

    pub fn set_phase(&mut self, var: usize, value: bool) {
        self.ensure_vars(var + 1);
        self.polarity[var] = value;
    }
}

impl Default for Search {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_interrupted() -> bool {
        false
    }

    #[test]
    fn unit_clause_is_satisfiable() {
        let mut s = Search::new();
        s.add_clause(vec![1], false);
        let outcome = s.solve(&[], &never_interrupted, |_| {});
        assert!(matches!(outcome, Outcome::Sat));
        assert_eq!(s.model()[0], 1);
    }

    #[test]
    fn contradiction_is_unsat() {
        let mut s = Search::new();
        s.add_clause(vec![1], false);
        s.add_clause(vec![-1], false);
        let outcome = s.solve(&[], &never_interrupted, |_| {});
        assert!(matches!(outcome, Outcome::Unsat));
    }

    #[test]
    fn empty_clause_is_unsat_without_search() {
        let mut s = Search::new();
        s.add_clause(vec![], false);
        let outcome = s.solve(&[], &never_interrupted, |_| {});
        assert!(matches!(outcome, Outcome::Unsat));
    }

    #[test]
    fn small_3sat_is_satisfiable() {
        let mut s = Search::new();
        // (x1 v x2 v x3) & (-x1 v x2) & (-x2 v x3) & (-x3 v x1)
        s.add_clause(vec![1, 2, 3], false);
        s.add_clause(vec![-1, 2], false);
        s.add_clause(vec![-2, 3], false);
        s.add_clause(vec![-3, 1], false);
        let outcome = s.solve(&[], &never_interrupted, |_| {});
        assert!(matches!(outcome, Outcome::Sat));
        let model = s.model();
        let sat = |lits: &[i32]| lits.iter().any(|&l| model[var_of(l)] == l);
        assert!(sat(&[1, 2, 3]));
        assert!(sat(&[-1, 2]));
        assert!(sat(&[-2, 3]));
        assert!(sat(&[-3, 1]));
    }

    #[test]
    fn interrupt_yields_unknown() {
        let mut s = Search::new();
        s.add_clause(vec![1, 2], false);
        let outcome = s.solve(&[], &|| true, |_| {});
        assert!(matches!(outcome, Outcome::Unknown));
    }

    #[test]
    fn learns_clauses_on_conflict() {
        let mut s = Search::new();
        s.add_clause(vec![1, 2], false);
        s.add_clause(vec![-1, 2], false);
        s.add_clause(vec![1, -2], false);
        s.add_clause(vec![-1, -2], false);
        let mut learnt_count = 0;
        let outcome = s.solve(&[], &never_interrupted, |_| learnt_count += 1);
        assert!(matches!(outcome, Outcome::Unsat));
        assert!(learnt_count > 0);
    }
}
