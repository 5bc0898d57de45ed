//! Run configuration, defaulted and validated here so `painless-bin` only
//! has to parse strings. Kept separate from CLI parsing itself, which
//! stays in the binary crate, mirroring the library/`clap`-wiring split
//! between a solving crate and its binary.

use std::path::PathBuf;
use std::time::Duration;

use painless_sharing::SharingStrategy;

/// `-ext-shr-strat`: which (if any) distributed transport variant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSharingStrategy {
    None,
    Sync,
    Async,
}

/// The fully-resolved configuration for one run, shared by every simulated
/// rank (only `ranks`/`dimacs_path`/etc. are rank-independent; per-rank
/// identity comes from the `Fabric` handle passed to `coordinator::run`).
#[derive(Debug, Clone)]
pub struct Parameters {
    /// `-c`: worker thread count per process.
    pub workers_per_rank: usize,
    /// `-max-memory`: per-process memory cap in GiB. Not enforced (memory
    /// introspection is out of scope); kept for CLI fidelity and surfaced
    /// to logs only.
    pub max_memory_gib: usize,
    /// `-t`: wall-clock timeout.
    pub timeout: Option<Duration>,
    /// `-lbd-limit`: maximum LBD a solver will export.
    pub lbd_limit: u32,
    /// `-shr-sleep`: sharer/transport sleep between rounds.
    pub shr_sleep: Duration,
    /// `-shr-lit`: per-round literal budget.
    pub shr_lit: usize,
    /// `-shr-strat`.
    pub shr_strat: SharingStrategy,
    /// `-ext-shr-strat`.
    pub ext_shr_strat: ExternalSharingStrategy,
    /// `-v`: verbosity. Only meaningful when the `logging` feature is on;
    /// otherwise accepted and ignored for CLI fidelity.
    pub verbosity: u32,
    /// `-no-model`: suppress model printing on SAT.
    pub no_model: bool,
    /// `-ranks`: size of the in-process simulated fabric, standing in for
    /// an external multi-process launch.
    pub ranks: usize,
    /// Positional DIMACS path.
    pub dimacs_path: PathBuf,
    /// Seed for the run's diversification, not exposed on the CLI: callers
    /// who want a reproducible run pass a fixed seed; the binary defaults
    /// to a randomized one.
    pub run_seed: u64,
}

impl Parameters {
    /// Documented defaults, with a DIMACS path that must be overwritten by
    /// the caller (there's no sensible default for it).
    pub fn defaults_with_path(dimacs_path: PathBuf, run_seed: u64) -> Self {
        Parameters {
            workers_per_rank: 24,
            max_memory_gib: 51,
            timeout: None,
            lbd_limit: 2,
            shr_sleep: Duration::from_micros(500_000),
            shr_lit: 1500,
            shr_strat: SharingStrategy::Single,
            ext_shr_strat: ExternalSharingStrategy::None,
            verbosity: 0,
            no_model: false,
            ranks: 1,
            dimacs_path,
            run_seed,
        }
    }
}
