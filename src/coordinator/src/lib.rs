//! Top-level lifecycle: parse parameters, load the formula, instantiate
//! solvers, wire sharers and the working tree, optionally wire a
//! distributed transport, run the termination poll, and shut everything
//! down in order.

pub mod params;

use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use log::info;

use painless_clauses::{ClauseAllocator, ClauseDatabase, CoordinationContext, FinalVerdict};
use painless_engine::ReferenceEngine;
use painless_sharing::{wire_sharers, Sharer};
use painless_solver::{dimacs::load_dimacs, Solver, SolverError, SolverRole};
use painless_transport::{AsyncTransport, DistributedTransport, Fabric, SyncTransport, VirtualSolver};
use painless_working::{Portfolio, SequentialWorker, WorkingStrategy};

pub use params::{ExternalSharingStrategy, Parameters};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Load(#[from] SolverError),
}

/// What a single rank's run produced. Only the winning rank's report
/// carries `Some(verdict)`; the coordinator-per-rank binary decides to
/// print based on `is_winning_rank`.
pub struct RunReport {
    pub is_winning_rank: bool,
    pub verdict: Option<FinalVerdict>,
}

/// Runs one rank of the portfolio to completion. `fabric` is this rank's
/// handle onto the (possibly single-rank) simulated communicator built by
/// the caller via `Fabric::build(params.ranks)`.
pub fn run(rank_fabric: Fabric, params: &Parameters) -> Result<RunReport, CoordinatorError> {
    let rank = rank_fabric.rank();
    let heartbeat_fabric = rank_fabric.clone();
    let ctx = Arc::new(CoordinationContext::new());

    let cnf = match load_dimacs(&params.dimacs_path) {
        Ok(cnf) => cnf,
        Err(err) => return Err(CoordinatorError::Load(SolverError::Load(err))),
    };

    if cnf.has_empty_clause() {
        // Rejected at load, no worker thread ever starts: immediate UNSAT.
        ctx.try_publish(FinalVerdict::Unsat);
        return Ok(RunReport {
            is_winning_rank: true,
            verdict: Some(FinalVerdict::Unsat),
        });
    }

    // One Search engine per configured worker thread, plus one Reducer
    // holding the community-manager identity on solver 0.
    let mut engines: Vec<Arc<dyn Solver>> = Vec::with_capacity(params.workers_per_rank + 1);
    for local_id in 0..params.workers_per_rank {
        let id = (rank * params.workers_per_rank + local_id) as i32;
        let engine = Arc::new(ReferenceEngine::new(id));
        engine.set_initial_lbd_limit(params.lbd_limit);
        engine.add_initial_clauses(&cnf.clauses);
        // Two-stage diversification: parity splits the portfolio into two
        // heuristic families; the seed also folds in rank and id so ranks
        // don't run identical portfolios.
        let seed = diversification_seed(rank as u64, id as u64, params.run_seed);
        engine.diversify(seed);
        engines.push(engine);
    }
    let reducer_id = (rank * params.workers_per_rank + params.workers_per_rank) as i32;
    let reducer = Arc::new(ReferenceEngine::with_role(reducer_id, SolverRole::Reducer));
    reducer.add_initial_clauses(&cnf.clauses);
    engines.push(reducer.clone() as Arc<dyn Solver>);

    let mut sharing_participants = engines.clone();

    let transport: Option<Box<dyn DistributedTransport>> = if params.ranks > 1
        && params.ext_shr_strat != ExternalSharingStrategy::None
    {
        let allocator = Arc::new(ClauseAllocator::new());
        let clauses_to_export = Arc::new(ClauseDatabase::new());
        let clauses_to_import = Arc::new(ClauseDatabase::new());

        let virtual_id = reducer_id + 1;
        let virtual_solver = Arc::new(VirtualSolver::new(
            virtual_id,
            clauses_to_import.clone(),
            clauses_to_export.clone(),
        ));
        sharing_participants.push(virtual_solver as Arc<dyn Solver>);

        let built: Box<dyn DistributedTransport> = match params.ext_shr_strat {
            ExternalSharingStrategy::Sync => Box::new(SyncTransport::new(
                rank_fabric,
                params.shr_sleep,
                ctx.clone(),
                clauses_to_export,
                clauses_to_import,
                allocator,
            )),
            ExternalSharingStrategy::Async => Box::new(AsyncTransport::new(
                rank_fabric,
                params.shr_sleep,
                ctx.clone(),
                clauses_to_export,
                clauses_to_import,
                allocator,
                params.shr_lit,
            )),
            ExternalSharingStrategy::None => unreachable!(),
        };
        Some(built)
    } else {
        None
    };

    let sharers: Vec<Sharer> = wire_sharers(
        &sharing_participants,
        params.shr_strat,
        params.shr_sleep,
        params.shr_lit,
    );
    let sharer_handles: Vec<_> = sharers
        .into_iter()
        .map(|s| s.spawn(ctx.clone()))
        .collect();

    let transport_handle = transport.map(|t| {
        let t: Arc<dyn DistributedTransport> = Arc::from(t);
        let t_run = t.clone();
        let handle = std::thread::Builder::new()
            .name("transport".into())
            .spawn(move || t_run.run())
            .expect("failed to spawn transport thread");
        (t, handle)
    });

    let workers: Vec<Arc<dyn WorkingStrategy>> = engines
        .iter()
        .map(|e| SequentialWorker::new(e.clone(), ctx.clone()) as Arc<dyn WorkingStrategy>)
        .collect();
    let portfolio = Portfolio::new(workers, ctx.clone());
    portfolio.start(&[]);

    let start = Instant::now();
    let mut winning_rank: Option<usize> = None;
    loop {
        std::thread::sleep(Duration::from_secs(1));

        let local_ending = ctx.is_global_ending();
        let votes = if params.ranks > 1 {
            heartbeat_fabric.allgather_bool(local_ending)
        } else {
            vec![local_ending]
        };

        if let Some(first) = votes.iter().position(|&v| v) {
            winning_rank = Some(first);
            ctx.set_global_ending();
            break;
        }

        if let Some(timeout) = params.timeout {
            if start.elapsed() >= timeout {
                // Mirrors painless.cpp's timeout handling: raise the flags
                // and keep looping rather than breaking immediately. Every
                // other rank is still blocked inside `allgather_bool` each
                // round; breaking here would leave this rank's thread never
                // calling it again, deadlocking the barrier permanently.
                // The next round's allgather sees this rank voting true and
                // every rank converges together through the winning-node
                // path above.
                ctx.set_global_ending();
                portfolio.set_interrupt();
            }
        }
    }

    #[cfg(feature = "logging")]
    info!("rank {} shutting down (winner={:?})", rank, winning_rank);

    portfolio.set_interrupt();
    for h in sharer_handles {
        let _ = h.join();
    }
    portfolio.join();
    if let Some((t, handle)) = transport_handle {
        t.shutdown();
        let _ = handle.join();
    }
    let _ = painless_clauses::ClauseManager::join();

    // A rank reaching the global ending flag via a verdict is the winner;
    // if the run instead ended by timeout (no verdict was ever published),
    // no rank "won", so rank 0 is the one that reports.
    let is_winning_rank = match winning_rank {
        Some(w) => w == rank,
        None => rank == 0,
    };
    Ok(RunReport {
        is_winning_rank,
        verdict: if is_winning_rank {
            ctx.final_verdict()
        } else {
            None
        },
    })
}

fn diversification_seed(rank: u64, id: u64, run_seed: u64) -> u64 {
    // Deliberately not cryptographic: folds rank/id/run_seed together so
    // distinct workers get distinct heuristics without promising
    // determinism across runs.
    run_seed
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(rank.wrapping_shl(32))
        .wrapping_add(id)
        | 1
}
