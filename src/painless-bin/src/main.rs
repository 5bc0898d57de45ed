//! Process bootstrap: CLI parsing, `ClauseManager` lifetime framing, and
//! winner-only result printing. The orchestration core itself lives in
//! `painless-coordinator`; this binary only wires it to argv.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use painless_clauses::{ClauseManager, FinalVerdict};
use painless_coordinator::{run, ExternalSharingStrategy as CoordExtStrat, Parameters};
use painless_sharing::SharingStrategy;
use painless_transport::Fabric;

/// Parallel-and-distributed portfolio SAT solver. `-ranks` is the one
/// addition beyond the standard flag set, standing in for an external
/// multi-process launch.
#[derive(Parser, Debug)]
#[command(name = "painless", disable_help_flag = true)]
struct Cli {
    /// Worker thread count per process.
    #[arg(long = "c", default_value_t = 24)]
    workers: usize,

    /// Per-process memory cap in GiB. Not enforced; accepted for CLI
    /// fidelity (memory introspection is out of scope).
    #[arg(long = "max-memory", default_value_t = 51)]
    max_memory: usize,

    /// Wall-clock timeout in seconds; unbounded if omitted.
    #[arg(long = "t")]
    timeout: Option<u64>,

    /// Maximum LBD a solver will export.
    #[arg(long = "lbd-limit", default_value_t = 2)]
    lbd_limit: u32,

    /// Sharer/transport sleep between rounds, in microseconds.
    #[arg(long = "shr-sleep", default_value_t = 500_000)]
    shr_sleep: u64,

    /// Per-round literal budget.
    #[arg(long = "shr-lit", default_value_t = 1500)]
    shr_lit: usize,

    /// 1 = two sharers splitting solvers, 2 = single sharer covering all.
    #[arg(long = "shr-strat", default_value_t = 2)]
    shr_strat: u32,

    /// 0 = none, 1 = synchronous transport, 2 = asynchronous.
    #[arg(long = "ext-shr-strat", default_value_t = 0)]
    ext_shr_strat: u32,

    /// Verbosity; only meaningful when built with the `logging` feature.
    #[arg(long = "v", default_value_t = 0)]
    verbosity: u32,

    /// Suppress model printing on SAT.
    #[arg(long = "no-model")]
    no_model: bool,

    /// Size of the in-process simulated fabric, standing in for a
    /// multi-process launch.
    #[arg(long = "ranks", default_value_t = 1)]
    ranks: usize,

    /// Print help and exit.
    #[arg(long = "h")]
    help: bool,

    /// Positional DIMACS input file.
    dimacs_path: Option<PathBuf>,
}

const USAGE: &str = "\
usage: painless [options] <input-file>

options:
  -c=<INT>              worker thread count per process (default 24)
  -max-memory=<INT>     per-process memory cap in GiB (default 51)
  -t=<INT>              wall-clock timeout in seconds (default: unbounded)
  -lbd-limit=<INT>      maximum LBD a solver will export (default 2)
  -shr-sleep=<INT>      sharer/transport sleep between rounds, microseconds (default 500000)
  -shr-lit=<INT>        per-round literal budget (default 1500)
  -shr-strat=<INT>      1 = two sharers splitting solvers, 2 = single sharer (default 2)
  -ext-shr-strat=<INT>  0 = none, 1 = synchronous transport, 2 = asynchronous (default 0)
  -v=<INT>              verbosity (default 0)
  -no-model             suppress model printing on SAT
  -h                    print this help and exit
";

/// This framework's flags are conventionally single-dash, even the
/// multi-letter ones (`-shr-strat=2`, `-no-model`) -- clap's derive API only
/// ever registers a long option under a double-dash prefix, so every flag
/// above is declared with a bare `long` name and the argv single-dashes are
/// rewritten to double-dashes here before `Cli::parse_from` sees them. This
/// keeps `USAGE` and the parser in agreement instead of silently accepting
/// only `--shr-strat` while documenting `-shr-strat`.
fn normalize_single_dash_flags(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| {
        let bytes = arg.as_bytes();
        if !arg.starts_with("--") && bytes.len() > 1 && bytes[0] == b'-' && bytes[1].is_ascii_alphabetic()
        {
            format!("-{}", arg)
        } else {
            arg
        }
    })
    .collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_single_dash_flags(std::env::args()));

    if cli.help {
        print!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    #[cfg(feature = "logging")]
    {
        if cli.verbosity > 0 {
            env_logger::Builder::from_default_env()
                .filter_level(log::LevelFilter::Debug)
                .init();
        } else {
            env_logger::init();
        }
    }

    let dimacs_path = match cli.dimacs_path {
        Some(p) => p,
        None => {
            eprintln!("painless: missing DIMACS input file\n\n{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    let shr_strat = if cli.shr_strat == 1 {
        SharingStrategy::SplitInTwo
    } else {
        SharingStrategy::Single
    };
    let ext_shr_strat = match cli.ext_shr_strat {
        1 => CoordExtStrat::Sync,
        2 => CoordExtStrat::Async,
        _ => CoordExtStrat::None,
    };

    let run_seed = rand::random::<u64>();
    let mut params = Parameters::defaults_with_path(dimacs_path, run_seed);
    params.workers_per_rank = cli.workers;
    params.max_memory_gib = cli.max_memory;
    params.timeout = cli.timeout.map(Duration::from_secs);
    params.lbd_limit = cli.lbd_limit;
    params.shr_sleep = Duration::from_micros(cli.shr_sleep);
    params.shr_lit = cli.shr_lit;
    params.shr_strat = shr_strat;
    params.ext_shr_strat = ext_shr_strat;
    params.verbosity = cli.verbosity;
    params.no_model = cli.no_model;
    params.ranks = cli.ranks.max(1);

    ClauseManager::init();

    let fabrics = Fabric::build(params.ranks);
    let handles: Vec<_> = fabrics
        .into_iter()
        .map(|fabric| {
            let params = params.clone();
            std::thread::Builder::new()
                .name(format!("rank-{}", fabric.rank()))
                .spawn(move || run(fabric, &params))
                .expect("failed to spawn rank thread")
        })
        .collect();

    let reports: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect();

    let _ = ClauseManager::join();

    for report in reports {
        let report = match report {
            Ok(report) => report,
            Err(err) => {
                eprintln!("painless: {}", err);
                return ExitCode::FAILURE;
            }
        };
        if !report.is_winning_rank {
            continue;
        }
        match report.verdict {
            Some(FinalVerdict::Sat(model)) => {
                println!("s SATISFIABLE");
                if !params.no_model {
                    print!("v");
                    for lit in &model {
                        print!(" {}", lit);
                    }
                    println!(" 0");
                }
            }
            Some(FinalVerdict::Unsat) => println!("s UNSATISFIABLE"),
            None => println!("s UNKNOWN"),
        }
    }

    ExitCode::SUCCESS
}
