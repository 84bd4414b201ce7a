//! OI dynamic binary translator CLI.
//!
//! This binary provides the single entry point for running guest programs.
//! It performs:
//! 1. **Loading:** Parse an OI ELF image into a fresh machine.
//! 2. **Configuration:** Built-in defaults, an optional JSON config file,
//!    and per-flag overrides (threads, politic, hotness, region limit).
//! 3. **Execution:** Interpret with region formation and native dispatch
//!    until the guest exits; propagate its exit status.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;

use oidbt_core::aos::{Database, PoliticSolver};
use oidbt_core::config::{Config, FormationPolicy, OptPolitic};
use oidbt_core::ir::exec::EvalBackend;
use oidbt_core::machine::loader;
use oidbt_core::manager::Manager;
use oidbt_core::rft::Net;
use oidbt_core::Simulator;

#[derive(Parser, Debug)]
#[command(
    name = "oidbt",
    author,
    version,
    about = "OI dynamic binary translator",
    long_about = "Interpret an OI (OpenISA) binary, promote hot execution tails to regions,\n\
                  and dispatch through natively compiled entries.\n\n\
                  Examples:\n  oidbt guest.elf\n  oidbt -t 2 -p aggressive guest.elf"
)]
struct Cli {
    /// Guest ELF binary to execute.
    binary: PathBuf,

    /// JSON configuration file (flags below override it).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of background compilation workers.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Optimization politic.
    #[arg(short = 'p', long, value_enum)]
    politic: Option<Politic>,

    /// Hotness threshold for region promotion.
    #[arg(long)]
    hotness: Option<u32>,

    /// Region size limit (enables the limited formation policy).
    #[arg(long)]
    region_limit: Option<usize>,

    /// Relaxed region formation (stop on repeated address, not on any
    /// backward branch).
    #[arg(long)]
    relaxed: bool,

    /// AOS database file to load and persist outcomes to.
    #[arg(long)]
    aos_db: Option<PathBuf>,

    /// Per-region pipeline logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Politic {
    None,
    Normal,
    Aggressive,
}

impl From<Politic> for OptPolitic {
    fn from(p: Politic) -> Self {
        match p {
            Politic::None => OptPolitic::None,
            Politic::Normal => OptPolitic::Normal,
            Politic::Aggressive => OptPolitic::Aggressive,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("error: cannot read config {}: {e}", path.display());
                process::exit(1);
            });
            serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
                eprintln!("error: bad config {}: {e}", path.display());
                process::exit(1);
            })
        }
        None => Config::default(),
    };

    if let Some(threads) = cli.threads {
        config.pipeline.num_threads = threads;
    }
    if let Some(politic) = cli.politic {
        config.pipeline.politic = politic.into();
    }
    if let Some(hotness) = cli.hotness {
        config.formation.hotness_threshold = hotness;
    }
    if let Some(limit) = cli.region_limit {
        config.formation.region_limit_size = limit;
        config.formation.policy = FormationPolicy::Limited;
    }
    config.formation.relaxed |= cli.relaxed;
    config.pipeline.verbose |= cli.verbose;

    let bytes = std::fs::read(&cli.binary).unwrap_or_else(|e| {
        eprintln!("error: cannot read {}: {e}", cli.binary.display());
        process::exit(1);
    });
    let machine = loader::load_elf(&bytes, &config).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });

    let solver = match &cli.aos_db {
        Some(path) if path.exists() => {
            let db = Database::load(path).unwrap_or_else(|e| {
                eprintln!("error: {e}");
                process::exit(1);
            });
            PoliticSolver::with_database(config.pipeline.politic, db)
        }
        _ => PoliticSolver::new(config.pipeline.politic),
    };

    let manager = Manager::with_parts(&config, Box::new(EvalBackend), Box::new(solver));
    manager.set_methods(machine.methods().clone());
    let mut sim = Simulator {
        net: Net::new(&config.formation),
        machine,
        manager,
    };

    match sim.run() {
        Ok(status) => {
            if let Some(path) = &cli.aos_db {
                // Snapshot the solver's outcomes for the next run.
                if sim.manager.num_threads() > 0 {
                    sim.manager.drain();
                }
                if let Err(e) = sim.manager.save_aos_database(path) {
                    eprintln!("warning: could not save AOS database: {e}");
                }
            }
            tracing::info!(status, "guest exited");
            drop(sim);
            process::exit(status as i32);
        }
        Err(e) => {
            use oidbt_core::common::Error;
            eprintln!("fatal: {e}");
            let code = match e {
                Error::UnsupportedSyscall(_) => 2,
                _ => 1,
            };
            process::exit(code);
        }
    }
}
