//! exchange-halos: load a mesh, grow ghost layers, exchange tag data and
//! report collective phase timings.
//!
//! ```bash
//! # four in-process ranks on a generated sphere
//! RUST_LOG=info cargo run --bin exchange-halos -- --ranks 4 --nghosts 2
//!
//! # one rank per MPI process
//! mpirun -n 4 target/release/exchange-halos --input mesh.pjson
//! ```

use clap::Parser;
use mesh_halo::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "exchange-halos",
    version = env!("CARGO_PKG_VERSION"),
    about = "Ghost-layer setup and halo tag exchange benchmark"
)]
struct Cli {
    /// Mesh file (`.json` or `.pjson`); a lat/lon sphere is generated when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Number of ghost layers.
    #[arg(short = 'g', long)]
    nghosts: Option<u32>,
    /// Width of the vector tag.
    #[arg(short = 'v', long)]
    vtaglength: Option<usize>,
    /// Exchanges per timed tag phase.
    #[arg(short = 'n', long)]
    nexchanges: Option<usize>,
    /// Write per-rank JSON dumps next to `--output`.
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// In-process ranks (ignored under MPI).
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,
    /// JSON configuration applied before the other flags.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn runtime_config(&self) -> Result<RuntimeConfig, MeshHaloError> {
        let mut cfg = match &self.config {
            Some(path) => RuntimeConfig::from_json_file(path)?,
            None => RuntimeConfig::default(),
        };
        if let Some(input) = &self.input {
            cfg.input = Some(input.clone());
        }
        if let Some(n) = self.nghosts {
            cfg.nghosts = n;
        }
        if let Some(n) = self.vtaglength {
            cfg.vtaglength = n;
        }
        if let Some(n) = self.nexchanges {
            cfg.nexchanges = n;
        }
        if let Some(out) = &self.output {
            cfg.output = out.clone();
        }
        cfg.debug |= self.debug;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn run_rank<C: Communicator>(comm: C, cfg: RuntimeConfig) -> Result<HaloReport, MeshHaloError> {
    let mut ctx = HaloContext::load(comm, cfg)?;
    ctx.run()
}

/// The report as seen by rank 0; other MPI processes get `None`.
#[cfg(feature = "mpi-support")]
fn run_world(_ranks: usize, cfg: RuntimeConfig) -> Result<Option<HaloReport>, MeshHaloError> {
    let comm = MpiComm::new()?;
    let root = comm.rank() == 0;
    let report = run_rank(comm, cfg)?;
    Ok(root.then_some(report))
}

#[cfg(not(feature = "mpi-support"))]
fn run_world(ranks: usize, cfg: RuntimeConfig) -> Result<Option<HaloReport>, MeshHaloError> {
    if ranks == 0 {
        return Err(MeshHaloError::InvalidConfig("--ranks must be at least 1".into()));
    }
    if ranks == 1 {
        return run_rank(NoComm, cfg).map(Some);
    }
    let results: Vec<Result<HaloReport, MeshHaloError>> = std::thread::scope(|s| {
        let handles: Vec<_> = RayonComm::world(ranks)
            .into_iter()
            .map(|comm| {
                let cfg = cfg.clone();
                s.spawn(move || run_rank(comm, cfg))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(MeshHaloError::Invariant("rank thread panicked".into())))
            })
            .collect()
    });
    let mut first = None;
    for res in results {
        match res {
            Ok(report) => {
                first.get_or_insert(report);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(first)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let result = cli
        .runtime_config()
        .and_then(|cfg| run_world(cli.ranks, cfg));
    match result {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(report)) => {
            println!("Total number of cells in the mesh: {}", report.total_owned_cells);
            println!("Consolidated: {}", report.consolidated());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{} error: {e}", e.category());
            ExitCode::from(e.category().exit_code())
        }
    }
}
