//! tt-inventory - seismic travel-time inventory builder
//!
//! Computes P and S travel-time fields for every station of a catalog and
//! writes them into one archive.
//!
//! # Usage
//!
//! ```bash
//! # Build an archive with one worker per CPU
//! tt-inventory build --stations stations.csv --p-model vp.json.zst \
//!     --s-model vs.json.zst --output tt.zip
//!
//! # Stop at the first failed unit, 8 workers
//! tt-inventory build ... --fail-fast -n 8
//!
//! # List records, or summarise one clipped record
//! tt-inventory inspect tt.zip
//! tt-inventory inspect tt.zip --key XX.ABC..P --min 6350,1.3,0.3 --max 6371,1.4,0.4
//! ```
//!
//! # Environment Variables
//!
//! - `TT_INVENTORY_CONFIG`: path to the TOML config (default: `./tt_inventory.toml`)
//! - `RUST_LOG`: logging level (default: info)
//!
//! # Exit Status
//!
//! `0` on success, `1` on a fatal error, `2` when the archive was written but
//! some work units failed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use tt_inventory::config::{FailurePolicy, PipelineConfig};
use tt_inventory::pipeline::{self, RunInputs};
use tt_inventory::storage::ArchiveReader;
use tt_inventory::types::PhaseMap;

/// Exit status for a run that produced an incomplete archive.
const EXIT_INCOMPLETE: u8 = 2;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tt-inventory")]
#[command(about = "Seismic travel-time inventory builder")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Compute travel times for every station and phase and write the archive
    Build(BuildArgs),
    /// Show archive metadata or summarise one record
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Station catalog (CSV with network, station, location, latitude,
    /// longitude, elevation columns)
    #[arg(long, value_name = "CSV")]
    stations: PathBuf,

    /// P-wave velocity model (JSON, or zstd-compressed JSON ending in .zst)
    #[arg(long, value_name = "FILE")]
    p_model: PathBuf,

    /// S-wave velocity model
    #[arg(long, value_name = "FILE")]
    s_model: PathBuf,

    /// Archive to create
    #[arg(short, long, value_name = "ZIP")]
    output: PathBuf,

    /// Concurrent workers (0 = one per CPU). Overrides the config file.
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// Config file. Must exist when given; otherwise the standard search
    /// order applies.
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Abort the run, without writing an archive, on the first failed unit
    #[arg(long)]
    fail_fast: bool,

    /// Directory to create the scratch directory in
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// Archive to read
    archive: PathBuf,

    /// Record to summarise
    #[arg(long)]
    key: Option<String>,

    /// Lower corner of the subvolume, in the archive's coordinates
    #[arg(long, value_name = "A,B,C", value_parser = parse_coords, requires = "key")]
    min: Option<[f64; 3]>,

    /// Upper corner of the subvolume
    #[arg(long, value_name = "A,B,C", value_parser = parse_coords, requires = "key")]
    max: Option<[f64; 3]>,
}

fn parse_coords(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [a, b, c] = parts.as_slice() else {
        return Err(format!("expected three comma-separated numbers, got '{s}'"));
    };
    let parse = |v: &str| {
        v.parse::<f64>()
            .map_err(|e| format!("invalid coordinate '{v}': {e}"))
    };
    Ok([parse(a)?, parse(b)?, parse(c)?])
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_build(args: BuildArgs) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::load(),
    };

    // CLI overrides
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if args.fail_fast {
        config.pipeline.failure_policy = FailurePolicy::Abort;
    }
    if let Some(dir) = args.scratch_dir {
        config.scratch.parent_dir = Some(dir);
    }
    config.validate().context("invalid configuration")?;

    info!(
        workers = config.resolved_workers(),
        policy = ?config.pipeline.failure_policy,
        sharing = ?config.pipeline.model_sharing,
        "tt-inventory build"
    );

    let inputs = RunInputs {
        stations: args.stations,
        models: PhaseMap::new(args.p_model, args.s_model),
        output: args.output,
    };
    let report = pipeline::run(&inputs, &config).context("travel-time run failed")?;

    println!("{report}");
    if report.complete {
        Ok(ExitCode::SUCCESS)
    } else {
        for id in &report.failed {
            warn!(identifier = %id, "Missing from archive");
        }
        Ok(ExitCode::from(EXIT_INCOMPLETE))
    }
}

fn run_inspect(args: InspectArgs) -> Result<ExitCode> {
    let mut reader = ArchiveReader::open(&args.archive)
        .with_context(|| format!("opening archive {}", args.archive.display()))?;

    let Some(key) = args.key else {
        let meta = reader.meta();
        println!("archive:     {}", reader.path().display());
        println!("format:      v{} ({})", meta.format_version, meta.field_type);
        println!("created:     {}", meta.created_at.to_rfc3339());
        println!("complete:    {}", meta.complete);
        if let Some(g) = reader.geometry() {
            println!("coord_sys:   {}", g.coord_sys);
            println!("min_coords:  {:?}", g.min_coords);
            println!("max_coords:  {:?}", g.max_coords());
            println!("intervals:   {:?}", g.node_intervals);
            println!("npts:        {:?}", g.npts);
        }
        println!("records:     {}", reader.len());
        for key in reader.keys() {
            println!("  {key}");
        }
        if !meta.failed.is_empty() {
            println!("failed:      {}", meta.failed.len());
            for id in &meta.failed {
                println!("  {id}");
            }
        }
        return Ok(ExitCode::SUCCESS);
    };

    if !reader.contains(&key) {
        bail!("record '{}' not found in {}", key, args.archive.display());
    }
    let field = reader
        .read(&key, args.min, args.max)
        .with_context(|| format!("reading record '{key}'"))?;
    let (lo, hi) = field.value_range();
    println!("record:      {key}");
    println!("min_coords:  {:?}", field.min_coords());
    println!("max_coords:  {:?}", field.max_coords());
    println!("npts:        {:?}", field.npts());
    println!("travel time: {lo:.6} .. {hi:.6} s");
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        SubCommand::Build(build) => run_build(build),
        SubCommand::Inspect(inspect) => run_inspect(inspect),
    }
}
