//! Travel-Time Pipeline
//!
//! ## Scatter-Gather Sequence
//!
//! ```text
//! PHASE 1: Catalog      read + deduplicate stations (fatal on error)
//! PHASE 2: Plan         stations x {P, S} -> work units
//! PHASE 3: Distribute   bounded worker pool, one solve per unit -> scratch
//! PHASE 4: Consolidate  scratch entries in identifier order -> archive
//! PHASE 5: Cleanup      scratch directory removed (also on any error)
//! ```
//!
//! The archive is only created after every unit has finished and only the
//! single-threaded consolidator writes to it.

mod consolidator;
mod distributor;
mod executor;
mod models;

pub use consolidator::consolidate;
pub use distributor::{plan_units, DistributionReport, UnitFailure, WorkDistributor};
pub use executor::{TaskExecutor, UnitError};
pub use models::ModelSource;

use crate::catalog::{self, CatalogError};
use crate::config::{FailurePolicy, PipelineConfig};
use crate::solver::{FieldSolver, ShortestPathSolver};
use crate::storage::{ArchiveError, ArchiveWriter, ScratchError, ScratchStore};
use crate::types::PhaseMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Errors that end a run. Per-unit failures only surface here under
/// [`FailurePolicy::Abort`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("station catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("scratch store: {0}")]
    Scratch(#[from] ScratchError),

    #[error("archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error(
        "{} work unit(s) failed, {skipped} skipped; first failure {first_failed}: {first_error}",
        .failed.len()
    )]
    UnitsFailed {
        /// Sorted identifiers of every failed unit
        failed: Vec<String>,
        skipped: usize,
        /// The failure that stopped the run
        first_failed: String,
        first_error: String,
    },

    #[error("archive holds {found} records but {expected} units succeeded")]
    RecordCountMismatch { expected: usize, found: usize },
}

/// Input files of one run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    /// Station catalog (CSV)
    pub stations: PathBuf,
    /// Velocity model per phase
    pub models: PhaseMap<PathBuf>,
    /// Archive to create
    pub output: PathBuf,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Stations after deduplication
    pub stations: usize,
    pub units: usize,
    /// Records written to the archive
    pub records: usize,
    /// Identifiers of units absent from the archive, sorted
    pub failed: Vec<String>,
    pub archive_path: PathBuf,
    pub complete: bool,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} stations, {} units, {} records, {} failed -> {} ({}) in {:.1}s",
            self.stations,
            self.units,
            self.records,
            self.failed.len(),
            self.archive_path.display(),
            if self.complete { "complete" } else { "INCOMPLETE" },
            self.elapsed.as_secs_f64()
        )
    }
}

/// Run the pipeline with the default shortest-path solver.
pub fn run(inputs: &RunInputs, config: &PipelineConfig) -> Result<RunReport, PipelineError> {
    run_with_solver(inputs, config, &ShortestPathSolver::new())
}

/// Run the pipeline with a caller-supplied solver.
pub fn run_with_solver(
    inputs: &RunInputs,
    config: &PipelineConfig,
    solver: &dyn FieldSolver,
) -> Result<RunReport, PipelineError> {
    let started = Instant::now();

    // PHASE 1: catalog
    let stations = catalog::dedup_stations(catalog::read_stations(&inputs.stations)?);

    // PHASE 2: plan
    let units = plan_units(&stations);
    info!(
        stations = stations.len(),
        units = units.len(),
        solver = solver.name(),
        "Run planned"
    );

    // PHASE 3: distribute. The scratch store is removed when it goes out of
    // scope, whichever way this function returns.
    let models = ModelSource::new(inputs.models.clone(), config.pipeline.model_sharing);
    let scratch = ScratchStore::create(&config.scratch)?;
    let executor = TaskExecutor::new(&models, solver, &scratch, config.solver.earth_radius_km);
    let distribution = WorkDistributor::from_config(config).distribute(&units, &executor)?;

    if config.pipeline.failure_policy == FailurePolicy::Abort && !distribution.is_clean() {
        let (first_failed, first_error) = distribution
            .first_failure()
            .map_or_else(
                || ("-".to_string(), String::new()),
                |f| (f.identifier.clone(), f.error.to_string()),
            );
        return Err(PipelineError::UnitsFailed {
            failed: distribution.failed_identifiers(),
            skipped: distribution.skipped.len(),
            first_failed,
            first_error,
        });
    }

    // PHASE 4: consolidate
    let failed = distribution.failed_identifiers();
    let archive = ArchiveWriter::create(&inputs.output, config.archive.compression)?;
    let meta = consolidate(&scratch, archive, distribution.succeeded, failed.clone())?;

    // PHASE 5: cleanup
    scratch.close()?;

    let report = RunReport {
        stations: stations.len(),
        units: units.len(),
        records: meta.records.len(),
        failed,
        archive_path: inputs.output.clone(),
        complete: meta.complete,
        elapsed: started.elapsed(),
    };
    if report.complete {
        info!("Run finished: {}", report);
    } else {
        warn!("Run finished with failures: {}", report);
    }
    Ok(report)
}
