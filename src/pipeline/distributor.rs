//! Work Distributor - fans work units out over a bounded worker pool
//!
//! Every (station, phase) pair becomes one [`WorkUnit`]. Units run on a
//! dedicated rayon pool of `workers` threads and share nothing but the
//! read-only executor, so no locking happens between them. Completion is
//! counted with an atomic and logged at a fixed percentage step.
//!
//! A unit that returns an error or panics is recorded as a [`UnitFailure`].
//! The earliest failure to complete is remembered; under
//! [`FailurePolicy::Abort`] it is the one that raised the abort flag, and units
//! that have not started yet are skipped.

use super::executor::{TaskExecutor, UnitError};
use super::PipelineError;
use crate::config::{FailurePolicy, PipelineConfig};
use crate::types::{Phase, StationRecord, WorkUnit};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The full cross-product of stations and phases, station-major.
pub fn plan_units(stations: &[StationRecord]) -> Vec<WorkUnit> {
    stations
        .iter()
        .flat_map(|station| {
            Phase::ALL
                .into_iter()
                .map(move |phase| WorkUnit::new(station.clone(), phase))
        })
        .collect()
}

/// A unit that produced no scratch entry.
#[derive(Debug)]
pub struct UnitFailure {
    pub identifier: String,
    pub error: UnitError,
}

/// Outcome of one distribution phase.
#[derive(Debug, Default)]
pub struct DistributionReport {
    pub units: usize,
    pub succeeded: usize,
    pub failures: Vec<UnitFailure>,
    /// Units never started because the run was aborting
    pub skipped: Vec<String>,
    /// Identifier of the failure that completed first
    pub first_failed: Option<String>,
    pub elapsed: Duration,
}

impl DistributionReport {
    /// Identifiers of failed units, sorted.
    pub fn failed_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.failures.iter().map(|f| f.identifier.clone()).collect();
        ids.sort();
        ids
    }

    /// The failure that completed first, which under
    /// [`FailurePolicy::Abort`] is the one that stopped the run.
    pub fn first_failure(&self) -> Option<&UnitFailure> {
        let id = self.first_failed.as_deref()?;
        self.failures.iter().find(|f| f.identifier == id)
    }

    /// Every unit succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

impl std::fmt::Display for DistributionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Distribution: {}/{} units staged, {} failed, {} skipped in {:.1}s",
            self.succeeded,
            self.units,
            self.failures.len(),
            self.skipped.len(),
            self.elapsed.as_secs_f64()
        )
    }
}

enum Outcome {
    Staged,
    /// The flag is set for the earliest failure to complete
    Failed(UnitFailure, bool),
    Skipped(String),
}

/// Bounded-concurrency scheduler for work units.
#[derive(Debug, Clone)]
pub struct WorkDistributor {
    workers: usize,
    failure_policy: FailurePolicy,
    progress_step_percent: u8,
}

impl WorkDistributor {
    /// `workers` is clamped to at least 1.
    pub fn new(workers: usize, failure_policy: FailurePolicy) -> Self {
        Self {
            workers: workers.max(1),
            failure_policy,
            progress_step_percent: crate::config::defaults::PROGRESS_STEP_PERCENT,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.resolved_workers(), config.pipeline.failure_policy)
            .with_progress_step(config.pipeline.progress_step_percent)
    }

    pub fn with_progress_step(mut self, percent: u8) -> Self {
        self.progress_step_percent = percent.clamp(1, 100);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every unit through `executor` and block until all have finished.
    pub fn distribute(
        &self,
        units: &[WorkUnit],
        executor: &TaskExecutor<'_>,
    ) -> Result<DistributionReport, PipelineError> {
        let started = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("tt-worker-{i}"))
            .build()?;

        info!(
            units = units.len(),
            workers = self.workers,
            policy = ?self.failure_policy,
            "Distributing work units"
        );

        let progress = Progress::new(units.len(), self.progress_step_percent);
        let abort = AtomicBool::new(false);
        let failure_seen = AtomicBool::new(false);

        let outcomes: Vec<Outcome> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    let identifier = unit.identifier();
                    if abort.load(Ordering::Acquire) {
                        return Outcome::Skipped(identifier);
                    }

                    let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(unit)))
                        .unwrap_or_else(|payload| Err(UnitError::Panicked(panic_message(&*payload))));
                    progress.tick();

                    match result {
                        Ok(_) => Outcome::Staged,
                        Err(error) => {
                            warn!(identifier = %identifier, error = %error, "Work unit failed");
                            let first = !failure_seen.swap(true, Ordering::AcqRel);
                            if self.failure_policy == FailurePolicy::Abort {
                                abort.store(true, Ordering::Release);
                            }
                            Outcome::Failed(UnitFailure { identifier, error }, first)
                        }
                    }
                })
                .collect()
        });

        let mut report = DistributionReport {
            units: units.len(),
            ..DistributionReport::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Staged => report.succeeded += 1,
                Outcome::Failed(failure, first) => {
                    if first {
                        report.first_failed = Some(failure.identifier.clone());
                    }
                    report.failures.push(failure);
                }
                Outcome::Skipped(identifier) => report.skipped.push(identifier),
            }
        }
        report.elapsed = started.elapsed();

        info!("{}", report);
        Ok(report)
    }
}

/// Lock-free completion counter that logs each time another
/// `step_percent` of the units has finished.
struct Progress {
    total: usize,
    step_percent: usize,
    done: AtomicUsize,
}

impl Progress {
    fn new(total: usize, step_percent: u8) -> Self {
        Self {
            total,
            step_percent: usize::from(step_percent.max(1)),
            done: AtomicUsize::new(0),
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        let bucket = |n: usize| n * 100 / self.total / self.step_percent;
        if bucket(done) != bucket(done - 1) || done == self.total {
            info!(
                done,
                total = self.total,
                percent = done * 100 / self.total,
                "Work units completed"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSharing, ScratchConfig};
    use crate::field::{CoordSys, FieldGeometry, ScalarField3D, SolverCoords};
    use crate::pipeline::models::ModelSource;
    use crate::solver::{FieldSolver, SolverError};
    use crate::storage::ScratchStore;
    use crate::types::PhaseMap;
    use std::path::Path;

    fn station(network: &str, code: &str) -> StationRecord {
        StationRecord {
            network: network.to_string(),
            station: code.to_string(),
            location: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
        }
    }

    /// Solver stub: uniform 1.0 field, or a failure/panic for chosen stations.
    struct StubSolver {
        fail_station_lat: Option<f64>,
        panic: bool,
    }

    impl FieldSolver for StubSolver {
        fn solve(
            &self,
            velocity: &ScalarField3D,
            source: SolverCoords,
        ) -> Result<ScalarField3D, SolverError> {
            // theta encodes the station latitude
            let latitude = 90.0 - source.0[1].to_degrees();
            if self.fail_station_lat.is_some_and(|lat| (lat - latitude).abs() < 1e-9) {
                if self.panic {
                    panic!("stub solver blew up");
                }
                return Err(SolverError::NotConverged { unreached: 1 });
            }
            Ok(ScalarField3D::uniform(*velocity.geometry(), 1.0).unwrap())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn fixture(dir: &Path) -> (ModelSource, ScratchStore) {
        let geometry = FieldGeometry {
            coord_sys: CoordSys::Spherical,
            min_coords: [6000.0, 0.0, 0.0],
            node_intervals: [1.0, 0.1, 0.1],
            npts: [2, 2, 2],
        };
        let model = ScalarField3D::uniform(geometry, 5.0).unwrap();
        let paths = PhaseMap::new(dir.join("p.json"), dir.join("s.json"));
        model.save(&paths.p).unwrap();
        model.save(&paths.s).unwrap();
        let scratch = ScratchStore::create(&ScratchConfig {
            parent_dir: Some(dir.to_path_buf()),
            ..ScratchConfig::default()
        })
        .unwrap();
        (ModelSource::new(paths, ModelSharing::Shared), scratch)
    }

    fn stations(n: usize) -> Vec<StationRecord> {
        (0..n)
            .map(|i| {
                let mut s = station("XX", &format!("S{i:03}"));
                s.latitude = i as f64 * 0.01;
                s
            })
            .collect()
    }

    #[test]
    fn test_plan_units_cross_product() {
        let units = plan_units(&[station("XX", "ABC"), station("YY", "DEF")]);
        let ids: Vec<String> = units.iter().map(WorkUnit::identifier).collect();
        assert_eq!(ids, ["XX.ABC..P", "XX.ABC..S", "YY.DEF..P", "YY.DEF..S"]);
        assert!(plan_units(&[]).is_empty());
    }

    #[test]
    fn test_every_unit_runs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (models, scratch) = fixture(dir.path());
        let solver = StubSolver { fail_station_lat: None, panic: false };
        let executor = TaskExecutor::new(&models, &solver, &scratch, 6371.0);
        let units = plan_units(&stations(25));

        let report = WorkDistributor::new(4, FailurePolicy::Skip)
            .distribute(&units, &executor)
            .unwrap();

        assert_eq!(report.units, 50);
        assert_eq!(report.succeeded, 50);
        assert!(report.is_clean());
        assert_eq!(scratch.len().unwrap(), 50);
    }

    #[test]
    fn test_skip_policy_isolates_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (models, scratch) = fixture(dir.path());
        let solver = StubSolver { fail_station_lat: Some(0.03), panic: false };
        let executor = TaskExecutor::new(&models, &solver, &scratch, 6371.0);
        let units = plan_units(&stations(10));

        let report = WorkDistributor::new(3, FailurePolicy::Skip)
            .distribute(&units, &executor)
            .unwrap();

        assert_eq!(report.succeeded, 18);
        assert_eq!(report.failed_identifiers(), ["XX.S003..P", "XX.S003..S"]);
        assert!(report
            .first_failed
            .as_deref()
            .is_some_and(|id| id.starts_with("XX.S003.")));
        assert!(report.skipped.is_empty());
        assert_eq!(scratch.len().unwrap(), 18);
    }

    #[test]
    fn test_panicking_unit_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (models, scratch) = fixture(dir.path());
        let solver = StubSolver { fail_station_lat: Some(0.0), panic: true };
        let executor = TaskExecutor::new(&models, &solver, &scratch, 6371.0);
        let units = plan_units(&stations(4));

        let report = WorkDistributor::new(2, FailurePolicy::Skip)
            .distribute(&units, &executor)
            .unwrap();

        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failures.len(), 2);
        for failure in &report.failures {
            match &failure.error {
                UnitError::Panicked(msg) => assert!(msg.contains("blew up")),
                other => panic!("expected panic failure, got {other}"),
            }
        }
    }

    #[test]
    fn test_abort_policy_skips_remaining_units() {
        let dir = tempfile::tempdir().unwrap();
        let (models, scratch) = fixture(dir.path());
        // First station fails; a single worker runs units in order
        let solver = StubSolver { fail_station_lat: Some(0.0), panic: false };
        let executor = TaskExecutor::new(&models, &solver, &scratch, 6371.0);
        let units = plan_units(&stations(20));

        let report = WorkDistributor::new(1, FailurePolicy::Abort)
            .distribute(&units, &executor)
            .unwrap();

        // Only the very first unit ran and failed; it stopped the run
        assert_eq!(report.failed_identifiers(), ["XX.S000..P"]);
        assert_eq!(report.first_failed.as_deref(), Some("XX.S000..P"));
        assert_eq!(
            report.first_failure().map(|f| f.identifier.as_str()),
            Some("XX.S000..P")
        );
        assert!(!report.skipped.is_empty());
        assert_eq!(
            report.succeeded + report.failures.len() + report.skipped.len(),
            40
        );
        assert_eq!(scratch.len().unwrap(), report.succeeded);
    }

    #[test]
    fn test_workers_clamped() {
        assert_eq!(WorkDistributor::new(0, FailurePolicy::Skip).workers(), 1);
    }

    #[test]
    fn test_progress_handles_single_unit() {
        let progress = Progress::new(1, 10);
        progress.tick();
        assert_eq!(progress.done.load(Ordering::Relaxed), 1);
    }
}
