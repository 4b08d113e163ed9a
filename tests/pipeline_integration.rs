//! Pipeline Integration Tests
//!
//! Runs the full catalog -> distribute -> consolidate sequence against small
//! synthetic spherical models and checks the archive that comes out:
//! completeness, deterministic record order, isolation of failed units and
//! removal of the scratch directory whatever the outcome.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tt_inventory::catalog::CatalogError;
use tt_inventory::config::{FailurePolicy, ModelSharing, PipelineConfig};
use tt_inventory::field::{CoordSys, FieldGeometry, ScalarField3D, SolverCoords};
use tt_inventory::pipeline::{self, PipelineError, RunInputs};
use tt_inventory::solver::{FieldSolver, ShortestPathSolver, SolverError};
use tt_inventory::storage::ArchiveReader;
use tt_inventory::types::PhaseMap;

const EARTH_RADIUS_KM: f64 = 6371.0;

// ============================================================================
// Fixtures
// ============================================================================

/// Uniform model from 1 km below to 0.5 km above sea level, 9.9-10.1 N,
/// 19.9-20.1 E.
fn model(velocity: f64) -> ScalarField3D {
    let d_angle = 0.05f64.to_radians();
    let geometry = FieldGeometry {
        coord_sys: CoordSys::Spherical,
        min_coords: [EARTH_RADIUS_KM - 1.0, (90.0f64 - 10.1).to_radians(), 19.9f64.to_radians()],
        node_intervals: [0.5, d_angle, d_angle],
        npts: [4, 5, 5],
    };
    ScalarField3D::uniform(geometry, velocity).unwrap()
}

struct Fixture {
    dir: tempfile::TempDir,
    inputs: RunInputs,
    config: PipelineConfig,
}

impl Fixture {
    /// Catalog rows are `(network, station, location, lat, lon, elevation)`.
    fn new(rows: &[(&str, &str, &str, f64, f64, f64)]) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut csv = String::from("network,station,location,latitude,longitude,elevation\n");
        for (net, sta, loc, lat, lon, elev) in rows {
            writeln!(csv, "{net},{sta},{loc},{lat},{lon},{elev}").unwrap();
        }
        let stations = dir.path().join("stations.csv");
        std::fs::write(&stations, csv).unwrap();

        let models = PhaseMap::new(dir.path().join("vp.json.zst"), dir.path().join("vs.json"));
        model(6.0).save(&models.p).unwrap();
        model(3.5).save(&models.s).unwrap();

        let mut config = PipelineConfig::default();
        config.pipeline.workers = 4;
        config.scratch.parent_dir = Some(dir.path().join("scratch"));

        let inputs = RunInputs {
            stations,
            models,
            output: dir.path().join("out").join("tt.zip"),
        };
        Self { dir, inputs, config }
    }

    fn grid(n: usize) -> Self {
        let rows: Vec<(String, f64, f64, f64)> = (0..n)
            .map(|i| {
                let lat = 9.91 + 0.18 * ((i % 17) as f64 / 16.0);
                let lon = 19.91 + 0.18 * ((i % 13) as f64 / 12.0);
                let elev = (i % 7) as f64 * 50.0;
                (format!("S{i:04}"), lat, lon, elev)
            })
            .collect();
        let refs: Vec<(&str, &str, &str, f64, f64, f64)> = rows
            .iter()
            .map(|(sta, lat, lon, elev)| ("XX", sta.as_str(), "", *lat, *lon, *elev))
            .collect();
        Self::new(&refs)
    }

    fn scratch_parent(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn archive(&self) -> ArchiveReader {
        ArchiveReader::open(&self.inputs.output).unwrap()
    }
}

fn dir_is_empty(path: &Path) -> bool {
    !path.exists() || std::fs::read_dir(path).unwrap().next().is_none()
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn single_station_produces_p_and_s_records() {
    let fx = Fixture::new(&[("XX", "ABC", "", 10.0, 20.0, 100.0)]);

    let report = pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(report.stations, 1);
    assert_eq!(report.units, 2);
    assert_eq!(report.records, 2);
    assert!(report.complete);
    assert!(report.failed.is_empty());

    let mut archive = fx.archive();
    assert!(archive.is_complete());
    assert_eq!(archive.keys().collect::<Vec<_>>(), ["XX.ABC..P", "XX.ABC..S"]);
    assert_eq!(archive.geometry(), Some(model(6.0).geometry()));

    let p = archive.read("XX.ABC..P", None, None).unwrap();
    let s = archive.read("XX.ABC..S", None, None).unwrap();
    let (p_min, p_max) = p.value_range();
    let (s_min, s_max) = s.value_range();
    assert!(p_min >= 0.0 && p_min < 0.1, "p_min = {p_min}");
    assert!(s_min >= 0.0);
    assert!(s_max > p_max, "S must arrive later than P");
    // Same uniform model scaled by 6/3.5
    assert!((s_max / p_max - 6.0 / 3.5).abs() < 1e-9);
}

#[test]
fn subvolume_read_from_archive() {
    let fx = Fixture::new(&[("XX", "ABC", "00", 10.0, 20.0, 0.0)]);
    pipeline::run(&fx.inputs, &fx.config).unwrap();

    let mut archive = fx.archive();
    let full = archive.read("XX.ABC.00.P", None, None).unwrap();
    let min = archive.min_coords().unwrap();
    let max = archive.max_coords().unwrap();
    let mid = [
        (min[0] + max[0]) / 2.0,
        (min[1] + max[1]) / 2.0,
        (min[2] + max[2]) / 2.0,
    ];
    let clipped = archive.read("XX.ABC.00.P", Some(min), Some(mid)).unwrap();

    assert!(clipped.npts().iter().zip(full.npts()).all(|(c, f)| *c <= f));
    assert_eq!(clipped.min_coords(), full.min_coords());
    assert_eq!(clipped.value([0, 0, 0]), full.value([0, 0, 0]));

    assert!(archive.read("XX.ABC.00.P", Some(mid), Some(min)).is_err());
}

#[test]
fn every_unit_consolidated_exactly_once() {
    let fx = Fixture::grid(1000);

    let report = pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(report.units, 2000);
    assert_eq!(report.records, 2000);
    assert!(report.complete);

    let archive = fx.archive();
    let keys: Vec<&str> = archive.keys().collect();
    assert_eq!(keys.len(), 2000);
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, keys, "records are unique and in identifier order");
    assert!(dir_is_empty(&fx.scratch_parent()));
}

#[test]
fn repeated_runs_are_identical() {
    let mut fx = Fixture::grid(40);

    fx.config.pipeline.workers = 1;
    pipeline::run(&fx.inputs, &fx.config).unwrap();
    let first = fx.archive();
    let first_records = first.meta().records.clone();

    fx.config.pipeline.workers = 8;
    fx.config.pipeline.model_sharing = ModelSharing::PerUnit;
    fx.inputs.output = fx.dir.path().join("tt-second.zip");
    pipeline::run(&fx.inputs, &fx.config).unwrap();
    let second = fx.archive();

    // Same keys, same order, same bytes
    assert_eq!(second.meta().records, first_records);
}

#[test]
fn duplicate_stations_computed_once() {
    let fx = Fixture::new(&[
        ("XX", "ABC", "", 10.0, 20.0, 100.0),
        ("XX", "DEF", "", 10.05, 20.05, 0.0),
        ("XX", "ABC", "", 10.0, 20.0, 100.0),
    ]);
    let report = pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(report.stations, 2);
    assert_eq!(report.records, 4);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn corrupt_s_model_fails_only_s_units() {
    let fx = Fixture::grid(10);
    std::fs::write(&fx.inputs.models.s, b"not a velocity model").unwrap();

    let report = pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(report.records, 10);
    assert_eq!(report.failed.len(), 10);
    assert!(report.failed.iter().all(|id| id.ends_with(".S")));
    assert!(!report.complete);

    let archive = fx.archive();
    assert!(!archive.is_complete());
    assert!(archive.keys().all(|k| k.ends_with(".P")));
    assert_eq!(archive.meta().failed, report.failed);
    assert!(dir_is_empty(&fx.scratch_parent()));
}

#[test]
fn out_of_domain_station_is_absent() {
    let fx = Fixture::new(&[
        ("XX", "ABC", "", 10.0, 20.0, 100.0),
        ("YY", "FAR", "", 45.0, 20.0, 0.0),
    ]);

    let report = pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(report.failed, ["YY.FAR..P", "YY.FAR..S"]);

    let archive = fx.archive();
    assert!(archive.contains("XX.ABC..P"));
    assert!(!archive.contains("YY.FAR..P"));
    assert!(!archive.contains("YY.FAR..S"));
}

/// Panics whenever the model is slower than 5 km/s, i.e. for the S phase.
struct PanicOnSlowModel;

impl FieldSolver for PanicOnSlowModel {
    fn solve(
        &self,
        velocity: &ScalarField3D,
        source: SolverCoords,
    ) -> Result<ScalarField3D, SolverError> {
        if velocity.values()[0] < 5.0 {
            panic!("solver crashed");
        }
        ShortestPathSolver::new().solve(velocity, source)
    }

    fn name(&self) -> &'static str {
        "panic-on-slow"
    }
}

#[test]
fn panicking_solver_does_not_take_down_run() {
    let fx = Fixture::grid(6);

    let report = pipeline::run_with_solver(&fx.inputs, &fx.config, &PanicOnSlowModel).unwrap();
    assert_eq!(report.records, 6);
    assert_eq!(report.failed.len(), 6);
    assert!(dir_is_empty(&fx.scratch_parent()));
}

// ============================================================================
// Abort policy and fatal errors
// ============================================================================

#[test]
fn fail_fast_leaves_no_archive_and_no_scratch() {
    let mut fx = Fixture::grid(20);
    fx.config.pipeline.failure_policy = FailurePolicy::Abort;
    std::fs::remove_file(&fx.inputs.models.p).unwrap();

    let err = pipeline::run(&fx.inputs, &fx.config).unwrap_err();
    match err {
        PipelineError::UnitsFailed {
            failed,
            first_failed,
            ..
        } => {
            assert!(!failed.is_empty());
            assert!(failed.iter().all(|id| id.ends_with(".P")));
            assert!(failed.contains(&first_failed), "{first_failed} not in {failed:?}");
        }
        other => panic!("expected UnitsFailed, got {other}"),
    }
    assert!(!fx.inputs.output.exists());
    assert!(dir_is_empty(&fx.scratch_parent()));
}

#[test]
fn missing_catalog_is_fatal_before_scheduling() {
    let mut fx = Fixture::grid(2);
    fx.inputs.stations = fx.dir.path().join("missing.csv");

    let err = pipeline::run(&fx.inputs, &fx.config).unwrap_err();
    assert!(matches!(err, PipelineError::Catalog(_)));
    assert!(!fx.inputs.output.exists());
    assert!(!fx.scratch_parent().exists(), "no scratch store was created");
}

#[test]
fn dotted_station_codes_are_rejected_before_scheduling() {
    // Joined with dots both rows would become A.B.C..P / A.B.C..S
    let fx = Fixture::new(&[
        ("A.B", "C", "", 10.0, 20.0, 0.0),
        ("A", "B.C", "", 10.0, 20.0, 0.0),
    ]);

    let err = pipeline::run(&fx.inputs, &fx.config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Catalog(CatalogError::InvalidCode { .. })
    ));
    assert!(!fx.inputs.output.exists());
    assert!(!fx.scratch_parent().exists(), "no scratch store was created");
}

#[test]
fn existing_output_replaced_only_on_success() {
    let mut fx = Fixture::grid(3);
    std::fs::create_dir_all(fx.inputs.output.parent().unwrap()).unwrap();
    std::fs::write(&fx.inputs.output, b"previous archive").unwrap();

    fx.config.pipeline.failure_policy = FailurePolicy::Abort;
    std::fs::write(&fx.inputs.models.s, b"broken").unwrap();
    assert!(pipeline::run(&fx.inputs, &fx.config).is_err());
    assert_eq!(std::fs::read(&fx.inputs.output).unwrap(), b"previous archive");

    model(3.5).save(&fx.inputs.models.s).unwrap();
    pipeline::run(&fx.inputs, &fx.config).unwrap();
    assert_eq!(fx.archive().len(), 6);
}
