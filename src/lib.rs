//! tt-inventory: Seismic Travel-Time Inventory
//!
//! Precomputes P and S travel-time fields from every station of a network to
//! every node of a 3D velocity model and consolidates them into one archive
//! keyed by `network.station.location.phase`.
//!
//! ## Architecture
//!
//! - **Catalog**: station CSV reader with deduplication
//! - **Field**: regular-grid scalar fields, model files, coordinate conversion
//! - **Solver**: pluggable point-source travel-time solver
//! - **Pipeline**: work distributor, task executor and consolidator
//! - **Storage**: self-cleaning scratch store and the zip archive

pub mod catalog;
pub mod config;
pub mod field;
pub mod pipeline;
pub mod solver;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::PipelineConfig;

// Re-export commonly used types
pub use types::{Phase, PhaseMap, SourceLocation, StationRecord, WorkUnit};

pub use field::{CoordSys, FieldGeometry, ScalarField3D};
pub use solver::{FieldSolver, ShortestPathSolver, SolverError};
pub use storage::{ArchiveReader, ArchiveWriter, ScratchStore};

// Re-export pipeline entry points
pub use pipeline::{run, run_with_solver, PipelineError, RunInputs, RunReport};
