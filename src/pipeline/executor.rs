//! Task Executor - one work unit from velocity model to scratch entry
//!
//! ```text
//! load model (phase) -> geographic source -> solver coords -> solve -> stage
//! ```
//!
//! A unit touches nothing but the one scratch entry it writes. A failure at any
//! step leaves no entry behind.

use super::models::ModelSource;
use crate::field::{geo_to_solver, FieldError};
use crate::solver::{FieldSolver, SolverError};
use crate::storage::{ScratchError, ScratchStore};
use crate::types::{Phase, WorkUnit};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Why a single work unit produced no scratch entry.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("{phase} velocity model unavailable: {source}")]
    Model {
        phase: Phase,
        #[source]
        source: Arc<FieldError>,
    },

    #[error(transparent)]
    Solve(#[from] SolverError),

    #[error(transparent)]
    Scratch(#[from] ScratchError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Runs work units against a fixed set of models, solver and scratch store.
///
/// Shared by reference across the worker pool; holds no mutable state.
pub struct TaskExecutor<'a> {
    models: &'a ModelSource,
    solver: &'a dyn FieldSolver,
    scratch: &'a ScratchStore,
    earth_radius_km: f64,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(
        models: &'a ModelSource,
        solver: &'a dyn FieldSolver,
        scratch: &'a ScratchStore,
        earth_radius_km: f64,
    ) -> Self {
        Self {
            models,
            solver,
            scratch,
            earth_radius_km,
        }
    }

    /// Solve `unit` and stage the travel-time field under its identifier.
    /// Returns the path of the written scratch entry.
    pub fn execute(&self, unit: &WorkUnit) -> Result<PathBuf, UnitError> {
        let started = Instant::now();
        let identifier = unit.identifier();

        let velocity = self.models.get(unit.phase).map_err(|source| UnitError::Model {
            phase: unit.phase,
            source,
        })?;

        let coord_sys = velocity.coord_sys();
        let source = geo_to_solver(&unit.source_location(), coord_sys, self.earth_radius_km)
            .ok_or(SolverError::UnsupportedCoordSys(coord_sys))?;

        let travel_times = self.solver.solve(&velocity, source)?;
        let path = self.scratch.write(&identifier, &travel_times)?;

        debug!(
            identifier = %identifier,
            solver = self.solver.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Work unit staged"
        );
        Ok(path)
    }
}

impl std::fmt::Debug for TaskExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("solver", &self.solver.name())
            .field("scratch", &self.scratch.path())
            .field("earth_radius_km", &self.earth_radius_km)
            .finish_non_exhaustive()
    }
}
