//! Field Solver
//!
//! Computes the travel-time field for a point source over a velocity model.
//! The pipeline only depends on the [`FieldSolver`] trait; [`ShortestPathSolver`]
//! is the implementation the binaries use.

mod shortest_path;

pub use shortest_path::ShortestPathSolver;

use crate::field::{ScalarField3D, SolverCoords};
use thiserror::Error;

/// Solve failures. Each one fails only the work unit that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("source {coords:?} lies outside the model domain {min:?}..{max:?}")]
    SourceOutOfDomain {
        coords: [f64; 3],
        min: [f64; 3],
        max: [f64; 3],
    },

    #[error("velocity at node {node:?} must be finite and > 0, got {value}")]
    InvalidVelocity { node: [usize; 3], value: f64 },

    #[error("solve did not converge: {unreached} nodes were never reached")]
    NotConverged { unreached: usize },

    #[error("{0} models cannot host a geographic source")]
    UnsupportedCoordSys(crate::field::CoordSys),
}

/// Point-source travel-time solver.
///
/// Implementations must not retain state between calls; the worker pool
/// shares one instance across threads.
pub trait FieldSolver: Send + Sync {
    /// Travel time from `source` to every node of `velocity`. The returned
    /// field has the same geometry as `velocity`.
    fn solve(
        &self,
        velocity: &ScalarField3D,
        source: SolverCoords,
    ) -> Result<ScalarField3D, SolverError>;

    /// Solver name for logging
    fn name(&self) -> &'static str;
}
