//! Grid-sampled 3D scalar fields
//!
//! A [`ScalarField3D`] carries both velocity models and the travel-time fields
//! computed from them. Values are stored flattened in row-major order with the
//! third axis varying fastest.
//!
//! ## File Format
//!
//! Fields are stored as JSON. A path ending in `.zst` is zstd-compressed JSON.
//!
//! ```json
//! {
//!   "coord_sys": "spherical",
//!   "min_coords": [6360.0, 1.39, 0.34],
//!   "node_intervals": [1.0, 0.001, 0.001],
//!   "npts": [12, 20, 20],
//!   "values": [5.8, 5.8, ...]
//! }
//! ```

pub mod transform;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use transform::{geo_to_solver, SolverCoords};

/// zstd level used when saving `.zst` field files.
const FIELD_ZSTD_LEVEL: i32 = 3;

/// Field loading/validation errors
#[derive(Error, Debug)]
pub enum FieldError {
    #[error("failed to access field file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode field file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode field: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid field geometry: {0}")]
    InvalidGeometry(String),
}

// ============================================================================
// Coordinate System
// ============================================================================

/// Coordinate system of a field's axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordSys {
    /// `(rho km, theta colatitude rad, phi longitude rad)`
    Spherical,
    /// `(x km, y km, z km)`
    Cartesian,
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordSys::Spherical => f.write_str("spherical"),
            CoordSys::Cartesian => f.write_str("cartesian"),
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Regular grid geometry shared by a velocity model and its travel-time fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldGeometry {
    pub coord_sys: CoordSys,
    pub min_coords: [f64; 3],
    pub node_intervals: [f64; 3],
    pub npts: [usize; 3],
}

impl FieldGeometry {
    /// Coordinates of the last node on each axis.
    pub fn max_coords(&self) -> [f64; 3] {
        std::array::from_fn(|axis| {
            self.min_coords[axis] + self.node_intervals[axis] * (self.npts[axis] - 1) as f64
        })
    }

    /// Number of grid nodes. Only meaningful for a geometry that passed
    /// [`FieldGeometry::validate`], which rejects counts that overflow.
    pub fn node_count(&self) -> usize {
        self.checked_node_count().unwrap_or(usize::MAX)
    }

    /// Number of grid nodes, `None` if it does not fit in `usize`.
    pub fn checked_node_count(&self) -> Option<usize> {
        self.npts
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
    }

    /// Flat index of node `(i, j, k)`.
    pub fn index(&self, [i, j, k]: [usize; 3]) -> usize {
        (i * self.npts[1] + j) * self.npts[2] + k
    }

    /// Inverse of [`FieldGeometry::index`].
    pub fn unravel(&self, idx: usize) -> [usize; 3] {
        let k = idx % self.npts[2];
        let j = (idx / self.npts[2]) % self.npts[1];
        let i = idx / (self.npts[1] * self.npts[2]);
        [i, j, k]
    }

    /// Native coordinates of node `(i, j, k)`.
    pub fn node_coords(&self, node: [usize; 3]) -> [f64; 3] {
        std::array::from_fn(|axis| {
            self.min_coords[axis] + self.node_intervals[axis] * node[axis] as f64
        })
    }

    /// Cartesian position (km) of a point given in native coordinates.
    pub fn to_cartesian(&self, coords: [f64; 3]) -> [f64; 3] {
        match self.coord_sys {
            CoordSys::Cartesian => coords,
            CoordSys::Spherical => {
                let [rho, theta, phi] = coords;
                [
                    rho * theta.sin() * phi.cos(),
                    rho * theta.sin() * phi.sin(),
                    rho * theta.cos(),
                ]
            }
        }
    }

    /// Reject degenerate grids.
    pub fn validate(&self) -> Result<(), FieldError> {
        for axis in 0..3 {
            if self.npts[axis] == 0 {
                return Err(FieldError::InvalidGeometry(format!(
                    "npts[{axis}] must be >= 1"
                )));
            }
            let interval = self.node_intervals[axis];
            if !interval.is_finite() || interval <= 0.0 {
                return Err(FieldError::InvalidGeometry(format!(
                    "node_intervals[{axis}] must be finite and > 0, got {interval}"
                )));
            }
            if !self.min_coords[axis].is_finite() {
                return Err(FieldError::InvalidGeometry(format!(
                    "min_coords[{axis}] must be finite"
                )));
            }
        }
        // Values are addressed as f64 bytes in archives, so the byte length
        // must fit as well.
        if self
            .checked_node_count()
            .and_then(|n| n.checked_mul(std::mem::size_of::<f64>()))
            .is_none()
        {
            return Err(FieldError::InvalidGeometry(format!(
                "npts {:?} overflows the addressable node count",
                self.npts
            )));
        }
        if self.coord_sys == CoordSys::Spherical {
            let max = self.max_coords();
            if self.min_coords[0] < 0.0 {
                return Err(FieldError::InvalidGeometry(
                    "spherical rho must be >= 0".to_string(),
                ));
            }
            if self.min_coords[1] < 0.0 || max[1] > std::f64::consts::PI {
                return Err(FieldError::InvalidGeometry(
                    "spherical theta must lie within [0, pi]".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scalar Field
// ============================================================================

/// Scalar values sampled on a regular 3D grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField3D {
    #[serde(flatten)]
    geometry: FieldGeometry,
    values: Vec<f64>,
}

impl ScalarField3D {
    /// Build a field, checking that `values` covers the grid exactly.
    pub fn new(geometry: FieldGeometry, values: Vec<f64>) -> Result<Self, FieldError> {
        geometry.validate()?;
        if values.len() != geometry.node_count() {
            return Err(FieldError::InvalidGeometry(format!(
                "expected {} values for npts {:?}, got {}",
                geometry.node_count(),
                geometry.npts,
                values.len()
            )));
        }
        Ok(Self { geometry, values })
    }

    /// Field with the same value at every node.
    pub fn uniform(geometry: FieldGeometry, value: f64) -> Result<Self, FieldError> {
        geometry.validate()?;
        Self::new(geometry, vec![value; geometry.node_count()])
    }

    /// Field whose value is computed from each node's native coordinates.
    pub fn from_fn(
        geometry: FieldGeometry,
        f: impl Fn([f64; 3]) -> f64,
    ) -> Result<Self, FieldError> {
        geometry.validate()?;
        let values = (0..geometry.node_count())
            .map(|idx| f(geometry.node_coords(geometry.unravel(idx))))
            .collect();
        Self::new(geometry, values)
    }

    /// New field on this field's grid. `values` must hold one value per node.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            geometry: self.geometry,
            values,
        }
    }

    pub fn geometry(&self) -> &FieldGeometry {
        &self.geometry
    }

    pub fn coord_sys(&self) -> CoordSys {
        self.geometry.coord_sys
    }

    pub fn min_coords(&self) -> [f64; 3] {
        self.geometry.min_coords
    }

    pub fn max_coords(&self) -> [f64; 3] {
        self.geometry.max_coords()
    }

    pub fn node_intervals(&self) -> [f64; 3] {
        self.geometry.node_intervals
    }

    pub fn npts(&self) -> [usize; 3] {
        self.geometry.npts
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Value at node `(i, j, k)`, `None` when out of range.
    pub fn value(&self, node: [usize; 3]) -> Option<f64> {
        if node.iter().zip(self.geometry.npts).any(|(&n, max)| n >= max) {
            return None;
        }
        self.values.get(self.geometry.index(node)).copied()
    }

    /// Copy of the nodes in `start..end` on each axis.
    pub fn subvolume(&self, start: [usize; 3], end: [usize; 3]) -> Result<Self, FieldError> {
        for axis in 0..3 {
            if start[axis] >= end[axis] || end[axis] > self.geometry.npts[axis] {
                return Err(FieldError::InvalidGeometry(format!(
                    "subvolume range {}..{} invalid for axis {axis} with {} nodes",
                    start[axis], end[axis], self.geometry.npts[axis]
                )));
            }
        }

        let npts: [usize; 3] = std::array::from_fn(|axis| end[axis] - start[axis]);
        let mut values = Vec::with_capacity(npts.iter().product());
        for i in start[0]..end[0] {
            for j in start[1]..end[1] {
                let row = self.geometry.index([i, j, start[2]]);
                values.extend_from_slice(&self.values[row..row + npts[2]]);
            }
        }

        let geometry = FieldGeometry {
            coord_sys: self.geometry.coord_sys,
            min_coords: self.geometry.node_coords(start),
            node_intervals: self.geometry.node_intervals,
            npts,
        };
        Self::new(geometry, values)
    }

    /// (min, max) over all values.
    pub fn value_range(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Load a field from JSON (or zstd-compressed JSON for `.zst` paths).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FieldError> {
        let path = path.as_ref();
        let io_err = |source| FieldError::Io {
            path: path.to_path_buf(),
            source,
        };

        let raw = std::fs::read(path).map_err(io_err)?;
        let bytes = if is_compressed(path) {
            zstd::decode_all(raw.as_slice()).map_err(io_err)?
        } else {
            raw
        };

        let field: Self = serde_json::from_slice(&bytes).map_err(|source| FieldError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let field = Self::new(field.geometry, field.values)?;

        debug!(
            path = %path.display(),
            coord_sys = %field.coord_sys(),
            npts = ?field.npts(),
            "Field loaded"
        );
        Ok(field)
    }

    /// Save the field as JSON (zstd-compressed for `.zst` paths).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FieldError> {
        let path = path.as_ref();
        let io_err = |source| FieldError::Io {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_vec(self)?;
        let bytes = if is_compressed(path) {
            zstd::encode_all(json.as_slice(), FIELD_ZSTD_LEVEL).map_err(io_err)?
        } else {
            json
        };
        std::fs::write(path, bytes).map_err(io_err)
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("zst")
}
