//! Geographic to solver coordinate conversion.

use super::CoordSys;
use crate::types::SourceLocation;

/// Metres per kilometre. Station depths are metres, model radii kilometres.
const METRES_PER_KM: f64 = 1000.0;

/// A point in a field's native coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverCoords(pub [f64; 3]);

/// Convert a geographic source (latitude, longitude, depth in metres) into the
/// native coordinates of a field.
///
/// Spherical fields use `(rho, theta, phi)` where
/// `rho = earth_radius_km - depth_km`, `theta` is colatitude and `phi` is
/// longitude, both in radians. Cartesian fields have no geographic reference,
/// so `None` is returned for them.
pub fn geo_to_solver(
    source: &SourceLocation,
    coord_sys: CoordSys,
    earth_radius_km: f64,
) -> Option<SolverCoords> {
    match coord_sys {
        CoordSys::Spherical => Some(SolverCoords([
            earth_radius_km - source.depth / METRES_PER_KM,
            (90.0 - source.latitude).to_radians(),
            source.longitude.to_radians(),
        ])),
        CoordSys::Cartesian => None,
    }
}
