//! Core data types shared across the travel-time pipeline
//!
//! Stations, phases and the (station, phase) work units the distributor
//! schedules. Everything here is immutable once constructed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Phase
// ============================================================================

/// Seismic wave phase. Each phase has its own velocity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Compressional wave
    P,
    /// Shear wave
    S,
}

impl Phase {
    /// Every phase the pipeline computes, in scheduling order.
    pub const ALL: [Phase; 2] = [Phase::P, Phase::S];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::P => "P",
            Phase::S => "S",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" => Ok(Phase::P),
            "S" => Ok(Phase::S),
            other => Err(format!("unknown phase '{other}' (expected P or S)")),
        }
    }
}

/// One value per phase. Used for per-phase model paths and caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMap<T> {
    pub p: T,
    pub s: T,
}

impl<T> PhaseMap<T> {
    pub fn new(p: T, s: T) -> Self {
        Self { p, s }
    }

    pub fn get(&self, phase: Phase) -> &T {
        match phase {
            Phase::P => &self.p,
            Phase::S => &self.s,
        }
    }
}

// ============================================================================
// Station Record
// ============================================================================

/// A receiver read from the station catalog.
///
/// `(network, station, location)` is unique within a deduplicated catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub network: String,
    pub station: String,
    /// Location code, often empty
    pub location: String,
    /// Degrees north
    pub latitude: f64,
    /// Degrees east
    pub longitude: f64,
    /// Metres above sea level (positive up)
    pub elevation: f64,
}

impl StationRecord {
    /// The `(network, station, location)` triple that identifies this receiver.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.network, &self.station, &self.location)
    }
}

// ============================================================================
// Work Unit
// ============================================================================

/// Geographic position of a point source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Depth below the reference datum, in the same unit as station elevation (m)
    pub depth: f64,
}

/// One independent solve: a station paired with a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub station: StationRecord,
    pub phase: Phase,
}

impl WorkUnit {
    pub fn new(station: StationRecord, phase: Phase) -> Self {
        Self { station, phase }
    }

    /// Station position as a source. Elevation above sea level becomes
    /// negative depth.
    pub fn source_location(&self) -> SourceLocation {
        SourceLocation {
            latitude: self.station.latitude,
            longitude: self.station.longitude,
            depth: -self.station.elevation,
        }
    }

    /// Archive key `network.station.location.phase`.
    pub fn identifier(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.station.network, self.station.station, self.station.location, self.phase
        )
    }
}
