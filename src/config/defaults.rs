//! System-wide default constants.
//!
//! Centralises the numbers the configuration falls back to when a key is not
//! set, grouped by subsystem.

// ============================================================================
// Configuration Loading
// ============================================================================

/// Environment variable naming the config file to load.
pub const CONFIG_ENV_VAR: &str = "TT_INVENTORY_CONFIG";

/// Config file looked up in the current working directory.
pub const LOCAL_CONFIG_FILE: &str = "tt_inventory.toml";

// ============================================================================
// Pipeline
// ============================================================================

/// Worker count meaning "one per available CPU".
pub const AUTO_WORKERS: usize = 0;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 1024;

/// Completed-unit percentage between progress log lines.
pub const PROGRESS_STEP_PERCENT: u8 = 10;

// ============================================================================
// Scratch Store
// ============================================================================

/// Name prefix of per-run scratch directories.
pub const SCRATCH_PREFIX: &str = "tt-scratch-";

/// zstd level for scratch entries. 3 is zstd's own default.
pub const SCRATCH_ZSTD_LEVEL: i32 = 3;

// ============================================================================
// Solver
// ============================================================================

/// Mean Earth radius (km), the datum for geographic to spherical conversion.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
