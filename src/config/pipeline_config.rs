//! Pipeline Configuration - run settings as operator-tunable TOML values
//!
//! Every field has a serde default, so an empty file (or no file at all) gives
//! a working configuration. CLI flags override individual values after loading.

use super::defaults;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one pipeline run.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$TT_INVENTORY_CONFIG`
/// 2. `./tt_inventory.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool and failure handling
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Scratch staging directory
    #[serde(default)]
    pub scratch: ScratchConfig,

    /// Travel-time solver
    #[serde(default)]
    pub solver: SolverConfig,

    /// Output archive
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order, falling back to
    /// defaults when a candidate file is missing or invalid.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded pipeline config");
                    return config;
                }
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "Failed to load config, using defaults");
                }
            }
        }

        info!("No pipeline config found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file. Unknown keys are reported as warnings;
    /// parse and validation failures are errors.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        for w in super::validation::plausibility_warnings(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every rule and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let p = &self.pipeline;
        if p.workers > defaults::MAX_WORKERS {
            errors.push(format!(
                "pipeline.workers ({}) must be <= {}",
                p.workers,
                defaults::MAX_WORKERS
            ));
        }
        if !(1..=100).contains(&p.progress_step_percent) {
            errors.push(format!(
                "pipeline.progress_step_percent ({}) must be within 1-100",
                p.progress_step_percent
            ));
        }

        let s = &self.scratch;
        if s.prefix.contains(['/', '\\', '\0']) {
            errors.push(format!(
                "scratch.prefix '{}' must not contain path separators",
                s.prefix
            ));
        }
        if !(1..=22).contains(&s.compression_level) {
            errors.push(format!(
                "scratch.compression_level ({}) must be within 1-22",
                s.compression_level
            ));
        }

        let r = self.solver.earth_radius_km;
        if !r.is_finite() || r <= 0.0 {
            errors.push(format!("solver.earth_radius_km ({r}) must be finite and > 0"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Worker count with `0` resolved to the number of available CPUs.
    pub fn resolved_workers(&self) -> usize {
        match self.pipeline.workers {
            defaults::AUTO_WORKERS => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            n => n,
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Pipeline Settings
// ============================================================================

/// What to do when a single work unit fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure, leave the unit out of the archive and flag the
    /// archive incomplete.
    #[default]
    Skip,
    /// Stop scheduling new units and fail the run without an archive.
    Abort,
}

/// How velocity models reach the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSharing {
    /// Load each phase's model once and share it read-only.
    #[default]
    Shared,
    /// Reload the model from disk for every work unit.
    PerUnit,
}

/// Worker pool and failure handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Concurrent workers. 0 = one per available CPU.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub model_sharing: ModelSharing,

    /// Log progress every time this percentage of units completes.
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: u8,
}

fn default_workers() -> usize { defaults::AUTO_WORKERS }
fn default_progress_step() -> u8 { defaults::PROGRESS_STEP_PERCENT }

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            failure_policy: FailurePolicy::default(),
            model_sharing: ModelSharing::default(),
            progress_step_percent: default_progress_step(),
        }
    }
}

// ============================================================================
// Scratch
// ============================================================================

/// Scratch staging directory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Directory the per-run scratch directory is created in. Defaults to the
    /// system temp directory.
    #[serde(default)]
    pub parent_dir: Option<PathBuf>,

    /// Name prefix of the per-run scratch directory.
    #[serde(default = "default_scratch_prefix")]
    pub prefix: String,

    /// zstd level for staged fields (1-22).
    #[serde(default = "default_scratch_level")]
    pub compression_level: i32,
}

fn default_scratch_prefix() -> String { defaults::SCRATCH_PREFIX.to_string() }
fn default_scratch_level() -> i32 { defaults::SCRATCH_ZSTD_LEVEL }

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            parent_dir: None,
            prefix: default_scratch_prefix(),
            compression_level: default_scratch_level(),
        }
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Radius (km) of the reference sphere used to place geographic sources
    /// in spherical models.
    #[serde(default = "default_earth_radius")]
    pub earth_radius_km: f64,
}

fn default_earth_radius() -> f64 { defaults::EARTH_RADIUS_KM }

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            earth_radius_km: default_earth_radius(),
        }
    }
}

// ============================================================================
// Archive
// ============================================================================

/// Compression applied to archive records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveCompression {
    #[default]
    Deflated,
    Stored,
}

/// Output archive settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub compression: ArchiveCompression,
}
