//! Pipeline Configuration Module
//!
//! Run settings loaded from TOML, with every value defaulted so a missing file
//! is not an error.
//!
//! ## Loading Order
//!
//! 1. `TT_INVENTORY_CONFIG` environment variable (path to TOML file)
//! 2. `tt_inventory.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`PipelineConfig`] is passed explicitly to the pipeline; there is
//! no process-wide config.

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
