//! Velocity model access for the workers.
//!
//! With [`ModelSharing::Shared`] each phase's model is read from disk at most
//! once per run, on first use, and handed out as `Arc<ScalarField3D>`. The
//! field is never mutated after load, so workers share it without locking.
//! The load result is cached either way: a model that fails to load fails
//! every unit of its phase and nothing else.
//!
//! [`ModelSharing::PerUnit`] reloads the model for every unit.

use crate::config::ModelSharing;
use crate::field::{FieldError, ScalarField3D};
use crate::types::{Phase, PhaseMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

type CachedModel = Result<Arc<ScalarField3D>, Arc<FieldError>>;

/// Per-phase velocity models for one run.
#[derive(Debug)]
pub struct ModelSource {
    paths: PhaseMap<PathBuf>,
    sharing: ModelSharing,
    cache: PhaseMap<OnceLock<CachedModel>>,
}

impl ModelSource {
    pub fn new(paths: PhaseMap<PathBuf>, sharing: ModelSharing) -> Self {
        Self {
            paths,
            sharing,
            cache: PhaseMap::new(OnceLock::new(), OnceLock::new()),
        }
    }

    pub fn path(&self, phase: Phase) -> &Path {
        self.paths.get(phase)
    }

    pub fn sharing(&self) -> ModelSharing {
        self.sharing
    }

    /// Velocity model for `phase`.
    pub fn get(&self, phase: Phase) -> Result<Arc<ScalarField3D>, Arc<FieldError>> {
        match self.sharing {
            ModelSharing::Shared => self
                .cache
                .get(phase)
                .get_or_init(|| {
                    let loaded = self.load(phase);
                    if let Ok(field) = &loaded {
                        info!(
                            phase = %phase,
                            path = %self.path(phase).display(),
                            npts = ?field.npts(),
                            "Velocity model loaded"
                        );
                    }
                    loaded
                })
                .clone(),
            ModelSharing::PerUnit => self.load(phase),
        }
    }

    fn load(&self, phase: Phase) -> CachedModel {
        let path = self.path(phase);
        debug!(phase = %phase, path = %path.display(), "Reading velocity model");
        ScalarField3D::load(path).map(Arc::new).map_err(Arc::new)
    }
}
