//! Scratch Store: transient staging for per-unit travel-time fields
//!
//! Each completed work unit leaves one file named by its identifier. The
//! directory is created fresh for the run and removed with all entries when
//! the store is dropped, whether the run succeeded or not.
//!
//! Entries are written to `<identifier>.tt.partial` and renamed into place, so
//! an entry is either complete or absent. The consolidator enumerates entries
//! sorted by identifier and takes each one exactly once.

use crate::config::ScratchConfig;
use crate::field::ScalarField3D;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// File suffix of a finished scratch entry
const ENTRY_SUFFIX: &str = ".tt";

/// File suffix of an entry still being written
const PARTIAL_SUFFIX: &str = ".tt.partial";

/// Scratch store errors
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("scratch I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode scratch entry '{identifier}': {source}")]
    Encode {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode scratch entry '{identifier}': {source}")]
    Decode {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("scratch entry '{0}' already exists")]
    DuplicateEntry(String),
    #[error("'{0}' is not a valid scratch identifier")]
    InvalidIdentifier(String),
}

/// A finished entry found in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchEntry {
    pub identifier: String,
    pub path: PathBuf,
}

/// Self-cleaning staging directory for one run.
#[derive(Debug)]
pub struct ScratchStore {
    dir: TempDir,
    compression_level: i32,
}

impl ScratchStore {
    /// Create a fresh, empty scratch directory.
    pub fn create(config: &ScratchConfig) -> Result<Self, ScratchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&config.prefix);

        let dir = match &config.parent_dir {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|source| ScratchError::Io {
                    path: parent.clone(),
                    source,
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|source| ScratchError::Io {
            path: config
                .parent_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        info!(path = %dir.path().display(), "Scratch store created");
        Ok(Self {
            dir,
            compression_level: config.compression_level,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stage a travel-time field under `identifier`.
    ///
    /// Fails with [`ScratchError::DuplicateEntry`] if the identifier was
    /// already written. Nothing is left behind on failure.
    pub fn write(&self, identifier: &str, field: &ScalarField3D) -> Result<PathBuf, ScratchError> {
        validate_identifier(identifier)?;
        let final_path = self.entry_path(identifier);
        let partial_path = self.dir.path().join(format!("{identifier}{PARTIAL_SUFFIX}"));

        if final_path.exists() {
            return Err(ScratchError::DuplicateEntry(identifier.to_string()));
        }

        let json = serde_json::to_vec(field).map_err(|source| ScratchError::Encode {
            identifier: identifier.to_string(),
            source,
        })?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ScratchError::Io { path, source }
        };
        let compressed =
            zstd::encode_all(json.as_slice(), self.compression_level).map_err(io_err(&final_path))?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ScratchError::DuplicateEntry(identifier.to_string()));
            }
            Err(e) => return Err(io_err(&partial_path)(e)),
        };

        let written = file
            .write_all(&compressed)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::rename(&partial_path, &final_path));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial_path);
            return Err(io_err(&final_path)(e));
        }

        debug!(identifier, bytes = compressed.len(), "Scratch entry written");
        Ok(final_path)
    }

    /// Finished entries, sorted lexicographically by identifier.
    pub fn entries(&self) -> Result<Vec<ScratchEntry>, ScratchError> {
        let dir = self.dir.path();
        let listing = fs::read_dir(dir).map_err(|source| ScratchError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for item in listing {
            let item = item.map_err(|source| ScratchError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %item.path().display(), "Ignoring non UTF-8 scratch file");
                continue;
            };
            if let Some(identifier) = name.strip_suffix(ENTRY_SUFFIX) {
                entries.push(ScratchEntry {
                    identifier: identifier.to_string(),
                    path: item.path(),
                });
            }
        }

        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(entries)
    }

    /// Number of finished entries.
    pub fn len(&self) -> Result<usize, ScratchError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ScratchError> {
        Ok(self.len()? == 0)
    }

    /// Read an entry without consuming it.
    pub fn read(&self, entry: &ScratchEntry) -> Result<ScalarField3D, ScratchError> {
        let io_err = |source| ScratchError::Io {
            path: entry.path.clone(),
            source,
        };
        let compressed = fs::read(&entry.path).map_err(io_err)?;
        let json = zstd::decode_all(compressed.as_slice()).map_err(io_err)?;
        serde_json::from_slice(&json).map_err(|source| ScratchError::Decode {
            identifier: entry.identifier.clone(),
            source,
        })
    }

    /// Read an entry and delete it. Each entry is consumed once.
    pub fn take(&self, entry: &ScratchEntry) -> Result<ScalarField3D, ScratchError> {
        let field = self.read(entry)?;
        fs::remove_file(&entry.path).map_err(|source| ScratchError::Io {
            path: entry.path.clone(),
            source,
        })?;
        Ok(field)
    }

    /// Remove the directory now and report any error. Dropping the store
    /// removes it as well, silently.
    pub fn close(self) -> Result<(), ScratchError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| ScratchError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), "Scratch store removed");
        Ok(())
    }

    fn entry_path(&self, identifier: &str) -> PathBuf {
        self.dir.path().join(format!("{identifier}{ENTRY_SUFFIX}"))
    }
}

fn validate_identifier(identifier: &str) -> Result<(), ScratchError> {
    if identifier.is_empty()
        || identifier.contains(['/', '\\', '\0'])
        || identifier == "."
        || identifier == ".."
    {
        return Err(ScratchError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}
