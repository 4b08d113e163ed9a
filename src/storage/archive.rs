//! Travel-time Archive
//!
//! The consolidated, identifier-indexed store of travel-time fields. An
//! archive is a single zip file:
//!
//! - `data/<identifier>`: field values as little-endian `f64`, in
//!   consolidation order
//! - `meta.json`: grid geometry, record order with md5 digests, failed units
//!   and the completeness flag, written when the archive is closed
//!
//! All records share one grid geometry, fixed by the first record added.
//! The writer works on `<path>.partial` and only renames it to `<path>` in
//! [`ArchiveWriter::close`]; an unclosed writer deletes its partial file, so a
//! failed run never leaves an archive that looks finished.

use crate::config::ArchiveCompression;
use crate::field::{FieldGeometry, ScalarField3D};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Bumped whenever the on-disk layout changes.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

const META_ENTRY: &str = "meta.json";
const DATA_PREFIX: &str = "data/";

/// Archive errors. Any of them during consolidation is fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("archive metadata error: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("archive {0} has no metadata; it was never finalized")]
    Unfinalized(PathBuf),
    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u32),
    #[error("record '{key}' geometry does not match the archive: expected {expected:?}, got {found:?}")]
    GeometryMismatch {
        key: String,
        expected: Box<FieldGeometry>,
        found: Box<FieldGeometry>,
    },
    #[error("record '{0}' already exists in the archive")]
    DuplicateKey(String),
    #[error("record '{0}' not found")]
    NotFound(String),
    #[error("record '{key}' failed its integrity check: {reason}")]
    Integrity { key: String, reason: String },
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
}

// ============================================================================
// Metadata
// ============================================================================

/// One stored record, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub key: String,
    /// Hex md5 digest of the stored value bytes
    pub md5: String,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub format_version: u32,
    pub field_type: String,
    /// Absent when the archive holds no records
    #[serde(flatten)]
    pub geometry: Option<FieldGeometry>,
    pub created_at: DateTime<Utc>,
    /// False when some work units produced no record
    pub complete: bool,
    /// Identifiers of work units that failed
    pub failed: Vec<String>,
    pub records: Vec<RecordMeta>,
}

// ============================================================================
// Writer
// ============================================================================

/// Write handle for a new archive.
pub struct ArchiveWriter {
    path: PathBuf,
    partial_path: PathBuf,
    zip: Option<ZipWriter<File>>,
    compression: CompressionMethod,
    geometry: Option<FieldGeometry>,
    records: Vec<RecordMeta>,
    keys: HashSet<String>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Open a new archive for writing at `path`. An existing file at `path` is
    /// only replaced once the new archive is closed.
    pub fn create(path: impl AsRef<Path>, compression: ArchiveCompression) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let partial_path = partial_path(&path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(&partial_path).map_err(|source| ArchiveError::Io {
            path: partial_path.clone(),
            source,
        })?;

        debug!(path = %partial_path.display(), "Archive opened for writing");
        Ok(Self {
            path,
            partial_path,
            zip: Some(ZipWriter::new(file)),
            compression: match compression {
                ArchiveCompression::Deflated => CompressionMethod::Deflated,
                ArchiveCompression::Stored => CompressionMethod::Stored,
            },
            geometry: None,
            records: Vec::new(),
            keys: HashSet::new(),
        })
    }

    /// Insert one travel-time field under `key`.
    pub fn add(&mut self, field: &ScalarField3D, key: &str) -> Result<(), ArchiveError> {
        if self.keys.contains(key) {
            return Err(ArchiveError::DuplicateKey(key.to_string()));
        }
        match &self.geometry {
            Some(expected) if expected != field.geometry() => {
                return Err(ArchiveError::GeometryMismatch {
                    key: key.to_string(),
                    expected: Box::new(*expected),
                    found: Box::new(*field.geometry()),
                });
            }
            Some(_) => {}
            None => self.geometry = Some(*field.geometry()),
        }

        let bytes = encode_values(field.values());
        let digest = format!("{:x}", md5::compute(&bytes));

        let options = self.entry_options(bytes.len());
        let zip = self.zip_mut()?;
        zip.start_file(format!("{DATA_PREFIX}{key}"), options)?;
        zip.write_all(&bytes).map_err(ZipError::Io)?;

        self.keys.insert(key.to_string());
        self.records.push(RecordMeta {
            key: key.to_string(),
            md5: digest,
        });
        debug!(key, bytes = bytes.len(), "Archive record added");
        Ok(())
    }

    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write metadata, finish the zip and move it to its final path.
    ///
    /// `failed` lists identifiers that should have been in the archive but
    /// are not; a non-empty list marks the archive incomplete.
    pub fn close(mut self, failed: Vec<String>) -> Result<ArchiveMeta, ArchiveError> {
        let meta = ArchiveMeta {
            format_version: ARCHIVE_FORMAT_VERSION,
            field_type: "scalar".to_string(),
            geometry: self.geometry,
            created_at: Utc::now(),
            complete: failed.is_empty(),
            failed,
            records: std::mem::take(&mut self.records),
        };

        let json = serde_json::to_vec_pretty(&meta)?;
        let options = self.entry_options(json.len());
        let zip = self.zip_mut()?;
        zip.start_file(META_ENTRY, options)?;
        zip.write_all(&json).map_err(ZipError::Io)?;

        let mut zip = self.zip.take().ok_or(ArchiveError::Unfinalized(self.path.clone()))?;
        let finished = zip.finish().and_then(|file| file.sync_all().map_err(ZipError::Io));
        drop(zip);
        if let Err(e) = finished {
            let _ = fs::remove_file(&self.partial_path);
            return Err(e.into());
        }
        if let Err(source) = fs::rename(&self.partial_path, &self.path) {
            let _ = fs::remove_file(&self.partial_path);
            return Err(ArchiveError::Io {
                path: self.path.clone(),
                source,
            });
        }

        info!(
            path = %self.path.display(),
            records = meta.records.len(),
            complete = meta.complete,
            "Archive finalized"
        );
        Ok(meta)
    }

    fn zip_mut(&mut self) -> Result<&mut ZipWriter<File>, ArchiveError> {
        self.zip
            .as_mut()
            .ok_or_else(|| ArchiveError::Unfinalized(self.path.clone()))
    }

    fn entry_options(&self, len: usize) -> FileOptions {
        FileOptions::default()
            .compression_method(self.compression)
            .last_modified_time(zip::DateTime::default())
            .large_file(len as u64 >= u64::from(u32::MAX))
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Some(zip) = self.zip.take() {
            drop(zip);
            match fs::remove_file(&self.partial_path) {
                Ok(()) => warn!(path = %self.partial_path.display(), "Discarded unfinished archive"),
                Err(e) => warn!(path = %self.partial_path.display(), error = %e, "Failed to remove unfinished archive"),
            }
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn encode_values(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_values(key: &str, bytes: &[u8], expected: usize) -> Result<Vec<f64>, ArchiveError> {
    if bytes.len() != expected * 8 {
        return Err(ArchiveError::Integrity {
            key: key.to_string(),
            reason: format!("expected {} bytes, found {}", expected * 8, bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect())
}

// ============================================================================
// Reader
// ============================================================================

/// Read-only handle on a finished archive.
pub struct ArchiveReader {
    path: PathBuf,
    zip: ZipArchive<File>,
    meta: ArchiveMeta,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        let mut zip = ZipArchive::new(file)?;

        let meta: ArchiveMeta = match zip.by_name(META_ENTRY) {
            Ok(entry) => serde_json::from_reader(entry)?,
            Err(ZipError::FileNotFound) => return Err(ArchiveError::Unfinalized(path)),
            Err(e) => return Err(e.into()),
        };
        if meta.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedVersion(meta.format_version));
        }
        if let Some(geometry) = &meta.geometry {
            geometry.validate().map_err(|e| ArchiveError::Integrity {
                key: META_ENTRY.to_string(),
                reason: e.to_string(),
            })?;
        }

        debug!(path = %path.display(), records = meta.records.len(), "Archive opened");
        Ok(Self { path, zip, meta })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &ArchiveMeta {
        &self.meta
    }

    /// Record identifiers in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.meta.records.iter().map(|r| r.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.meta.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.meta.records.iter().any(|r| r.key == key)
    }

    pub fn is_complete(&self) -> bool {
        self.meta.complete
    }

    pub fn geometry(&self) -> Option<&FieldGeometry> {
        self.meta.geometry.as_ref()
    }

    pub fn min_coords(&self) -> Option<[f64; 3]> {
        self.geometry().map(|g| g.min_coords)
    }

    pub fn max_coords(&self) -> Option<[f64; 3]> {
        self.geometry().map(FieldGeometry::max_coords)
    }

    pub fn node_intervals(&self) -> Option<[f64; 3]> {
        self.geometry().map(|g| g.node_intervals)
    }

    pub fn npts(&self) -> Option<[usize; 3]> {
        self.geometry().map(|g| g.npts)
    }

    /// Read the record stored under `key`, optionally clipped to the nodes
    /// covering `[min_coords, max_coords]`.
    pub fn read(
        &mut self,
        key: &str,
        min_coords: Option<[f64; 3]>,
        max_coords: Option<[f64; 3]>,
    ) -> Result<ScalarField3D, ArchiveError> {
        let record = self
            .meta
            .records
            .iter()
            .find(|r| r.key == key)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(key.to_string()))?;
        let geometry = self
            .meta
            .geometry
            .ok_or_else(|| ArchiveError::NotFound(key.to_string()))?;
        let (start, end) = subvolume_range(&geometry, min_coords, max_coords)?;

        let mut bytes = Vec::new();
        {
            let mut entry = match self.zip.by_name(&format!("{DATA_PREFIX}{key}")) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => return Err(ArchiveError::NotFound(key.to_string())),
                Err(e) => return Err(e.into()),
            };
            entry.read_to_end(&mut bytes).map_err(ZipError::Io)?;
        }

        let digest = format!("{:x}", md5::compute(&bytes));
        if digest != record.md5 {
            return Err(ArchiveError::Integrity {
                key: key.to_string(),
                reason: format!("md5 {digest} does not match recorded {}", record.md5),
            });
        }

        let values = decode_values(key, &bytes, geometry.node_count())?;
        let field = ScalarField3D::new(geometry, values).map_err(|e| ArchiveError::Integrity {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        if start == [0, 0, 0] && end == geometry.npts {
            return Ok(field);
        }
        field
            .subvolume(start, end)
            .map_err(|e| ArchiveError::InvalidBounds(e.to_string()))
    }
}

/// Node index range covering `[min_coords, max_coords]`, clipped to the grid.
///
/// The start index rounds down and the end index rounds up (exclusive), so the
/// returned nodes always enclose the requested box. At least one node is
/// returned on every axis.
pub fn subvolume_range(
    geometry: &FieldGeometry,
    min_coords: Option<[f64; 3]>,
    max_coords: Option<[f64; 3]>,
) -> Result<([usize; 3], [usize; 3]), ArchiveError> {
    for bound in [min_coords, max_coords].into_iter().flatten() {
        if bound.iter().any(|c| !c.is_finite()) {
            return Err(ArchiveError::InvalidBounds(format!(
                "bounds must be finite, got {bound:?}"
            )));
        }
    }
    if let (Some(lo), Some(hi)) = (min_coords, max_coords) {
        if lo.iter().zip(hi.iter()).any(|(l, h)| l >= h) {
            return Err(ArchiveError::InvalidBounds(
                "all values of min_coords must be less than max_coords".to_string(),
            ));
        }
    }

    let mut start = [0usize; 3];
    let mut end = geometry.npts;
    for axis in 0..3 {
        let origin = geometry.min_coords[axis];
        let interval = geometry.node_intervals[axis];
        let n = geometry.npts[axis] as f64;

        if let Some(lo) = min_coords {
            start[axis] = ((lo[axis] - origin) / interval).floor().clamp(0.0, n - 1.0) as usize;
        }
        if let Some(hi) = max_coords {
            let upper = ((hi[axis] - origin) / interval).ceil() + 1.0;
            end[axis] = upper.clamp(start[axis] as f64 + 1.0, n) as usize;
        } else {
            end[axis] = end[axis].max(start[axis] + 1);
        }
    }
    Ok((start, end))
}
