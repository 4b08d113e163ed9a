//! Pipeline Storage
//!
//! - [`ScratchStore`]: per-run staging directory, one file per finished work unit
//! - [`ArchiveWriter`] / [`ArchiveReader`]: the consolidated travel-time archive

pub mod archive;
pub mod scratch;

pub use archive::{ArchiveError, ArchiveMeta, ArchiveReader, ArchiveWriter, RecordMeta};
pub use scratch::{ScratchEntry, ScratchError, ScratchStore};
