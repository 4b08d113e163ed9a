//! Consolidator - merges staged entries into the archive
//!
//! Runs after every worker has finished. Entries are taken from the scratch
//! store in lexicographic identifier order, one at a time, so the archive's
//! record order depends only on which units succeeded and never on the order
//! in which they completed.

use super::PipelineError;
use crate::storage::{ArchiveMeta, ArchiveWriter, ScratchStore};
use tracing::{debug, info};

/// Move every scratch entry into `archive`, then close it.
///
/// `expected` is the number of units that succeeded; any other entry count
/// fails consolidation. `failed` lists the identifiers that produced no entry
/// and is recorded in the archive metadata. On error the archive is dropped
/// unfinished and no output file is left behind.
pub fn consolidate(
    scratch: &ScratchStore,
    mut archive: ArchiveWriter,
    expected: usize,
    failed: Vec<String>,
) -> Result<ArchiveMeta, PipelineError> {
    let entries = scratch.entries()?;
    info!(entries = entries.len(), "Consolidating scratch entries");

    for entry in &entries {
        let field = scratch.take(entry)?;
        archive.add(&field, &entry.identifier)?;
        debug!(identifier = %entry.identifier, "Record consolidated");
    }

    if archive.len() != expected {
        return Err(PipelineError::RecordCountMismatch {
            expected,
            found: archive.len(),
        });
    }

    let meta = archive.close(failed)?;
    Ok(meta)
}
