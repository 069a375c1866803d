//! Spill-to-storage for intermediate results
//!
//! Checkpointing an expensive lazy expression into a chunked on-disk store
//! bounds the memory and recompute cost of multi-stage pipelines: the
//! materialization runs block by block straight into the store, and the
//! caller gets back a new lazy handle that reads from disk instead of
//! re-evaluating the original graph.

use crate::chunked::{LazyArray, StoreHandle, StoreWriter};
use crate::dispatch::{self, StoreSink};
use crate::errors::Result;
use crate::scheduler::SchedulerContext;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a spilled intermediate should live.
#[derive(Debug)]
pub enum SpillTarget {
    /// An ephemeral temporary directory, removed when the last handle to
    /// the spilled array is dropped.
    TempDir,
    /// A caller-supplied store location.
    Path(PathBuf),
}

impl From<PathBuf> for SpillTarget {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&str> for SpillTarget {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

/// Optionally checkpoint a lazy array to disk.
///
/// With no target the input is returned unchanged, still lazy. With a
/// target, the array materializes through the compute dispatcher into a
/// chunked store, and the returned handle lazily reads from that store;
/// its name reflects the store origin.
///
/// # Errors
///
/// Returns store creation/write errors and any block evaluation error
/// raised during the materialization.
pub fn maybe_spill(
    array: &LazyArray,
    target: Option<SpillTarget>,
    unit: Option<&str>,
    context: &SchedulerContext,
) -> Result<LazyArray> {
    let Some(target) = target else {
        return Ok(array.clone());
    };

    let (path, tmp) = match target {
        SpillTarget::TempDir => {
            let dir = tempfile::tempdir()?;
            (dir.path().join("spill.zarr"), Some(Arc::new(dir)))
        }
        SpillTarget::Path(path) => (path, None),
    };

    let writer = StoreWriter::create(&path, array.shape(), array.chunksize(), unit)?;
    dispatch::compute(
        &StoreSink {
            array,
            writer: &writer,
        },
        context,
    )?;

    let mut handle = StoreHandle::open(&path)?;
    if let Some(tmp) = tmp {
        handle = handle.with_tempdir(tmp);
    }
    Ok(LazyArray::from_store(handle))
}
