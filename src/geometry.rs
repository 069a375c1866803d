//! Chunk geometry management
//!
//! A chunk specification has one entry per array axis: either a concrete
//! chunk length or `Auto`, meaning "whatever remains along that axis".
//! Normalization resolves a specification against the array's true extents:
//! oversized requests are silently clamped to the axis length, `Auto`
//! becomes the full extent, and a wrong axis count is a caller error.

use crate::errors::{Result, RuCubeError};

/// Requested chunk length along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSpec {
    /// A concrete chunk length. Clamped to the axis extent on normalization.
    Len(usize),
    /// The remainder marker: use the full extent of the axis.
    Auto,
}

impl ChunkSpec {
    /// Parse a single chunk entry from text: an integer or `auto`.
    ///
    /// # Errors
    ///
    /// Returns an error for anything that is neither.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<usize>().map(Self::Len).map_err(|_| {
            RuCubeError::GeometryError(format!("invalid chunk length '{}'", s))
        })
    }
}

impl From<usize> for ChunkSpec {
    fn from(len: usize) -> Self {
        Self::Len(len)
    }
}

/// Resolve a chunk specification against the array shape.
///
/// Each axis resolves independently: `Len(n)` with `n` smaller than the
/// extent is used as-is, anything larger (and `Auto`) clamps to the extent.
/// The logical array contents are never affected by chunk geometry.
///
/// # Errors
///
/// Returns an error if the specification does not have one entry per axis,
/// or if a concrete chunk length is zero.
pub fn normalize_chunks(requested: &[ChunkSpec], shape: &[usize]) -> Result<Vec<usize>> {
    if requested.len() != shape.len() {
        return Err(RuCubeError::ChunkCountMismatch {
            expected: shape.len(),
            actual: requested.len(),
        });
    }

    let mut resolved = Vec::with_capacity(shape.len());
    for (axis, (spec, &extent)) in requested.iter().zip(shape).enumerate() {
        let len = match spec {
            ChunkSpec::Len(0) => {
                return Err(RuCubeError::GeometryError(format!(
                    "chunk length along axis {} must be non-zero",
                    axis
                )));
            }
            ChunkSpec::Len(n) => (*n).min(extent),
            ChunkSpec::Auto => extent,
        };
        resolved.push(len);
    }

    Ok(resolved)
}

/// Number of blocks along each axis for the given chunk lengths.
#[must_use]
pub fn grid_counts(shape: &[usize], chunks: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .zip(chunks)
        .map(|(&extent, &chunk)| {
            if extent == 0 {
                0
            } else {
                extent.div_ceil(chunk)
            }
        })
        .collect()
}

/// Enumerate every block index of a chunk grid in row-major order.
#[must_use]
pub fn block_indices(counts: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = counts.iter().product();
    let mut indices = Vec::with_capacity(total);
    if counts.iter().any(|&c| c == 0) {
        return indices;
    }
    let mut idx = vec![0; counts.len()];
    for _ in 0..total {
        indices.push(idx.clone());
        for axis in (0..counts.len()).rev() {
            idx[axis] += 1;
            if idx[axis] < counts[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
    indices
}

/// The index range a block covers along each axis, clamped at the edges.
#[must_use]
pub fn block_region(idx: &[usize], shape: &[usize], chunks: &[usize]) -> Vec<std::ops::Range<usize>> {
    idx.iter()
        .zip(shape.iter().zip(chunks))
        .map(|(&i, (&extent, &chunk))| {
            let start = i * chunk;
            start..(start + chunk).min(extent)
        })
        .collect()
}
