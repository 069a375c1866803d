//! Lazy chunked arrays
//!
//! A [`LazyArray`] is a deferred expression over chunked n-dimensional data:
//! building one (from memory, from a store, by rechunking, by block-wise
//! mapping) never touches the data. Evaluation happens block by block, and
//! only when a materialization request arrives through the compute
//! dispatcher. Errors introduced while building the graph (for example an
//! output chunk declaration that does not match what a mapped function
//! really produces) therefore surface at materialization time, not at graph
//! construction time.

use crate::errors::{Result, RuCubeError};
use crate::geometry::{self, ChunkSpec};
use crate::scheduler::SchedulerSpec;
use ndarray::{ArrayD, SliceInfoElem};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::execute::{self, BlockJob, BlockOutput};
use super::store::{StoreHandle, StoreWriter};

/// A function applied to whole blocks of an array.
pub type BlockFn = Arc<dyn Fn(ArrayD<f64>) -> ArrayD<f64> + Send + Sync>;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

fn token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// A lazy, chunked n-dimensional array.
///
/// Cloning is cheap: the expression graph is shared behind `Arc`s.
#[derive(Clone)]
pub struct LazyArray {
    name: String,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    node: Arc<LazyNode>,
}

enum LazyNode {
    /// Concrete in-memory data.
    Source { data: Arc<ArrayD<f64>> },
    /// Blocks read on demand from an on-disk chunked store.
    Store { handle: StoreHandle },
    /// Same logical contents as `input`, different block partitioning.
    Rechunk { input: LazyArray },
    /// A user function applied independently to every block of `input`.
    MapBlocks {
        input: LazyArray,
        func: BlockFn,
        drop_axis: Vec<usize>,
    },
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyArray")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl LazyArray {
    /// Wrap concrete data as a single-block lazy array.
    #[must_use]
    pub fn from_array(data: ArrayD<f64>) -> Self {
        let shape = data.shape().to_vec();
        Self {
            name: format!("array-{}", token()),
            chunks: shape.clone(),
            shape,
            node: Arc::new(LazyNode::Source {
                data: Arc::new(data),
            }),
        }
    }

    /// A lazy array whose blocks are read from an on-disk store.
    ///
    /// The handle's name marks the array as store-originated, which is
    /// observable after a spill.
    #[must_use]
    pub fn from_store(handle: StoreHandle) -> Self {
        let meta = handle.metadata();
        Self {
            name: format!("from-zarr-{}", token()),
            shape: meta.shape.clone(),
            chunks: meta.chunks.clone(),
            node: Arc::new(LazyNode::Store { handle }),
        }
    }

    /// The graph node name, e.g. `rechunk-12` or `from-zarr-3`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical array shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Chunk length along each axis (edge blocks may be shorter).
    #[must_use]
    pub fn chunksize(&self) -> &[usize] {
        &self.chunks
    }

    /// Repartition the array into a new chunk geometry.
    ///
    /// Pure graph construction: the logical contents and shape are
    /// unchanged, nothing is materialized. Oversized chunk requests clamp
    /// to the axis extent.
    ///
    /// # Errors
    ///
    /// Returns an error if the specification has the wrong number of axes
    /// or a zero chunk length.
    pub fn rechunk(&self, requested: &[ChunkSpec]) -> Result<Self> {
        let chunks = geometry::normalize_chunks(requested, &self.shape)?;
        Ok(Self {
            name: format!("rechunk-{}", token()),
            shape: self.shape.clone(),
            chunks,
            node: Arc::new(LazyNode::Rechunk {
                input: self.clone(),
            }),
        })
    }

    /// Apply `func` independently to every block.
    ///
    /// `drop_axis` lists input axes absent from the output (each must span a
    /// single block, so blocks map one-to-one). `output_chunks` declares the
    /// per-block output chunk shape; it is required whenever axes are
    /// dropped, because the graph cannot infer output geometry from `func`.
    /// A declaration inconsistent with what `func` actually produces is not
    /// detected here; it surfaces as a [`RuCubeError::BlockShapeMismatch`]
    /// when the result is materialized.
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range or duplicated `drop_axis` entries,
    /// a dropped axis spanning multiple blocks, a missing `output_chunks`
    /// when axes are dropped, or an `output_chunks` with the wrong number of
    /// axes.
    pub fn map_blocks(
        &self,
        func: BlockFn,
        drop_axis: &[usize],
        output_chunks: Option<&[usize]>,
    ) -> Result<Self> {
        let ndim = self.ndim();
        for &axis in drop_axis {
            if axis >= ndim {
                return Err(RuCubeError::GeometryError(format!(
                    "drop axis {} is out of bounds for a {}-dimensional array",
                    axis, ndim
                )));
            }
            if drop_axis.iter().filter(|&&a| a == axis).count() > 1 {
                return Err(RuCubeError::GeometryError(format!(
                    "drop axis {} listed more than once",
                    axis
                )));
            }
            if self.chunks[axis] < self.shape[axis] {
                return Err(RuCubeError::GeometryError(format!(
                    "axis {} spans multiple blocks and cannot be dropped; rechunk it to a single block first",
                    axis
                )));
            }
        }

        let kept: Vec<usize> = (0..ndim).filter(|ax| !drop_axis.contains(ax)).collect();
        if !drop_axis.is_empty() && output_chunks.is_none() {
            return Err(RuCubeError::GeometryError(
                "output chunk shape must be declared when dropping axes".to_string(),
            ));
        }
        if let Some(oc) = output_chunks {
            if oc.len() != kept.len() {
                return Err(RuCubeError::ChunkCountMismatch {
                    expected: kept.len(),
                    actual: oc.len(),
                });
            }
            if let Some(axis) = oc.iter().position(|&c| c == 0) {
                return Err(RuCubeError::GeometryError(format!(
                    "output chunk length along axis {} must be non-zero",
                    axis
                )));
            }
        }

        let mut shape = Vec::with_capacity(kept.len());
        let mut chunks = Vec::with_capacity(kept.len());
        for (j, &ax) in kept.iter().enumerate() {
            let in_chunk = self.chunks[ax];
            let in_extent = self.shape[ax];
            let out_chunk = output_chunks.map_or(in_chunk, |oc| oc[j]);
            // A declared chunk equal to the input chunk preserves the axis
            // extent; otherwise the extent follows the declaration.
            let extent = if out_chunk == in_chunk {
                in_extent
            } else {
                let blocks = if in_extent == 0 {
                    0
                } else {
                    in_extent.div_ceil(in_chunk)
                };
                out_chunk * blocks
            };
            shape.push(extent);
            // Declared chunks clamp to the derived extent like any other
            // chunk request.
            chunks.push(if extent == 0 { out_chunk } else { out_chunk.min(extent) });
        }

        Ok(Self {
            name: format!("map-blocks-{}", token()),
            shape,
            chunks,
            node: Arc::new(LazyNode::MapBlocks {
                input: self.clone(),
                func,
                drop_axis: drop_axis.to_vec(),
            }),
        })
    }

    fn grid_counts(&self) -> Vec<usize> {
        geometry::grid_counts(&self.shape, &self.chunks)
    }

    fn expected_block_shape(&self, idx: &[usize]) -> Vec<usize> {
        geometry::block_region(idx, &self.shape, &self.chunks)
            .iter()
            .map(|r| r.end - r.start)
            .collect()
    }

    /// Evaluate one block of this array.
    fn eval_block(&self, idx: &[usize]) -> Result<ArrayD<f64>> {
        match self.node.as_ref() {
            LazyNode::Source { data } => {
                let region = geometry::block_region(idx, &self.shape, &self.chunks);
                Ok(slice_region(data, &region))
            }
            LazyNode::Store { handle } => handle.read_chunk(idx),
            LazyNode::Rechunk { input } => {
                let region = geometry::block_region(idx, &self.shape, &self.chunks);
                input.eval_range(&region)
            }
            LazyNode::MapBlocks {
                input,
                func,
                drop_axis,
            } => {
                // Blocks map one-to-one; dropped axes are a single block, so
                // their grid index is always zero.
                let mut kept = idx.iter();
                let in_idx: Vec<usize> = (0..input.ndim())
                    .map(|ax| {
                        if drop_axis.contains(&ax) {
                            0
                        } else {
                            *kept.next().expect("block index arity")
                        }
                    })
                    .collect();
                let block = input.eval_block(&in_idx)?;
                Ok(func(block))
            }
        }
    }

    /// Evaluate an arbitrary index range of this array.
    ///
    /// Rechunk nodes forward the range untouched, since repartitioning
    /// never moves data. Store and map nodes assemble from whole blocks.
    fn eval_range(&self, region: &[Range<usize>]) -> Result<ArrayD<f64>> {
        match self.node.as_ref() {
            LazyNode::Source { data } => Ok(slice_region(data, region)),
            LazyNode::Rechunk { input } => input.eval_range(region),
            LazyNode::Store { .. } | LazyNode::MapBlocks { .. } => {
                let lens: Vec<usize> = region.iter().map(|r| r.end - r.start).collect();
                let mut out = ArrayD::zeros(lens);
                if out.is_empty() {
                    return Ok(out);
                }

                let first: Vec<usize> = region
                    .iter()
                    .zip(&self.chunks)
                    .map(|(r, &c)| r.start / c)
                    .collect();
                let sub_counts: Vec<usize> = region
                    .iter()
                    .zip(&self.chunks)
                    .zip(&first)
                    .map(|((r, &c), &f)| (r.end - 1) / c - f + 1)
                    .collect();

                for rel in geometry::block_indices(&sub_counts) {
                    let idx: Vec<usize> =
                        rel.iter().zip(&first).map(|(&r, &f)| r + f).collect();
                    let block = self.eval_block(&idx)?;
                    let expected = self.expected_block_shape(&idx);
                    if block.shape() != expected.as_slice() {
                        return Err(RuCubeError::BlockShapeMismatch {
                            expected,
                            actual: block.shape().to_vec(),
                        });
                    }

                    let block_region = geometry::block_region(&idx, &self.shape, &self.chunks);
                    let mut src = Vec::with_capacity(region.len());
                    let mut dst = Vec::with_capacity(region.len());
                    for (b, want) in block_region.iter().zip(region) {
                        let lo = b.start.max(want.start);
                        let hi = b.end.min(want.end);
                        src.push(lo - b.start..hi - b.start);
                        dst.push(lo - want.start..hi - want.start);
                    }
                    out.slice_mut(slice_info(&dst).as_slice())
                        .assign(&block.slice(slice_info(&src).as_slice()));
                }
                Ok(out)
            }
        }
    }

    /// Materialize the whole array under the given scheduler.
    ///
    /// Engine primitive: call it through the compute dispatcher, never
    /// directly.
    ///
    /// # Errors
    ///
    /// Returns any block evaluation error, including deferred shape
    /// mismatches from block-wise mapped functions.
    pub fn materialize_with(&self, spec: &SchedulerSpec) -> Result<ArrayD<f64>> {
        let mut out = ArrayD::zeros(self.shape.clone());
        if out.is_empty() {
            return Ok(out);
        }

        let outputs = execute::run_jobs(spec, self.block_jobs())?;
        for BlockOutput { index, data } in outputs {
            let expected = self.expected_block_shape(&index);
            if data.shape() != expected.as_slice() {
                return Err(RuCubeError::BlockShapeMismatch {
                    expected,
                    actual: data.shape().to_vec(),
                });
            }
            let region = geometry::block_region(&index, &self.shape, &self.chunks);
            out.slice_mut(slice_info(&region).as_slice()).assign(&data);
        }
        Ok(out)
    }

    /// Evaluate every block, feed it through `per_block`, and collect the
    /// outputs without assembling them into one array.
    ///
    /// Engine primitive backing block-wise reductions; call it through the
    /// compute dispatcher.
    ///
    /// # Errors
    ///
    /// Returns any block evaluation error.
    pub fn map_reduce_with(
        &self,
        spec: &SchedulerSpec,
        per_block: BlockFn,
    ) -> Result<Vec<BlockOutput>> {
        if self.shape.iter().product::<usize>() == 0 {
            return Ok(Vec::new());
        }
        let jobs: Vec<BlockJob> = geometry::block_indices(&self.grid_counts())
            .into_iter()
            .map(|idx| {
                let array = self.clone();
                let per_block = Arc::clone(&per_block);
                let job: BlockJob = Box::new(move || {
                    let data = per_block(array.eval_block(&idx)?);
                    Ok(BlockOutput { index: idx, data })
                });
                job
            })
            .collect();
        execute::run_jobs(spec, jobs)
    }

    /// Materialize block by block straight into an on-disk store, never
    /// holding more than the in-flight blocks in memory.
    ///
    /// Engine primitive backing spill-to-storage; call it through the
    /// compute dispatcher.
    ///
    /// # Errors
    ///
    /// Returns any block evaluation or store write error.
    pub fn store_with(&self, spec: &SchedulerSpec, writer: &StoreWriter) -> Result<()> {
        if self.shape.iter().product::<usize>() == 0 {
            return Ok(());
        }
        let jobs: Vec<BlockJob> = geometry::block_indices(&self.grid_counts())
            .into_iter()
            .map(|idx| {
                let array = self.clone();
                let writer = writer.clone();
                let job: BlockJob = Box::new(move || {
                    let data = array.eval_block(&idx)?;
                    let expected = array.expected_block_shape(&idx);
                    if data.shape() != expected.as_slice() {
                        return Err(RuCubeError::BlockShapeMismatch {
                            expected,
                            actual: data.shape().to_vec(),
                        });
                    }
                    writer.write_chunk(&idx, &data)?;
                    // The block is on disk; the job output carries no data.
                    Ok(BlockOutput {
                        index: idx,
                        data: ArrayD::zeros(vec![0]),
                    })
                });
                job
            })
            .collect();
        execute::run_jobs(spec, jobs)?;
        Ok(())
    }

    fn block_jobs(&self) -> Vec<BlockJob> {
        geometry::block_indices(&self.grid_counts())
            .into_iter()
            .map(|idx| {
                let array = self.clone();
                let job: BlockJob = Box::new(move || {
                    let data = array.eval_block(&idx)?;
                    Ok(BlockOutput { index: idx, data })
                });
                job
            })
            .collect()
    }
}

fn slice_info(region: &[Range<usize>]) -> Vec<SliceInfoElem> {
    region
        .iter()
        .map(|r| SliceInfoElem::Slice {
            start: r.start as isize,
            end: Some(r.end as isize),
            step: 1,
        })
        .collect()
}

fn slice_region(data: &ArrayD<f64>, region: &[Range<usize>]) -> ArrayD<f64> {
    data.slice(slice_info(region).as_slice()).to_owned()
}
