//! Block-wise function application along the spectral axis
//!
//! User functions run independently on spectral-axis-aligned blocks: the
//! applicator first repartitions the array so the spectral axis spans a
//! single chunk, then appends a block-wise map to the lazy graph. The
//! function must produce correct results without seeing neighbouring
//! blocks; that is the caller's contract, not something the engine can
//! enforce. Output geometry that differs from the input block shape must
//! be declared explicitly; the graph cannot infer it by introspecting the
//! function.

use crate::chunked::{BlockFn, LazyArray};
use crate::errors::Result;
use crate::geometry::ChunkSpec;
use ndarray::{ArrayD, Axis};
use std::sync::Arc;

/// The spectral axis of a cube is always the leading axis.
pub const SPECTRAL_AXIS: usize = 0;

/// A user function for spectral application: applied per element, or given
/// a whole block slab at a time.
#[derive(Clone)]
pub enum SpectralFunction {
    PerElement(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
    PerBlock(BlockFn),
}

impl SpectralFunction {
    /// Wrap an element-wise function.
    pub fn per_element(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::PerElement(Arc::new(f))
    }

    /// Wrap a function that receives whole blocks.
    pub fn per_block(f: impl Fn(ArrayD<f64>) -> ArrayD<f64> + Send + Sync + 'static) -> Self {
        Self::PerBlock(Arc::new(f))
    }

    fn into_block_fn(self) -> BlockFn {
        match self {
            Self::PerBlock(f) => f,
            Self::PerElement(f) => Arc::new(move |block: ArrayD<f64>| block.mapv(|v| f(v))),
        }
    }
}

/// Options for block-wise spectral application.
#[derive(Debug, Clone, Default)]
pub struct ParallelApplyOptions {
    /// Input axes absent from the output (e.g. `[0]` to collapse the
    /// spectral axis entirely).
    pub drop_axis: Vec<usize>,
    /// Expected chunk shape of each output block. Required whenever the
    /// output shape per block differs from the input block shape.
    pub output_chunks: Option<Vec<usize>>,
}

impl ParallelApplyOptions {
    /// Drop the given axes from the output.
    #[must_use]
    pub fn drop_axis(mut self, axes: &[usize]) -> Self {
        self.drop_axis = axes.to_vec();
        self
    }

    /// Declare the output chunk shape.
    #[must_use]
    pub fn output_chunks(mut self, chunks: &[usize]) -> Self {
        self.output_chunks = Some(chunks.to_vec());
        self
    }
}

/// Apply a user function to every spectral-axis-aligned block.
///
/// Pure graph construction: the result is a new lazy array and nothing is
/// evaluated here. A declared `output_chunks` geometry inconsistent with
/// what the function actually produces surfaces later, at materialization.
///
/// # Errors
///
/// Returns geometry errors for invalid `drop_axis`/`output_chunks`
/// declarations.
pub fn apply_parallel_spectral(
    array: &LazyArray,
    function: SpectralFunction,
    options: &ParallelApplyOptions,
) -> Result<LazyArray> {
    // Blocks must span the full spectral axis; other axes keep their
    // current chunking.
    let spec: Vec<ChunkSpec> = (0..array.ndim())
        .map(|axis| {
            if axis == SPECTRAL_AXIS {
                ChunkSpec::Auto
            } else {
                ChunkSpec::Len(array.chunksize()[axis])
            }
        })
        .collect();
    let aligned = array.rechunk(&spec)?;

    aligned.map_blocks(
        function.into_block_fn(),
        &options.drop_axis,
        options.output_chunks.as_deref(),
    )
}

/// Iterative sigma clipping along the spectral axis.
///
/// For every spatial position, samples further than `threshold` standard
/// deviations from the spectral mean are replaced with NaN, and the
/// mean/deviation are recomputed until no further samples are rejected.
/// Chunk-boundary independent as long as blocks span the full spectral
/// axis, which the applicator guarantees.
#[must_use]
pub fn sigma_clip_function(threshold: f64) -> SpectralFunction {
    SpectralFunction::per_block(move |mut block: ArrayD<f64>| {
        for mut lane in block.lanes_mut(Axis(SPECTRAL_AXIS)) {
            loop {
                let finite: Vec<f64> = lane.iter().copied().filter(|v| v.is_finite()).collect();
                if finite.len() < 2 {
                    break;
                }
                let n = finite.len() as f64;
                let mean = finite.iter().sum::<f64>() / n;
                let sigma =
                    (finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
                if sigma == 0.0 {
                    break;
                }

                let mut rejected = false;
                for v in lane.iter_mut() {
                    if v.is_finite() && (*v - mean).abs() > threshold * sigma {
                        *v = f64::NAN;
                        rejected = true;
                    }
                }
                if !rejected {
                    break;
                }
            }
        }
        block
    })
}
