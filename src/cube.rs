//! The cube: a lazy backing array plus physical unit and scheduler state
//!
//! A [`Cube`] owns exactly one backing [`LazyArray`] and the physical unit
//! of its values. Every transformation (rechunk, spectral application,
//! spill) produces a new cube value; the original stays valid and usable.
//! The one piece of shared mutable state is the scheduler context, which
//! derived cubes share with their parent.

use crate::apply::{self, ParallelApplyOptions, SpectralFunction};
use crate::chunked::{LazyArray, StoreHandle};
use crate::dispatch;
use crate::errors::Result;
use crate::geometry::ChunkSpec;
use crate::scheduler::{SchedulerContext, SchedulerGuard, SchedulerSpec};
use crate::spill::{self, SpillTarget};
use crate::statistics::{self, CubeStatistics};
use crate::units::Unit;
use ndarray::ArrayD;
use std::path::Path;
use std::sync::Arc;

/// A spectral-spatial data cube over a lazy, chunked backing array.
#[derive(Debug, Clone)]
pub struct Cube {
    data: LazyArray,
    unit: Unit,
    scheduler: Arc<SchedulerContext>,
}

impl Cube {
    /// Wrap in-memory data as a single-block cube.
    #[must_use]
    pub fn from_array(data: ArrayD<f64>, unit: Unit) -> Self {
        Self::from_lazy(LazyArray::from_array(data), unit)
    }

    /// Wrap an existing lazy array.
    #[must_use]
    pub fn from_lazy(data: LazyArray, unit: Unit) -> Self {
        Self {
            data,
            unit,
            scheduler: Arc::new(SchedulerContext::new()),
        }
    }

    /// Open a cube from a chunked on-disk store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory or metadata is invalid.
    pub fn load_store(path: &Path) -> Result<Self> {
        let handle = StoreHandle::open(path)?;
        let unit = handle
            .metadata()
            .unit
            .as_deref()
            .map_or_else(Unit::dimensionless, Unit::new);
        Ok(Self::from_lazy(LazyArray::from_store(handle), unit))
    }

    /// A new cube around new backing data, sharing this cube's unit and
    /// scheduler context.
    fn derive(&self, data: LazyArray) -> Self {
        Self {
            data,
            unit: self.unit.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }

    /// The lazy backing array.
    #[must_use]
    pub fn data(&self) -> &LazyArray {
        &self.data
    }

    /// The physical unit of the cube values.
    #[must_use]
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Logical cube shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Chunk length along each axis of the backing array.
    #[must_use]
    pub fn chunksize(&self) -> &[usize] {
        self.data.chunksize()
    }

    /// The scheduler context consulted by every materialization of this
    /// cube (and of cubes derived from it).
    #[must_use]
    pub fn scheduler_context(&self) -> &Arc<SchedulerContext> {
        &self.scheduler
    }

    /// Scoped scheduler override: current until the guard drops, after
    /// which whatever was current before is restored.
    #[must_use]
    pub fn use_scheduler(&self, spec: SchedulerSpec) -> SchedulerGuard<'_> {
        self.scheduler.push(spec)
    }

    /// Permanent scheduler override: current until replaced.
    pub fn set_scheduler(&self, spec: SchedulerSpec) {
        self.scheduler.push_permanent(spec);
    }

    /// Materialize the full backing array through the compute dispatcher.
    ///
    /// # Errors
    ///
    /// Propagates any block evaluation error, including deferred failures
    /// introduced by earlier graph construction.
    pub fn compute(&self) -> Result<ArrayD<f64>> {
        dispatch::compute(&self.data, &self.scheduler)
    }

    /// Global statistics over all valid points, in the cube's unit.
    /// Builds the reduction lazily and resolves it in one materialization.
    ///
    /// # Errors
    ///
    /// Propagates block evaluation errors.
    pub fn statistics(&self) -> Result<CubeStatistics> {
        statistics::compute_statistics(&self.data, &self.unit, &self.scheduler)
    }

    /// A new cube with repartitioned backing storage. Contents and shape
    /// are unchanged; oversized chunk requests clamp to the axis extents.
    ///
    /// # Errors
    ///
    /// Returns an error for a specification with the wrong number of axes.
    pub fn rechunk(&self, chunks: &[ChunkSpec]) -> Result<Self> {
        Ok(self.derive(self.data.rechunk(chunks)?))
    }

    /// Apply a user function to spectral-axis-aligned blocks and wrap the
    /// result back into a cube (the output must retain cube-compatible
    /// axes).
    ///
    /// # Errors
    ///
    /// Returns geometry errors for invalid `drop_axis`/`output_chunks`
    /// declarations.
    pub fn apply_function_parallel_spectral(
        &self,
        function: SpectralFunction,
        options: &ParallelApplyOptions,
    ) -> Result<Self> {
        Ok(self.derive(self.apply_function_parallel_spectral_raw(function, options)?))
    }

    /// Same as [`Cube::apply_function_parallel_spectral`] but returning the
    /// raw lazy array, with no cube wrapping and no unit attached.
    ///
    /// # Errors
    ///
    /// Returns geometry errors for invalid `drop_axis`/`output_chunks`
    /// declarations.
    pub fn apply_function_parallel_spectral_raw(
        &self,
        function: SpectralFunction,
        options: &ParallelApplyOptions,
    ) -> Result<LazyArray> {
        apply::apply_parallel_spectral(&self.data, function, options)
    }

    /// Sigma-clip along the spectral axis, optionally spilling the clipped
    /// result to a chunked store to bound memory in longer pipelines.
    ///
    /// # Errors
    ///
    /// Propagates spill store errors; without a spill target the operation
    /// is pure graph construction and only geometry errors are possible.
    pub fn sigma_clip_spectrally(
        &self,
        threshold: f64,
        save_to_tmp_dir: Option<SpillTarget>,
    ) -> Result<Self> {
        let clipped = apply::apply_parallel_spectral(
            &self.data,
            apply::sigma_clip_function(threshold),
            &ParallelApplyOptions::default(),
        )?;
        let unit = if self.unit.is_dimensionless() {
            None
        } else {
            Some(self.unit.to_string())
        };
        let data = spill::maybe_spill(&clipped, save_to_tmp_dir, unit.as_deref(), &self.scheduler)?;
        Ok(self.derive(data))
    }
}
