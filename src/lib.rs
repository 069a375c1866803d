//! RuCube: lazy, chunked computation over spectral data cubes
//!
//! A Rust library for working with large spectral-spatial data cubes that
//! do not fit comfortably in memory. Operations on a cube build a lazy
//! expression graph over chunked data; nothing is evaluated until a
//! concrete value is needed, at which point the computation runs under a
//! caller-selected execution strategy.
//!
//! ## Key Features
//!
//! - **Lazy Evaluation**: rechunking, block-wise mapping and reductions
//!   append to an expression graph without touching the data
//! - **Scheduler Control**: scoped or permanent overrides of the execution
//!   strategy (synchronous, threaded, worker pool, external executor)
//! - **Global Statistics**: count, mean, sigma, sum, sum-of-squares,
//!   min, max and RMS from combinable per-block partial reductions
//! - **Spectral Block Application**: arbitrary user functions over
//!   spectral-axis-aligned blocks, including axis-dropping outputs
//! - **Spill to Storage**: checkpoint intermediate results into a chunked
//!   on-disk store and keep working lazily from disk
//! - **Physical Units**: statistics carry the cube's unit, squared units
//!   included
//!
//! ## Module Organization
//!
//! - [`cube`]: the cube value tying together data, unit and scheduler
//! - [`scheduler`]: the per-cube scheduler override stack
//! - [`dispatch`]: the single materialization choke point
//! - [`geometry`]: chunk specifications and normalization
//! - [`statistics`]: block-wise partial reductions and derived statistics
//! - [`apply`]: block-wise spectral function application
//! - [`spill`]: spill-to-storage for intermediate results
//! - [`chunked`]: the lazy array engine (graph, execution, store)
//! - [`units`]: minimal unit-checked quantities
//! - [`data_source`]: async traits over chunked storage
//! - [`errors`]: centralized error handling
//!
//! ## Usage Example
//!
//! ```rust
//! use ndarray::ArrayD;
//! use ru_cube::prelude::*;
//!
//! let data = ArrayD::from_shape_vec(vec![4, 3, 2], (0..24).map(f64::from).collect()).unwrap();
//! let cube = Cube::from_array(data, Unit::new("K"));
//!
//! // Repartition, then compute statistics on the threaded scheduler.
//! let cube = cube.rechunk(&[ChunkSpec::Len(1), ChunkSpec::Len(2), ChunkSpec::Auto]).unwrap();
//! {
//!     let _scope = cube.use_scheduler(SchedulerSpec::threads());
//!     let stats = cube.statistics().unwrap();
//!     assert_eq!(stats.npts, 24);
//! }
//! ```

// Core modules
pub mod apply;
pub mod chunked;
pub mod cube;
pub mod data_source;
pub mod dispatch;
pub mod errors;
pub mod geometry;
pub mod scheduler;
pub mod spill;
pub mod statistics;
pub mod units;

// Direct re-exports for the public API
pub use apply::*;
pub use chunked::{BlockExecutor, BlockFn, BlockJob, BlockOutput, LazyArray, ParallelConfig};
pub use chunked::{StoreHandle, StoreMetadata, StoreReader, StoreWriter};
pub use cube::*;
pub use dispatch::{compute, Materialize, StoreSink};
pub use errors::*;
pub use geometry::{normalize_chunks, ChunkSpec};
pub use scheduler::*;
pub use spill::*;
pub use statistics::*;
pub use units::*;

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::apply::{ParallelApplyOptions, SpectralFunction};
    pub use crate::chunked::{BlockExecutor, LazyArray, ParallelConfig, StoreReader, StoreWriter};
    pub use crate::cube::Cube;
    pub use crate::dispatch::Materialize;
    pub use crate::errors::{Result, RuCubeError};
    pub use crate::geometry::ChunkSpec;
    pub use crate::scheduler::{SchedulerContext, SchedulerSpec, SchedulerStrategy};
    pub use crate::spill::SpillTarget;
    pub use crate::statistics::CubeStatistics;
    pub use crate::units::{Quantity, Unit};
}
