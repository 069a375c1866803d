//! Data source abstraction over chunked array storage
//!
//! Trait-based seams so cube pipelines can consume chunked data without
//! committing to one storage backend: plain reads, lazy loading into the
//! deferred graph, and chunk-at-a-time streaming.

use crate::chunked::{BlockOutput, LazyArray, StoreMetadata};
use crate::errors::Result;
use async_trait::async_trait;
use futures::Stream;
use ndarray::ArrayD;
use std::pin::Pin;

/// Basic read interface over a chunked array source.
#[async_trait]
pub trait ChunkReadSource {
    /// Shape, chunk geometry and attributes of the stored array.
    async fn source_metadata(&self) -> Result<StoreMetadata>;

    /// Read the entire array into memory.
    async fn read_whole(&self) -> Result<ArrayD<f64>>;
}

/// Lazy loading: defer all reads into the expression graph.
pub trait LazyLoadSource: ChunkReadSource {
    /// A lazy array whose blocks are read from this source on demand.
    fn lazy_load(&self) -> LazyArray;
}

/// Streaming: visit one block at a time without holding the whole array.
pub trait ChunkStreamSource: ChunkReadSource {
    /// Stream blocks in row-major grid order.
    fn stream_chunks(&self) -> Pin<Box<dyn Stream<Item = Result<BlockOutput>> + Send + 'static>>;
}
