//! Chunked on-disk store
//!
//! A store is a directory holding a `.zarray` JSON metadata file plus one
//! raw little-endian chunk file per block (`chunk_<flat index>`). It is the
//! spill target for intermediate results and can be reloaded as a lazy
//! array that reads blocks on demand instead of recomputing them.

use crate::errors::{Result, RuCubeError};
use crate::geometry;
use chrono::Utc;
use futures::Stream;
use ndarray::ArrayD;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::TempDir;

use super::execute::BlockOutput;
use super::lazy::LazyArray;

/// Metadata describing a stored array.
#[derive(Debug, Clone)]
pub struct StoreMetadata {
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: String,
    pub unit: Option<String>,
    pub created: String,
}

impl StoreMetadata {
    fn to_json(&self) -> JsonValue {
        let mut meta = json!({
            "zarr_format": 2,
            "shape": self.shape,
            "chunks": self.chunks,
            "dtype": self.dtype,
            "created": self.created,
        });
        if let Some(unit) = &self.unit {
            meta["unit"] = json!(unit);
        }
        meta
    }

    fn from_json(value: &JsonValue) -> Result<Self> {
        let shape = usize_list(value, "shape")?;
        let chunks = usize_list(value, "chunks")?;
        if chunks.len() != shape.len() || chunks.contains(&0) {
            return Err(RuCubeError::StoreError(
                "Invalid chunk geometry in store metadata".to_string(),
            ));
        }
        let dtype = value["dtype"].as_str().unwrap_or("<f8").to_string();
        let unit = value["unit"].as_str().map(str::to_string);
        let created = value["created"].as_str().unwrap_or_default().to_string();
        Ok(Self {
            shape,
            chunks,
            dtype,
            unit,
            created,
        })
    }
}

fn usize_list(value: &JsonValue, key: &str) -> Result<Vec<usize>> {
    value[key]
        .as_array()
        .ok_or_else(|| RuCubeError::StoreError(format!("Missing '{}' in store metadata", key)))?
        .iter()
        .map(|v| {
            v.as_u64().map(|n| n as usize).ok_or_else(|| {
                RuCubeError::StoreError(format!("Invalid entry in store '{}'", key))
            })
        })
        .collect()
}

fn chunk_file(path: &Path, idx: &[usize], counts: &[usize]) -> PathBuf {
    let mut flat = 0;
    for (axis, &i) in idx.iter().enumerate() {
        flat = flat * counts[axis] + i;
    }
    path.join(format!("chunk_{}", flat))
}

/// Writes blocks of a materializing array into a store directory.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    path: PathBuf,
    meta: StoreMetadata,
}

impl StoreWriter {
    /// Create a store directory and write its metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the metadata
    /// cannot be written.
    pub fn create(
        path: &Path,
        shape: &[usize],
        chunks: &[usize],
        unit: Option<&str>,
    ) -> Result<Self> {
        fs::create_dir_all(path)?;
        let meta = StoreMetadata {
            shape: shape.to_vec(),
            chunks: chunks.to_vec(),
            dtype: "<f8".to_string(),
            unit: unit.map(str::to_string),
            created: Utc::now().to_rfc3339(),
        };
        let text = serde_json::to_string_pretty(&meta.to_json())?;
        fs::write(path.join(".zarray"), text)?;
        Ok(Self {
            path: path.to_path_buf(),
            meta,
        })
    }

    /// Write one block. Blocks land in separate files, so concurrent writes
    /// from parallel jobs are safe.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk file cannot be written.
    pub fn write_chunk(&self, idx: &[usize], data: &ArrayD<f64>) -> Result<()> {
        let counts = geometry::grid_counts(&self.meta.shape, &self.meta.chunks);
        let mut bytes = Vec::with_capacity(data.len() * 8);
        for &v in data.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(chunk_file(&self.path, idx, &counts), bytes)?;
        Ok(())
    }

    /// The store location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A handle on an existing store: enough to read single chunks without any
/// async machinery, used by lazy arrays backed by a store.
///
/// When the store lives in an ephemeral temp directory, the handle keeps the
/// directory alive for as long as any lazy array references it.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    path: PathBuf,
    meta: StoreMetadata,
    _tmp: Option<Arc<TempDir>>,
}

impl StoreHandle {
    /// Open an existing store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its `.zarray` metadata is
    /// missing or malformed.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(RuCubeError::StoreError(format!(
                "Store path is not a directory: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path.join(".zarray"))?;
        let meta = StoreMetadata::from_json(&serde_json::from_str(&text)?)?;
        Ok(Self {
            path: path.to_path_buf(),
            meta,
            _tmp: None,
        })
    }

    /// Attach an ephemeral directory so it outlives every reader.
    #[must_use]
    pub fn with_tempdir(mut self, tmp: Arc<TempDir>) -> Self {
        self._tmp = Some(tmp);
        self
    }

    /// Store metadata.
    #[must_use]
    pub fn metadata(&self) -> &StoreMetadata {
        &self.meta
    }

    /// Read one block synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk file is missing or its size does not
    /// match the expected block extent.
    pub fn read_chunk(&self, idx: &[usize]) -> Result<ArrayD<f64>> {
        let counts = geometry::grid_counts(&self.meta.shape, &self.meta.chunks);
        let region = geometry::block_region(idx, &self.meta.shape, &self.meta.chunks);
        let block_shape: Vec<usize> = region.iter().map(|r| r.end - r.start).collect();
        let expected: usize = block_shape.iter().product();

        let file = chunk_file(&self.path, idx, &counts);
        let bytes = fs::read(&file)?;
        if bytes.len() != expected * 8 {
            return Err(RuCubeError::StoreError(format!(
                "Chunk file {} holds {} bytes, expected {}",
                file.display(),
                bytes.len(),
                expected * 8
            )));
        }

        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();
        Ok(ArrayD::from_shape_vec(block_shape, values)?)
    }
}

/// Async reading surface over a store: whole-array reads, chunk streaming,
/// and lazy loading.
pub struct StoreReader {
    handle: StoreHandle,
}

impl StoreReader {
    /// Open a store for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory or metadata is invalid.
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            handle: StoreHandle::open(path)?,
        })
    }

    /// Wrap an already-open handle.
    #[must_use]
    pub fn from_handle(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Store metadata.
    #[must_use]
    pub fn metadata(&self) -> &StoreMetadata {
        self.handle.metadata()
    }

    /// Read the entire array, assembling every chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if any chunk file is missing or malformed.
    pub async fn read_array(&self) -> Result<ArrayD<f64>> {
        let meta = self.handle.metadata().clone();
        let counts = geometry::grid_counts(&meta.shape, &meta.chunks);
        let mut out = ArrayD::zeros(meta.shape.clone());
        for idx in geometry::block_indices(&counts) {
            let block = self.handle.read_chunk(&idx)?;
            let region = geometry::block_region(&idx, &meta.shape, &meta.chunks);
            let slices: Vec<ndarray::SliceInfoElem> = region
                .iter()
                .map(|r| ndarray::SliceInfoElem::Slice {
                    start: r.start as isize,
                    end: Some(r.end as isize),
                    step: 1,
                })
                .collect();
            out.slice_mut(slices.as_slice()).assign(&block);
        }
        Ok(out)
    }

    /// Stream chunks one block at a time, in row-major grid order.
    pub fn stream_chunks(&self) -> Pin<Box<dyn Stream<Item = Result<BlockOutput>> + Send + 'static>> {
        let handle = self.handle.clone();
        Box::pin(async_stream::stream! {
            let meta = handle.metadata().clone();
            let counts = geometry::grid_counts(&meta.shape, &meta.chunks);
            for idx in geometry::block_indices(&counts) {
                match handle.read_chunk(&idx) {
                    Ok(data) => yield Ok(BlockOutput { index: idx, data }),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }

    /// A lazy array that reads blocks from this store on materialization.
    #[must_use]
    pub fn lazy_load(&self) -> LazyArray {
        LazyArray::from_store(self.handle.clone())
    }
}

#[async_trait::async_trait]
impl crate::data_source::ChunkReadSource for StoreReader {
    async fn source_metadata(&self) -> Result<StoreMetadata> {
        Ok(self.handle.metadata().clone())
    }

    async fn read_whole(&self) -> Result<ArrayD<f64>> {
        self.read_array().await
    }
}

impl crate::data_source::LazyLoadSource for StoreReader {
    fn lazy_load(&self) -> LazyArray {
        StoreReader::lazy_load(self)
    }
}

impl crate::data_source::ChunkStreamSource for StoreReader {
    fn stream_chunks(&self) -> Pin<Box<dyn Stream<Item = Result<BlockOutput>> + Send + 'static>> {
        StoreReader::stream_chunks(self)
    }
}
