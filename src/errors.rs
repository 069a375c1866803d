//! Centralized error handling for RuCube
//!
//! This module provides structured error types used across the lazy array
//! engine and the cube-level orchestration layer, enabling better error
//! context and type safety than a generic `Box<dyn Error>`.

use std::fmt;

/// Main error type for RuCube operations
#[derive(Debug)]
pub enum RuCubeError {
    /// Unknown scheduler strategy name
    UnknownScheduler { name: String },

    /// Chunk specification has the wrong number of axes
    ChunkCountMismatch { expected: usize, actual: usize },

    /// Invalid chunk geometry (zero-length chunks, bad axis index, ...)
    GeometryError(String),

    /// A block produced at materialization time did not match the declared
    /// output chunk geometry
    BlockShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Chunked store operation errors
    StoreError(String),

    /// Physical unit mismatch or unrepresentable unit operation
    UnitError(String),

    /// Thread pool configuration error
    ThreadPoolError(String),

    /// I/O operation errors
    IoError(std::io::Error),

    /// Store metadata (de)serialization errors
    JsonError(serde_json::Error),

    /// Array shape or dimension error
    ArrayError(ndarray::ShapeError),

    /// Generic error for backward compatibility
    Generic(String),
}

impl fmt::Display for RuCubeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuCubeError::UnknownScheduler { name } => {
                write!(
                    f,
                    "Unknown scheduler '{}': expected one of 'synchronous', 'threads', 'processes'",
                    name
                )
            }
            RuCubeError::ChunkCountMismatch { expected, actual } => {
                write!(
                    f,
                    "Chunk specification has {} axes but the array has {}",
                    actual, expected
                )
            }
            RuCubeError::GeometryError(msg) => write!(f, "Chunk geometry error: {}", msg),
            RuCubeError::BlockShapeMismatch { expected, actual } => {
                write!(
                    f,
                    "Block shape {:?} does not match the declared output chunk shape {:?}",
                    actual, expected
                )
            }
            RuCubeError::StoreError(msg) => write!(f, "Chunked store error: {}", msg),
            RuCubeError::UnitError(msg) => write!(f, "Unit error: {}", msg),
            RuCubeError::ThreadPoolError(msg) => write!(f, "Thread pool error: {}", msg),
            RuCubeError::IoError(e) => write!(f, "I/O error: {}", e),
            RuCubeError::JsonError(e) => write!(f, "Metadata error: {}", e),
            RuCubeError::ArrayError(e) => write!(f, "Array error: {}", e),
            RuCubeError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuCubeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuCubeError::IoError(e) => Some(e),
            RuCubeError::JsonError(e) => Some(e),
            RuCubeError::ArrayError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RuCubeError {
    fn from(error: std::io::Error) -> Self {
        RuCubeError::IoError(error)
    }
}

impl From<serde_json::Error> for RuCubeError {
    fn from(error: serde_json::Error) -> Self {
        RuCubeError::JsonError(error)
    }
}

impl From<ndarray::ShapeError> for RuCubeError {
    fn from(error: ndarray::ShapeError) -> Self {
        RuCubeError::ArrayError(error)
    }
}

impl From<String> for RuCubeError {
    fn from(error: String) -> Self {
        RuCubeError::Generic(error)
    }
}

impl From<&str> for RuCubeError {
    fn from(error: &str) -> Self {
        RuCubeError::Generic(error.to_string())
    }
}

/// Result type alias for RuCube operations
pub type Result<T> = std::result::Result<T, RuCubeError>;
