//! Defines command-line interface options using `clap` for the RuCube application.

use clap::Parser;
use ru_cube::geometry::ChunkSpec;
use std::path::PathBuf;

/// A CLI tool for inspecting and reducing chunked cube stores
#[derive(Parser, Debug)]
#[command(
    author = "Sam Green",
    version = "0.3.0",
    name = "RuCube",
    about = "App for working with chunked spectral cube stores"
)]
pub struct Args {
    /// Path to the chunked cube store directory
    #[arg(short, long)]
    pub store: PathBuf,

    /// Print store metadata (shape, chunks, dtype, unit)
    #[arg(long)]
    pub describe: bool,

    /// Compute global cube statistics
    #[arg(long)]
    pub stats: bool,

    /// Rechunk before computing, formatted as <len|auto>[,<len|auto>...] with one entry per axis
    #[arg(long, value_parser = parse_chunks_arg)]
    pub rechunk: Option<ChunkSpecArg>,

    /// Sigma-clip along the spectral axis with the given threshold
    #[arg(long)]
    pub sigma_clip: Option<f64>,

    /// Store directory for the sigma-clipped result
    #[arg(long)]
    pub save_to: Option<PathBuf>,

    /// Scheduler strategy: synchronous, threads or processes
    #[arg(long, default_value = "synchronous")]
    pub scheduler: String,

    /// Worker count for the processes scheduler
    #[arg(long)]
    pub num_workers: Option<usize>,

    /// Number of threads for the shared pool. Defaults to number of CPU cores.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

/// A parsed per-axis chunk specification.
#[derive(Debug, Clone)]
pub struct ChunkSpecArg(pub Vec<ChunkSpec>);

fn parse_chunks_arg(s: &str) -> Result<ChunkSpecArg, String> {
    s.split(',')
        .map(|entry| ChunkSpec::parse(entry).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()
        .map(ChunkSpecArg)
}
