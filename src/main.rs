//! Entry point for the RuCube application.
//! Handles CLI parsing, store loading, and dispatches operations like
//! computing statistics or sigma-clipping a cube.

use clap::Parser;
use ru_cube::prelude::*;
use serde_json::Value as JsonValue;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args = Args::parse();

    println!(
        r#"
------------------------------------------------------------------
                ______       _____       _
                | ___ \     /  __ \     | |
                | |_/ /_   _| /  \/_   _| |__   ___
                |    /| | | | |   | | | | '_ \ / _ \
                | |\ \| |_| | \__/\ |_| | |_) |  __/
                \_| \_|\__,_|\____/\__,_|_.__/ \___|
                  Rust-based lazy cube computation
------------------------------------------------------------------
                        "#
    );

    // Configure the shared thread pool before any computation runs
    if let Some(threads) = args.threads {
        ParallelConfig::with_threads(threads).setup_global_pool()?;
    }

    // Open the store asynchronously for inspection
    let reader = StoreReader::open(&args.store).await?;
    println!("Successfully opened cube store: {}", args.store.display());

    if args.describe {
        let meta = reader.metadata();
        println!("\n===== Store Metadata =====");
        println!("- shape: {:?}", meta.shape);
        println!("- chunks: {:?}", meta.chunks);
        println!("- dtype: {}", meta.dtype);
        println!("- unit: {}", meta.unit.as_deref().unwrap_or("(dimensionless)"));
        println!("- created: {}", meta.created);
    }

    let mut cube = Cube::load_store(&args.store)?;

    // Install the requested scheduler for the rest of the run
    let strategy = SchedulerStrategy::from_name(&args.scheduler)?;
    let mut spec = SchedulerSpec {
        strategy,
        options: Default::default(),
    };
    if let Some(num_workers) = args.num_workers {
        spec = spec.with_option("num_workers", JsonValue::from(num_workers));
    }
    cube.set_scheduler(spec);

    if let Some(chunks) = &args.rechunk {
        cube = cube.rechunk(&chunks.0)?;
        println!("✅ Rechunked to {:?}", cube.chunksize());
    }

    if let Some(threshold) = args.sigma_clip {
        let target = args.save_to.clone().map(SpillTarget::Path);
        cube = cube.sigma_clip_spectrally(threshold, target)?;
        match &args.save_to {
            Some(path) => println!("✅ Saved sigma-clipped cube to {}", path.display()),
            None => println!("✅ Sigma-clipped cube (lazy, not persisted)"),
        }
    }

    if args.stats {
        let stats = cube.statistics()?;
        stats.print_summary();
    }

    Ok(())
}
