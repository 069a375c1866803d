//! End-to-end pipeline tests for RuCube
//!
//! Builds a cube in memory, runs it through rechunking, sigma clipping,
//! spilling and statistics the way a multi-stage reduction pipeline would.

use ndarray::ArrayD;
use ru_cube::prelude::*;
use tempfile::tempdir;

/// An 8x2x2 cube of quiet spectra with one strong outlier sample.
fn cube_with_outlier() -> (Cube, usize) {
    let mut values = vec![10.0; 8 * 2 * 2];
    // One spectral sample of the (1, 1) spatial position is wild.
    let outlier_flat = 7 * 4 + 3;
    values[outlier_flat] = 1000.0;
    let data = ArrayD::from_shape_vec(vec![8, 2, 2], values).expect("shape matches data");
    (Cube::from_array(data, Unit::new("K")), outlier_flat)
}

#[test]
fn test_sigma_clip_pipeline_with_spill() {
    let (cube, outlier_flat) = cube_with_outlier();
    let cube = cube
        .rechunk(&[ChunkSpec::Len(4), ChunkSpec::Len(1), ChunkSpec::Auto])
        .expect("valid chunk spec");

    // Clip on the threaded scheduler, spilling the clipped cube to an
    // ephemeral store so the pipeline does not recompute the clip.
    let clipped = {
        let _scope = cube.use_scheduler(SchedulerSpec::threads());
        cube.sigma_clip_spectrally(2.0, Some(SpillTarget::TempDir))
            .expect("sigma clip with spill")
    };

    // The backing array now originates from the store.
    assert!(clipped.data().name().starts_with("from-zarr"));

    // The outlier was rejected, everything else survived untouched.
    let values = clipped.compute().expect("materialize clipped cube");
    for (flat, v) in values.iter().enumerate() {
        if flat == outlier_flat {
            assert!(v.is_nan(), "outlier should be masked");
        } else {
            assert_eq!(*v, 10.0);
        }
    }

    // Statistics exclude the clipped sample.
    let stats = clipped.statistics().expect("statistics");
    assert_eq!(stats.npts, 31);
    assert_eq!(stats.min.value, 10.0);
    assert_eq!(stats.max.value, 10.0);

    println!("✅ Integration test passed: sigma clip, spill and statistics compose!");
}

#[test]
fn test_spill_roundtrip_matches_original() {
    let (cube, _) = cube_with_outlier();
    let cube = cube
        .rechunk(&[ChunkSpec::Len(2), ChunkSpec::Auto, ChunkSpec::Len(1)])
        .expect("valid chunk spec");

    // Without a target the array passes through untouched and lazy.
    let unspilled = ru_cube::spill::maybe_spill(
        cube.data(),
        None,
        None,
        cube.scheduler_context(),
    )
    .expect("no-op spill");
    assert_eq!(unspilled.name(), cube.data().name());

    // With a target, the reloaded handle materializes to identical values.
    let spilled = ru_cube::spill::maybe_spill(
        cube.data(),
        Some(SpillTarget::TempDir),
        Some("K"),
        cube.scheduler_context(),
    )
    .expect("spill to temp dir");
    assert!(spilled.name().starts_with("from-zarr"));
    assert_eq!(spilled.shape(), cube.shape());
    assert_eq!(spilled.chunksize(), cube.chunksize());

    let original = cube.compute().expect("materialize original");
    let reloaded = ru_cube::dispatch::compute(&spilled, cube.scheduler_context())
        .expect("materialize spilled");
    assert_eq!(original, reloaded);
}

#[test]
fn test_spill_to_explicit_path() {
    let (cube, _) = cube_with_outlier();
    let store_dir = tempdir().expect("Failed to create temp dir");
    let store_path = store_dir.path().join("clipped.zarr");

    let clipped = cube
        .sigma_clip_spectrally(2.0, Some(SpillTarget::Path(store_path.clone())))
        .expect("sigma clip with spill");
    assert!(clipped.data().name().starts_with("from-zarr"));
    assert!(store_path.join(".zarray").exists());

    // A fresh cube loaded from the store sees the same values and unit.
    let reloaded = Cube::load_store(&store_path).expect("load stored cube");
    assert_eq!(reloaded.unit(), &Unit::new("K"));
    assert_eq!(
        reloaded.compute().expect("materialize reloaded"),
        clipped.compute().expect("materialize clipped")
    );
}

#[test]
fn test_deferred_failure_surfaces_late() {
    // An inconsistent output declaration made early in a pipeline stays
    // silent through further graph construction and only fails once a
    // materialization finally runs.
    let (cube, _) = cube_with_outlier();
    let bad = cube
        .apply_function_parallel_spectral(
            SpectralFunction::per_block(|block| block),
            &ParallelApplyOptions::default()
                .drop_axis(&[0])
                .output_chunks(&[1, 2]),
        )
        .expect("declaration errors are deferred");

    // Still fine: rechunking the broken result builds more graph.
    let bad = bad
        .rechunk(&[ChunkSpec::Auto, ChunkSpec::Auto])
        .expect("pure graph construction");

    let result = bad.compute();
    assert!(matches!(result, Err(RuCubeError::BlockShapeMismatch { .. })));
}
