//! Comprehensive unit tests for RuCube modules
//!
//! These tests cover the scheduler stack discipline, chunk geometry
//! normalization, block-wise statistics, spectral function application and
//! the unit-quantity layer.

use ndarray::{ArrayD, Axis};
use ru_cube::{
    apply::{ParallelApplyOptions, SpectralFunction},
    chunked::{BlockExecutor, BlockJob, BlockOutput, LazyArray},
    cube::Cube,
    dispatch::{self, Materialize},
    errors::{Result, RuCubeError},
    geometry::{normalize_chunks, ChunkSpec},
    scheduler::{SchedulerContext, SchedulerSpec, SchedulerStrategy},
    statistics::BlockPartial,
    units::{Quantity, Unit},
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A fake deferred computation that just reports the merged kwargs it was
/// handed, mirroring how the engine sees a materialization request.
struct FakeArray;

impl Materialize for FakeArray {
    type Output = HashMap<String, JsonValue>;

    fn materialize(&self, spec: &SchedulerSpec) -> Result<Self::Output> {
        Ok(spec.kwargs())
    }
}

fn seen_kwargs(context: &SchedulerContext) -> HashMap<String, JsonValue> {
    dispatch::compute(&FakeArray, context).expect("fake materialization cannot fail")
}

fn kwargs_of(entries: &[(&str, JsonValue)]) -> HashMap<String, JsonValue> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn test_data() -> ArrayD<f64> {
    let values: Vec<f64> = (0..24).map(|i| f64::from(i) * 0.25 + 0.1).collect();
    ArrayD::from_shape_vec(vec![4, 3, 2], values).expect("shape matches data")
}

fn assert_close(a: f64, b: f64) {
    if a.is_nan() && b.is_nan() {
        return;
    }
    assert!((a - b).abs() <= 1e-10 * (1.0 + b.abs()), "{} != {}", a, b);
}

#[test]
fn test_error_types() {
    let scheduler_err = RuCubeError::UnknownScheduler {
        name: "steam".to_string(),
    };
    assert!(format!("{}", scheduler_err).contains("Unknown scheduler 'steam'"));

    let count_err = RuCubeError::ChunkCountMismatch {
        expected: 3,
        actual: 2,
    };
    assert!(format!("{}", count_err).contains("2 axes but the array has 3"));

    let shape_err = RuCubeError::BlockShapeMismatch {
        expected: vec![1, 2],
        actual: vec![4, 1, 2],
    };
    assert!(format!("{}", shape_err).contains("declared output chunk shape"));

    let generic_err = RuCubeError::Generic("Test error".to_string());
    assert_eq!(format!("{}", generic_err), "Test error");
}

#[test]
fn test_scheduler_stack() {
    let cube = Cube::from_array(test_data(), Unit::new("K"));
    let context = cube.scheduler_context();

    // The implicit default.
    assert_eq!(
        seen_kwargs(context),
        kwargs_of(&[("scheduler", JsonValue::from("synchronous"))])
    );

    {
        let _scope = cube.use_scheduler(SchedulerSpec::threads());
        assert_eq!(
            seen_kwargs(context),
            kwargs_of(&[("scheduler", JsonValue::from("threads"))])
        );
    }

    // Back to the default after the scope exits.
    assert_eq!(
        seen_kwargs(context),
        kwargs_of(&[("scheduler", JsonValue::from("synchronous"))])
    );

    // A permanent push persists with no guard.
    cube.set_scheduler(SchedulerSpec::threads());
    assert_eq!(
        seen_kwargs(context),
        kwargs_of(&[("scheduler", JsonValue::from("threads"))])
    );

    {
        let _scope = cube.use_scheduler(SchedulerSpec::processes(4));
        assert_eq!(
            seen_kwargs(context),
            kwargs_of(&[
                ("scheduler", JsonValue::from("processes")),
                ("num_workers", JsonValue::from(4)),
            ])
        );
    }

    // Scope exit restores the permanent value, not the original default.
    assert_eq!(
        seen_kwargs(context),
        kwargs_of(&[("scheduler", JsonValue::from("threads"))])
    );
}

#[test]
fn test_scheduler_scope_restores_on_unwind() {
    let context = SchedulerContext::new();
    context.push_permanent(SchedulerSpec::threads());

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _scope = context.push(SchedulerSpec::processes(2));
        panic!("boom");
    }));
    assert!(result.is_err());

    // The guard dropped during unwinding and restored the permanent value.
    assert_eq!(context.current().strategy.name(), "threads");
}

#[test]
fn test_scheduler_nested_scopes() {
    let context = SchedulerContext::new();
    assert_eq!(context.current().strategy.name(), "synchronous");

    let outer = context.push(SchedulerSpec::threads());
    {
        let _inner = context.push(SchedulerSpec::processes(8));
        assert_eq!(context.current().strategy.name(), "processes");
    }
    assert_eq!(context.current().strategy.name(), "threads");
    drop(outer);
    assert_eq!(context.current().strategy.name(), "synchronous");
}

#[test]
fn test_unknown_scheduler_name() {
    let result = SchedulerStrategy::from_name("cloud");
    match result {
        Err(RuCubeError::UnknownScheduler { name }) => assert_eq!(name, "cloud"),
        _ => panic!("Expected UnknownScheduler error"),
    }

    assert_eq!(
        SchedulerStrategy::from_name("threads")
            .expect("known name")
            .name(),
        "threads"
    );
}

/// An external executor that runs jobs inline and counts invocations.
struct CountingExecutor {
    calls: AtomicUsize,
}

impl BlockExecutor for CountingExecutor {
    fn name(&self) -> &str {
        "counting"
    }

    fn execute(&self, jobs: Vec<BlockJob>) -> Result<Vec<BlockOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        jobs.into_iter().map(|job| job()).collect()
    }
}

#[test]
fn test_external_executor_strategy() {
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
    });
    let cube = Cube::from_array(test_data(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Len(2), ChunkSpec::Auto, ChunkSpec::Auto])
        .expect("valid chunk spec");

    cube.set_scheduler(SchedulerSpec::external(executor.clone()));
    let values = cube.compute().expect("materialization succeeds");

    assert_eq!(values, test_data());
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    // The executor is its own strategy name in the merged kwargs.
    let kwargs = seen_kwargs(cube.scheduler_context());
    assert_eq!(kwargs["scheduler"], JsonValue::from("counting"));
}

#[test]
fn test_normalize_chunks() {
    // Oversized requests clamp, Auto takes the remainder.
    let resolved = normalize_chunks(
        &[ChunkSpec::Len(1), ChunkSpec::Len(2), ChunkSpec::Len(3)],
        &[4, 3, 2],
    )
    .expect("valid spec");
    assert_eq!(resolved, vec![1, 2, 2]);

    let resolved = normalize_chunks(&[ChunkSpec::Auto, ChunkSpec::Len(10)], &[5, 7])
        .expect("valid spec");
    assert_eq!(resolved, vec![5, 7]);

    // Wrong axis count is a caller contract violation.
    let result = normalize_chunks(&[ChunkSpec::Len(1)], &[4, 3, 2]);
    match result {
        Err(RuCubeError::ChunkCountMismatch { expected, actual }) => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 1);
        }
        _ => panic!("Expected ChunkCountMismatch error"),
    }

    // Zero chunk lengths are rejected.
    assert!(normalize_chunks(&[ChunkSpec::Len(0)], &[4]).is_err());
}

#[test]
fn test_chunk_spec_parsing() {
    assert_eq!(ChunkSpec::parse("12").expect("integer"), ChunkSpec::Len(12));
    assert_eq!(ChunkSpec::parse("auto").expect("marker"), ChunkSpec::Auto);
    assert_eq!(ChunkSpec::parse(" AUTO ").expect("marker"), ChunkSpec::Auto);
    assert!(ChunkSpec::parse("twelve").is_err());
}

#[test]
fn test_rechunk_clamps_and_preserves_contents() {
    let cube = Cube::from_array(test_data(), Unit::new("K"));
    assert_eq!(cube.chunksize(), &[4, 3, 2]);

    // The requested chunk on the last axis is larger than the cube extent
    // there; it clamps rather than erroring.
    let cube_new = cube
        .rechunk(&[ChunkSpec::Len(1), ChunkSpec::Len(2), ChunkSpec::Len(3)])
        .expect("valid chunk spec");
    assert_eq!(cube_new.chunksize(), &[1, 2, 2]);

    // Logical shape and contents are untouched; only partitioning changed.
    assert_eq!(cube_new.shape(), cube.shape());
    assert_eq!(
        cube_new.compute().expect("materialize rechunked"),
        cube.compute().expect("materialize original")
    );
}

#[test]
fn test_statistics_against_direct_computation() {
    let data = test_data();
    let cube = Cube::from_array(data.clone(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Len(1), ChunkSpec::Len(2), ChunkSpec::Len(3)])
        .expect("valid chunk spec");

    let stats = cube.statistics().expect("statistics");

    // Direct, non-chunked computation over the same values.
    let values: Vec<f64> = data.iter().copied().collect();
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let sumsq: f64 = values.iter().map(|v| v * v).sum();
    let mean = sum / n;
    let sigma = (sumsq / n - mean * mean).max(0.0).sqrt();
    let rms = (sumsq / n).sqrt();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    assert_eq!(stats.npts, 24);
    assert_close(stats.mean.value, mean);
    assert_close(stats.sigma.value, sigma);
    assert_close(stats.sum.value, sum);
    assert_close(stats.sumsq.value, sumsq);
    assert_close(stats.min.value, min);
    assert_close(stats.max.value, max);
    assert_close(stats.rms.value, rms);

    // Units ride along: sumsq in K^2, everything else in K.
    assert_eq!(stats.mean.unit, Unit::new("K"));
    assert_eq!(stats.sumsq.unit, Unit::new("K").squared());
    assert_eq!(stats.sigma.unit, Unit::new("K"));
}

#[test]
fn test_statistics_exclude_masked_entries() {
    let mut data = test_data();
    data[[0, 0, 0]] = f64::NAN;
    data[[2, 1, 1]] = f64::INFINITY;

    let cube = Cube::from_array(data.clone(), Unit::new("Jy"))
        .rechunk(&[ChunkSpec::Len(2), ChunkSpec::Auto, ChunkSpec::Auto])
        .expect("valid chunk spec");
    let stats = cube.statistics().expect("statistics");

    let valid: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    assert_eq!(stats.npts, valid.len() as u64);
    assert_close(stats.sum.value, valid.iter().sum());
}

#[test]
fn test_statistics_partition_invariant() {
    let base = Cube::from_array(test_data(), Unit::new("K"));
    let partitions: [&[ChunkSpec]; 3] = [
        &[ChunkSpec::Len(1), ChunkSpec::Len(2), ChunkSpec::Len(3)],
        &[ChunkSpec::Len(4), ChunkSpec::Len(1), ChunkSpec::Len(1)],
        &[ChunkSpec::Len(3), ChunkSpec::Len(3), ChunkSpec::Auto],
    ];

    let reference = base.statistics().expect("single-block statistics");
    for spec in partitions {
        let stats = base
            .rechunk(spec)
            .expect("valid chunk spec")
            .statistics()
            .expect("statistics");
        assert_eq!(stats.npts, reference.npts);
        assert_close(stats.mean.value, reference.mean.value);
        assert_close(stats.sigma.value, reference.sigma.value);
        assert_close(stats.sum.value, reference.sum.value);
        assert_close(stats.sumsq.value, reference.sumsq.value);
        assert_close(stats.min.value, reference.min.value);
        assert_close(stats.max.value, reference.max.value);
        assert_close(stats.rms.value, reference.rms.value);
    }
}

#[test]
fn test_partial_combinator_properties() {
    let a = BlockPartial::from_block(&ArrayD::from_shape_vec(vec![3], vec![1.0, 2.0, 3.0]).unwrap());
    let b = BlockPartial::from_block(&ArrayD::from_shape_vec(vec![2], vec![-1.0, 7.5]).unwrap());
    let c = BlockPartial::from_block(&ArrayD::from_shape_vec(vec![1], vec![0.25]).unwrap());

    // Commutative.
    assert_eq!(a.combine(b), b.combine(a));
    // Associative.
    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
    // Empty is the identity.
    assert_eq!(a.combine(BlockPartial::empty()), a);
}

#[test]
fn test_statistics_empty_cube_is_nan() {
    let data = ArrayD::from_shape_vec(vec![2, 2], vec![f64::NAN; 4]).unwrap();
    let stats = Cube::from_array(data, Unit::new("K"))
        .statistics()
        .expect("statistics");
    assert_eq!(stats.npts, 0);
    assert!(stats.mean.value.is_nan());
    assert!(stats.min.value.is_nan());
    assert!(stats.max.value.is_nan());
}

#[test]
fn test_apply_function_parallel_spectral_noncube() {
    // A spectral reduction returning a bare lazy array rather than a cube:
    // the output drops the spectral axis entirely.
    let cube = Cube::from_array(test_data(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Auto, ChunkSpec::Len(1), ChunkSpec::Len(2)])
        .expect("valid chunk spec");

    let sum_blocks_spectral =
        SpectralFunction::per_block(|block: ArrayD<f64>| block.sum_axis(Axis(0)));

    // Each output block loses the spectral axis, so its chunk shape must be
    // declared up front.
    let options = ParallelApplyOptions::default()
        .drop_axis(&[0])
        .output_chunks(&[1, 2]);
    let result = cube
        .apply_function_parallel_spectral_raw(sum_blocks_spectral, &options)
        .expect("valid apply declaration");

    // The total shape is the cube shape without the spectral axis.
    assert_eq!(result.shape(), &cube.shape()[1..]);

    let computed = dispatch::compute(&result, cube.scheduler_context())
        .expect("materialize applied array");
    let expected = test_data().sum_axis(Axis(0));
    for (a, b) in computed.iter().zip(expected.iter()) {
        assert_close(*a, *b);
    }
}

#[test]
fn test_apply_per_element_returns_cube() {
    let cube = Cube::from_array(test_data(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Len(2), ChunkSpec::Len(2), ChunkSpec::Auto])
        .expect("valid chunk spec");

    let doubled = cube
        .apply_function_parallel_spectral(
            SpectralFunction::per_element(|v| v * 2.0),
            &ParallelApplyOptions::default(),
        )
        .expect("valid apply declaration");

    assert_eq!(doubled.shape(), cube.shape());
    assert_eq!(doubled.unit(), cube.unit());

    let computed = doubled.compute().expect("materialize");
    for (a, b) in computed.iter().zip(test_data().iter()) {
        assert_close(*a, b * 2.0);
    }
}

#[test]
fn test_apply_requires_output_chunks_when_dropping() {
    let cube = Cube::from_array(test_data(), Unit::new("K"));
    let result = cube.apply_function_parallel_spectral_raw(
        SpectralFunction::per_block(|block: ArrayD<f64>| block.sum_axis(Axis(0))),
        &ParallelApplyOptions::default().drop_axis(&[0]),
    );
    match result {
        Err(RuCubeError::GeometryError(msg)) => {
            assert!(msg.contains("output chunk shape must be declared"));
        }
        _ => panic!("Expected GeometryError"),
    }
}

#[test]
fn test_apply_inconsistent_output_chunks_fails_at_materialization() {
    let cube = Cube::from_array(test_data(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Auto, ChunkSpec::Len(1), ChunkSpec::Len(2)])
        .expect("valid chunk spec");

    // The declaration promises axis 0 is dropped, but the function keeps it.
    let result = cube
        .apply_function_parallel_spectral_raw(
            SpectralFunction::per_block(|block: ArrayD<f64>| block),
            &ParallelApplyOptions::default()
                .drop_axis(&[0])
                .output_chunks(&[1, 2]),
        )
        .expect("declaration errors are deferred");

    // Building the graph succeeded; the mismatch surfaces only now.
    let materialized = dispatch::compute(&result, cube.scheduler_context());
    match materialized {
        Err(RuCubeError::BlockShapeMismatch { expected, actual }) => {
            assert_eq!(expected, vec![1, 2]);
            assert_eq!(actual, vec![4, 1, 2]);
        }
        _ => panic!("Expected BlockShapeMismatch error"),
    }
}

#[test]
fn test_threaded_and_process_strategies_agree() {
    let cube = Cube::from_array(test_data(), Unit::new("K"))
        .rechunk(&[ChunkSpec::Len(1), ChunkSpec::Len(1), ChunkSpec::Len(1)])
        .expect("valid chunk spec");

    let synchronous = cube.compute().expect("synchronous materialization");

    let threaded = {
        let _scope = cube.use_scheduler(SchedulerSpec::threads());
        cube.compute().expect("threaded materialization")
    };
    assert_eq!(threaded, synchronous);

    let pooled = {
        let _scope = cube.use_scheduler(SchedulerSpec::processes(2));
        cube.compute().expect("pooled materialization")
    };
    assert_eq!(pooled, synchronous);
}

#[test]
fn test_quantity_unit_algebra() {
    let k = Unit::new("K");
    let temp = Quantity::new(2.0, k.clone());

    // Squared units are representable and sqrt returns to the base unit.
    let squared = temp.multiply(&temp).expect("same symbol");
    assert_eq!(squared.unit, k.squared());
    assert_close(squared.value, 4.0);
    let back = squared.sqrt().expect("even power");
    assert_eq!(back.unit, k);

    // Odd powers have no square root.
    assert!(temp.sqrt().is_err());

    // Mismatched units refuse to add or compare.
    let jy = Quantity::new(1.0, Unit::new("Jy"));
    assert!(temp.add(&jy).is_err());
    assert!(temp.compare(&jy).is_err());
    assert!(temp
        .compare(&Quantity::new(3.0, k.clone()))
        .expect("same unit")
        .is_some());

    // Dimensionless factors pass through.
    let scaled = temp
        .multiply(&Quantity::dimensionless(3.0))
        .expect("dimensionless factor");
    assert_eq!(scaled.unit, k);
    assert_close(scaled.value, 6.0);

    assert_eq!(format!("{}", squared.unit), "K^2");
    assert_eq!(format!("{}", temp), "2 K");
}

#[test]
fn test_lazy_array_names_track_origin() {
    let array = LazyArray::from_array(test_data());
    assert!(array.name().starts_with("array-"));

    let rechunked = array
        .rechunk(&[ChunkSpec::Len(1), ChunkSpec::Auto, ChunkSpec::Auto])
        .expect("valid chunk spec");
    assert!(rechunked.name().starts_with("rechunk-"));
}
