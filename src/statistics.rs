//! Global cube statistics from per-block partial reductions
//!
//! Statistics over a chunked cube are computed in two stages: every block
//! reduces independently to the five reducible quantities (count, sum, sum
//! of squares, min, max), and the per-block partials combine associatively
//! and commutatively into one global record, so blocks may be reduced in
//! any order, on any worker. Mean, sigma and RMS are derived from the
//! combined record afterwards, never reduced directly. Non-finite entries
//! (the mask convention) are excluded from every quantity, including the
//! point count.

use crate::chunked::{BlockOutput, LazyArray};
use crate::dispatch::{self, Materialize};
use crate::errors::{Result, RuCubeError};
use crate::scheduler::{SchedulerContext, SchedulerSpec};
use crate::units::{Quantity, Unit};
use ndarray::ArrayD;
use std::sync::Arc;

/// The reducible quantities of one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockPartial {
    pub count: u64,
    pub sum: f64,
    pub sumsq: f64,
    pub min: f64,
    pub max: f64,
}

impl BlockPartial {
    /// The identity of the combinator: zero counts, empty extrema.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sumsq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Reduce one block, skipping non-finite entries.
    #[must_use]
    pub fn from_block(block: &ArrayD<f64>) -> Self {
        let mut partial = Self::empty();
        for &v in block.iter() {
            if v.is_finite() {
                partial.count += 1;
                partial.sum += v;
                partial.sumsq += v * v;
                partial.min = partial.min.min(v);
                partial.max = partial.max.max(v);
            }
        }
        partial
    }

    /// Combine two partials. Associative and commutative, so the block
    /// partition and reduction order never affect the result.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sumsq: self.sumsq + other.sumsq,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Pack into a block output so partials ride the block-job pipeline.
    #[must_use]
    pub fn encode(&self) -> ArrayD<f64> {
        ArrayD::from_shape_vec(
            vec![5],
            vec![self.count as f64, self.sum, self.sumsq, self.min, self.max],
        )
        .expect("five-element partial")
    }

    /// Unpack a block output produced by [`BlockPartial::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the block does not hold exactly five values.
    pub fn decode(data: &ArrayD<f64>) -> Result<Self> {
        let values: Vec<f64> = data.iter().copied().collect();
        match values.as_slice() {
            [count, sum, sumsq, min, max] => Ok(Self {
                count: *count as u64,
                sum: *sum,
                sumsq: *sumsq,
                min: *min,
                max: *max,
            }),
            _ => Err(RuCubeError::Generic(format!(
                "expected a five-element partial, got {} values",
                values.len()
            ))),
        }
    }
}

/// The lazy reduction over one array: built without evaluation, resolved
/// exactly once through the compute dispatcher.
pub struct StatsReduction<'a> {
    pub array: &'a LazyArray,
}

impl Materialize for StatsReduction<'_> {
    type Output = BlockPartial;

    fn materialize(&self, spec: &SchedulerSpec) -> Result<BlockPartial> {
        let outputs = self
            .array
            .map_reduce_with(spec, Arc::new(|block| BlockPartial::from_block(&block).encode()))?;
        outputs
            .iter()
            .map(|BlockOutput { data, .. }| BlockPartial::decode(data))
            .try_fold(BlockPartial::empty(), |acc, partial| {
                Ok(acc.combine(partial?))
            })
    }
}

/// Global statistics of a cube, carrying its physical unit.
#[derive(Debug, Clone)]
pub struct CubeStatistics {
    /// Number of valid (finite) points; a plain count.
    pub npts: u64,
    pub mean: Quantity,
    pub sigma: Quantity,
    pub sum: Quantity,
    pub sumsq: Quantity,
    pub min: Quantity,
    pub max: Quantity,
    pub rms: Quantity,
}

impl CubeStatistics {
    /// Derive the full record from a combined partial.
    ///
    /// Sigma uses the population formula with a guard against negative
    /// rounding residue before the square root. An empty cube yields NaN
    /// quantities rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the unit algebra fails, which cannot happen
    /// for a plain base unit.
    pub fn from_partial(partial: &BlockPartial, unit: &Unit) -> Result<Self> {
        let n = partial.count as f64;
        let (mean, variance, msq, min, max) = if partial.count == 0 {
            (f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN)
        } else {
            let mean = partial.sum / n;
            let msq = partial.sumsq / n;
            (mean, (msq - mean * mean).max(0.0), msq, partial.min, partial.max)
        };

        let sigma = Quantity::new(variance, unit.squared()).sqrt()?;
        let rms = Quantity::new(msq, unit.squared()).sqrt()?;

        Ok(Self {
            npts: partial.count,
            mean: Quantity::new(mean, unit.clone()),
            sigma,
            sum: Quantity::new(if partial.count == 0 { f64::NAN } else { partial.sum }, unit.clone()),
            sumsq: Quantity::new(
                if partial.count == 0 { f64::NAN } else { partial.sumsq },
                unit.squared(),
            ),
            min: Quantity::new(min, unit.clone()),
            max: Quantity::new(max, unit.clone()),
            rms,
        })
    }

    /// Print the record in a readable block.
    pub fn print_summary(&self) {
        println!("\n Cube Statistics");
        println!("================================");
        println!("   Points: {}", self.npts);
        println!("   Mean:   {}", self.mean);
        println!("   Sigma:  {}", self.sigma);
        println!("   Sum:    {}", self.sum);
        println!("   Sumsq:  {}", self.sumsq);
        println!("   Min:    {}", self.min);
        println!("   Max:    {}", self.max);
        println!("   RMS:    {}", self.rms);
    }
}

/// Compute the global statistics of a lazy array under the context's
/// current scheduler. Triggers exactly one materialization.
///
/// # Errors
///
/// Propagates block evaluation errors from the engine.
pub fn compute_statistics(
    array: &LazyArray,
    unit: &Unit,
    context: &SchedulerContext,
) -> Result<CubeStatistics> {
    let partial = dispatch::compute(&StatsReduction { array }, context)?;
    CubeStatistics::from_partial(&partial, unit)
}
