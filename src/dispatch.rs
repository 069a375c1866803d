//! Compute dispatcher: the single path that resolves laziness
//!
//! Every materialization request (concrete values, block-wise reductions,
//! spills into a store) passes through [`compute`], which merges the
//! scheduler context's current strategy and options into the call. No other
//! component invokes the engine's materialization primitives directly.
//! Failures inside the engine or inside user block functions propagate
//! unmodified; this layer does not retry, translate, or log.

use crate::chunked::{LazyArray, StoreWriter};
use crate::errors::Result;
use crate::scheduler::{SchedulerContext, SchedulerSpec};
use ndarray::ArrayD;

/// A deferred computation that can be resolved under a scheduler spec.
pub trait Materialize {
    type Output;

    /// Resolve the deferred computation. The spec carries the strategy and
    /// the opaque options map selected by the scheduler context.
    fn materialize(&self, spec: &SchedulerSpec) -> Result<Self::Output>;
}

impl Materialize for LazyArray {
    type Output = ArrayD<f64>;

    fn materialize(&self, spec: &SchedulerSpec) -> Result<ArrayD<f64>> {
        self.materialize_with(spec)
    }
}

/// A lazy array paired with the store it should materialize into.
pub struct StoreSink<'a> {
    pub array: &'a LazyArray,
    pub writer: &'a StoreWriter,
}

impl Materialize for StoreSink<'_> {
    type Output = ();

    fn materialize(&self, spec: &SchedulerSpec) -> Result<()> {
        self.array.store_with(spec, self.writer)
    }
}

/// Resolve a deferred computation under the context's current scheduler.
///
/// This is the choke point: it reads [`SchedulerContext::current`] and
/// forwards the merged strategy/options to the target's materialization.
///
/// # Errors
///
/// Propagates whatever the target raises, untranslated.
pub fn compute<M: Materialize>(target: &M, context: &SchedulerContext) -> Result<M::Output> {
    target.materialize(&context.current())
}
