//! Synchronous implementation of the processor model.
//!
//! This module contains all types and traits for building and invoking
//! processing steps:
//! - [`Processor`](processor::Processor) and [`ProcessorLogic`](processor::ProcessorLogic) for individual steps
//! - [`FunctionLogic`](function::FunctionLogic) for adapting plain transforms
//! - [`Pipeline`](pipeline::Pipeline) for task-based sequences
//! - [`new_sequential`](flow::new_sequential) and [`new_parallel`](flow::new_parallel) for flow trees
//! - [`ShaperLogic`](shaper::ShaperLogic) for regrouping tuple elements

pub mod flow;
pub mod function;
pub mod pipeline;
pub mod processor;
pub mod shaper;

use std::any::Any;

/// A helper trait that just provides the `as_any` method.
/// Needed for downcasting a `ProcessorLogic` back to its concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
