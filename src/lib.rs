//! # relaymemo
//!
//! Declarative, swappable processing pipelines with content-addressed
//! memoization of every step.
//!
//! ## Features
//!
//! - **Typed Slots**: Processors declare named, typed, defaultable parameters once per type
//! - **Swappable Tasks**: Pipelines bind each task to any processor satisfying its constraint
//! - **Flow Trees**: Sequential and Parallel composites with flag-driven output accumulation
//! - **Exact Memoization**: Attach a cache and identical configuration + input is computed once
//!
//! ## Quick Start
//!
//! ```rust
//! use relaymemo::prelude::*;
//! use std::sync::Arc;
//!
//! fn increment(x: Value) -> Result<Value, BoxError> {
//!     Ok(Value::Int(x.as_i64().ok_or("expected an int")? + 1))
//! }
//!
//! fn times_ten(x: Value) -> Result<Value, BoxError> {
//!     Ok(Value::Int(x.as_i64().ok_or("expected an int")? * 10))
//! }
//!
//! let flow = new_sequential([
//!     new_function_processor(relaymemo::transform!(increment)).output(),
//!     new_function_processor(relaymemo::transform!(times_ten)),
//! ])
//! .with_cache(Arc::new(MemoryCache::new()));
//!
//! let result = flow.invoke(Value::Int(5)).unwrap();
//! assert_eq!(result, Value::tuple([Value::Int(6), Value::Int(60)]));
//! ```
//!
//! ## Module Organization
//!
//! - [`memo`]: Fingerprinting and cache backends
//! - [`prelude`]: Commonly used types and traits (import with `use relaymemo::prelude::*`)

// ============================================================================
// Core Module
// ============================================================================

mod core;

pub mod memo;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Values and errors
pub use crate::core::error::{
    BoxError, CacheError, ConfigurationError, FlowError, StructuralError, UnhashableValueError,
};
pub use crate::core::value::{DType, FromValue, NdArray, Opaque, Transform, Value};

// Slot registry
pub use crate::core::slot::{
    Args, ClassBuilder, DataType, Param, Params, ProcessorClass, SlotKind, SlotSpec, Task,
};

// Processors and compositions
pub use crate::core::sync_impl::AsAny;
pub use crate::core::sync_impl::flow::{
    FlowNode, GROUP_PROCESSOR, OutputShape, PARALLEL, ParallelLogic, SEQUENTIAL, SequentialLogic,
    new_named_parallel, new_parallel, new_sequential,
};
pub use crate::core::sync_impl::function::{
    FUNCTION_PROCESSOR, FunctionLogic, TaskDefault, ensure_processor, new_bound_function_processor,
    new_function_processor,
};
pub use crate::core::sync_impl::pipeline::{PIPELINE, Pipeline, PipelineLogic};
pub use crate::core::sync_impl::processor::{
    Composition, PROCESSOR, Processor, ProcessorCore, ProcessorLogic,
};
pub use crate::core::sync_impl::shaper::{SHAPER, ShaperLogic, new_shaper};

// Telemetry and validation
pub use crate::core::telemetry::{CacheOutcome, MemoryTelemetry, Telemetry, TraceEntry};
pub use crate::core::validation::{ValidationIssue, ValidationResult, validate};

// Memoization
pub use crate::memo::{CacheBackend, CacheKey, FileCache, MemoryCache};

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// The main prelude: imports everything needed to declare, compose and
/// cache processors.
///
/// # Example
/// ```rust
/// use relaymemo::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Slots
        Args,
        // Values & errors
        BoxError,
        CacheBackend,
        CacheKey,
        ConfigurationError,
        DataType,
        FileCache,
        FlowError,
        FlowNode,
        MemoryCache,
        MemoryTelemetry,
        NdArray,
        OutputShape,
        // Processors
        PARALLEL,
        PIPELINE,
        PROCESSOR,
        Param,
        Pipeline,
        Processor,
        ProcessorClass,
        ProcessorLogic,
        SEQUENTIAL,
        StructuralError,
        Task,
        Telemetry,
        TaskDefault,
        Transform,
        Value,
        new_bound_function_processor,
        new_function_processor,
        new_named_parallel,
        new_parallel,
        new_sequential,
        new_shaper,
        validate,
    };
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
