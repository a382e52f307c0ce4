//! A complete example showing how to declare, rewire and cache a pipeline with relaymemo.
//!
//! This example demonstrates:
//! - Declaring a processor type with typed, defaulted parameters
//! - Declaring a pipeline whose tasks can be swapped per instance
//! - Fanning a value out over parallel branches and flagging outputs
//! - Attaching a cache so repeated runs are served without recomputation

use relaymemo::prelude::*;
use relaymemo::CacheOutcome;
use std::sync::{Arc, LazyLock};

// ============================================================================
// Step 1: A custom processor
// ============================================================================

/// Rescales a number into a range: `(x - low) / (high - low)`.
static RESCALE: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("demo::Rescale")
        .extends(&PROCESSOR)
        .param(Param::new("low", DataType::Float).default(0.0).positional())
        .param(Param::new("high", DataType::Float).default(1.0).positional())
        .build()
});

#[derive(Clone)]
struct RescaleLogic;

impl ProcessorLogic for RescaleLogic {
    fn class(&self) -> &'static ProcessorClass {
        &RESCALE
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        let low: f64 = processor.param("low")?;
        let high: f64 = processor.param("high")?;
        let x = input
            .as_f64()
            .ok_or_else(|| FlowError::from_transform("rescale expects a number".into()))?;
        println!("[Rescale] {} into [{}, {}]", x, low, high);
        Ok(Value::Float((x - low) / (high - low)))
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Step 2: Plain functions as steps
// ============================================================================

fn total(input: Value) -> Result<Value, BoxError> {
    let items = input.as_tuple().ok_or("total expects a tuple")?;
    let sum: f64 = items.iter().filter_map(Value::as_f64).sum();
    println!("[total] {} values sum to {}", items.len(), sum);
    Ok(Value::Float(sum))
}

fn mean(input: Value) -> Result<Value, BoxError> {
    let items = input.as_tuple().ok_or("mean expects a tuple")?;
    let sum: f64 = items.iter().filter_map(Value::as_f64).sum();
    println!("[mean] over {} values", items.len());
    Ok(Value::Float(sum / items.len().max(1) as f64))
}

fn maximum(input: Value) -> Result<Value, BoxError> {
    let items = input.as_tuple().ok_or("maximum expects a tuple")?;
    let max = items
        .iter()
        .filter_map(Value::as_f64)
        .fold(f64::NEG_INFINITY, f64::max);
    println!("[maximum] over {} values", items.len());
    Ok(Value::Float(max))
}

// ============================================================================
// Step 3: A pipeline type with swappable tasks
// ============================================================================

static SUMMARIZE: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("demo::Summarize")
        .extends(&PIPELINE)
        .task(Task::new("reduce", &PROCESSOR).default(relaymemo::transform!(total)))
        .task(Task::new("rescale", &RESCALE).default(
            Processor::new(RescaleLogic, Args::new().arg(0).arg(100))
                .unwrap_or_else(|err| panic!("invalid default: {}", err)),
        ))
        .build()
});

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== relaymemo Basic Pipeline Example ===\n");

    let readings = Value::tuple([Value::Float(12.0), Value::Float(30.0), Value::Float(18.0)]);

    // --- Example 1: Defaults ---
    println!("--- Example 1: Default tasks ---");
    let mut pipeline = Pipeline::new(&SUMMARIZE, Args::new())?;
    print!("{}", pipeline);
    println!("Result: {}\n", pipeline.invoke(readings.clone())?);

    // --- Example 2: Rebinding a task ---
    println!("--- Example 2: Swap `reduce` for `mean` ---");
    pipeline.set("reduce", relaymemo::transform!(mean))?;
    println!("Result: {}\n", pipeline.invoke(readings.clone())?);

    // Tasks keep their constraint: `rescale` only accepts a Rescale.
    if let Err(err) = pipeline.set("rescale", relaymemo::transform!(maximum)) {
        println!("Rejected rebinding: {}\n", err);
    }

    // --- Example 3: Fan out and collect flagged outputs ---
    println!("--- Example 3: Parallel statistics ---");
    let stats = new_parallel(
        [
            new_function_processor(relaymemo::transform!(mean)).output(),
            new_function_processor(relaymemo::transform!(maximum)).output(),
        ],
        true,
    );
    let flow = new_sequential([TaskDefault::from(stats), TaskDefault::from(pipeline)]);
    println!("Result: {}\n", flow.invoke(readings.clone())?);

    // --- Example 4: Memoization ---
    println!("--- Example 4: Cached runs ---");
    let telemetry = Arc::new(MemoryTelemetry::new());
    let cached = flow
        .with_cache(Arc::new(MemoryCache::new()))
        .with_telemetry(telemetry.clone());

    println!("First run:");
    cached.invoke(readings.clone())?;
    println!("Second run (no step output expected):");
    let result = cached.invoke(readings)?;
    println!(
        "Result: {} ({} misses, {} hits)",
        result,
        telemetry.count(CacheOutcome::Miss),
        telemetry.count(CacheOutcome::Hit)
    );

    println!("\n=== Pipeline completed successfully! ===");
    Ok(())
}
