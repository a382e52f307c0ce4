//! Integration tests for cached invocation: idempotence, key stability and
//! the file-backed store.

use relaymemo::prelude::*;
use relaymemo::CacheOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

fn counted(name: &'static str, counter: &Arc<AtomicUsize>, offset: i64) -> Transform {
    let counter = Arc::clone(counter);
    Transform::new(name, move |x: Value| -> Result<Value, BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(x.as_i64().ok_or("expected an int")? + offset))
    })
}

// ----------------------------------------------------------------------------
// A parameterised processor for key checks
// ----------------------------------------------------------------------------

static AFFINE: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("memoization::Affine")
        .extends(&PROCESSOR)
        .param(Param::new("slope", DataType::Float).default(1.0).positional())
        .param(Param::new("intercept", DataType::Float).default(0.0).positional())
        .build()
});

#[derive(Clone)]
struct AffineLogic;

impl ProcessorLogic for AffineLogic {
    fn class(&self) -> &'static ProcessorClass {
        &AFFINE
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        let slope: f64 = processor.param("slope")?;
        let intercept: f64 = processor.param("intercept")?;
        let x = input
            .as_f64()
            .ok_or_else(|| FlowError::from_transform("affine expects a number".into()))?;
        Ok(Value::Float(slope * x + intercept))
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

#[test]
fn test_second_invocation_is_served_from_cache() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(MemoryCache::new());
    let step = new_function_processor(counted("idempotent", &counter, 1)).with_cache(cache.clone());

    let first = step.invoke(Value::Int(41)).unwrap();
    let second = step.invoke(Value::Int(41)).unwrap();
    assert_eq!(first, Value::Int(42));
    assert_eq!(first, second);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);

    // A different input is a different record.
    step.invoke(Value::Int(1)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_equal_configurations_share_a_key() {
    let a = Processor::new(AffineLogic, Args::new().arg(2).arg(1)).unwrap();
    let b = Processor::new(AffineLogic, Args::new().kw("intercept", 1.0).kw("slope", 2.0)).unwrap();
    let input = Value::Float(3.0);
    assert_eq!(a.cache_key(&input).unwrap(), b.cache_key(&input).unwrap());

    // Repeated computation is stable.
    assert_eq!(a.cache_key(&input).unwrap(), a.cache_key(&input).unwrap());
}

#[test]
fn test_any_single_change_alters_the_key() {
    let base = Processor::new(AffineLogic, Args::new().arg(2).arg(1)).unwrap();
    let key = base.cache_key(&Value::Float(3.0)).unwrap();

    let mut slope = base.clone();
    slope.set("slope", 2.5).unwrap();
    assert_ne!(slope.cache_key(&Value::Float(3.0)).unwrap(), key);

    let mut intercept = base.clone();
    intercept.set("intercept", 0).unwrap();
    assert_ne!(intercept.cache_key(&Value::Float(3.0)).unwrap(), key);

    assert_ne!(base.cache_key(&Value::Float(3.5)).unwrap(), key);
    assert_ne!(base.cache_key(&Value::Int(3)).unwrap(), key);

    // Different class, same params.
    let identity = new_function_processor(Transform::identity());
    assert_ne!(identity.cache_key(&Value::Float(3.0)).unwrap(), key);
}

#[test]
fn test_collaborators_are_not_part_of_the_key() {
    let plain = Processor::new(AffineLogic, Args::new()).unwrap();
    let cached = plain
        .clone()
        .with_cache(Arc::new(MemoryCache::new()))
        .with_telemetry(Arc::new(MemoryTelemetry::new()));
    let input = Value::Float(1.0);
    assert_eq!(plain.cache_key(&input).unwrap(), cached.cache_key(&input).unwrap());
}

#[test]
fn test_transform_identity_is_its_name() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());

    let first = new_function_processor(counted("shared-name", &counter, 1)).with_cache(cache.clone());
    // Same name, different behaviour: the cache cannot tell them apart.
    let second = new_function_processor(counted("shared-name", &counter, 100)).with_cache(cache.clone());

    assert_eq!(first.invoke(Value::Int(0)).unwrap(), Value::Int(1));
    assert_eq!(second.invoke(Value::Int(0)).unwrap(), Value::Int(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_computation_is_not_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let flaky = Transform::new("flaky", move |x: Value| -> Result<Value, BoxError> {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("transient failure".into());
        }
        Ok(x)
    });
    let cache = Arc::new(MemoryCache::new());
    let step = new_function_processor(flaky).with_cache(cache.clone());

    let err = step.invoke(Value::Int(7)).unwrap_err();
    assert!(matches!(err, FlowError::Transform(_)));
    assert!(cache.is_empty());

    assert_eq!(step.invoke(Value::Int(7)).unwrap(), Value::Int(7));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_unhashable_input_fails_before_computing() {
    struct Handle;

    let counter = Arc::new(AtomicUsize::new(0));
    let step = new_function_processor(counted("never-run", &counter, 0))
        .with_cache(Arc::new(MemoryCache::new()));

    let err = step.invoke(Value::opaque(Handle)).unwrap_err();
    assert!(err.is_unhashable());
    assert!(err.to_string().starts_with("cannot fingerprint input"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // Without a cache nothing needs fingerprinting.
    let uncached = new_function_processor(Transform::identity());
    assert!(uncached.invoke(Value::opaque(Handle)).is_ok());
}

#[test]
fn test_cached_composite_keeps_flagged_outputs() {
    let counter = Arc::new(AtomicUsize::new(0));
    let telemetry = Arc::new(MemoryTelemetry::new());
    let flow = new_sequential([
        new_function_processor(counted("plus-one", &counter, 1)).output(),
        new_function_processor(counted("plus-two", &counter, 2)),
    ])
    .with_cache(Arc::new(MemoryCache::new()))
    .with_telemetry(telemetry.clone());

    let expected = Value::tuple([Value::Int(6), Value::Int(8)]);
    assert_eq!(flow.invoke(Value::Int(5)).unwrap(), expected);
    assert_eq!(telemetry.count(CacheOutcome::Miss), 3);
    assert_eq!(telemetry.count(CacheOutcome::Hit), 0);

    assert_eq!(flow.invoke(Value::Int(5)).unwrap(), expected);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(telemetry.count(CacheOutcome::Hit), 1);

    let traces = telemetry.get_traces();
    assert_eq!(traces.last().map(|t| t.class.as_str()), Some("relaymemo::Sequential"));
}

#[test]
fn test_children_are_reused_across_compositions() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let shared = new_function_processor(counted("expensive", &counter, 10));

    let alone = shared.clone().with_cache(cache.clone());
    alone.invoke(Value::Int(1)).unwrap();

    let composed = new_sequential([
        TaskDefault::from(shared),
        TaskDefault::from(Transform::identity()),
    ])
    .with_cache(cache.clone());
    assert_eq!(composed.invoke(Value::Int(1)).unwrap(), Value::Int(11));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_file_cache_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let build = || {
        Pipeline::new(
            &STORED,
            Args::new().task("step", counted("persisted", &counter, 3)),
        )
        .unwrap()
        .into_inner()
    };

    {
        let cache = Arc::new(FileCache::open(dir.path()).unwrap());
        let pipeline = build().with_cache(cache.clone());
        assert_eq!(pipeline.invoke(Value::Int(4)).unwrap(), Value::Int(7));
        // One record for the pipeline, one for its task.
        assert_eq!(cache.keys().unwrap().len(), 2);
    }

    let reopened = Arc::new(FileCache::open(dir.path()).unwrap());
    let pipeline = build().with_cache(reopened);
    assert_eq!(pipeline.invoke(Value::Int(4)).unwrap(), Value::Int(7));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert!(pipeline.invalidate(&Value::Int(4)).unwrap());
    assert!(!pipeline.invalidate(&Value::Int(4)).unwrap());
}

static STORED: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("memoization::Stored")
        .extends(&PIPELINE)
        .task(Task::new("step", &PROCESSOR))
        .build()
});

#[test]
fn test_file_cache_never_stores_unreadable_floats() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(FileCache::open(dir.path()).unwrap());
    let not_a_number = Transform::new("not-a-number", |_x: Value| -> Result<Value, BoxError> {
        Ok(Value::Float(f64::NAN))
    });
    let step = new_function_processor(not_a_number).with_cache(cache.clone());

    // The write is refused every time; nothing is left behind to read.
    for _ in 0..2 {
        let err = step.invoke(Value::Int(0)).unwrap_err();
        assert!(matches!(err, FlowError::Cache(_)));
        assert!(cache.keys().unwrap().is_empty());
    }
}
