use crate::core::error::{CacheError, ConfigurationError, FlowError, UnhashableValueError};
use crate::core::slot::{Args, DataType, Param, Params, ProcessorClass};
use crate::core::sync_impl::AsAny;
use crate::core::telemetry::{CacheOutcome, Telemetry, TraceEntry};
use crate::core::value::{FromValue, Value};
use crate::memo::{CacheBackend, CacheKey, fingerprint};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

/// Root of every processor class: the two flags every step carries.
pub static PROCESSOR: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::Processor")
        .param(Param::new("is_output", DataType::Bool).default(false))
        .param(Param::new("is_checkpoint", DataType::Bool).default(false))
        .build()
});

/// How a processor combines its children, if it has any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    Leaf,
    /// Children run one after another, each consuming the previous output.
    Sequence,
    /// Every child receives its own share of the input.
    Fanout,
}

/// A configurable, callable unit of computation.
pub struct Processor {
    /// Resolved parameters and attached collaborators
    pub data: ProcessorCore,
    /// The logic implementation that defines what the processor computes
    pub behaviour: Box<dyn ProcessorLogic>,
}

impl Clone for Processor {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            behaviour: self.behaviour.clone_box(),
        }
    }
}

impl Processor {
    /// Creates a processor by resolving `args` against the logic's class.
    pub fn new<L: ProcessorLogic>(behaviour: L, args: Args) -> Result<Self, ConfigurationError> {
        let class = behaviour.class();
        if !class.is_subclass_of(&PROCESSOR) {
            return Err(ConfigurationError::NotASubclass {
                expected: PROCESSOR.name().to_string(),
                actual: class.name().to_string(),
            });
        }
        let params = class.resolve(args)?;
        Ok(Self::from_parts(Box::new(behaviour), params))
    }

    pub(crate) fn from_parts(behaviour: Box<dyn ProcessorLogic>, params: Params) -> Self {
        Processor {
            data: ProcessorCore {
                params,
                cache: None,
                telemetry: None,
                checkpoint: Mutex::new(None),
            },
            behaviour,
        }
    }

    pub fn class(&self) -> &'static ProcessorClass {
        self.data.params.class()
    }

    /// The class name without its module path.
    pub fn short_name(&self) -> &'static str {
        let name = self.class().name();
        name.rsplit("::").next().unwrap_or(name)
    }

    /// The concrete logic, if it is an `L`.
    pub fn logic<L: ProcessorLogic>(&self) -> Option<&L> {
        // Go through the trait object, not the Box, so the downcast sees `L`.
        let behaviour: &dyn ProcessorLogic = &*self.behaviour;
        behaviour.as_any().downcast_ref::<L>()
    }

    pub fn params(&self) -> &Params {
        &self.data.params
    }

    /// Typed read of a slot value.
    pub fn param<T: FromValue>(&self, name: &str) -> Result<T, ConfigurationError> {
        self.data.params.get_as(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.params.get(name)
    }

    /// Reassigns a slot. The value is re-validated against the slot's
    /// datatype and the previous value is kept if it is rejected.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConfigurationError> {
        self.data.params.set(name, value)
    }

    pub fn reset(&mut self, name: &str) -> Result<(), ConfigurationError> {
        self.data.params.reset(name)
    }

    /// All slot values as an ordered record.
    pub fn param_values(&self) -> Value {
        self.data.params.to_record()
    }

    pub fn is_output(&self) -> bool {
        self.param("is_output").unwrap_or(false)
    }

    pub fn is_checkpoint(&self) -> bool {
        self.param("is_checkpoint").unwrap_or(false)
    }

    /// Flags this processor's result for the assembled output.
    pub fn output(mut self) -> Self {
        self.data.params.put("is_output", Value::Bool(true));
        self
    }

    /// Makes this processor keep a copy of its last output.
    pub fn checkpoint(mut self) -> Self {
        self.data.params.put("is_checkpoint", Value::Bool(true));
        self
    }

    /// Attaches a cache to this processor and to every processor nested in
    /// its slots.
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.attach_cache(&cache);
        self
    }

    pub fn attach_cache(&mut self, cache: &Arc<dyn CacheBackend>) {
        self.data.cache = Some(Arc::clone(cache));
        self.for_each_nested(&mut |nested| nested.attach_cache(cache));
    }

    pub fn detach_cache(&mut self) {
        self.data.cache = None;
        self.for_each_nested(&mut |nested| nested.detach_cache());
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.data.cache.as_ref()
    }

    /// Attaches a telemetry sink to this processor and everything nested in it.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.attach_telemetry(&telemetry);
        self
    }

    pub fn attach_telemetry(&mut self, telemetry: &Arc<dyn Telemetry>) {
        self.data.telemetry = Some(Arc::clone(telemetry));
        self.for_each_nested(&mut |nested| nested.attach_telemetry(telemetry));
    }

    fn for_each_nested(&mut self, visit: &mut dyn FnMut(&mut Processor)) {
        fn walk(value: &mut Value, visit: &mut dyn FnMut(&mut Processor)) {
            match value {
                Value::Processor(processor) => visit(&mut **processor),
                Value::Tuple(items) => {
                    for item in items.iter_mut() {
                        walk(item, &mut *visit);
                    }
                }
                Value::Record(entries) => {
                    for item in entries.values_mut() {
                        walk(item, &mut *visit);
                    }
                }
                Value::Map(entries) => {
                    for item in entries.values_mut() {
                        walk(item, &mut *visit);
                    }
                }
                _ => {}
            }
        }
        let names: Vec<String> = self.class().slots().iter().map(|s| s.name().to_string()).collect();
        for name in names {
            if let Some(value) = self.data.params.get_mut(&name) {
                walk(value, &mut *visit);
            }
        }
    }

    /// Direct children in composition order; empty for leaves.
    pub fn children(&self) -> Vec<&Processor> {
        self.behaviour.children(self)
    }

    pub fn composition(&self) -> Composition {
        self.behaviour.composition()
    }

    /// The fingerprint `invoke(input)` would be cached under.
    pub fn cache_key(&self, input: &Value) -> Result<CacheKey, UnhashableValueError> {
        fingerprint(self, input)
    }

    /// Drops the cached result for `input`. Returns whether a record existed.
    pub fn invalidate(&self, input: &Value) -> Result<bool, FlowError> {
        match &self.data.cache {
            Some(cache) => {
                let key = fingerprint(self, input)?;
                Ok(cache.invalidate(&key)?)
            }
            None => Ok(false),
        }
    }

    /// The last output stored by a checkpoint processor.
    pub fn checkpoint_data(&self) -> Option<Value> {
        self.lock_checkpoint().clone()
    }

    pub fn clear_checkpoint(&self) {
        *self.lock_checkpoint() = None;
    }

    fn lock_checkpoint(&self) -> MutexGuard<'_, Option<Value>> {
        self.data.checkpoint.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs the processor on `input`.
    ///
    /// Fails with a configuration error while a mandatory slot is unresolved.
    /// With a cache attached the call goes through the memoization protocol:
    /// a hit returns the stored value without running the computation, a
    /// miss runs it and stores the result. Failed computations are never
    /// stored.
    pub fn invoke(&self, input: Value) -> Result<Value, FlowError> {
        self.data.params.ensure_complete()?;

        let output = match &self.data.cache {
            Some(cache) => self.invoke_memoized(cache.as_ref(), input)?,
            None => self.behaviour.function(self, input)?,
        };

        if self.is_checkpoint() {
            *self.lock_checkpoint() = Some(output.clone());
        }
        Ok(output)
    }

    fn invoke_memoized(&self, cache: &dyn CacheBackend, input: Value) -> Result<Value, FlowError> {
        let key = fingerprint(self, &input)?;

        if cache.exists(&key)? {
            match cache.read(&key) {
                Ok(value) => {
                    log::debug!("Cache hit for `{}` ({})", self.class().name(), key);
                    self.record(&key, CacheOutcome::Hit);
                    return Ok(value);
                }
                // Invalidated between `exists` and `read`.
                Err(CacheError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        log::debug!("Cache miss for `{}` ({})", self.class().name(), key);
        self.record(&key, CacheOutcome::Miss);
        let output = self.behaviour.function(self, input)?;
        cache.write(&key, &output)?;
        Ok(output)
    }

    fn record(&self, key: &CacheKey, outcome: CacheOutcome) {
        if let Some(telemetry) = &self.data.telemetry {
            telemetry.record(TraceEntry::new(self.class().name(), key, outcome));
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.short_name())?;
        let mut first = true;
        for (slot, value) in self.data.params.iter() {
            if matches!(slot.name(), "is_output" | "is_checkpoint") {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match value {
                Some(value) => write!(f, "{}={}", slot.name(), value)?,
                None => write!(f, "{}=<unset>", slot.name())?,
            }
        }
        write!(f, ")")?;
        if self.is_output() {
            write!(f, " -> output")?;
        }
        if self.is_checkpoint() {
            write!(f, " [checkpoint]")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("class", &self.class().name())
            .field("params", &self.data.params)
            .field("cached", &self.data.cache.is_some())
            .finish()
    }
}

/// Instance state of a processor.
pub struct ProcessorCore {
    /// Resolved slot values
    pub params: Params,
    /// Cache collaborator; not part of the fingerprint
    pub cache: Option<Arc<dyn CacheBackend>>,
    pub telemetry: Option<Arc<dyn Telemetry>>,
    checkpoint: Mutex<Option<Value>>,
}

impl Clone for ProcessorCore {
    fn clone(&self) -> Self {
        let checkpoint = self.checkpoint.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Self {
            params: self.params.clone(),
            cache: self.cache.clone(),
            telemetry: self.telemetry.clone(),
            checkpoint: Mutex::new(checkpoint),
        }
    }
}

/// Defines what a processor computes.
pub trait ProcessorLogic: AsAny + Send + Sync + 'static {
    /// The slot registry instances of this logic are resolved against.
    fn class(&self) -> &'static ProcessorClass;

    /// The computation itself. `processor` gives access to resolved params.
    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError>;

    fn composition(&self) -> Composition {
        Composition::Leaf
    }

    /// Children of a composite, in declaration order.
    fn children<'a>(&self, _processor: &'a Processor) -> Vec<&'a Processor> {
        Vec::new()
    }

    /// Create a boxed clone of this trait object.
    fn clone_box(&self) -> Box<dyn ProcessorLogic>;
}

impl Clone for Box<dyn ProcessorLogic> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
