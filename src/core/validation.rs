use crate::core::sync_impl::processor::{Composition, Processor};
use crate::core::value::Value;
use crate::memo::fingerprint;

/// Represents an issue found while validating a composition.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// A hard error: invoking the composition is guaranteed to fail.
    Error(String),
    /// A warning: the composition runs, but probably not as intended.
    Warning(String),
}

/// The result of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn log_summary(&self) {
        if self.is_safe() && !self.has_warnings() {
            log::info!("Validation passed: every slot is resolved and every cached step is hashable.");
            return;
        }

        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("Validation error: {}", msg),
                ValidationIssue::Warning(msg) => log::warn!("Validation warning: {}", msg),
            }
        }
    }
}

/// Walks the composition rooted at `processor` without invoking anything.
///
/// Errors: mandatory slots without a value, and parameters that cannot be
/// fingerprinted on a processor that has a cache attached.
/// Warnings: composites without children, and `is_output` on the last step
/// of a sequence (its result is the sequence's result anyway).
pub fn validate(processor: &Processor) -> ValidationResult {
    let mut result = ValidationResult::new();
    visit(processor, processor.short_name().to_string(), false, &mut result);
    result
}

fn visit(processor: &Processor, path: String, terminal: bool, result: &mut ValidationResult) {
    for slot in processor.params().unresolved() {
        result.add_error(format!("{}: mandatory slot `{}` has no value", path, slot));
    }

    if processor.cache().is_some() {
        if let Err(err) = fingerprint(processor, &Value::Null) {
            result.add_error(format!("{}: cached, but {}", path, err));
        }
    }

    if terminal && processor.is_output() {
        result.add_warning(format!(
            "{}: `is_output` on the last step of a sequence has no effect",
            path
        ));
    }

    let composition = processor.composition();
    let children = processor.children();
    if composition != Composition::Leaf && children.is_empty() {
        result.add_warning(format!("{}: composite has no children", path));
    }

    let last = children.len().saturating_sub(1);
    for (index, child) in children.into_iter().enumerate() {
        let child_path = format!("{}/{}[{}]", path, child.short_name(), index);
        let terminal = composition == Composition::Sequence && index == last;
        visit(child, child_path, terminal, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync_impl::flow::{new_parallel, new_sequential};
    use crate::core::sync_impl::function::new_function_processor;
    use crate::core::error::FlowError;
    use crate::core::slot::{Args, DataType, Param, ProcessorClass};
    use crate::core::sync_impl::processor::{PROCESSOR, ProcessorLogic};
    use crate::core::sync_impl::shaper::ShaperLogic;
    use crate::core::value::Transform;
    use crate::memo::MemoryCache;
    use std::sync::{Arc, LazyLock};

    #[test]
    fn test_clean_composition_passes() {
        let flow = new_sequential([Transform::identity(), Transform::identity()]);
        let result = validate(&flow);
        assert!(result.is_safe());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_unresolved_slot_is_an_error() {
        let shaper = Processor::new(ShaperLogic, Args::new()).unwrap();
        let result = validate(&new_sequential([shaper]));
        assert!(!result.is_safe());
    }

    static TAGGED: LazyLock<ProcessorClass> = LazyLock::new(|| {
        ProcessorClass::builder("validation::Tagged")
            .extends(&PROCESSOR)
            .param(Param::new("tag", DataType::Any).default(Value::Null))
            .build()
    });

    #[derive(Clone)]
    struct TaggedLogic;

    impl ProcessorLogic for TaggedLogic {
        fn class(&self) -> &'static ProcessorClass {
            &TAGGED
        }

        fn function(&self, _processor: &Processor, input: Value) -> Result<Value, FlowError> {
            Ok(input)
        }

        fn clone_box(&self) -> Box<dyn ProcessorLogic> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_opaque_param_on_cached_processor_is_an_error() {
        let step = Processor::new(TaggedLogic, Args::new().kw("tag", Value::opaque(7u8))).unwrap();
        assert!(validate(&step).is_safe());

        let cached = step.with_cache(Arc::new(MemoryCache::new()));
        let result = validate(&cached);
        assert!(!result.is_safe());
        assert!(matches!(&result.issues[0], ValidationIssue::Error(msg) if msg.contains("param `tag`")));
    }

    #[test]
    fn test_warnings() {
        let flow = new_sequential([
            new_function_processor(Transform::identity()),
            new_function_processor(Transform::identity()).output(),
        ]);
        assert!(validate(&flow).has_warnings());

        let empty = new_parallel(Vec::<Transform>::new(), true);
        let result = validate(&empty);
        assert!(result.is_safe());
        assert!(result.has_warnings());
    }
}
