use crate::core::error::{ConfigurationError, FlowError};
use crate::core::slot::{DataType, Param, ProcessorClass};
use crate::core::sync_impl::processor::{PROCESSOR, Processor, ProcessorLogic};
use crate::core::value::{Transform, Value};
use std::sync::LazyLock;

/// Adapter class turning a plain transform into a processor.
pub static FUNCTION_PROCESSOR: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::FunctionProcessor")
        .extends(&PROCESSOR)
        .param(
            Param::new("function", DataType::Transform)
                .default(Transform::identity())
                .positional(),
        )
        .param(Param::new("bind_method", DataType::Bool).default(false))
        .build()
});

/// Logic of a function processor: call the `function` slot.
#[derive(Clone)]
pub struct FunctionLogic;

impl ProcessorLogic for FunctionLogic {
    fn class(&self) -> &'static ProcessorClass {
        &FUNCTION_PROCESSOR
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        let transform: Transform = processor.param("function")?;
        let bind_method: bool = processor.param("bind_method")?;

        if bind_method != transform.is_bound() {
            let describe = |bound: bool| if bound { "bound transform" } else { "unbound transform" };
            return Err(ConfigurationError::TypeMismatch {
                owner: processor.class().name().to_string(),
                slot: "function".to_string(),
                expected: describe(bind_method).to_string(),
                actual: format!("{} `{}`", describe(transform.is_bound()), transform.name()),
            }
            .into());
        }

        transform.apply(processor, input).map_err(FlowError::from_transform)
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

fn function_processor(transform: Transform, bind_method: bool) -> Processor {
    let mut params = FUNCTION_PROCESSOR.defaults();
    params.put("bind_method", Value::Bool(bind_method));
    params.put("function", Value::Transform(transform));
    Processor::from_parts(Box::new(FunctionLogic), params)
}

/// Wraps an unbound transform: it receives only the input.
pub fn new_function_processor(transform: Transform) -> Processor {
    function_processor(transform, false)
}

/// Wraps a bound transform: it also receives the processor, and with it the
/// processor's resolved parameters.
pub fn new_bound_function_processor(transform: Transform) -> Processor {
    function_processor(transform, true)
}

/// A task binding before normalization: a processor or a bare transform.
#[derive(Debug, Clone)]
pub enum TaskDefault {
    Processor(Processor),
    Transform(Transform),
}

impl TaskDefault {
    pub fn into_value(self) -> Value {
        match self {
            TaskDefault::Processor(processor) => Value::from(processor),
            TaskDefault::Transform(transform) => Value::Transform(transform),
        }
    }
}

impl From<Processor> for TaskDefault {
    fn from(value: Processor) -> Self {
        TaskDefault::Processor(value)
    }
}

impl From<Transform> for TaskDefault {
    fn from(value: Transform) -> Self {
        TaskDefault::Transform(value)
    }
}

/// Normalizes a task binding into a processor; transforms become function
/// processors.
pub fn ensure_processor(task: TaskDefault) -> Processor {
    match task {
        TaskDefault::Processor(processor) => processor,
        TaskDefault::Transform(transform) => {
            let bound = transform.is_bound();
            function_processor(transform, bound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BoxError;
    use crate::core::slot::Args;

    fn increment(x: Value) -> Result<Value, BoxError> {
        Ok(Value::Int(x.as_i64().ok_or("expected an int")? + 1))
    }

    #[test]
    fn test_identity_by_default() {
        let processor = Processor::new(FunctionLogic, Args::new()).unwrap();
        assert_eq!(processor.invoke(Value::Int(4)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_transform_macro_names_the_function() {
        let processor = new_function_processor(crate::transform!(increment));
        let transform: Transform = processor.param("function").unwrap();
        assert!(transform.name().ends_with("::increment"));
        assert_eq!(processor.invoke(Value::Int(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_bound_transform_reads_processor_params() {
        let echo_flag = Transform::bound("echo_flag", |processor, _input| {
            Ok(Value::Bool(processor.is_output()))
        });
        let processor = new_bound_function_processor(echo_flag).output();
        assert_eq!(processor.invoke(Value::Null).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_bind_mismatch_is_configuration_error() {
        let mut processor = new_function_processor(crate::transform!(increment));
        processor.set("bind_method", true).unwrap();
        let err = processor.invoke(Value::Int(1)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bound_transform_in_unbound_factory_fails_at_invoke() {
        let echo = Transform::bound("echo", |_processor, input| Ok(input));
        let processor = new_function_processor(echo.clone());
        assert!(processor.invoke(Value::Int(1)).unwrap_err().is_configuration());

        let adapted = ensure_processor(TaskDefault::Transform(echo));
        assert_eq!(adapted.invoke(Value::Int(1)).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_positional_function_argument() {
        let processor =
            Processor::new(FunctionLogic, Args::new().arg(crate::transform!(increment))).unwrap();
        assert_eq!(processor.invoke(Value::Int(9)).unwrap(), Value::Int(10));
    }
}
