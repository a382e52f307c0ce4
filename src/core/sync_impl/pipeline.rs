use crate::core::error::{ConfigurationError, FlowError};
use crate::core::slot::{Args, ProcessorClass, SlotKind};
use crate::core::sync_impl::flow::run_sequence;
use crate::core::sync_impl::processor::{Composition, PROCESSOR, Processor, ProcessorLogic};
use crate::core::value::Value;
use std::fmt;
use std::sync::LazyLock;

/// Base class of all pipelines. Concrete pipelines extend it with tasks.
///
/// ```rust
/// use relaymemo::prelude::*;
/// use std::sync::LazyLock;
///
/// static DOUBLE_THEN_SQUARE: LazyLock<ProcessorClass> = LazyLock::new(|| {
///     ProcessorClass::builder("demo::DoubleThenSquare")
///         .extends(&PIPELINE)
///         .task(Task::new("double", &PROCESSOR))
///         .task(Task::new("square", &PROCESSOR))
///         .build()
/// });
///
/// let double = Transform::new("double", |x: Value| -> Result<Value, BoxError> {
///     Ok(Value::Int(x.as_i64().unwrap_or_default() * 2))
/// });
/// let square = Transform::new("square", |x: Value| -> Result<Value, BoxError> {
///     let x = x.as_i64().unwrap_or_default();
///     Ok(Value::Int(x * x))
/// });
/// let pipeline = Pipeline::new(
///     &DOUBLE_THEN_SQUARE,
///     Args::new().task("double", double).task("square", square),
/// )
/// .unwrap();
/// assert_eq!(pipeline.invoke(Value::Int(3)).unwrap(), Value::Int(36));
/// ```
pub static PIPELINE: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::Pipeline")
        .extends(&PROCESSOR)
        .build()
});

/// The logic of a pipeline: run the bound tasks in declaration order.
#[derive(Clone)]
pub struct PipelineLogic {
    class: &'static ProcessorClass,
}

impl ProcessorLogic for PipelineLogic {
    fn class(&self) -> &'static ProcessorClass {
        self.class
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        run_sequence(&processor.children(), input)
    }

    fn composition(&self) -> Composition {
        Composition::Sequence
    }

    fn children<'a>(&self, processor: &'a Processor) -> Vec<&'a Processor> {
        processor.params().tasks().map(|(_, task)| task).collect()
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

/// A pipeline is a processor whose tasks run in sequence.
/// The newtype keeps the task accessors next to the processor they belong to.
#[derive(Clone, Debug)]
pub struct Pipeline(Processor);

/// The Derefs give direct access to the inner `Processor`
impl std::ops::Deref for Pipeline {
    type Target = Processor;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Pipeline {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Pipeline {
    /// Resolves every task of `class`; bare transforms are wrapped in
    /// function processors and checked against each task's constraint.
    pub fn new(class: &'static ProcessorClass, args: Args) -> Result<Pipeline, ConfigurationError> {
        if !class.is_subclass_of(&PIPELINE) {
            return Err(ConfigurationError::NotASubclass {
                expected: PIPELINE.name().to_string(),
                actual: class.name().to_string(),
            });
        }
        Ok(Pipeline(Processor::new(PipelineLogic { class }, args)?))
    }

    /// The processor bound to a task, if `name` is a task of this pipeline.
    pub fn task(&self, name: &str) -> Option<&Processor> {
        if !self.is_task(name) {
            return None;
        }
        self.0.get(name)?.as_processor()
    }

    /// Mutable access to a bound processor, e.g. to change one of its params.
    pub fn task_mut(&mut self, name: &str) -> Option<&mut Processor> {
        if !self.is_task(name) {
            return None;
        }
        self.0.data.params.get_mut(name)?.as_processor_mut()
    }

    /// Tasks and their bound processors in declaration order.
    pub fn tasks(&self) -> Vec<(&str, &Processor)> {
        self.0.params().tasks().collect()
    }

    fn is_task(&self, name: &str) -> bool {
        self.class()
            .slot(name)
            .is_some_and(|slot| slot.kind() == SlotKind::Task)
    }

    pub fn into_inner(self) -> Processor {
        self.0
    }

    /// Recovers the pipeline view of a processor built by [`Pipeline::new`],
    /// e.g. one bound as a task of an outer pipeline.
    pub fn from_processor(processor: Processor) -> Result<Pipeline, ConfigurationError> {
        if processor.logic::<PipelineLogic>().is_none() {
            return Err(ConfigurationError::NotASubclass {
                expected: PIPELINE.name().to_string(),
                actual: processor.class().name().to_string(),
            });
        }
        Ok(Pipeline(processor))
    }

    /// Re-runs the pipeline from the checkpoint closest to the output,
    /// feeding its stored output through the tasks that follow it.
    pub fn from_checkpoint(&self) -> Result<Value, FlowError> {
        let tasks = self.tasks();
        let Some(position) = tasks.iter().rposition(|(_, task)| task.is_checkpoint()) else {
            return Err(FlowError::Checkpoint {
                processor: self.class().name().to_string(),
                reason: "no task is marked as checkpoint".to_string(),
            });
        };

        let (name, checkpoint) = tasks[position];
        let Some(data) = checkpoint.checkpoint_data() else {
            return Err(FlowError::Checkpoint {
                processor: self.class().name().to_string(),
                reason: format!("task `{}` has not produced any output yet", name),
            });
        };

        let mut value = data;
        for (_, task) in &tasks[position + 1..] {
            value = task.invoke(value)?;
        }
        Ok(value)
    }
}

impl From<Pipeline> for Value {
    fn from(pipeline: Pipeline) -> Self {
        Value::from(pipeline.0)
    }
}

impl From<Pipeline> for crate::core::sync_impl::function::TaskDefault {
    fn from(pipeline: Pipeline) -> Self {
        Self::Processor(pipeline.0)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.short_name())?;
        let mut first = true;
        for (slot, value) in self.params().iter() {
            if slot.kind() == SlotKind::Task || matches!(slot.name(), "is_output" | "is_checkpoint") {
                continue;
            }
            write!(f, "{}", if first { "" } else { ", " })?;
            first = false;
            match value {
                Some(value) => write!(f, "{}={}", slot.name(), value)?,
                None => write!(f, "{}=<unset>", slot.name())?,
            }
        }
        writeln!(f, ")")?;
        for (name, task) in self.tasks() {
            writeln!(f, "    {}: {}", name, task)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BoxError;
    use crate::core::slot::{DataType, Param, Task};
    use crate::core::sync_impl::function::{FUNCTION_PROCESSOR, new_function_processor};
    use crate::core::sync_impl::shaper::{SHAPER, new_shaper};
    use crate::core::value::Transform;

    fn add(n: i64) -> Transform {
        Transform::new(format!("add{}", n), move |x: Value| -> Result<Value, BoxError> {
            Ok(Value::Int(x.as_i64().ok_or("expected an int")? + n))
        })
    }

    static THREE_STEPS: LazyLock<ProcessorClass> = LazyLock::new(|| {
        ProcessorClass::builder("pipeline::ThreeSteps")
            .extends(&PIPELINE)
            .param(Param::new("label", DataType::Str).default("three"))
            .task(Task::new("first", &PROCESSOR).default(add(1)))
            .task(Task::new("second", &FUNCTION_PROCESSOR).default(add(10)))
            .task(Task::new("third", &PROCESSOR))
            .build()
    });

    static SHAPED: LazyLock<ProcessorClass> = LazyLock::new(|| {
        ProcessorClass::builder("pipeline::Shaped")
            .extends(&PIPELINE)
            .task(Task::new("shape", &SHAPER))
            .build()
    });

    #[test]
    fn test_defaults_compose_in_order() {
        let pipeline = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        assert_eq!(pipeline.invoke(Value::Int(0)).unwrap(), Value::Int(11));
        let names: Vec<&str> = pipeline.tasks().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rebinding_is_validated() {
        let mut pipeline = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        let shaper = new_shaper(Value::tuple([Value::Int(0)])).unwrap();
        let err = pipeline.set("second", shaper).unwrap_err();
        assert!(matches!(err, ConfigurationError::TaskConstraint { .. }));
        assert_eq!(pipeline.invoke(Value::Int(0)).unwrap(), Value::Int(11));

        pipeline.set("second", add(100)).unwrap();
        assert_eq!(pipeline.invoke(Value::Int(0)).unwrap(), Value::Int(101));
    }

    #[test]
    fn test_transform_default_on_incompatible_task_fails() {
        assert!(SHAPED.validate_defaults().is_err());
        let err = Pipeline::new(&SHAPED, Args::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::TaskConstraint { .. }));
    }

    #[test]
    fn test_non_pipeline_class_is_rejected() {
        let err = Pipeline::new(&FUNCTION_PROCESSOR, Args::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::NotASubclass { .. }));
    }

    #[test]
    fn test_task_mut_reaches_bound_processor() {
        let mut pipeline = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        assert!(pipeline.task_mut("label").is_none());
        pipeline.task_mut("third").unwrap().set("function", add(5)).unwrap();
        assert_eq!(pipeline.invoke(Value::Int(0)).unwrap(), Value::Int(16));
    }

    #[test]
    fn test_from_checkpoint() {
        let mut pipeline = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        assert!(matches!(pipeline.from_checkpoint(), Err(FlowError::Checkpoint { .. })));

        pipeline.set("second", new_function_processor(add(10)).checkpoint()).unwrap();
        assert!(matches!(pipeline.from_checkpoint(), Err(FlowError::Checkpoint { .. })));

        pipeline.invoke(Value::Int(1)).unwrap();
        pipeline.set("third", add(1000)).unwrap();
        assert_eq!(pipeline.from_checkpoint().unwrap(), Value::Int(1012));
    }

    #[test]
    fn test_nested_pipeline_view() {
        let inner = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        let outer = Pipeline::new(&THREE_STEPS, Args::new().task("third", inner)).unwrap();
        assert_eq!(outer.invoke(Value::Int(0)).unwrap(), Value::Int(22));

        let bound = outer.task("third").unwrap().clone();
        let view = Pipeline::from_processor(bound).unwrap();
        assert_eq!(view.tasks().len(), 3);
        assert!(Pipeline::from_processor(outer.task("first").unwrap().clone()).is_err());
    }

    #[test]
    fn test_display_lists_tasks() {
        let pipeline = Pipeline::new(&THREE_STEPS, Args::new()).unwrap();
        let text = pipeline.to_string();
        assert!(text.starts_with("ThreeSteps(label=\"three\")\n"));
        assert!(text.contains("    second: FunctionProcessor(function=add10, bind_method=false)"));
    }
}
