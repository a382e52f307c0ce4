use crate::core::error::{FlowError, StructuralError};
use crate::core::slot::{DataType, Param, ProcessorClass};
use crate::core::sync_impl::function::{TaskDefault, ensure_processor};
use crate::core::sync_impl::processor::{Composition, PROCESSOR, Processor, ProcessorLogic};
use crate::core::value::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Base class of the combinators: a positional, mandatory `children` slot
/// holding either a tuple of processors or a record of named processors.
pub static GROUP_PROCESSOR: LazyLock<ProcessorClass> = LazyLock::new(|| {
    let child = || Box::new(DataType::Processor(&PROCESSOR));
    ProcessorClass::builder("relaymemo::GroupProcessor")
        .extends(&PROCESSOR)
        .param(
            Param::new(
                "children",
                DataType::OneOf(vec![DataType::TupleOf(child()), DataType::RecordOf(child())]),
            )
            .positional(),
        )
        .build()
});

pub static SEQUENTIAL: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::Sequential")
        .extends(&GROUP_PROCESSOR)
        .build()
});

pub static PARALLEL: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::Parallel")
        .extends(&GROUP_PROCESSOR)
        .param(Param::new("broadcast", DataType::Bool).default(false))
        .build()
});

/// Children of a group with their identifiers: record keys for named
/// children, positional indices otherwise.
fn group_children(processor: &Processor) -> Vec<(String, &Processor)> {
    match processor.get("children") {
        Some(Value::Tuple(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_processor().map(|child| (index.to_string(), child)))
            .collect(),
        Some(Value::Record(entries)) => entries
            .iter()
            .filter_map(|(key, item)| item.as_processor().map(|child| (key.clone(), child)))
            .collect(),
        _ => Vec::new(),
    }
}

/// ------- Sequential -----------------------------------------------------------
/// Chains its children, each one consuming the previous output.
#[derive(Clone)]
pub struct SequentialLogic;

impl ProcessorLogic for SequentialLogic {
    fn class(&self) -> &'static ProcessorClass {
        &SEQUENTIAL
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        run_sequence(&processor.children(), input)
    }

    fn composition(&self) -> Composition {
        Composition::Sequence
    }

    fn children<'a>(&self, processor: &'a Processor) -> Vec<&'a Processor> {
        group_children(processor).into_iter().map(|(_, child)| child).collect()
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

/// Threads `input` through `steps` in order and assembles the result.
///
/// Non-terminal steps that contribute (flagged, or holding a flagged
/// descendant) are collected in declaration order. Without any such step the
/// result is the last step's contribution; otherwise it is a tuple of the
/// collected contributions followed by the last step's contribution. A last
/// step that does not contribute adds its plain output.
///
/// The result is already projected, so it agrees with
/// [`FlowNode::output_shape`] of the sequence.
pub(crate) fn run_sequence(steps: &[&Processor], input: Value) -> Result<Value, FlowError> {
    let Some((last, head)) = steps.split_last() else {
        return Ok(input);
    };

    let mut value = input;
    let mut contributions = Vec::new();
    for step in head {
        value = step.invoke(value)?;
        let node = FlowNode::of(step);
        if node.contributes() {
            contributions.push(node.project(&value)?);
        }
    }

    let value = last.invoke(value)?;
    let node = FlowNode::of(last);
    let tail = if node.contributes() { node.project(&value)? } else { value };
    if contributions.is_empty() {
        return Ok(tail);
    }
    contributions.push(tail);
    Ok(Value::Tuple(contributions))
}

/// ------- Parallel -------------------------------------------------------------
/// Fans its input out over the children and gathers their outputs, in
/// declaration order, into a tuple.
#[derive(Clone)]
pub struct ParallelLogic;

impl ProcessorLogic for ParallelLogic {
    fn class(&self) -> &'static ProcessorClass {
        &PARALLEL
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        let children = group_children(processor);
        let broadcast: bool = processor.param("broadcast")?;

        // Every shape check happens here, before any child runs.
        let inputs = distribute(processor.short_name(), &children, broadcast, input)?;

        let outputs = children
            .iter()
            .zip(inputs)
            .map(|((_, child), input)| child.invoke(input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Tuple(outputs))
    }

    fn composition(&self) -> Composition {
        Composition::Fanout
    }

    fn children<'a>(&self, processor: &'a Processor) -> Vec<&'a Processor> {
        group_children(processor).into_iter().map(|(_, child)| child).collect()
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

/// Splits `input` into one value per child.
fn distribute(
    node: &str,
    children: &[(String, &Processor)],
    broadcast: bool,
    input: Value,
) -> Result<Vec<Value>, StructuralError> {
    if broadcast {
        return Ok(vec![input; children.len()]);
    }
    match input {
        Value::Tuple(items) => {
            if items.len() != children.len() {
                return Err(StructuralError::ArityMismatch {
                    node: node.to_string(),
                    expected: children.len(),
                    actual: items.len(),
                });
            }
            Ok(items)
        }
        Value::Record(entries) => by_key(node, children, entries.into_iter().collect()),
        Value::Map(entries) => by_key(node, children, entries),
        other => Err(StructuralError::NotDistributable {
            node: node.to_string(),
            actual: other.type_name(),
        }),
    }
}

fn by_key(
    node: &str,
    children: &[(String, &Processor)],
    mut entries: HashMap<String, Value>,
) -> Result<Vec<Value>, StructuralError> {
    let mut actual: Vec<String> = entries.keys().cloned().collect();
    actual.sort();
    let mut expected: Vec<String> = children.iter().map(|(id, _)| id.clone()).collect();
    expected.sort();
    if actual != expected {
        return Err(StructuralError::KeyMismatch {
            node: node.to_string(),
            expected,
            actual,
        });
    }
    Ok(children
        .iter()
        .map(|(id, _)| entries.remove(id).unwrap_or_default())
        .collect())
}

/// ------- Factories ------------------------------------------------------------
fn group(
    logic: Box<dyn ProcessorLogic>,
    class: &'static ProcessorClass,
    children: Value,
) -> Processor {
    let mut params = class.defaults();
    params.put("children", children);
    Processor::from_parts(logic, params)
}

/// A sequential composite. Bare transforms become function processors.
pub fn new_sequential<I, T>(children: I) -> Processor
where
    I: IntoIterator<Item = T>,
    T: Into<TaskDefault>,
{
    let children = children
        .into_iter()
        .map(|child| Value::from(ensure_processor(child.into())))
        .collect();
    group(Box::new(SequentialLogic), &SEQUENTIAL, Value::Tuple(children))
}

/// A parallel composite over positional children.
pub fn new_parallel<I, T>(children: I, broadcast: bool) -> Processor
where
    I: IntoIterator<Item = T>,
    T: Into<TaskDefault>,
{
    let children = children
        .into_iter()
        .map(|child| Value::from(ensure_processor(child.into())))
        .collect();
    let mut parallel = group(Box::new(ParallelLogic), &PARALLEL, Value::Tuple(children));
    parallel.data.params.put("broadcast", Value::Bool(broadcast));
    parallel
}

/// A parallel composite over named children; keyed inputs are matched
/// against the names.
pub fn new_named_parallel<'k, I, T>(children: I, broadcast: bool) -> Processor
where
    I: IntoIterator<Item = (&'k str, T)>,
    T: Into<TaskDefault>,
{
    let children = Value::record(
        children
            .into_iter()
            .map(|(name, child)| (name, Value::from(ensure_processor(child.into())))),
    );
    let mut parallel = group(Box::new(ParallelLogic), &PARALLEL, children);
    parallel.data.params.put("broadcast", Value::Bool(broadcast));
    parallel
}

/// ------- Flow tree ------------------------------------------------------------
/// Read-only tree view of a composition, used to decide which results make
/// it into the assembled output.
#[derive(Debug, Clone)]
pub enum FlowNode<'a> {
    Leaf(&'a Processor),
    Sequential(&'a Processor, Vec<FlowNode<'a>>),
    Parallel(&'a Processor, Vec<FlowNode<'a>>),
}

/// Nesting of the assembled output, one entry per contributing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// A processor's own result, named by its class.
    Entry(&'static str),
    Group(Vec<OutputShape>),
}

impl<'a> FlowNode<'a> {
    pub fn of(processor: &'a Processor) -> Self {
        let children = || processor.children().into_iter().map(FlowNode::of).collect();
        match processor.composition() {
            Composition::Leaf => FlowNode::Leaf(processor),
            Composition::Sequence => FlowNode::Sequential(processor, children()),
            Composition::Fanout => FlowNode::Parallel(processor, children()),
        }
    }

    pub fn processor(&self) -> &'a Processor {
        match self {
            FlowNode::Leaf(processor)
            | FlowNode::Sequential(processor, _)
            | FlowNode::Parallel(processor, _) => processor,
        }
    }

    pub fn children(&self) -> &[FlowNode<'a>] {
        match self {
            FlowNode::Leaf(_) => &[],
            FlowNode::Sequential(_, children) | FlowNode::Parallel(_, children) => children,
        }
    }

    pub fn has_flagged_descendant(&self) -> bool {
        self.children()
            .iter()
            .any(|child| child.processor().is_output() || child.has_flagged_descendant())
    }

    /// Whether this node adds an entry to its parent's output.
    pub fn contributes(&self) -> bool {
        self.processor().is_output() || self.has_flagged_descendant()
    }

    /// Every flagged processor of the tree, in pre-order.
    pub fn outputs(&self) -> Vec<&'a Processor> {
        let mut outputs = Vec::new();
        self.collect_outputs(&mut outputs);
        outputs
    }

    fn collect_outputs(&self, outputs: &mut Vec<&'a Processor>) {
        if self.processor().is_output() {
            outputs.push(self.processor());
        }
        for child in self.children() {
            child.collect_outputs(outputs);
        }
    }

    /// The shape of this node's contribution, or `None` if it contributes
    /// nothing. Computed from the tree alone, without invoking anything.
    pub fn output_shape(&self) -> Option<OutputShape> {
        if !self.has_flagged_descendant() {
            return self
                .processor()
                .is_output()
                .then(|| OutputShape::Entry(self.processor().class().name()));
        }
        match self {
            FlowNode::Leaf(_) => None,
            FlowNode::Parallel(_, children) => Some(OutputShape::Group(
                children.iter().filter_map(FlowNode::output_shape).collect(),
            )),
            FlowNode::Sequential(_, children) => {
                let (last, head) = children.split_last()?;
                let mut entries: Vec<OutputShape> =
                    head.iter().filter_map(FlowNode::output_shape).collect();
                if entries.is_empty() {
                    return last.output_shape();
                }
                entries.push(
                    last.output_shape()
                        .unwrap_or_else(|| OutputShape::Entry(last.processor().class().name())),
                );
                Some(OutputShape::Group(entries))
            }
        }
    }

    /// Derives this node's contribution from the value its `invoke` returned.
    ///
    /// Depends only on the tree and the value, so a result read back from a
    /// cache contributes exactly like a freshly computed one.
    pub fn project(&self, value: &Value) -> Result<Value, StructuralError> {
        if !self.has_flagged_descendant() {
            return Ok(value.clone());
        }
        match self {
            FlowNode::Leaf(_) => Ok(value.clone()),
            FlowNode::Parallel(processor, children) => {
                let items = match value {
                    Value::Tuple(items) if items.len() == children.len() => items,
                    other => {
                        return Err(StructuralError::UnexpectedOutput {
                            node: processor.short_name().to_string(),
                            expected: format!("tuple of {} elements", children.len()),
                            actual: other.type_name(),
                        });
                    }
                };
                let mut projected = Vec::new();
                for (child, item) in children.iter().zip(items) {
                    if child.contributes() {
                        projected.push(child.project(item)?);
                    }
                }
                Ok(Value::Tuple(projected))
            }
            // A sequence assembles its contribution while running.
            FlowNode::Sequential(..) => Ok(value.clone()),
        }
    }
}
