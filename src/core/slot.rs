//! Declarative, typed, defaultable configuration slots.
//!
//! Every processor type owns one [`ProcessorClass`], built once (usually in a
//! `LazyLock` static) from its parent's slots plus its own [`Param`] and
//! [`Task`] declarations. Constructing a processor resolves an [`Args`] list
//! against that registry into a [`Params`] record: provided value, else a
//! fresh copy of the default, each one checked against the slot's
//! [`DataType`].

use crate::core::error::ConfigurationError;
use crate::core::sync_impl::function::{FUNCTION_PROCESSOR, TaskDefault, ensure_processor};
use crate::core::sync_impl::processor::Processor;
use crate::core::value::{FromValue, Value};
use std::collections::HashSet;
use std::fmt;

/// The type constraint of a slot.
#[derive(Debug, Clone)]
pub enum DataType {
    Any,
    Bool,
    Int,
    /// Accepts integers, stored as floats.
    Float,
    Str,
    Tuple,
    Record,
    Map,
    Array,
    Transform,
    /// A processor whose class is the given class or one of its subclasses.
    /// Bare transforms are adapted into function processors.
    Processor(&'static ProcessorClass),
    TupleOf(Box<DataType>),
    RecordOf(Box<DataType>),
    OneOf(Vec<DataType>),
}

/// Why a value did not fit a [`DataType`].
struct Mismatch {
    expected: String,
    actual: String,
    constraint: bool,
}

impl Mismatch {
    fn of_type(expected: &DataType, actual: &Value) -> Self {
        Mismatch {
            expected: expected.to_string(),
            actual: actual.type_name(),
            constraint: false,
        }
    }

    fn of_class(expected: &ProcessorClass, actual: &str) -> Self {
        Mismatch {
            expected: expected.name().to_string(),
            actual: actual.to_string(),
            constraint: true,
        }
    }
}

impl DataType {
    fn coerce(&self, value: Value) -> Result<Value, Mismatch> {
        match (self, value) {
            (DataType::Any, value) => Ok(value),
            (DataType::Bool, value @ Value::Bool(_)) => Ok(value),
            (DataType::Int, value @ Value::Int(_)) => Ok(value),
            (DataType::Float, value @ Value::Float(_)) => Ok(value),
            (DataType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (DataType::Str, value @ Value::Str(_)) => Ok(value),
            (DataType::Tuple, value @ Value::Tuple(_)) => Ok(value),
            (DataType::Record, value @ Value::Record(_)) => Ok(value),
            (DataType::Map, value @ Value::Map(_)) => Ok(value),
            (DataType::Array, value @ Value::Array(_)) => Ok(value),
            (DataType::Transform, value @ Value::Transform(_)) => Ok(value),
            (DataType::Processor(class), Value::Processor(processor)) => {
                if processor.class().is_subclass_of(class) {
                    Ok(Value::Processor(processor))
                } else {
                    Err(Mismatch::of_class(class, processor.class().name()))
                }
            }
            (DataType::Processor(class), Value::Transform(transform)) => {
                if FUNCTION_PROCESSOR.is_subclass_of(class) {
                    Ok(Value::from(ensure_processor(TaskDefault::Transform(transform))))
                } else {
                    Err(Mismatch::of_class(class, FUNCTION_PROCESSOR.name()))
                }
            }
            (DataType::TupleOf(inner), Value::Tuple(items)) => items
                .into_iter()
                .map(|item| inner.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple),
            (DataType::RecordOf(inner), Value::Record(entries)) => entries
                .into_iter()
                .map(|(key, item)| inner.coerce(item).map(|item| (key, item)))
                .collect::<Result<_, _>>()
                .map(Value::Record),
            (DataType::OneOf(options), value) => {
                let mut constraint_failure = None;
                for option in options {
                    match option.coerce(value.clone()) {
                        Ok(coerced) => return Ok(coerced),
                        Err(mismatch) if mismatch.constraint => constraint_failure = Some(mismatch),
                        Err(_) => {}
                    }
                }
                Err(constraint_failure.unwrap_or_else(|| Mismatch::of_type(self, &value)))
            }
            (expected, value) => Err(Mismatch::of_type(expected, &value)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Any => write!(f, "any"),
            DataType::Bool => write!(f, "bool"),
            DataType::Int => write!(f, "int"),
            DataType::Float => write!(f, "float"),
            DataType::Str => write!(f, "str"),
            DataType::Tuple => write!(f, "tuple"),
            DataType::Record => write!(f, "record"),
            DataType::Map => write!(f, "map"),
            DataType::Array => write!(f, "array"),
            DataType::Transform => write!(f, "transform"),
            DataType::Processor(class) => write!(f, "processor `{}`", class.name()),
            DataType::TupleOf(inner) => write!(f, "tuple of {}", inner),
            DataType::RecordOf(inner) => write!(f, "record of {}", inner),
            DataType::OneOf(options) => {
                let names: Vec<String> = options.iter().map(|o| o.to_string()).collect();
                write!(f, "one of [{}]", names.join(" | "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Param,
    Task,
}

/// A declared slot. Immutable once its class is built.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    name: String,
    datatype: DataType,
    default: Option<Value>,
    positional: bool,
    owner: &'static str,
    order: usize,
    kind: SlotKind,
}

impl SlotSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_mandatory(&self) -> bool {
        self.default.is_none()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// The most specific class that declared this slot.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    fn check(&self, class: &str, value: Value) -> Result<Value, ConfigurationError> {
        self.datatype.coerce(value).map_err(|mismatch| {
            if mismatch.constraint {
                ConfigurationError::TaskConstraint {
                    owner: class.to_string(),
                    slot: self.name.clone(),
                    expected: mismatch.expected,
                    actual: mismatch.actual,
                }
            } else {
                ConfigurationError::TypeMismatch {
                    owner: class.to_string(),
                    slot: self.name.clone(),
                    expected: mismatch.expected,
                    actual: mismatch.actual,
                }
            }
        })
    }
}

/// Declaration of a plain parameter slot.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    datatype: DataType,
    default: Option<Value>,
    positional: bool,
}

impl Param {
    /// A mandatory parameter; give it a default with [`Param::default`].
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Param {
            name: name.into(),
            datatype,
            default: None,
            positional: false,
        }
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Removes an inherited or previously set default.
    pub fn mandatory(mut self) -> Self {
        self.default = None;
        self
    }

    /// Allows the parameter to be passed positionally to the constructor.
    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }
}

/// Declaration of a slot holding a swappable processor.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    constraint: &'static ProcessorClass,
    default: TaskDefault,
}

impl Task {
    /// A task accepting any subclass of `constraint`; defaults to the identity.
    pub fn new(name: impl Into<String>, constraint: &'static ProcessorClass) -> Self {
        Task {
            name: name.into(),
            constraint,
            default: TaskDefault::Transform(crate::core::value::Transform::identity()),
        }
    }

    pub fn default(mut self, default: impl Into<TaskDefault>) -> Self {
        self.default = default.into();
        self
    }
}

/// The static slot registry of one processor type.
#[derive(Debug)]
pub struct ProcessorClass {
    name: &'static str,
    parent: Option<&'static ProcessorClass>,
    slots: Vec<SlotSpec>,
}

impl ProcessorClass {
    pub fn builder(name: &'static str) -> ClassBuilder {
        ClassBuilder {
            name,
            parent: None,
            slots: Vec::new(),
            declared: HashSet::new(),
        }
    }

    /// The qualified type name; this is the class identity used in cache keys.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ProcessorClass> {
        self.parent
    }

    /// Effective slots across the inheritance chain, in declaration order.
    pub fn slots(&self) -> &[SlotSpec] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, ConfigurationError> {
        self.slots
            .iter()
            .position(|slot| slot.name == name)
            .ok_or_else(|| ConfigurationError::UnknownSlot {
                owner: self.name.to_string(),
                slot: name.to_string(),
            })
    }

    pub fn is_subclass_of(&self, other: &ProcessorClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.name == other.name {
                return true;
            }
            current = class.parent;
        }
        false
    }

    /// Checks every declared default against its slot's datatype.
    pub fn validate_defaults(&self) -> Result<(), ConfigurationError> {
        for slot in &self.slots {
            if let Some(default) = &slot.default {
                slot.check(self.name, default.clone())?;
            }
        }
        Ok(())
    }

    /// Resolves constructor arguments into instance state.
    ///
    /// Positional arguments fill the `positional` slots in declaration order.
    /// Slots without a value take a fresh copy of their default; mandatory
    /// slots without one stay unresolved until assigned.
    pub fn resolve(&'static self, args: Args) -> Result<Params, ConfigurationError> {
        let positional_slots: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.positional)
            .map(|(index, _)| index)
            .collect();

        if args.positional.len() > positional_slots.len() {
            return Err(ConfigurationError::TooManyPositional {
                owner: self.name.to_string(),
                max: positional_slots.len(),
                actual: args.positional.len(),
            });
        }

        let mut provided: Vec<Option<Value>> = vec![None; self.slots.len()];
        for (value, index) in args.positional.into_iter().zip(positional_slots) {
            provided[index] = Some(value);
        }
        for (name, value) in args.keyword {
            let index = self.index_of(&name)?;
            if provided[index].is_some() {
                return Err(ConfigurationError::DuplicateArgument {
                    owner: self.name.to_string(),
                    slot: name,
                });
            }
            provided[index] = Some(value);
        }

        let values = self
            .slots
            .iter()
            .zip(provided)
            .map(|(slot, value)| match value.or_else(|| slot.default.clone()) {
                Some(value) => slot.check(self.name, value).map(Some),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Params { class: self, values })
    }

    /// Instance state made of the raw defaults, for built-in classes whose
    /// defaults are known to fit.
    pub(crate) fn defaults(&'static self) -> Params {
        Params {
            class: self,
            values: self.slots.iter().map(|slot| slot.default.clone()).collect(),
        }
    }
}

/// Builds a [`ProcessorClass`]. Call [`ClassBuilder::extends`] before
/// declaring slots that override inherited ones.
pub struct ClassBuilder {
    name: &'static str,
    parent: Option<&'static ProcessorClass>,
    slots: Vec<SlotSpec>,
    declared: HashSet<String>,
}

impl ClassBuilder {
    pub fn extends(mut self, parent: &'static ProcessorClass) -> Self {
        let own = std::mem::replace(&mut self.slots, parent.slots.clone());
        self.parent = Some(parent);
        self.declared.clear();
        for slot in own {
            self.declare(slot);
        }
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        let slot = SlotSpec {
            name: param.name,
            datatype: param.datatype,
            default: param.default,
            positional: param.positional,
            owner: self.name,
            order: 0,
            kind: SlotKind::Param,
        };
        self.declare(slot);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        let slot = SlotSpec {
            name: task.name,
            datatype: DataType::Processor(task.constraint),
            default: Some(task.default.into_value()),
            positional: false,
            owner: self.name,
            order: 0,
            kind: SlotKind::Task,
        };
        self.declare(slot);
        self
    }

    fn declare(&mut self, slot: SlotSpec) {
        if !self.declared.insert(slot.name.clone()) {
            log::warn!(
                "Slot `{}` declared twice on `{}`, the later declaration wins.",
                slot.name,
                self.name
            );
        }
        match self.slots.iter_mut().find(|existing| existing.name == slot.name) {
            Some(existing) => {
                if existing.owner != self.name {
                    log::debug!(
                        "`{}` overrides slot `{}` inherited from `{}`",
                        self.name,
                        slot.name,
                        existing.owner
                    );
                }
                *existing = slot;
            }
            None => self.slots.push(slot),
        }
    }

    pub fn build(mut self) -> ProcessorClass {
        for (order, slot) in self.slots.iter_mut().enumerate() {
            slot.order = order;
        }
        ProcessorClass {
            name: self.name,
            parent: self.parent,
            slots: self.slots,
        }
    }
}

/// Constructor arguments: a few positional values and named values.
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    /// Binds a processor or a bare transform by name, for task slots.
    pub fn task(self, name: impl Into<String>, task: impl Into<TaskDefault>) -> Self {
        self.kw(name, task.into().into_value())
    }
}

/// Resolved slot values of one processor instance.
#[derive(Debug, Clone)]
pub struct Params {
    class: &'static ProcessorClass,
    values: Vec<Option<Value>>,
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.class.name == other.class.name && self.values == other.values
    }
}

impl Params {
    pub fn class(&self) -> &'static ProcessorClass {
        self.class
    }

    /// The value of a slot, or `None` if unknown or unresolved.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.class.index_of(name).ok()?;
        self.values[index].as_ref()
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let index = self.class.index_of(name).ok()?;
        self.values[index].as_mut()
    }

    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, ConfigurationError> {
        let index = self.class.index_of(name)?;
        let slot = &self.class.slots[index];
        let value = self.values[index]
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingValue {
                owner: self.class.name.to_string(),
                slot: name.to_string(),
            })?;
        T::from_value(value).ok_or_else(|| ConfigurationError::TypeMismatch {
            owner: self.class.name.to_string(),
            slot: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: format!("{} ({})", value.type_name(), slot.datatype),
        })
    }

    /// Assigns a slot; the value is validated first and the previous value
    /// stays in place if it is rejected.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConfigurationError> {
        let index = self.class.index_of(name)?;
        let checked = self.class.slots[index].check(self.class.name, value.into())?;
        self.values[index] = Some(checked);
        Ok(())
    }

    /// Restores a fresh copy of the slot's default (unresolved if mandatory).
    pub fn reset(&mut self, name: &str) -> Result<(), ConfigurationError> {
        let index = self.class.index_of(name)?;
        let slot = &self.class.slots[index];
        self.values[index] = match slot.default.clone() {
            Some(default) => Some(slot.check(self.class.name, default)?),
            None => None,
        };
        Ok(())
    }

    /// Writes without validation. Only for values known to fit.
    pub(crate) fn put(&mut self, name: &str, value: Value) {
        if let Ok(index) = self.class.index_of(name) {
            self.values[index] = Some(value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotSpec, Option<&Value>)> {
        self.class.slots.iter().zip(self.values.iter().map(Option::as_ref))
    }

    /// Fails on the first mandatory slot that never received a value.
    pub fn ensure_complete(&self) -> Result<(), ConfigurationError> {
        match self.iter().find(|(_, value)| value.is_none()) {
            Some((slot, _)) => Err(ConfigurationError::MissingValue {
                owner: self.class.name.to_string(),
                slot: slot.name.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, value)| value.is_none())
            .map(|(slot, _)| slot.name())
            .collect()
    }

    /// Bound processors of all task slots, in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &Processor)> {
        self.iter().filter_map(|(slot, value)| match (slot.kind, value) {
            (SlotKind::Task, Some(Value::Processor(processor))) => Some((slot.name(), &**processor)),
            _ => None,
        })
    }

    /// All slot values as an ordered record; unresolved slots are `Null`.
    pub fn to_record(&self) -> Value {
        Value::record(
            self.iter()
                .map(|(slot, value)| (slot.name(), value.cloned().unwrap_or_default())),
        )
    }
}
