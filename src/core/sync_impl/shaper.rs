use crate::core::error::{ConfigurationError, FlowError, StructuralError};
use crate::core::slot::{Args, DataType, Param, ProcessorClass};
use crate::core::sync_impl::processor::{PROCESSOR, Processor, ProcessorLogic};
use crate::core::value::Value;
use std::sync::LazyLock;

/// Selects and regroups elements of a tuple by index.
///
/// `indices` is a tuple whose members are integers or nested tuples of
/// integers; the output has the same nesting. An index may appear any number
/// of times and negative indices count from the end.
///
/// ```rust
/// use relaymemo::prelude::*;
///
/// let shaper = new_shaper(Value::tuple([
///     Value::Int(1),
///     Value::Int(2),
///     Value::tuple([Value::Int(0), Value::Int(2)]),
/// ]))
/// .unwrap();
/// let out = shaper.invoke(Value::tuple([Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap();
/// assert_eq!(out.to_string(), "(2, 3, (1, 3))");
/// ```
pub static SHAPER: LazyLock<ProcessorClass> = LazyLock::new(|| {
    ProcessorClass::builder("relaymemo::Shaper")
        .extends(&PROCESSOR)
        .param(Param::new("indices", DataType::Tuple).positional())
        .build()
});

#[derive(Clone)]
pub struct ShaperLogic;

impl ProcessorLogic for ShaperLogic {
    fn class(&self) -> &'static ProcessorClass {
        &SHAPER
    }

    fn function(&self, processor: &Processor, input: Value) -> Result<Value, FlowError> {
        let indices = match processor.get("indices") {
            Some(Value::Tuple(indices)) => indices,
            _ => {
                return Err(ConfigurationError::MissingValue {
                    owner: processor.class().name().to_string(),
                    slot: "indices".to_string(),
                }
                .into());
            }
        };
        check_indices(processor.class().name(), indices)?;

        // Anything that is not a tuple is its own element 0.
        let items = match input {
            Value::Tuple(items) => items,
            other => vec![other],
        };
        Ok(select(processor.short_name(), indices, &items)?)
    }

    fn clone_box(&self) -> Box<dyn ProcessorLogic> {
        Box::new(self.clone())
    }
}

fn check_indices(owner: &str, indices: &[Value]) -> Result<(), ConfigurationError> {
    for index in indices {
        match index {
            Value::Int(_) => {}
            Value::Tuple(nested) => check_indices(owner, nested)?,
            other => {
                return Err(ConfigurationError::TypeMismatch {
                    owner: owner.to_string(),
                    slot: "indices".to_string(),
                    expected: "int or tuple of int".to_string(),
                    actual: other.type_name(),
                });
            }
        }
    }
    Ok(())
}

fn select(node: &str, indices: &[Value], items: &[Value]) -> Result<Value, StructuralError> {
    let mut selected = Vec::with_capacity(indices.len());
    for index in indices {
        match index {
            Value::Int(i) => {
                let position = if *i < 0 { items.len() as i64 + i } else { *i };
                let item = usize::try_from(position)
                    .ok()
                    .and_then(|position| items.get(position))
                    .ok_or_else(|| StructuralError::IndexOutOfRange {
                        node: node.to_string(),
                        index: *i,
                        len: items.len(),
                    })?;
                selected.push(item.clone());
            }
            Value::Tuple(nested) => selected.push(select(node, nested, items)?),
            _ => {}
        }
    }
    Ok(Value::Tuple(selected))
}

/// A shaper over the given index tuple; the indices are checked here.
pub fn new_shaper(indices: Value) -> Result<Processor, ConfigurationError> {
    let shaper = Processor::new(ShaperLogic, Args::new().arg(indices))?;
    if let Some(Value::Tuple(indices)) = shaper.get("indices") {
        check_indices(SHAPER.name(), indices)?;
    }
    Ok(shaper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::tuple(values.iter().map(|v| Value::Int(*v)))
    }

    #[test]
    fn test_nested_selection() {
        let shaper = new_shaper(Value::tuple([
            Value::Int(0),
            Value::tuple([Value::Int(1), Value::tuple([Value::Int(2)])]),
        ]))
        .unwrap();
        let out = shaper.invoke(ints(&[1, 2, 3])).unwrap();
        assert_eq!(
            out,
            Value::tuple([
                Value::Int(1),
                Value::tuple([Value::Int(2), Value::tuple([Value::Int(3)])]),
            ])
        );
    }

    #[test]
    fn test_scalar_is_element_zero() {
        let shaper = new_shaper(ints(&[0, 0])).unwrap();
        assert_eq!(shaper.invoke(Value::from("a")).unwrap(), Value::tuple([Value::from("a"), Value::from("a")]));
    }

    #[test]
    fn test_negative_index() {
        let shaper = new_shaper(ints(&[-1])).unwrap();
        assert_eq!(shaper.invoke(ints(&[4, 5])).unwrap(), ints(&[5]));
    }

    #[test]
    fn test_out_of_range() {
        let shaper = new_shaper(ints(&[3])).unwrap();
        let err = shaper.invoke(ints(&[1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Structural(StructuralError::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn test_non_integer_index_is_rejected() {
        let err = new_shaper(Value::tuple([Value::from("a")])).unwrap_err();
        assert!(matches!(err, ConfigurationError::TypeMismatch { .. }));
    }
}
