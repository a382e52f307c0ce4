//! The value model shared by processor inputs, outputs and slot values.

use crate::core::error::{BoxError, StructuralError};
use crate::core::sync_impl::processor::Processor;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Any value a processor consumes, produces or is configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Ordered sequence.
    Tuple(Vec<Value>),
    /// Ordered mapping; insertion order is part of the value.
    Record(IndexMap<String, Value>),
    /// Unordered mapping.
    Map(HashMap<String, Value>),
    Array(NdArray),
    #[serde(skip)]
    Transform(Transform),
    #[serde(skip)]
    Processor(Box<Processor>),
    #[serde(skip)]
    Opaque(Opaque),
}

impl Value {
    pub fn tuple<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn record<K: Into<String>, I: IntoIterator<Item = (K, Value)>>(items: I) -> Self {
        Value::Record(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn map<K: Into<String>, I: IntoIterator<Item = (K, Value)>>(items: I) -> Self {
        Value::Map(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Opaque::new(value))
    }

    /// A short name of the runtime type, used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Record(_) => "record".into(),
            Value::Map(_) => "map".into(),
            Value::Array(array) => format!("array<{}>", array.dtype().name()),
            Value::Transform(_) => "transform".into(),
            Value::Processor(processor) => format!("processor `{}`", processor.class().name()),
            Value::Opaque(opaque) => format!("opaque `{}`", opaque.type_name()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are accepted where floats are expected.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_processor(&self) -> Option<&Processor> {
        match self {
            Value::Processor(processor) => Some(processor),
            _ => None,
        }
    }

    pub fn as_processor_mut(&mut self) -> Option<&mut Processor> {
        match self {
            Value::Processor(processor) => Some(processor),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            // IndexMap equality ignores order, so compare entries pairwise.
            (Value::Record(a), Value::Record(b)) => a.len() == b.len() && a.iter().eq(b.iter()),
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Transform(a), Value::Transform(b)) => a.name() == b.name(),
            (Value::Processor(a), Value::Processor(b)) => {
                a.class().name() == b.class().name() && a.params() == b.params()
            }
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Record(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Map(entries) => {
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, entries[key])?;
                }
                write!(f, "}}")
            }
            Value::Array(array) => write!(f, "array<{}>{:?}", array.dtype().name(), array.shape()),
            Value::Transform(transform) => write!(f, "{}", transform.name()),
            Value::Processor(processor) => write!(f, "{}", processor),
            Value::Opaque(opaque) => write!(f, "<{}>", opaque.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Tuple(value)
    }
}

impl From<NdArray> for Value {
    fn from(value: NdArray) -> Self {
        Value::Array(value)
    }
}

impl From<Transform> for Value {
    fn from(value: Transform) -> Self {
        Value::Transform(value)
    }
}

impl From<Processor> for Value {
    fn from(value: Processor) -> Self {
        Value::Processor(Box::new(value))
    }
}

/// Typed extraction of a slot value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Transform {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Transform(transform) => Some(transform.clone()),
            _ => None,
        }
    }
}

impl FromValue for NdArray {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_array().cloned()
    }
}

// ----------------------------------------------------------------------------
// Numeric arrays
// ----------------------------------------------------------------------------

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::Bool | DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

/// A homogeneous, row-major numeric array stored as little-endian bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NdArray {
    pub fn from_bytes(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, StructuralError> {
        // An unrepresentable byte count can never match; report it as `usize::MAX`.
        let expected = if shape.contains(&0) {
            0
        } else {
            shape
                .iter()
                .try_fold(dtype.size(), |bytes, dim| bytes.checked_mul(*dim))
                .unwrap_or(usize::MAX)
        };
        if expected != data.len() {
            return Err(StructuralError::ShapeMismatch {
                dtype: dtype.name().to_string(),
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(NdArray { dtype, shape, data })
    }

    pub fn from_f64(shape: Vec<usize>, values: &[f64]) -> Result<Self, StructuralError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(DType::F64, shape, data)
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, StructuralError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(DType::F32, shape, data)
    }

    pub fn from_i64(shape: Vec<usize>, values: &[i64]) -> Result<Self, StructuralError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(DType::I64, shape, data)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.dtype.size();
        self.data
            .chunks_exact(size)
            .map(|chunk| match self.dtype {
                DType::Bool | DType::U8 => chunk[0] as f64,
                DType::I32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                DType::F32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                DType::I64 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    i64::from_le_bytes(bytes) as f64
                }
                DType::F64 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    f64::from_le_bytes(bytes)
                }
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Transforms
// ----------------------------------------------------------------------------

type UnboundFn = dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync;
type BoundFn = dyn Fn(&Processor, Value) -> Result<Value, BoxError> + Send + Sync;

#[derive(Clone)]
enum TransformFn {
    Unbound(Arc<UnboundFn>),
    Bound(Arc<BoundFn>),
}

/// A named unary function. The name is its identity for fingerprinting, so
/// two transforms built from the same function under the same name are
/// interchangeable in the cache.
#[derive(Clone)]
pub struct Transform {
    name: Cow<'static, str>,
    func: TransformFn,
}

impl Transform {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Transform {
            name: name.into(),
            func: TransformFn::Unbound(Arc::new(func)),
        }
    }

    /// A transform that also receives the processor it runs in.
    pub fn bound<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&Processor, Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Transform {
            name: name.into(),
            func: TransformFn::Bound(Arc::new(func)),
        }
    }

    pub fn identity() -> Self {
        Transform::new("relaymemo::identity", |input| Ok(input))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.func, TransformFn::Bound(_))
    }

    pub fn apply(&self, processor: &Processor, input: Value) -> Result<Value, BoxError> {
        match &self.func {
            TransformFn::Unbound(func) => func(input),
            TransformFn::Bound(func) => func(processor, input),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Names a fn item by its module path and wraps it as a [`Transform`].
///
/// ```rust
/// use relaymemo::prelude::*;
///
/// fn double(x: Value) -> Result<Value, BoxError> {
///     Ok(Value::Int(x.as_i64().unwrap_or_default() * 2))
/// }
///
/// let t = relaymemo::transform!(double);
/// assert!(t.name().ends_with("::double"));
/// ```
#[macro_export]
macro_rules! transform {
    (bound $func:path) => {
        $crate::Transform::bound(concat!(module_path!(), "::", stringify!($func)), $func)
    };
    ($func:path) => {
        $crate::Transform::new(concat!(module_path!(), "::", stringify!($func)), $func)
    };
}

// ----------------------------------------------------------------------------
// Opaque values
// ----------------------------------------------------------------------------

/// A foreign value carried through a pipeline without inspection.
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Opaque {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_is_checked() {
        let err = NdArray::from_f64(vec![2, 2], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, StructuralError::ShapeMismatch { expected: 32, actual: 24, .. }));
    }

    #[test]
    fn test_oversized_shape_is_a_mismatch() {
        let err = NdArray::from_f64(vec![usize::MAX, 2], &[]).unwrap_err();
        assert!(matches!(err, StructuralError::ShapeMismatch { expected: usize::MAX, actual: 0, .. }));

        let empty = NdArray::from_f64(vec![usize::MAX, 2, 0], &[]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_array_widening() {
        let array = NdArray::from_i64(vec![3], &[1, -2, 3]).unwrap();
        assert_eq!(array.to_f64_vec(), vec![1.0, -2.0, 3.0]);
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_record_equality_respects_order() {
        let a = Value::record([("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = Value::record([("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_ne!(a, b);
        let c = Value::map([("x", Value::Int(1)), ("y", Value::Int(2))]);
        let d = Value::map([("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(c, d);
    }

    #[test]
    fn test_display() {
        let value = Value::tuple([Value::Int(6), Value::tuple([Value::from("a")])]);
        assert_eq!(value.to_string(), "(6, (\"a\",))");
    }

    #[test]
    fn test_plain_values_roundtrip_through_json() {
        let value = Value::tuple([
            Value::Float(0.5),
            Value::record([("k", Value::Int(3))]),
            Value::Array(NdArray::from_f64(vec![1], &[2.0]).unwrap()),
        ]);
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_transforms_do_not_serialize() {
        let value = Value::Transform(Transform::identity());
        assert!(serde_json::to_string(&value).is_err());
    }
}
