use thiserror::Error;

/// Boxed error returned by leaf transforms.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A slot or task was declared, resolved or assigned inconsistently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("slot `{slot}` of `{owner}` expects {expected}, got {actual}")]
    TypeMismatch {
        owner: String,
        slot: String,
        expected: String,
        actual: String,
    },

    #[error("slot `{slot}` of `{owner}` is mandatory but has no value")]
    MissingValue { owner: String, slot: String },

    #[error("`{owner}` has no slot named `{slot}`")]
    UnknownSlot { owner: String, slot: String },

    #[error("`{owner}` accepts at most {max} positional arguments, got {actual}")]
    TooManyPositional {
        owner: String,
        max: usize,
        actual: usize,
    },

    #[error("argument `{slot}` of `{owner}` was given both positionally and by keyword")]
    DuplicateArgument { owner: String, slot: String },

    #[error("task `{slot}` of `{owner}` requires a `{expected}`, got `{actual}`")]
    TaskConstraint {
        owner: String,
        slot: String,
        expected: String,
        actual: String,
    },

    #[error("`{actual}` is not a subclass of `{expected}`")]
    NotASubclass { expected: String, actual: String },
}

/// The shape of a value does not fit the structure it is distributed over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("`{node}` has {expected} children but received {actual} input elements")]
    ArityMismatch {
        node: String,
        expected: usize,
        actual: usize,
    },

    #[error("`{node}` expects input keys {expected:?}, got {actual:?}")]
    KeyMismatch {
        node: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("`{node}` cannot distribute a {actual} over its children without broadcast")]
    NotDistributable { node: String, actual: String },

    #[error("`{node}` index {index} is out of range for an input of length {len}")]
    IndexOutOfRange { node: String, index: i64, len: usize },

    #[error("array of dtype {dtype} and shape {shape:?} needs {expected} bytes, got {actual}")]
    ShapeMismatch {
        dtype: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("`{node}` produced a {actual} where a {expected} was expected")]
    UnexpectedOutput {
        node: String,
        expected: String,
        actual: String,
    },
}

/// The memoization engine met a value it cannot encode canonically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot fingerprint {path}: values of type `{type_name}` have no canonical encoding")]
pub struct UnhashableValueError {
    pub path: String,
    pub type_name: String,
}

/// Failures of a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cache record for key {key}")]
    NotFound { key: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend is poisoned")]
    Poisoned,
}

/// Every error an invocation can end with.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Unhashable(#[from] UnhashableValueError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("`{processor}` has no checkpoint to resume from: {reason}")]
    Checkpoint { processor: String, reason: String },

    /// A leaf transform failed; the error is carried untouched.
    #[error(transparent)]
    Transform(BoxError),
}

impl FlowError {
    /// Wraps a transform failure. Errors that already are a `FlowError`
    /// (raised by nested invocations) are passed through unchanged.
    pub fn from_transform(err: BoxError) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow_error) => *flow_error,
            Err(other) => FlowError::Transform(other),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, FlowError::Configuration(_))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, FlowError::Structural(_))
    }

    pub fn is_unhashable(&self) -> bool {
        matches!(self, FlowError::Unhashable(_))
    }
}
