//! Canonical encoding of processors and values into a content fingerprint.
//!
//! Every value is written as a one-byte tag followed by its payload; strings,
//! byte buffers and collections are length-prefixed so that no two distinct
//! values share an encoding. The encoding is streamed straight into a
//! `blake3::Hasher`, nothing is buffered.

use crate::core::error::UnhashableValueError;
use crate::core::sync_impl::processor::Processor;
use crate::core::value::Value;
use blake3::Hasher;
use std::fmt;

/// Bumped whenever the encoding changes, so old cache records stop matching.
const ENCODING_VERSION: &[u8] = b"relaymemo/fingerprint/v1";

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_TUPLE: u8 = 5;
const TAG_RECORD: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_ARRAY: u8 = 8;
const TAG_TRANSFORM: u8 = 9;
const TAG_PROCESSOR: u8 = 10;
const TAG_UNSET: u8 = 11;

/// A 256-bit content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        CacheKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses the 64-character hex form produced by `Display`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(|hash| CacheKey(*hash.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from_bytes(self.0).to_hex())
    }
}

/// The cache key of `processor` invoked on `input`: its class identity, its
/// resolved parameters in declaration order, and the input.
///
/// Attached collaborators (cache, telemetry) and checkpoint data do not
/// take part.
pub fn fingerprint(processor: &Processor, input: &Value) -> Result<CacheKey, UnhashableValueError> {
    let mut encoder = Encoder::new();
    encoder.processor(processor, true)?;
    encoder.value(input).map_err(|err| err.under("input"))?;
    Ok(encoder.finish())
}

/// Digest of a single value, without any processor.
pub fn fingerprint_value(value: &Value) -> Result<CacheKey, UnhashableValueError> {
    let mut encoder = Encoder::new();
    encoder.value(value).map_err(|err| err.under("value"))?;
    Ok(encoder.finish())
}

impl UnhashableValueError {
    /// Prefixes the path with the segment of the enclosing value.
    fn under(self, segment: &str) -> Self {
        UnhashableValueError {
            path: format!("{}{}", segment, self.path),
            ..self
        }
    }
}

struct Encoder {
    hasher: Hasher,
}

impl Encoder {
    fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(ENCODING_VERSION);
        Encoder { hasher }
    }

    fn finish(self) -> CacheKey {
        CacheKey(*self.hasher.finalize().as_bytes())
    }

    fn tag(&mut self, tag: u8) {
        self.hasher.update(&[tag]);
    }

    fn count(&mut self, n: usize) {
        self.hasher.update(&(n as u64).to_le_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.count(bytes.len());
        self.hasher.update(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    /// Class name, then every slot as (name, value). Failing paths read
    /// "param `name`..." for the fingerprinted processor itself and ".name"
    /// for processors nested in its params.
    fn processor(&mut self, processor: &Processor, top_level: bool) -> Result<(), UnhashableValueError> {
        self.tag(TAG_PROCESSOR);
        self.str(processor.class().name());
        let params = processor.params();
        self.count(params.class().slots().len());
        for (slot, value) in params.iter() {
            self.str(slot.name());
            match value {
                Some(value) => self
                    .value(value)
                    .map_err(|err| {
                        if top_level {
                            err.under(&format!("param `{}`", slot.name()))
                        } else {
                            err.under(&format!(".{}", slot.name()))
                        }
                    })?,
                None => self.tag(TAG_UNSET),
            }
        }
        Ok(())
    }

    /// Paths in errors are relative: "", "[2]", ".key", "[0].key".
    fn value(&mut self, value: &Value) -> Result<(), UnhashableValueError> {
        match value {
            Value::Null => self.tag(TAG_NULL),
            Value::Bool(b) => {
                self.tag(TAG_BOOL);
                self.hasher.update(&[*b as u8]);
            }
            Value::Int(i) => {
                self.tag(TAG_INT);
                self.hasher.update(&i.to_le_bytes());
            }
            Value::Float(x) => {
                // Verbatim bits: 0.0 and -0.0 are different keys.
                self.tag(TAG_FLOAT);
                self.hasher.update(&x.to_bits().to_le_bytes());
            }
            Value::Str(s) => {
                self.tag(TAG_STR);
                self.str(s);
            }
            Value::Tuple(items) => {
                self.tag(TAG_TUPLE);
                self.count(items.len());
                for (index, item) in items.iter().enumerate() {
                    self.value(item)
                        .map_err(|err| err.under(&format!("[{}]", index)))?;
                }
            }
            Value::Record(entries) => {
                self.tag(TAG_RECORD);
                self.count(entries.len());
                for (key, item) in entries {
                    self.str(key);
                    self.value(item)
                        .map_err(|err| err.under(&format!(".{}", key)))?;
                }
            }
            Value::Map(entries) => {
                self.tag(TAG_MAP);
                self.count(entries.len());
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                for key in keys {
                    self.str(key);
                    self.value(&entries[key])
                        .map_err(|err| err.under(&format!(".{}", key)))?;
                }
            }
            Value::Array(array) => {
                self.tag(TAG_ARRAY);
                self.str(array.dtype().name());
                self.count(array.shape().len());
                for dim in array.shape() {
                    self.count(*dim);
                }
                self.bytes(array.as_bytes());
            }
            Value::Transform(transform) => {
                self.tag(TAG_TRANSFORM);
                self.str(transform.name());
            }
            Value::Processor(processor) => self.processor(processor, false)?,
            Value::Opaque(opaque) => {
                return Err(UnhashableValueError {
                    path: String::new(),
                    type_name: opaque.type_name().to_string(),
                });
            }
        }
        Ok(())
    }
}
