use crate::core::error::CacheError;
use crate::core::value::Value;
use crate::memo::fingerprint::CacheKey;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Key-value store the memoization engine reads and writes through.
///
/// `write` must behave as put-if-absent: when a record for the key already
/// exists it is kept. Implementations shared across threads are responsible
/// for making that atomic.
pub trait CacheBackend: Send + Sync {
    fn exists(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Fails with [`CacheError::NotFound`] if there is no record.
    fn read(&self, key: &CacheKey) -> Result<Value, CacheError>;

    fn write(&self, key: &CacheKey, value: &Value) -> Result<(), CacheError>;

    /// Removes a record. Returns whether one existed.
    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError>;
}

/// Process-local cache; records live as long as the cache.
#[derive(Default)]
pub struct MemoryCache {
    records: RwLock<HashMap<CacheKey, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.records.write().map_err(|_| CacheError::Poisoned)?.clear();
        Ok(())
    }
}

impl CacheBackend for MemoryCache {
    fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let records = self.records.read().map_err(|_| CacheError::Poisoned)?;
        Ok(records.contains_key(key))
    }

    fn read(&self, key: &CacheKey) -> Result<Value, CacheError> {
        let records = self.records.read().map_err(|_| CacheError::Poisoned)?;
        records.get(key).cloned().ok_or_else(|| CacheError::NotFound {
            key: key.to_string(),
        })
    }

    fn write(&self, key: &CacheKey, value: &Value) -> Result<(), CacheError> {
        let mut records = self.records.write().map_err(|_| CacheError::Poisoned)?;
        records.entry(*key).or_insert_with(|| value.clone());
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut records = self.records.write().map_err(|_| CacheError::Poisoned)?;
        Ok(records.remove(key).is_some())
    }
}

/// One JSON file per record, named `<hex key>.json`, in a single directory.
///
/// Records are written to a uniquely named temporary file first and then
/// renamed into place, so readers never observe a partial record.
/// Transforms, processors and opaque values cannot be stored.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileCache { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Keys of all stored records, sorted.
    pub fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(key) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(CacheKey::from_hex)
                {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl CacheBackend for FileCache {
    fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.path(key).is_file())
    }

    fn read(&self, key: &CacheKey) -> Result<Value, CacheError> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &CacheKey, value: &Value) -> Result<(), CacheError> {
        let path = self.path(key);
        if path.exists() {
            log::warn!(
                "Cache record {} already exists in {}, keeping the stored value.",
                key,
                self.dir.display()
            );
            return Ok(());
        }

        // JSON has no NaN or infinity; serde_json would write `null` and the
        // record could never be read back.
        if let Some(path) = non_finite_float(value, String::new()) {
            return Err(CacheError::Serialization(serde::ser::Error::custom(format!(
                "non-finite float at `value{}` cannot be stored as JSON",
                path
            ))));
        }

        // Serialize before touching the disk so a rejected value leaves nothing behind.
        let text = serde_json::to_string(value)?;
        let temp = self.dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        fs::write(&temp, text)?;
        if let Err(err) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Path of the first NaN or infinite float inside `value`, if any.
fn non_finite_float(value: &Value, path: String) -> Option<String> {
    match value {
        Value::Float(x) if !x.is_finite() => Some(path),
        Value::Tuple(items) => items
            .iter()
            .enumerate()
            .find_map(|(index, item)| non_finite_float(item, format!("{}[{}]", path, index))),
        Value::Record(entries) => entries
            .iter()
            .find_map(|(key, item)| non_finite_float(item, format!("{}.{}", path, key))),
        Value::Map(entries) => entries
            .iter()
            .find_map(|(key, item)| non_finite_float(item, format!("{}.{}", path, key))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{NdArray, Transform};

    fn key(byte: u8) -> CacheKey {
        CacheKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_memory_cache_put_if_absent() {
        let cache = MemoryCache::new();
        assert!(!cache.exists(&key(1)).unwrap());
        assert!(matches!(cache.read(&key(1)), Err(CacheError::NotFound { .. })));

        cache.write(&key(1), &Value::Int(1)).unwrap();
        cache.write(&key(1), &Value::Int(2)).unwrap();
        assert_eq!(cache.read(&key(1)).unwrap(), Value::Int(1));

        assert!(cache.invalidate(&key(1)).unwrap());
        assert!(!cache.invalidate(&key(1)).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path().join("records")).unwrap();
        let value = Value::tuple([
            Value::Float(1.5),
            Value::Array(NdArray::from_i64(vec![2], &[3, 4]).unwrap()),
        ]);

        cache.write(&key(9), &value).unwrap();
        assert!(cache.exists(&key(9)).unwrap());
        assert_eq!(cache.read(&key(9)).unwrap(), value);
        assert_eq!(cache.keys().unwrap(), vec![key(9)]);

        assert!(cache.invalidate(&key(9)).unwrap());
        assert!(matches!(cache.read(&key(9)), Err(CacheError::NotFound { .. })));
    }

    #[test]
    fn test_file_cache_rejects_transforms_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let err = cache
            .write(&key(3), &Value::Transform(Transform::identity()))
            .unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_file_cache_floats_are_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();

        // xorshift over the raw bits covers every exponent range.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut floats = Vec::new();
        while floats.len() < 2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let x = f64::from_bits(state);
            if x.is_finite() {
                floats.push(Value::Float(x));
            }
        }
        floats.push(Value::Float(0.00021637569735948026));
        floats.push(Value::Float(-0.0));

        for (index, value) in floats.iter().enumerate() {
            cache.write(&key((index % 251) as u8), value).unwrap();
            let back = cache.read(&key((index % 251) as u8)).unwrap();
            match (value, &back) {
                (Value::Float(a), Value::Float(b)) => assert_eq!(a.to_bits(), b.to_bits(), "{}", a),
                _ => panic!("expected a float, got {}", back),
            }
            cache.invalidate(&key((index % 251) as u8)).unwrap();
        }
    }

    #[test]
    fn test_file_cache_rejects_non_finite_floats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        for value in [
            Value::Float(f64::NAN),
            Value::tuple([Value::Int(1), Value::Float(f64::INFINITY)]),
            Value::record([("low", Value::Float(f64::NEG_INFINITY))]),
        ] {
            let err = cache.write(&key(4), &value).unwrap_err();
            assert!(matches!(err, CacheError::Serialization(_)));
            assert!(!cache.exists(&key(4)).unwrap());
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
