use crate::memo::CacheKey;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether a memoized invocation was answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// A single entry in the cache trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Class name of the invoked processor
    pub class: String,
    /// Hex form of the cache key
    pub key: String,
    pub outcome: CacheOutcome,
}

impl TraceEntry {
    pub fn new(class: &str, key: &CacheKey, outcome: CacheOutcome) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self {
            timestamp,
            class: class.to_string(),
            key: key.to_string(),
            outcome,
        }
    }
}

/// Trait for recording cache traces. Never consulted when computing keys.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self);
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, outcome: CacheOutcome) -> usize {
        self.traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .count()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    fn flush(&self) {
        // No-op for memory collector
    }
}
