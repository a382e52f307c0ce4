pub mod error;
pub mod slot;
pub mod sync_impl;
pub mod telemetry;
pub mod validation;
pub mod value;
