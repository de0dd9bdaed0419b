//! Telemetry for the security layer.
//!
//! Structured logging initialization plus one-line guard events for
//! enforcement decisions and fallback activations.

mod events;
mod logging;

pub use events::{log_guard_event, GuardEvent, GuardSeverity};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
