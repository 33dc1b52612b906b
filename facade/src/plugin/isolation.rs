//! Plugin Isolation and Panic Safety
//!
//! Every call into plugin code (constructors, name enumeration,
//! instantiation, component callbacks) goes through `catch_unwind`. Panics
//! are converted to errors so a faulty module cannot take the host down.
//!
//! # Safety Considerations
//!
//! - `catch_unwind` only catches panics, not aborts
//! - Host and plugins must not be built with `panic = "abort"`

use std::any::Any;
use std::panic::{UnwindSafe, catch_unwind};

/// A plugin call panicked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("plugin panicked: {0}")]
pub struct PluginPanic(pub String);

/// Call a plugin function, preserving its error type.
///
/// Panics are caught and converted with `panic_to_error`.
///
/// # Example
///
/// ```ignore
/// let pattern = call_plugin_preserving_error(
///     AssertUnwindSafe(|| plugin.instantiate_pattern(name)),
///     |msg| PluginError::Instantiation { name: name.into(), reason: msg },
/// )?;
/// ```
pub fn call_plugin_preserving_error<F, T, E, PC>(plugin_fn: F, panic_to_error: PC) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + UnwindSafe,
    PC: FnOnce(String) -> E,
{
    match catch_unwind(plugin_fn) {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked");
            Err(panic_to_error(msg))
        }
    }
}

/// Call a plugin function that returns a value directly (no Result).
pub fn call_plugin_value<F, T>(plugin_fn: F) -> Result<T, PluginPanic>
where
    F: FnOnce() -> T + UnwindSafe,
{
    match catch_unwind(plugin_fn) {
        Ok(result) => Ok(result),
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked");
            Err(PluginPanic(msg))
        }
    }
}

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}
