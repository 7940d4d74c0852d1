//! Ambient lookups against the thread-local run/encapsulator stacks.
//!
//! These let user code inside a routine contribute to the in-run capsule, or
//! ask what run it's executing under, without holding an explicit handle to
//! either. Both stacks are per-thread; nothing here is visible across
//! threads, and a `Run` started on one thread never inherits the stack of
//! another.

use crate::key::Key;
use crate::CapsulaError;
use serde_json::Value;

/// Records `value` under `key` in the current thread's ambient
/// [`crate::Encapsulator`]. Sugar for wrapping `value` in a trivial context
/// and adding it.
///
/// Fails with [`CapsulaError::NoEncapsulator`] if no encapsulator is active
/// on this thread — in practice, if called outside a routine running under
/// [`crate::Run`].
pub fn record(key: Key, value: Value) -> Result<(), CapsulaError> {
    crate::encapsulator::record(key, value)
}

/// Returns the name of the run currently executing on this thread.
///
/// Fails with [`CapsulaError::NoRun`] if no [`crate::Run`] is active on this
/// thread.
pub fn current_run_name() -> Result<String, CapsulaError> {
    crate::run::current_run_name()
}

/// Returns the names of every run currently active on this thread, outermost
/// first. A cheap diagnostic dump of the run stack; there is ordinarily at
/// most one entry unless a routine itself triggers a nested `Run`.
pub fn debug_current_runs() -> Vec<String> {
    crate::run::debug_current_runs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_run_name_outside_run_errors() {
        assert!(matches!(current_run_name().unwrap_err(), CapsulaError::NoRun));
    }

    #[test]
    fn debug_current_runs_is_empty_outside_run() {
        assert!(debug_current_runs().is_empty());
    }
}
