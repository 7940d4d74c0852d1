//! The "exception state" a [`crate::WatcherGroup`] hands to watcher scopes
//! on exit: a routine raising an exception is modeled here as the routine
//! panicking.

use crate::capsule::ExceptionInfo;
use std::any::Any;

/// A caught panic payload, carried through watcher teardown so scopes can
/// observe what happened without taking ownership of it.
pub struct PanicState {
    payload: Box<dyn Any + Send>,
    location: Option<String>,
}

impl PanicState {
    pub(crate) fn new(payload: Box<dyn Any + Send>, location: Option<String>) -> Self {
        Self { payload, location }
    }

    /// Describes this panic the way a failure record would.
    pub fn exception_info(&self) -> ExceptionInfo {
        ExceptionInfo::from_panic_payload(self.payload.as_ref(), self.location.as_deref())
    }

    /// Attempts to view the payload as a `&str` or `String` message.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&str>() {
            Some(s)
        } else {
            self.payload.downcast_ref::<String>().map(String::as_str)
        }
    }

    pub(crate) fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl std::fmt::Debug for PanicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicState").field("message", &self.message()).finish()
    }
}
