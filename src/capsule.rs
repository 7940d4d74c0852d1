//! The immutable snapshot an [`crate::Encapsulator`] produces.

use crate::key::Key;
use serde_json::Value;
use std::collections::HashMap;

/// A descriptive, never-reraised record of a capture failure. Capsula never
/// re-throws these; they exist purely so a reporter can describe what went
/// wrong.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExceptionInfo {
    /// The concrete error type's name, best-effort (`std::any::type_name`
    /// for typed failures; a description of the panic payload's type for
    /// caught panics).
    pub type_name: String,
    /// The error's `Display` rendering.
    pub message: String,
    /// A human-readable location/backtrace string, when available. Never
    /// guaranteed to be non-empty.
    pub traceback_text: String,
}

impl ExceptionInfo {
    /// Builds an `ExceptionInfo` from any `std::error::Error`.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>().to_owned(),
            message: err.to_string(),
            traceback_text: String::new(),
        }
    }

    /// Builds an `ExceptionInfo` describing a caught panic payload.
    pub fn from_panic_payload(payload: &(dyn std::any::Any + Send), location: Option<&str>) -> Self {
        let (type_name, message) = if let Some(s) = payload.downcast_ref::<&str>() {
            ("&str".to_owned(), (*s).to_owned())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            ("alloc::string::String".to_owned(), s.clone())
        } else {
            ("dyn core::any::Any".to_owned(), "non-string panic payload".to_owned())
        };
        Self {
            type_name,
            message,
            traceback_text: location.unwrap_or_default().to_owned(),
        }
    }
}

/// The immutable result of one [`crate::Encapsulator::encapsulate`] call:
/// a mapping from item key to captured value, plus a mapping from key to
/// failure record for items whose capture failed without aborting the
/// phase. `data` and `fails` are always disjoint.
#[derive(Debug, Clone, Default)]
pub struct Capsule {
    data: HashMap<Key, Value>,
    fails: HashMap<Key, ExceptionInfo>,
}

impl Capsule {
    pub(crate) fn new(data: HashMap<Key, Value>, fails: HashMap<Key, ExceptionInfo>) -> Self {
        debug_assert!(
            data.keys().all(|k| !fails.contains_key(k)),
            "data and fails must be disjoint"
        );
        Self { data, fails }
    }

    /// Successfully captured values, keyed by capsule item key.
    pub fn data(&self) -> &HashMap<Key, Value> {
        &self.data
    }

    /// Failure records for non-aborting captures that errored, keyed by
    /// capsule item key.
    pub fn fails(&self) -> &HashMap<Key, ExceptionInfo> {
        &self.fails
    }

    /// Looks up a single captured value by key.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.data.get(key)
    }

    /// Converts this capsule's `data` into the nested JSON shape a
    /// reporter would typically serialize, via [`crate::key::nest`].
    pub fn nested_data(&self) -> Result<Value, crate::key::KeyConflict> {
        crate::key::nest(self.data.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_and_fails_are_disjoint_by_construction() {
        let mut data = HashMap::new();
        data.insert(Key::from("cwd"), json!("/tmp"));
        let mut fails = HashMap::new();
        fails.insert(
            Key::from("flaky"),
            ExceptionInfo {
                type_name: "X".into(),
                message: "boom".into(),
                traceback_text: String::new(),
            },
        );
        let capsule = Capsule::new(data, fails);
        assert!(capsule.data().keys().all(|k| !capsule.fails().contains_key(k)));
    }

    #[test]
    fn nested_data_round_trips_through_key_nesting() {
        let mut data = HashMap::new();
        data.insert(Key::from(["git", "sha"]), json!("abc123"));
        data.insert(Key::from("cwd"), json!("/tmp"));
        let capsule = Capsule::new(data, HashMap::new());
        let nested = capsule.nested_data().unwrap();
        assert_eq!(nested["git"]["sha"], json!("abc123"));
        assert_eq!(nested["cwd"], json!("/tmp"));
    }
}
