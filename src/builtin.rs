//! Reference-quality context/watcher/reporter implementations that exercise
//! the capsule-item contract end to end. These are useful on their own, but
//! they are not an exhaustive catalog: git/platform/cpu/file-hash/command
//! contexts and chat-notification reporters remain external collaborators.

use crate::capsule::{Capsule, ExceptionInfo};
use crate::item::{CaptureError, Context, Reporter, Watcher, WatcherScope};
use crate::key::Key;
use crate::outcome::PanicState;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Records the name of the routine a [`crate::Run`] is executing, keyed
/// `("function", "call")`. Automatically added to the in-run encapsulator of
/// every function-bound run.
///
/// By the time a Rust closure reaches [`crate::Run`], its arguments are
/// already bound into the closure and are no longer individually
/// observable, so only the routine's name is recorded here.
#[derive(Debug)]
pub struct FunctionCallContext {
    exec_name: String,
}

impl FunctionCallContext {
    pub(crate) fn new(exec_name: impl Into<String>) -> Self {
        Self { exec_name: exec_name.into() }
    }
}

impl Context for FunctionCallContext {
    fn encapsulate(&mut self) -> Result<Value, CaptureError> {
        Ok(serde_json::json!({ "name": self.exec_name }))
    }

    fn default_key(&self) -> Key {
        Key::Tuple(vec!["function".to_owned(), "call".to_owned()])
    }
}

/// Wraps an already-computed value as a one-shot [`Context`].
/// [`crate::Encapsulator::record`] uses this so ambient `record()` can reuse
/// the ordinary item pipeline instead of a separate code path.
#[derive(Debug)]
pub(crate) struct ObjectContext(Option<Value>);

impl ObjectContext {
    pub(crate) fn new(value: Value) -> Self {
        Self(Some(value))
    }
}

impl Context for ObjectContext {
    fn encapsulate(&mut self) -> Result<Value, CaptureError> {
        Ok(self.0.take().unwrap_or(Value::Null))
    }

    fn default_key(&self) -> Key {
        Key::from("recorded")
    }
}

/// Times the bracketed region, recording the elapsed duration in seconds
/// under `("time", name)`.
#[derive(Debug)]
pub struct TimeWatcher {
    name: String,
    duration: Arc<Mutex<Option<Duration>>>,
}

impl TimeWatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), duration: Arc::new(Mutex::new(None)) }
    }
}

impl Watcher for TimeWatcher {
    fn encapsulate(&mut self) -> Result<Value, CaptureError> {
        let duration = *self.duration.lock().expect("TimeWatcher duration lock poisoned");
        Ok(duration.map_or(Value::Null, |d| serde_json::json!(d.as_secs_f64())))
    }

    fn default_key(&self) -> Key {
        Key::Tuple(vec!["time".to_owned(), self.name.clone()])
    }

    fn watch(&self) -> Box<dyn WatcherScope> {
        Box::new(TimeScope { name: self.name.clone(), start: Instant::now(), duration: self.duration.clone() })
    }
}

struct TimeScope {
    name: String,
    start: Instant,
    duration: Arc<Mutex<Option<Duration>>>,
}

impl WatcherScope for TimeScope {
    fn exit(&mut self, _outcome: Option<&PanicState>) -> bool {
        let elapsed = self.start.elapsed();
        tracing::debug!(name = %self.name, ?elapsed, "TimeWatcher teardown");
        *self.duration.lock().expect("TimeWatcher duration lock poisoned") = Some(elapsed);
        false
    }
}

/// Observes whether the bracketed region panicked, recording an
/// [`ExceptionInfo`] under `("exception", name)` when it did. Never marks a
/// panic "handled" for later watchers in the same [`crate::WatcherGroup`]:
/// this watcher only observes, it does not suppress.
#[derive(Debug)]
pub struct UncaughtExceptionWatcher {
    name: String,
    exception: Arc<Mutex<Option<ExceptionInfo>>>,
}

impl UncaughtExceptionWatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), exception: Arc::new(Mutex::new(None)) }
    }
}

impl Watcher for UncaughtExceptionWatcher {
    fn encapsulate(&mut self) -> Result<Value, CaptureError> {
        let exception = self.exception.lock().expect("UncaughtExceptionWatcher lock poisoned").clone();
        match exception {
            Some(info) => Ok(serde_json::to_value(info).expect("ExceptionInfo serializes")),
            None => Ok(Value::Null),
        }
    }

    fn default_key(&self) -> Key {
        Key::Tuple(vec!["exception".to_owned(), self.name.clone()])
    }

    fn watch(&self) -> Box<dyn WatcherScope> {
        Box::new(UncaughtExceptionScope { name: self.name.clone(), exception: self.exception.clone() })
    }
}

struct UncaughtExceptionScope {
    name: String,
    exception: Arc<Mutex<Option<ExceptionInfo>>>,
}

impl WatcherScope for UncaughtExceptionScope {
    fn exit(&mut self, outcome: Option<&PanicState>) -> bool {
        if let Some(panic) = outcome {
            tracing::debug!(name = %self.name, "UncaughtExceptionWatcher caught a panic");
            *self.exception.lock().expect("UncaughtExceptionWatcher lock poisoned") = Some(panic.exception_info());
        }
        false
    }
}

/// Dumps a capsule's nested data as JSON to `path`, placing any
/// non-aborting capture failures under an `"__fails"` key.
#[derive(Debug)]
pub struct JsonDumpReporter {
    path: PathBuf,
}

impl JsonDumpReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for JsonDumpReporter {
    fn report(&mut self, capsule: &Capsule) -> Result<(), CaptureError> {
        let mut nested = capsule.nested_data()?;
        if !capsule.fails().is_empty() {
            let fails = crate::key::nest(
                capsule.fails().iter().map(|(k, v)| (k.clone(), serde_json::to_value(v).expect("ExceptionInfo serializes"))),
            )?;
            if let Value::Object(ref mut map) = nested {
                map.insert("__fails".to_owned(), fails);
            }
        }
        let bytes = serde_json::to_vec_pretty(&nested)?;
        std::fs::write(&self.path, bytes)?;
        tracing::debug!(path = %self.path.display(), "JsonDumpReporter wrote capsule");
        Ok(())
    }
}
