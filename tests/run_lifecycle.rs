//! End-to-end lifecycle scenarios: successful runs, panicking routines,
//! non-zero command exits, key conflicts, folded capture failures, and
//! watcher teardown order.

use capsula::builders::{ContextMode, ReporterMode, RunBuilder};
use capsula::builtin::{TimeWatcher, UncaughtExceptionWatcher};
use capsula::item::{CaptureError, Context, ItemBuilder, Reporter, Watcher, WatcherScope};
use capsula::{Capsule, CapsulaError, Key, PanicState};
use std::sync::{Arc, Mutex};

/// Records every capsule it's handed, in call order, for assertions that
/// need to inspect what a reporter actually saw instead of a file on disk.
#[derive(Debug, Clone, Default)]
struct RecordingReporter {
    seen: Arc<Mutex<Vec<Capsule>>>,
}

impl RecordingReporter {
    fn new() -> Self {
        Self::default()
    }

    fn capsules(&self) -> Vec<Capsule> {
        self.seen.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, capsule: &Capsule) -> Result<(), CaptureError> {
        self.seen.lock().unwrap().push(capsule.clone());
        Ok(())
    }
}

#[test]
fn successful_function_run_reports_three_times_and_times_execution() {
    let tmp = tempfile::tempdir().unwrap();
    let reporter = RecordingReporter::new();

    let sum = RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .watcher(ItemBuilder::instance(|| Box::new(TimeWatcher::new("execution_time"))))
        .reporter(
            {
                let reporter = reporter.clone();
                ItemBuilder::instance(move || Box::new(reporter.clone()))
            },
            ReporterMode::All,
        )
        .build_fn(tmp.path().to_path_buf(), "add", |_pre_capsule| 2 + 3)
        .unwrap()
        .call()
        .unwrap();

    assert_eq!(sum, 5);

    let capsules = reporter.capsules();
    assert_eq!(capsules.len(), 3, "expected pre, in, and post reports");

    let in_run = &capsules[1];
    let duration = in_run.get(&Key::Tuple(vec!["time".into(), "execution_time".into()])).unwrap().as_f64().unwrap();
    assert!(duration >= 0.0);
}

#[test]
fn routine_panic_is_resumed_after_post_run_capture() {
    let tmp = tempfile::tempdir().unwrap();
    let reporter = RecordingReporter::new();

    let run = RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .watcher(ItemBuilder::instance(|| Box::new(UncaughtExceptionWatcher::new("exception"))))
        .reporter(
            {
                let reporter = reporter.clone();
                ItemBuilder::instance(move || Box::new(reporter.clone()))
            },
            ReporterMode::All,
        )
        .build_fn(tmp.path().to_path_buf(), "fails_always", |_pre_capsule: Option<&Capsule>| -> i32 {
            panic!("boom")
        })
        .unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run.call()));
    let payload = result.expect_err("the panic must propagate out of the Run");
    let message = payload.downcast_ref::<&str>().copied().or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    assert_eq!(message, Some("boom"));

    let capsules = reporter.capsules();
    assert_eq!(capsules.len(), 3);

    let in_run = &capsules[1];
    let exception = in_run.get(&Key::Tuple(vec!["exception".into(), "exception".into()])).unwrap();
    assert_eq!(exception["message"], serde_json::json!("boom"));

    // post-run reporter was invoked exactly once.
    assert_eq!(capsules.iter().filter(|_| true).count(), 3);
}

#[test]
fn command_run_with_non_zero_exit_does_not_raise() {
    let tmp = tempfile::tempdir().unwrap();

    let outcome = RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .build_command(tmp.path().to_path_buf(), vec!["sh".to_owned(), "-c".to_owned(), "exit 3".to_owned()])
        .unwrap()
        .call()
        .unwrap();

    assert_eq!(outcome.exit_code, Some(3));
    assert!(outcome.stdout.is_empty());
    assert!(outcome.stderr.is_empty());
}

#[derive(Debug)]
#[derive(Clone)]
struct AlwaysFails;

impl Context for AlwaysFails {
    fn encapsulate(&mut self) -> Result<serde_json::Value, CaptureError> {
        Err("flaky capture".into())
    }

    fn default_key(&self) -> Key {
        Key::from("flaky")
    }

    fn abort_on_error(&self) -> bool {
        false
    }
}

#[test]
fn non_abort_context_failure_is_folded_into_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let reporter = RecordingReporter::new();

    RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .context_instance(AlwaysFails, ContextMode::Pre)
        .reporter(
            {
                let reporter = reporter.clone();
                ItemBuilder::instance(move || Box::new(reporter.clone()))
            },
            ReporterMode::Pre,
        )
        .build_fn(tmp.path().to_path_buf(), "noop", |_| ())
        .unwrap()
        .call()
        .unwrap();

    let pre_run = &reporter.capsules()[0];
    assert!(pre_run.fails().contains_key(&Key::from("flaky")));
    assert!(!pre_run.data().contains_key(&Key::from("flaky")));
}

#[test]
fn key_conflict_is_rejected_at_addition_time() {
    let tmp = tempfile::tempdir().unwrap();

    #[derive(Debug, Clone)]
    struct Cwd;
    impl Context for Cwd {
        fn encapsulate(&mut self) -> Result<serde_json::Value, CaptureError> {
            Ok(serde_json::json!("/tmp"))
        }
        fn default_key(&self) -> Key {
            Key::from("cwd")
        }
    }

    let run = RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .context_instance(Cwd, ContextMode::Pre)
        .context_instance(Cwd, ContextMode::Pre)
        .build_fn(tmp.path().to_path_buf(), "noop", |_| ())
        .unwrap();

    let err = run.call().unwrap_err();
    assert!(matches!(err, CapsulaError::KeyConflict { key } if key == Key::from("cwd")));
}

#[test]
fn ambient_record_outside_run_errors() {
    let err = capsula::ambient::record(Key::from("k"), serde_json::json!(1)).unwrap_err();
    assert!(matches!(err, CapsulaError::NoEncapsulator));
}

#[derive(Debug)]
struct LoggingWatcher {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

struct LoggingScope {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl WatcherScope for LoggingScope {
    fn exit(&mut self, _outcome: Option<&PanicState>) -> bool {
        self.log.lock().unwrap().push(self.name);
        false
    }
}

impl Watcher for LoggingWatcher {
    fn encapsulate(&mut self) -> Result<serde_json::Value, CaptureError> {
        Ok(serde_json::Value::Null)
    }

    fn default_key(&self) -> Key {
        Key::from(self.name)
    }

    fn watch(&self) -> Box<dyn WatcherScope> {
        Box::new(LoggingScope { name: self.name, log: self.log.clone() })
    }
}

#[test]
fn watchers_tear_down_in_insertion_order() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    RunBuilder::new()
        .vault_dir(tmp.path().join("vault").to_str().unwrap())
        .watcher(ItemBuilder::instance({
            let log = log.clone();
            move || Box::new(LoggingWatcher { name: "a", log: log.clone() })
        }))
        .watcher(ItemBuilder::instance({
            let log = log.clone();
            move || Box::new(LoggingWatcher { name: "b", log: log.clone() })
        }))
        .watcher(ItemBuilder::instance({
            let log = log.clone();
            move || Box::new(LoggingWatcher { name: "c", log: log.clone() })
        }))
        .build_fn(tmp.path().to_path_buf(), "noop", |_| ())
        .unwrap()
        .call()
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
}
