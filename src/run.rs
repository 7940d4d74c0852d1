//! The `Run` orchestrator: drives a routine through pre-run, in-run, and
//! post-run phases around a user function or an external command.

use crate::capsule::Capsule;
use crate::encapsulator::Encapsulator;
use crate::key::Key;
use crate::params::{CapsuleParams, ExecInfo, Phase};
use crate::run_spec::RunSpec;
use crate::{vault, CapsulaError};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Mutex, OnceLock};

thread_local! {
    /// Names of the runs currently executing on this thread, outermost
    /// first. Narrowed to just the run name since that's all
    /// [`current_run_name`]/[`debug_current_runs`] need to expose.
    static RUN_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with `run_name` pushed onto this thread's run-name stack,
/// popping it back off on every exit path, including a panic inside `f`.
fn enter_run<R>(run_name: &str, f: impl FnOnce() -> R) -> R {
    RUN_STACK.with(|stack| stack.borrow_mut().push(run_name.to_owned()));
    let _restore = scopeguard::guard((), |()| {
        RUN_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    });
    f()
}

/// See [`crate::ambient::current_run_name`].
pub(crate) fn current_run_name() -> Result<String, CapsulaError> {
    RUN_STACK.with(|stack| stack.borrow().last().cloned()).ok_or(CapsulaError::NoRun)
}

/// See [`crate::ambient::debug_current_runs`].
pub(crate) fn debug_current_runs() -> Vec<String> {
    RUN_STACK.with(|stack| stack.borrow().clone())
}

fn panic_location_cell() -> &'static Mutex<Option<String>> {
    static CELL: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(None))
}

/// Runs `f`, temporarily installing a panic hook that records the panic's
/// source location instead of printing to stderr, restoring the previous
/// hook afterward even if `f` itself unwinds (grounded on the same
/// `scopeguard`-restore-on-exit shape used for the ambient encapsulator
/// stack). The hook is process-wide for its duration, so overlapping
/// concurrent runs across threads may observe each other's locations; single
/// runs on a thread see their own.
fn with_captured_panic_location<R>(f: impl FnOnce() -> R) -> (R, Option<String>) {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|info| {
        *panic_location_cell().lock().expect("panic location lock poisoned") = info.location().map(ToString::to_string);
    }));
    let _restore = scopeguard::guard(prev_hook, |prev| {
        std::panic::set_hook(prev);
    });
    let result = f();
    let location = panic_location_cell().lock().expect("panic location lock poisoned").take();
    (result, location)
}

fn build_encapsulator(spec: &RunSpec, phase: Phase, params: &CapsuleParams) -> Result<Rc<RefCell<Encapsulator>>, CapsulaError> {
    let mut enc = Encapsulator::new();
    for (key, builder) in spec.contexts_for(phase) {
        enc.add_context(key.clone(), builder.build(params))?;
    }
    for (key, builder) in spec.watchers_for(phase) {
        enc.add_watcher(key.clone(), builder.build(params))?;
    }
    Ok(Rc::new(RefCell::new(enc)))
}

/// Runs every reporter staged for `phase`. A failing reporter is fatal only
/// when `fatal` is set; otherwise it's logged and the remaining reporters
/// still run. Pre-run reporter failures are fatal; in-run and post-run
/// failures are not, since by that point a capsule worth reporting already
/// exists.
fn run_reporters(spec: &RunSpec, phase: Phase, params: &CapsuleParams, capsule: &Capsule, fatal: bool) -> Result<(), CapsulaError> {
    for builder in spec.reporters_for(phase) {
        let mut reporter = builder.build(params);
        if let Err(source) = reporter.report(capsule) {
            if fatal {
                return Err(CapsulaError::CaptureFailure { key: Key::from("reporter"), source });
            }
            tracing::warn!(phase = ?phase, error = %source, "reporter failed, continuing");
        }
    }
    Ok(())
}

/// Resolves the run's vault directory, generates its run name and
/// directory, and bootstraps both.
///
/// The random suffix and timestamp are generated exactly once here, per
/// spec's run-name factory contract (`(exec_info, random_str, timestamp) ->
/// string`), and handed to whichever factory — default or caller-supplied —
/// is in use, so a custom factory never has to reach for its own randomness
/// or clock to stay testable.
fn stage_run_dir(spec: &RunSpec, exec_info: &ExecInfo, project_root: &Path) -> Result<(PathBuf, String, PathBuf), CapsulaError> {
    let raw_vault_dir = spec.vault_dir().ok_or(CapsulaError::Uninitialized { field: "vault_dir" })?;
    let vault_dir = vault::resolve_path(raw_vault_dir, project_root);
    vault::bootstrap_vault(&vault_dir)?;

    let random = vault::random_suffix();
    let now = chrono::Utc::now();
    let run_name = match spec.run_name_factory() {
        Some(factory) => factory(exec_info, &random, now),
        None => vault::default_run_name(exec_info, &random, now),
    };
    let run_dir = vault::make_run_dir(&vault_dir, &run_name)?;
    Ok((vault_dir, run_name, run_dir))
}

/// The outcome of a command-bound [`CommandRun`]. A non-zero `exit_code` is
/// not itself an error: the caller decides what to do with it.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The process's exit code, or `None` if it was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// The run directory this command executed in.
    pub run_dir: PathBuf,
}

/// A function-bound run: executes `func`, capturing its panic (if any)
/// rather than letting it propagate immediately, and resuming it only after
/// post-run capture and reporting have completed.
pub struct Run<T> {
    spec: RunSpec,
    exec_name: String,
    pass_pre_run_capsule: bool,
    func: Box<dyn FnOnce(Option<&Capsule>) -> T>,
    project_root: PathBuf,
}

impl<T> Run<T> {
    /// Stages a function-bound run. When `pass_pre_run_capsule` is set,
    /// `func` receives the pre-run capsule as an argument.
    pub fn new(
        spec: RunSpec,
        exec_name: impl Into<String>,
        pass_pre_run_capsule: bool,
        project_root: PathBuf,
        func: impl FnOnce(Option<&Capsule>) -> T + 'static,
    ) -> Self {
        Self {
            spec,
            exec_name: exec_name.into(),
            pass_pre_run_capsule,
            func: Box::new(func),
            project_root,
        }
    }

    /// Runs the full pre-run/in-run/post-run lifecycle and returns `func`'s
    /// result. If `func` panicked, that panic is resumed after post-run
    /// capture and reporting have run to completion — it is never
    /// swallowed, regardless of what any watcher marked as handled, and
    /// never converted into an `Err`: it's the routine's own exception, not
    /// an orchestration failure. Orchestration failures (vault bootstrap,
    /// run-dir collisions, key conflicts, capture and fatal reporter
    /// failures) surface as `Err` instead, mirroring [`CommandRun::call`].
    #[tracing::instrument(skip(self), fields(exec_name = %self.exec_name))]
    pub fn call(self) -> Result<T, CapsulaError> {
        let exec_info = ExecInfo::Func { exec_name: self.exec_name.clone(), pass_pre_run_capsule: self.pass_pre_run_capsule };
        let (vault_dir, run_name, run_dir) = stage_run_dir(&self.spec, &exec_info, &self.project_root)?;
        tracing::debug!(%run_name, vault_dir = %vault_dir.display(), "run staged");

        let pre_params = CapsuleParams {
            exec_info: exec_info.clone(),
            run_name: run_name.clone(),
            run_dir: run_dir.clone(),
            phase: Phase::Pre,
            project_root: self.project_root.clone(),
        };
        let pre_enc = build_encapsulator(&self.spec, Phase::Pre, &pre_params)?;
        let pre_capsule = pre_enc.borrow_mut().encapsulate()?;
        run_reporters(&self.spec, Phase::Pre, &pre_params, &pre_capsule, true)?;

        let in_params = CapsuleParams { phase: Phase::In, ..pre_params.clone() };
        let in_enc = build_encapsulator(&self.spec, Phase::In, &in_params)?;
        in_enc
            .borrow_mut()
            .add_context(Some(Key::Tuple(vec!["function".into(), "call".into()])), Box::new(crate::builtin::FunctionCallContext::new(self.exec_name.clone())))?;

        let func = self.func;
        let pass_capsule = self.pass_pre_run_capsule;
        let pre_capsule_for_func = pre_capsule.clone();
        let (result, panic_state) = enter_run(&run_name, || {
            crate::encapsulator::enter(in_enc.clone(), || {
                let group = in_enc.borrow().watch();
                let (unwind_result, location) = with_captured_panic_location(move || {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                        if pass_capsule {
                            func(Some(&pre_capsule_for_func))
                        } else {
                            func(None)
                        }
                    }))
                });

                let (result, panic_state) = match unwind_result {
                    Ok(value) => (Some(value), None),
                    Err(payload) => (None, Some(crate::outcome::PanicState::new(payload, location))),
                };
                group.close(panic_state.as_ref());
                (result, panic_state)
            })
        });

        let in_capsule = in_enc.borrow_mut().encapsulate()?;
        if let Err(source) = run_reporters(&self.spec, Phase::In, &in_params, &in_capsule, false) {
            tracing::warn!(error = %source, "in-run reporter failed, continuing");
        }

        let post_params = CapsuleParams { phase: Phase::Post, ..pre_params.clone() };
        let post_enc = build_encapsulator(&self.spec, Phase::Post, &post_params)?;
        if let Some(panic) = &panic_state {
            let exception_value = serde_json::to_value(panic.exception_info()).map_err(|source| CapsulaError::CaptureFailure {
                key: Key::from("exception"),
                source: Box::new(source),
            })?;
            post_enc.borrow_mut().record(Key::from("exception"), exception_value)?;
        }
        let post_capsule = post_enc.borrow_mut().encapsulate()?;
        run_reporters(&self.spec, Phase::Post, &post_params, &post_capsule, false)?;

        match (result, panic_state) {
            (Some(value), None) => Ok(value),
            (None, Some(panic)) => {
                tracing::debug!("resuming routine panic after post-run capture");
                std::panic::resume_unwind(panic.into_payload())
            }
            _ => unreachable!("exactly one of result/panic_state is set"),
        }
    }
}

/// A command-bound run: executes an external command via
/// [`std::process::Command`] instead of a Rust function.
pub struct CommandRun {
    spec: RunSpec,
    argv: Vec<String>,
    project_root: PathBuf,
}

impl CommandRun {
    /// Stages a command-bound run. `argv[0]` is the program, the rest are
    /// its arguments.
    pub fn new(spec: RunSpec, argv: Vec<String>, project_root: PathBuf) -> Self {
        Self { spec, argv, project_root }
    }

    /// Runs the full lifecycle around the command, returning its captured
    /// output. A non-zero exit code is reported in [`CommandOutcome`] rather
    /// than surfaced as an error; only a failure to spawn the process is.
    #[tracing::instrument(skip(self), fields(argv = ?self.argv))]
    pub fn call(self) -> Result<CommandOutcome, CapsulaError> {
        let exec_info = ExecInfo::Command { argv: self.argv.clone() };
        let (vault_dir, run_name, run_dir) = stage_run_dir(&self.spec, &exec_info, &self.project_root)?;
        tracing::debug!(%run_name, vault_dir = %vault_dir.display(), "command run staged");

        let pre_params = CapsuleParams {
            exec_info: exec_info.clone(),
            run_name: run_name.clone(),
            run_dir: run_dir.clone(),
            phase: Phase::Pre,
            project_root: self.project_root.clone(),
        };
        let pre_enc = build_encapsulator(&self.spec, Phase::Pre, &pre_params)?;
        let pre_capsule = pre_enc.borrow_mut().encapsulate()?;
        run_reporters(&self.spec, Phase::Pre, &pre_params, &pre_capsule, true)?;

        let in_params = CapsuleParams { phase: Phase::In, ..pre_params.clone() };
        let in_enc = build_encapsulator(&self.spec, Phase::In, &in_params)?;

        let (program, args) = self.argv.split_first().ok_or(CapsulaError::Uninitialized { field: "command" })?;
        let program = program.to_owned();
        let args: Vec<String> = args.to_vec();
        let command_run_dir = run_dir.clone();
        let output = enter_run(&run_name, || {
            crate::encapsulator::enter(in_enc.clone(), || {
                let group = in_enc.borrow().watch();
                let output = std::process::Command::new(&program).args(&args).current_dir(&command_run_dir).output();
                group.close(None);
                output
            })
        })?;

        let in_capsule = in_enc.borrow_mut().encapsulate()?;
        if let Err(source) = run_reporters(&self.spec, Phase::In, &in_params, &in_capsule, false) {
            tracing::warn!(error = %source, "in-run reporter failed, continuing");
        }

        let post_params = CapsuleParams { phase: Phase::Post, ..pre_params.clone() };
        let post_enc = build_encapsulator(&self.spec, Phase::Post, &post_params)?;
        post_enc
            .borrow_mut()
            .record(Key::Tuple(vec!["command".into(), "exit_code".into()]), serde_json::json!(output.status.code()))?;
        let post_capsule = post_enc.borrow_mut().encapsulate()?;
        run_reporters(&self.spec, Phase::Post, &post_params, &post_capsule, false)?;

        Ok(CommandOutcome { exit_code: output.status.code(), stdout: output.stdout, stderr: output.stderr, run_dir })
    }
}
