//! Per-execution parameters passed to every context/watcher/reporter builder.

use std::path::PathBuf;

/// Which of the three lifecycle phases a builder is being invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the routine runs.
    Pre,
    /// While the routine runs (watchers only).
    In,
    /// After the routine has run, whether it succeeded or panicked.
    Post,
}

impl Phase {
    /// The config-table key for this phase (`"pre-run"`/`"in-run"`/`"post-run"`).
    pub fn config_section(self) -> &'static str {
        match self {
            Phase::Pre => "pre-run",
            Phase::In => "in-run",
            Phase::Post => "post-run",
        }
    }
}

/// Describes what's being run, without carrying the actual callable or its
/// arguments (those aren't representable generically once type-erased): a
/// tagged `Func | Command | None` union.
#[derive(Debug, Clone)]
pub enum ExecInfo {
    /// A function-bound run.
    Func {
        /// A short name for the function, used by the default run-name
        /// factory and by [`crate::builtin::FunctionCallContext`].
        exec_name: String,
        /// Whether the routine receives the pre-run [`crate::Capsule`] as
        /// its first argument.
        pass_pre_run_capsule: bool,
    },
    /// A command-bound run.
    Command {
        /// The argv of the command being run.
        argv: Vec<String>,
    },
    /// Neither is set yet (only observable before a `Run` is fully staged).
    None,
}

impl ExecInfo {
    /// A short, path-safe name describing what's being run, used by the
    /// default run-name factory.
    pub fn short_name(&self) -> String {
        match self {
            ExecInfo::Func { exec_name, .. } => exec_name.clone(),
            ExecInfo::Command { argv } => argv.first().cloned().unwrap_or_else(|| "command".to_owned()),
            ExecInfo::None => "run".to_owned(),
        }
    }
}

/// The per-execution context passed to every context/watcher/reporter
/// builder.
#[derive(Debug, Clone)]
pub struct CapsuleParams {
    /// What's being run.
    pub exec_info: ExecInfo,
    /// The run's generated name (see [`crate::vault::default_run_name`]).
    pub run_name: String,
    /// The run's materialized directory, `vault_dir/run_name`.
    pub run_dir: PathBuf,
    /// Which phase this builder is being called for.
    pub phase: Phase,
    /// The project root, used to resolve `@/`-prefixed paths.
    pub project_root: PathBuf,
}
