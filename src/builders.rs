//! The fluent composition surface that stages a [`crate::RunSpec`] and
//! freezes it into a [`crate::Run`] or [`crate::CommandRun`]. Rust has no
//! decorator syntax, so staging happens through an ordinary builder chain
//! that accumulates into a spec and is frozen by a terminal `.build_fn(...)`
//! / `.build_command(...)` call, in the style of the `NodeBuilder` chains in
//! `dom`'s `Text`/element builders (`dom/src/text.rs`, exercised by
//! `dom/tests/dom_builder.rs`'s `.child(...)...build()` chains).
//!
//! Calls compose in the order they're written: the first `.context(...)` in
//! the chain is staged first and therefore runs first within its phase, and
//! the first `.watcher(...)` is the first one torn down. Config-sourced
//! items are always prepended ahead of builder-staged ones for their phase,
//! regardless of where `.config_source(...)` appears in the chain.

use crate::config::{construct_context, construct_reporter, construct_watcher, once, ConfigSource};
use crate::item::{Context, ItemBuilder, Reporter, Watcher};
use crate::key::Key;
use crate::params::Phase;
use crate::run::{CommandRun, Run};
use crate::run_spec::{Placement, RunNameFactory, RunSpec};
use crate::Capsule;
use crate::CapsulaError;
use std::path::PathBuf;

/// Which pre/post phases a context or "all phases but in-run" reporter
/// addition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Pre-run only.
    Pre,
    /// Post-run only.
    Post,
    /// Both pre-run and post-run.
    All,
}

/// Which phase a reporter addition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterMode {
    /// Pre-run only.
    Pre,
    /// In-run only.
    In,
    /// Post-run only.
    Post,
    /// Every phase.
    All,
}

/// Stages a [`RunSpec`] and freezes it into a [`Run`] or [`CommandRun`].
///
/// Nothing here executes until [`RunBuilder::build_fn`] or
/// [`RunBuilder::build_command`] is called: everything staged beforehand is
/// frozen at that point: builder sequences don't mutate once a run begins.
pub struct RunBuilder {
    spec: RunSpec,
    config_source: Option<Box<dyn ConfigSource>>,
    pass_pre_run_capsule: bool,
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunBuilder {
    /// Starts an empty builder: no contexts, watchers, or reporters staged,
    /// config loading enabled but no source set yet.
    pub fn new() -> Self {
        Self { spec: RunSpec::new(), config_source: None, pass_pre_run_capsule: false }
    }

    /// Stages a context for `mode`'s phase(s), as either a bare instance
    /// (reused as given) or a closure receiving [`crate::params::CapsuleParams`].
    pub fn context(mut self, builder: ItemBuilder<dyn Context>, mode: ContextMode) -> Self {
        match mode {
            ContextMode::Pre => self.spec.add_context(Phase::Pre, None, builder, Placement::Back),
            ContextMode::Post => self.spec.add_context(Phase::Post, None, builder, Placement::Back),
            ContextMode::All => {
                self.spec.add_context(Phase::Pre, None, builder.clone(), Placement::Back);
                self.spec.add_context(Phase::Post, None, builder, Placement::Back);
            }
        }
        self
    }

    /// Stages a bare context instance (reused as given) under `mode`.
    pub fn context_instance(self, context: impl Context + Clone + 'static, mode: ContextMode) -> Self {
        self.context(ItemBuilder::instance(move || Box::new(context.clone())), mode)
    }

    /// Stages a watcher for the in-run phase. Watchers compose innermost-first:
    /// the first one staged is acquired last and torn down first.
    pub fn watcher(mut self, builder: ItemBuilder<dyn Watcher>) -> Self {
        self.spec.add_watcher(Phase::In, None, builder, Placement::Back);
        self
    }

    /// Stages a reporter for `mode`'s phase(s).
    pub fn reporter(mut self, builder: ItemBuilder<dyn Reporter>, mode: ReporterMode) -> Self {
        match mode {
            ReporterMode::Pre => self.spec.add_reporter(Phase::Pre, builder, Placement::Back),
            ReporterMode::In => self.spec.add_reporter(Phase::In, builder, Placement::Back),
            ReporterMode::Post => self.spec.add_reporter(Phase::Post, builder, Placement::Back),
            ReporterMode::All => {
                self.spec.add_reporter(Phase::Pre, builder.clone(), Placement::Back);
                self.spec.add_reporter(Phase::In, builder.clone(), Placement::Back);
                self.spec.add_reporter(Phase::Post, builder, Placement::Back);
            }
        }
        self
    }

    /// Sets the vault directory. Accepts the `@/`-prefixed project-relative
    /// convention; resolved at start time.
    pub fn vault_dir(mut self, vault_dir: impl Into<String>) -> Self {
        self.spec.set_vault_dir(vault_dir);
        self
    }

    /// Overrides the default run-name factory.
    pub fn run_name_factory(mut self, factory: RunNameFactory) -> Self {
        self.spec.set_run_name_factory(factory);
        self
    }

    /// Marks the routine as wanting the pre-run capsule as its first
    /// argument. Only meaningful for
    /// [`RunBuilder::build_fn`].
    pub fn pass_pre_run_capsule(mut self) -> Self {
        self.pass_pre_run_capsule = true;
        self
    }

    /// Supplies a config source to merge at build time, unless
    /// [`RunBuilder::ignore_config`] is also set.
    pub fn config_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.config_source = Some(Box::new(source));
        self
    }

    /// Points the config source at an explicit path, overriding whatever
    /// default location it would otherwise search for. Has no
    /// effect without a [`RunBuilder::config_source`] to hand it to.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.set_config_path(path.into());
        self
    }

    /// Skips config merging entirely, even if a source was supplied.
    pub fn ignore_config(mut self, ignore: bool) -> Self {
        self.spec.set_ignore_config(ignore);
        self
    }

    fn merge_config(&mut self, project_root: &std::path::Path) -> Result<(), CapsulaError> {
        if self.spec.ignore_config() {
            return Ok(());
        }
        let Some(source) = &self.config_source else { return Ok(()) };
        let parsed = source.load(project_root, self.spec.config_path().map(PathBuf::as_path))?;

        if let Some(vault_dir) = parsed.vault_dir {
            if self.spec.vault_dir().is_none() {
                self.spec.set_vault_dir(vault_dir);
            }
        }
        for item in parsed.pre_run_contexts.iter().rev() {
            self.spec.add_context(Phase::Pre, Some(config_key(item)), once(construct_context(item)?), Placement::Front);
        }
        for item in parsed.post_run_contexts.iter().rev() {
            self.spec.add_context(Phase::Post, Some(config_key(item)), once(construct_context(item)?), Placement::Front);
        }
        for item in parsed.in_run_watchers.iter().rev() {
            self.spec.add_watcher(Phase::In, Some(config_key(item)), once(construct_watcher(item)?), Placement::Front);
        }
        for item in parsed.pre_run_reporters.iter().rev() {
            self.spec.add_reporter(Phase::Pre, once(construct_reporter(item)?), Placement::Front);
        }
        for item in parsed.in_run_reporters.iter().rev() {
            self.spec.add_reporter(Phase::In, once(construct_reporter(item)?), Placement::Front);
        }
        for item in parsed.post_run_reporters.iter().rev() {
            self.spec.add_reporter(Phase::Post, once(construct_reporter(item)?), Placement::Front);
        }
        Ok(())
    }

    /// Freezes the builder into a function-bound [`Run`].
    ///
    /// `project_root` resolves `@/`-prefixed paths and config lookups;
    /// `exec_name` names the routine for the default run-name factory and
    /// [`crate::builtin::FunctionCallContext`].
    pub fn build_fn<T: 'static>(
        mut self,
        project_root: PathBuf,
        exec_name: impl Into<String>,
        func: impl FnOnce(Option<&Capsule>) -> T + 'static,
    ) -> Result<Run<T>, CapsulaError> {
        self.merge_config(&project_root)?;
        Ok(Run::new(self.spec, exec_name, self.pass_pre_run_capsule, project_root, func))
    }

    /// Freezes the builder into a command-bound [`CommandRun`].
    pub fn build_command(mut self, project_root: PathBuf, argv: Vec<String>) -> Result<CommandRun, CapsulaError> {
        self.merge_config(&project_root)?;
        Ok(CommandRun::new(self.spec, argv, project_root))
    }
}

fn config_key(item: &(String, toml::Table)) -> Key {
    match item.1.get("key").and_then(toml::Value::as_str) {
        Some(explicit) => Key::from(explicit),
        None => Key::from(item.0.as_str()),
    }
}
