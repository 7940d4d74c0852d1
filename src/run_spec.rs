//! `RunSpec`: the mutable staging area that the fluent builder surface in
//! [`crate::builders`] accumulates into before a [`crate::Run`] is started.

use crate::item::{Context, ItemBuilder, Reporter, Watcher};
use crate::key::Key;
use crate::params::{ExecInfo, Phase};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

/// Produces a run name from the exec info, a framework-provided random
/// suffix, and a framework-provided timestamp, overriding
/// [`crate::vault::default_run_name`]. The suffix and timestamp are
/// generated once per run and handed to whichever factory (default or
/// custom) is in use, per spec's run-name factory contract, so a custom
/// factory never has to reach for its own randomness or clock to stay
/// testable.
pub type RunNameFactory = Box<dyn Fn(&ExecInfo, &str, chrono::DateTime<chrono::Utc>) -> String + Send + Sync>;

type KeyedContexts = VecDeque<(Option<Key>, ItemBuilder<dyn Context>)>;
type KeyedWatchers = VecDeque<(Option<Key>, ItemBuilder<dyn Watcher>)>;
type Reporters = VecDeque<ItemBuilder<dyn Reporter>>;

/// Where a newly added item lands relative to ones already staged for the
/// same phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Runs before everything currently staged for this phase.
    Front,
    /// Runs after everything currently staged for this phase.
    Back,
}

/// Accumulates contexts, watchers, and reporters per lifecycle phase, plus
/// the run-level settings (`vault_dir`, `run_name_factory`, config path)
/// that don't vary by phase.
#[derive(Default)]
pub struct RunSpec {
    contexts: HashMap<Phase, KeyedContexts>,
    watchers: HashMap<Phase, KeyedWatchers>,
    reporters: HashMap<Phase, Reporters>,
    run_name_factory: Option<RunNameFactory>,
    vault_dir: Option<String>,
    config_path: Option<PathBuf>,
    ignore_config: bool,
}

impl std::fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSpec")
            .field("vault_dir", &self.vault_dir)
            .field("config_path", &self.config_path)
            .field("ignore_config", &self.ignore_config)
            .field("has_run_name_factory", &self.run_name_factory.is_some())
            .finish()
    }
}

impl RunSpec {
    /// Creates an empty spec with nothing staged for any phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a context for `phase`, at `placement` relative to whatever is
    /// already staged for that phase.
    pub fn add_context(&mut self, phase: Phase, key: Option<Key>, builder: ItemBuilder<dyn Context>, placement: Placement) {
        let slot = self.contexts.entry(phase).or_default();
        match placement {
            Placement::Front => slot.push_front((key, builder)),
            Placement::Back => slot.push_back((key, builder)),
        }
    }

    /// Stages a watcher for `phase`. Watchers only make sense for
    /// [`Phase::In`], but `phase` is taken as given; callers in
    /// [`crate::builders`] are responsible for only offering [`Phase::In`].
    pub fn add_watcher(&mut self, phase: Phase, key: Option<Key>, builder: ItemBuilder<dyn Watcher>, placement: Placement) {
        let slot = self.watchers.entry(phase).or_default();
        match placement {
            Placement::Front => slot.push_front((key, builder)),
            Placement::Back => slot.push_back((key, builder)),
        }
    }

    /// Stages a reporter for `phase`.
    pub fn add_reporter(&mut self, phase: Phase, builder: ItemBuilder<dyn Reporter>, placement: Placement) {
        let slot = self.reporters.entry(phase).or_default();
        match placement {
            Placement::Front => slot.push_front(builder),
            Placement::Back => slot.push_back(builder),
        }
    }

    /// Overrides the default run-name factory.
    pub fn set_run_name_factory(&mut self, factory: RunNameFactory) {
        self.run_name_factory = Some(factory);
    }

    /// Sets the vault directory, as given (may use the `@/` prefix; resolved
    /// at start time via [`crate::vault::resolve_path`]).
    pub fn set_vault_dir(&mut self, vault_dir: impl Into<String>) {
        self.vault_dir = Some(vault_dir.into());
    }

    /// Points at a config file to load instead of the default search.
    pub fn set_config_path(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    /// Skips config loading entirely, even if a default config file exists.
    pub fn set_ignore_config(&mut self, ignore: bool) {
        self.ignore_config = ignore;
    }

    pub(crate) fn run_name_factory(&self) -> Option<&RunNameFactory> {
        self.run_name_factory.as_ref()
    }

    pub(crate) fn vault_dir(&self) -> Option<&str> {
        self.vault_dir.as_deref()
    }

    pub(crate) fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    pub(crate) fn ignore_config(&self) -> bool {
        self.ignore_config
    }

    pub(crate) fn contexts_for(&self, phase: Phase) -> impl Iterator<Item = &(Option<Key>, ItemBuilder<dyn Context>)> {
        self.contexts.get(&phase).into_iter().flatten()
    }

    pub(crate) fn watchers_for(&self, phase: Phase) -> impl Iterator<Item = &(Option<Key>, ItemBuilder<dyn Watcher>)> {
        self.watchers.get(&phase).into_iter().flatten()
    }

    pub(crate) fn reporters_for(&self, phase: Phase) -> impl Iterator<Item = &ItemBuilder<dyn Reporter>> {
        self.reporters.get(&phase).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Noop;
    impl Context for Noop {
        fn encapsulate(&mut self) -> Result<serde_json::Value, crate::item::CaptureError> {
            Ok(json!(null))
        }
        fn default_key(&self) -> Key {
            Key::from("noop")
        }
    }

    #[test]
    fn front_placement_runs_before_back() {
        let mut spec = RunSpec::new();
        spec.add_context(Phase::Pre, Some(Key::from("b")), ItemBuilder::instance(|| Box::new(Noop)), Placement::Back);
        spec.add_context(Phase::Pre, Some(Key::from("a")), ItemBuilder::instance(|| Box::new(Noop)), Placement::Front);
        let keys: Vec<_> = spec.contexts_for(Phase::Pre).map(|(k, _)| k.clone().unwrap()).collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    }

    #[test]
    fn phases_are_independent() {
        let mut spec = RunSpec::new();
        spec.add_context(Phase::Pre, None, ItemBuilder::instance(|| Box::new(Noop)), Placement::Back);
        assert_eq!(spec.contexts_for(Phase::Post).count(), 0);
        assert_eq!(spec.contexts_for(Phase::Pre).count(), 1);
    }
}
