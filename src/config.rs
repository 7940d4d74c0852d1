//! The configuration seam a TOML config loader plugs into. The core never
//! reads a file itself — parsing and locating `capsula.toml` remain the
//! external CLI front-end's job — but it defines the shape a parsed config
//! takes and how its `{ type = "...", ... }` tables become concrete items
//! via the context/watcher/reporter subclass registries.

use crate::item::{CONTEXT_REGISTRY, REPORTER_REGISTRY, WATCHER_REGISTRY};
use crate::item::{Context, ItemBuilder, Reporter, Watcher};
use crate::CapsulaError;
use std::path::Path;
use std::sync::Mutex;

/// One `{ type = "...", ... }` table from a config file, not yet resolved
/// against a registry.
pub type RawItem = (String, toml::Table);

/// A parsed `capsula.toml`-shaped document, resolved only as far as
/// separating items by phase; construction against the subclass registries
/// happens when it's merged into a [`crate::RunSpec`].
#[derive(Debug, Default, Clone)]
pub struct ParsedRunConfig {
    /// `vault-dir`, if the config set one. May use the `@/`-prefixed
    /// project-relative convention.
    pub vault_dir: Option<String>,
    /// `[pre-run] contexts`.
    pub pre_run_contexts: Vec<RawItem>,
    /// `[pre-run] reporters`.
    pub pre_run_reporters: Vec<RawItem>,
    /// `[in-run] watchers`.
    pub in_run_watchers: Vec<RawItem>,
    /// `[in-run] reporters`.
    pub in_run_reporters: Vec<RawItem>,
    /// `[post-run] contexts`.
    pub post_run_contexts: Vec<RawItem>,
    /// `[post-run] reporters`.
    pub post_run_reporters: Vec<RawItem>,
}

/// Supplies a [`ParsedRunConfig`] to [`crate::builders::RunBuilder`]'s
/// terminal operation. An external loader (the TOML front-end) implements
/// this over whatever file it reads; the core only needs the result.
pub trait ConfigSource: Send + Sync {
    /// Produces the parsed config, given the project root (used to resolve
    /// `@/`-prefixed paths) and an explicit config path, if the builder's
    /// terminal operation was given one instead of leaving the source to
    /// find its own default (e.g. `capsula.toml` at `project_root`).
    fn load(&self, project_root: &Path, config_path: Option<&Path>) -> Result<ParsedRunConfig, CapsulaError>;
}

impl ParsedRunConfig {
    /// Parses a config document already loaded into memory as a
    /// [`toml::Table`]: reading the document from disk stays the loader's
    /// job, but interpreting one it's handed doesn't.
    pub fn from_document(doc: &toml::Table) -> Self {
        let mut parsed = ParsedRunConfig {
            vault_dir: doc.get("vault-dir").and_then(toml::Value::as_str).map(str::to_owned),
            ..Default::default()
        };
        if let Some(pre_run) = doc.get("pre-run").and_then(toml::Value::as_table) {
            parsed.pre_run_contexts = raw_items(pre_run, "contexts");
            parsed.pre_run_reporters = raw_items(pre_run, "reporters");
        }
        if let Some(in_run) = doc.get("in-run").and_then(toml::Value::as_table) {
            parsed.in_run_watchers = raw_items(in_run, "watchers");
            parsed.in_run_reporters = raw_items(in_run, "reporters");
        }
        if let Some(post_run) = doc.get("post-run").and_then(toml::Value::as_table) {
            parsed.post_run_contexts = raw_items(post_run, "contexts");
            parsed.post_run_reporters = raw_items(post_run, "reporters");
        }
        parsed
    }
}

fn raw_items(section: &toml::Table, key: &str) -> Vec<RawItem> {
    section
        .get(key)
        .and_then(toml::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let table = entry.as_table()?;
            let mut fields = table.clone();
            let type_name = fields.remove("type")?.as_str()?.to_owned();
            Some((type_name, fields))
        })
        .collect()
}

/// A [`ConfigSource`] over a document already parsed into a [`toml::Table`],
/// for callers that read `capsula.toml` themselves (e.g. the CLI front-end)
/// and just need the core to interpret it. `config_path`/`project_root` are
/// ignored: the table was already chosen and parsed before this source was
/// built.
#[derive(Debug, Clone)]
pub struct TableConfigSource(pub toml::Table);

impl ConfigSource for TableConfigSource {
    fn load(&self, _project_root: &Path, _config_path: Option<&Path>) -> Result<ParsedRunConfig, CapsulaError> {
        Ok(ParsedRunConfig::from_document(&self.0))
    }
}

/// Resolves a [`RawItem`] into a context via [`CONTEXT_REGISTRY`].
pub(crate) fn construct_context(item: &RawItem) -> Result<Box<dyn Context>, CapsulaError> {
    CONTEXT_REGISTRY.construct(&item.0, &item.1)
}

/// Resolves a [`RawItem`] into a watcher via [`WATCHER_REGISTRY`].
pub(crate) fn construct_watcher(item: &RawItem) -> Result<Box<dyn Watcher>, CapsulaError> {
    WATCHER_REGISTRY.construct(&item.0, &item.1)
}

/// Resolves a [`RawItem`] into a reporter via [`REPORTER_REGISTRY`].
pub(crate) fn construct_reporter(item: &RawItem) -> Result<Box<dyn Reporter>, CapsulaError> {
    REPORTER_REGISTRY.construct(&item.0, &item.1)
}

/// Wraps an eagerly-constructed item as an [`ItemBuilder`] that hands it out
/// exactly once. Config-sourced items are resolved once, at merge time,
/// before `project_root` and the rest of [`crate::params::CapsuleParams`]
/// are necessarily known in full — unlike decorator-staged builders, which
/// run per-phase.
pub(crate) fn once<T: ?Sized + 'static>(item: Box<T>) -> ItemBuilder<T> {
    let cell = Mutex::new(Some(item));
    ItemBuilder::instance(move || cell.lock().expect("config item lock poisoned").take().expect("config-sourced item built more than once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_document_separates_items_by_phase() {
        let doc: toml::Table = toml::from_str(
            r#"
            vault-dir = "@/vault"

            [pre-run]
            contexts = [{ type = "Cwd" }]
            reporters = [{ type = "Json", path = "pre.json" }]

            [in-run]
            watchers = [{ type = "Time", name = "body" }]

            [post-run]
            contexts = [{ type = "Cwd" }]
            "#,
        )
        .unwrap();
        let parsed = ParsedRunConfig::from_document(&doc);
        assert_eq!(parsed.vault_dir.as_deref(), Some("@/vault"));
        assert_eq!(parsed.pre_run_contexts.len(), 1);
        assert_eq!(parsed.pre_run_contexts[0].0, "Cwd");
        assert_eq!(parsed.pre_run_reporters[0].0, "Json");
        assert_eq!(parsed.in_run_watchers[0].0, "Time");
        assert_eq!(parsed.post_run_contexts.len(), 1);
        assert!(parsed.in_run_reporters.is_empty());
    }
}
