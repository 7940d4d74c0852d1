//! Vault directory bootstrap, run-name generation, and `@/`-prefixed
//! project-relative path resolution.

use crate::params::ExecInfo;
use crate::CapsulaError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Resolves `path` against `project_root`, supporting the `@/`-prefixed
/// project-relative syntax in addition to absolute and cwd-relative paths.
///
/// - `@/some/path` resolves to `project_root/some/path`.
/// - An absolute path is returned unchanged.
/// - Anything else is resolved relative to the current working directory,
///   i.e. returned unchanged and left for the caller to canonicalize.
pub fn resolve_path(path: &str, project_root: &Path) -> PathBuf {
    if let Some(rel) = path.strip_prefix("@/") {
        return project_root.join(rel);
    }
    let as_path = Path::new(path);
    if as_path.is_absolute() {
        as_path.to_path_buf()
    } else {
        as_path.to_path_buf()
    }
}

/// Walks upward from `start` looking for a `Cargo.toml`.
pub fn search_for_project_root(start: &Path) -> Result<PathBuf, CapsulaError> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join("Cargo.toml").is_file() {
            return Ok(dir);
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent.to_path_buf(),
            _ => {
                return Err(CapsulaError::Configuration {
                    message: format!("project root not found above {}", start.display()),
                })
            }
        }
    }
}

/// Generates the framework-provided random suffix handed to the run-name
/// factory (default or custom): four lowercase alphanumeric characters.
pub fn random_suffix() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(4).map(|b| (b as char).to_ascii_lowercase()).collect()
}

/// Builds the default run name: `{exec_name}_{timestamp}_{random}`, where
/// `timestamp` is `YYYYMMDD_HHMMSS` in UTC. `random` is generated once per
/// run by [`random_suffix`] and handed in here rather than sampled directly,
/// so the same value can be handed to a caller-supplied factory instead.
pub fn default_run_name(exec_info: &ExecInfo, random: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let exec_name = sanitize_for_path(&exec_info.short_name());
    let timestamp = now.format("%Y%m%d_%H%M%S");
    format!("{exec_name}_{timestamp}_{random}")
}

fn sanitize_for_path(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Ensures `vault_dir` exists and is seeded with a `.gitignore` that ignores
/// everything beneath it; idempotent across repeated runs against the same
/// vault.
pub fn bootstrap_vault(vault_dir: &Path) -> Result<(), CapsulaError> {
    std::fs::create_dir_all(vault_dir).map_err(|source| CapsulaError::VaultBootstrap {
        path: vault_dir.to_path_buf(),
        source,
    })?;
    let gitignore = vault_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "*\n").map_err(|source| CapsulaError::VaultBootstrap {
            path: vault_dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Creates `vault_dir/run_name` as a fresh directory. Fails with
/// [`CapsulaError::RunDirCollision`] if it already exists
/// (run-name factories are trusted to produce unique names; a collision is
/// the caller's bug, not something Capsula silently works around).
pub fn make_run_dir(vault_dir: &Path, run_name: &str) -> Result<PathBuf, CapsulaError> {
    let run_dir = vault_dir.join(run_name);
    if run_dir.exists() {
        return Err(CapsulaError::RunDirCollision { path: run_dir });
    }
    std::fs::create_dir_all(&run_dir).map_err(|source| CapsulaError::VaultBootstrap {
        path: run_dir.clone(),
        source,
    })?;
    Ok(run_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn resolve_at_prefix_joins_project_root() {
        let root = Path::new("/home/user/project");
        assert_eq!(resolve_path("@/data/input.csv", root), root.join("data/input.csv"));
    }

    #[test]
    fn resolve_absolute_path_is_unchanged() {
        let root = Path::new("/home/user/project");
        assert_eq!(resolve_path("/etc/hosts", root), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn default_run_name_embeds_exec_name_timestamp_and_given_suffix() {
        let exec = ExecInfo::Func { exec_name: "train model".to_owned(), pass_pre_run_capsule: false };
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let name = default_run_name(&exec, "abcd", now);
        assert_eq!(name, "train_model_20240301_123045_abcd");
    }

    #[test]
    fn bootstrap_vault_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let vault = tmp.path().join("vault");
        bootstrap_vault(&vault).unwrap();
        bootstrap_vault(&vault).unwrap();
        assert!(vault.join(".gitignore").is_file());
    }

    #[test]
    fn make_run_dir_rejects_collision() {
        let tmp = tempfile::tempdir().unwrap();
        bootstrap_vault(tmp.path()).unwrap();
        make_run_dir(tmp.path(), "run_1").unwrap();
        let err = make_run_dir(tmp.path(), "run_1").unwrap_err();
        assert!(matches!(err, CapsulaError::RunDirCollision { .. }));
    }
}
