//! The crate-wide error type.

use crate::key::Key;
use std::path::PathBuf;

/// Everything that can go wrong while staging, starting, or running a
/// [`crate::Run`].
#[derive(Debug, thiserror::Error)]
pub enum CapsulaError {
    /// A config-driven item referenced an unknown type name, or a required
    /// field was missing from its table.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description of what was wrong.
        message: String,
    },

    /// A [`crate::Run`] was started before a required field
    /// (`vault_dir`, `run_name_factory`, `func`/`command`) was set.
    #[error("run is missing required field `{field}`")]
    Uninitialized {
        /// Name of the missing field.
        field: &'static str,
    },

    /// Two capsule items in the same [`crate::Encapsulator`] were added
    /// under the same key, or [`crate::key::nest`] found a key whose
    /// segments are a prefix of another key's.
    #[error("capsule item key already exists: {key}")]
    KeyConflict {
        /// The key that collided.
        key: Key,
    },

    /// An `abort_on_error` context or watcher's `encapsulate` failed.
    #[error("capture failed for `{key}`: {source}")]
    CaptureFailure {
        /// The key of the item whose capture aborted the phase.
        key: Key,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// [`crate::ambient::current_run_name`] or similar was called with no
    /// active [`crate::Run`] on the current thread.
    #[error("no run is active on this thread")]
    NoRun,

    /// [`crate::ambient::record`] was called with no active
    /// [`crate::Encapsulator`] on the current thread.
    #[error("no encapsulator is active on this thread")]
    NoEncapsulator,

    /// The vault directory could not be created, or a non-directory exists
    /// at its path.
    #[error("failed to bootstrap vault at {}: {source}", path.display())]
    VaultBootstrap {
        /// The vault path that failed to bootstrap.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The run-name factory produced a name that collides with an existing
    /// child of the vault directory.
    #[error("run directory already exists: {} (make your run-name factory produce unique names)", path.display())]
    RunDirCollision {
        /// The run directory path that already existed.
        path: PathBuf,
    },

    /// A filesystem operation outside the cases above failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
