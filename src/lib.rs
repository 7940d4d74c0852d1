//! Wraps a routine's execution in pre-run, in-run, and post-run phases and
//! records what happened into a self-contained [`Capsule`].
//!
//! A [`crate::builders::RunBuilder`] stages contexts, watchers, and
//! reporters into a [`run_spec::RunSpec`], which is then frozen into either a
//! function-bound [`Run`] or a command-bound [`run::CommandRun`]. Calling it
//! drives the routine through the three phases — pre-run, in-run, post-run —
//! producing a capsule per phase and handing each to its reporters.
//!
//! The crate exposes three extension points — [`item::Context`],
//! [`item::Watcher`], and [`item::Reporter`] — plus an ambient API
//! ([`ambient`]) that lets code running inside a [`Run`] record values or ask
//! what run it's in without threading an encapsulator handle through every
//! call.

pub mod ambient;
pub mod builders;
pub mod builtin;
mod capsule;
pub mod config;
mod encapsulator;
mod error;
pub mod item;
mod key;
mod outcome;
pub mod params;
pub mod run;
mod run_spec;
pub mod vault;
mod watcher_group;

pub use capsule::{Capsule, ExceptionInfo};
pub use encapsulator::{Encapsulator, NullReporter};
pub use error::CapsulaError;
pub use key::Key;
pub use outcome::PanicState;
pub use run::{CommandOutcome, CommandRun, Run};
pub use run_spec::RunSpec;
pub use watcher_group::WatcherGroup;
