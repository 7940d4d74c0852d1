//! The `Context`/`Watcher`/`Reporter` contract and their
//! config-driven subclass registries.

use crate::key::Key;
use crate::outcome::PanicState;
use crate::params::CapsuleParams;
use crate::Capsule;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// What a `Context`/`Watcher`'s `encapsulate` returns on failure.
pub type CaptureError = Box<dyn std::error::Error + Send + Sync>;

/// A passive snapshot source: pure `encapsulate`, no lifecycle around the
/// routine.
pub trait Context: Debug + Send {
    /// Produces the item's captured value.
    fn encapsulate(&mut self) -> Result<Value, CaptureError>;

    /// The key used when none is given explicitly on addition.
    fn default_key(&self) -> Key;

    /// If true, a failure here aborts the entire phase; otherwise the
    /// failure is folded into `Capsule::fails` and the phase continues.
    fn abort_on_error(&self) -> bool {
        false
    }
}

/// A scoped acquisition returned by [`Watcher::watch`]. Setup has already
/// run by the time this is returned; `exit` performs teardown exactly once,
/// observing (and optionally marking handled) the in-flight panic state.
///
/// `outcome` is a read-only view: a [`WatcherScope`] can inspect and log the
/// panic but never takes ownership of it. Returning `true` marks it
/// "handled", which only suppresses what *later* (more-outer) scopes in the
/// same [`crate::WatcherGroup`] are shown — it has no bearing on whether
/// `Run::call` ultimately resumes the original panic, which the `Run` holds
/// onto independently.
pub trait WatcherScope {
    /// Tears down this scope, optionally observing the routine's panic.
    fn exit(&mut self, outcome: Option<&PanicState>) -> bool;
}

/// A scoped observer: in addition to `encapsulate`, brackets a region of
/// execution with guaranteed setup/teardown.
pub trait Watcher: Debug + Send {
    /// Produces the item's captured value.
    fn encapsulate(&mut self) -> Result<Value, CaptureError>;

    /// The key used when none is given explicitly on addition.
    fn default_key(&self) -> Key;

    /// If true, a failure here aborts the entire phase.
    fn abort_on_error(&self) -> bool {
        false
    }

    /// Performs setup and returns a scope whose `exit` performs teardown.
    fn watch(&self) -> Box<dyn WatcherScope>;
}

/// A consumer of a [`Capsule`]; not itself a capsule item, since reporters
/// are outputs rather than captures.
pub trait Reporter: Debug + Send {
    /// Emits, stores, or notifies about the given capsule.
    fn report(&mut self, capsule: &Capsule) -> Result<(), CaptureError>;
}

/// Builds a concrete item from a `[type = "...", ...]` TOML table, as used
/// by the config loader.
pub type ContextCtor = fn(&toml::Table) -> Result<Box<dyn Context>, crate::CapsulaError>;
/// See [`ContextCtor`].
pub type WatcherCtor = fn(&toml::Table) -> Result<Box<dyn Watcher>, crate::CapsulaError>;
/// See [`ContextCtor`].
pub type ReporterCtor = fn(&toml::Table) -> Result<Box<dyn Reporter>, crate::CapsulaError>;

macro_rules! registry {
    ($name:ident, $ctor:ty, $kind:literal) => {
        /// Process-wide name -> constructor registry, populated once per
        /// type at `register` time and consulted by the config loader via
        /// `construct`.
        pub struct $name {
            ctors: Lazy<RwLock<HashMap<&'static str, $ctor>>>,
        }

        impl $name {
            const fn new() -> Self {
                Self { ctors: Lazy::new(|| RwLock::new(HashMap::new())) }
            }

            /// Registers `ctor` under `name`. Fails if `name` is already
            /// registered.
            pub fn register(&self, name: &'static str, ctor: $ctor) -> Result<(), crate::CapsulaError> {
                let mut ctors = self.ctors.write().expect("registry lock poisoned");
                if ctors.contains_key(name) {
                    return Err(crate::CapsulaError::Configuration {
                        message: format!("{} `{name}` is already registered", $kind),
                    });
                }
                ctors.insert(name, ctor);
                Ok(())
            }

            /// Looks up and invokes the constructor registered under `name`.
            /// Fails loudly if `name` is unknown.
            pub fn construct(
                &self,
                name: &str,
                fields: &toml::Table,
            ) -> Result<<$ctor as FnOnceOutput>::Output, crate::CapsulaError> {
                let ctors = self.ctors.read().expect("registry lock poisoned");
                let ctor = ctors.get(name).ok_or_else(|| crate::CapsulaError::Configuration {
                    message: format!("unknown {} type `{name}`", $kind),
                })?;
                ctor(fields)
            }
        }
    };
}

// Helper trait so the macro can spell each registry's return type once.
trait FnOnceOutput {
    type Output;
}
impl FnOnceOutput for ContextCtor {
    type Output = Box<dyn Context>;
}
impl FnOnceOutput for WatcherCtor {
    type Output = Box<dyn Watcher>;
}
impl FnOnceOutput for ReporterCtor {
    type Output = Box<dyn Reporter>;
}

registry!(ContextRegistry, ContextCtor, "context");
registry!(WatcherRegistry, WatcherCtor, "watcher");
registry!(ReporterRegistry, ReporterCtor, "reporter");

/// The process-wide context subclass registry.
pub static CONTEXT_REGISTRY: ContextRegistry = ContextRegistry::new();
/// The process-wide watcher subclass registry.
pub static WATCHER_REGISTRY: WatcherRegistry = WatcherRegistry::new();
/// The process-wide reporter subclass registry.
pub static REPORTER_REGISTRY: ReporterRegistry = ReporterRegistry::new();

/// A builder for a capsule item: either a bare instance, reused across
/// invocations, or a closure receiving [`CapsuleParams`]. Stored behind an `Arc` rather than a
/// `Box` so that `mode = "all"` fan-out can stage the same
/// factory for two phases without re-running whatever work produced it.
pub enum ItemBuilder<T: ?Sized> {
    /// A concrete instance, cloned via `Box::new` semantics is not possible
    /// for `dyn` items, so instances are produced once and reused in place
    /// via interior construction at staging time — see
    /// [`ItemBuilder::instance`].
    Instance(Arc<dyn Fn() -> Box<T> + Send + Sync>),
    /// A closure receiving the per-execution parameters.
    Builder(Arc<dyn Fn(&CapsuleParams) -> Box<T> + Send + Sync>),
}

impl<T: ?Sized> Clone for ItemBuilder<T> {
    fn clone(&self) -> Self {
        match self {
            ItemBuilder::Instance(make) => ItemBuilder::Instance(make.clone()),
            ItemBuilder::Builder(f) => ItemBuilder::Builder(f.clone()),
        }
    }
}

impl<T: ?Sized> ItemBuilder<T> {
    /// Wraps a constructor that is invoked fresh for every phase, ignoring
    /// `CapsuleParams`. Used when a bare instance is supplied: since trait
    /// objects cannot generally be cloned, the caller-provided factory is
    /// what gets reused, not a single instance.
    pub fn instance(make: impl Fn() -> Box<T> + Send + Sync + 'static) -> Self {
        ItemBuilder::Instance(Arc::new(make))
    }

    /// Wraps a closure receiving [`CapsuleParams`].
    pub fn from_fn(f: impl Fn(&CapsuleParams) -> Box<T> + Send + Sync + 'static) -> Self {
        ItemBuilder::Builder(Arc::new(f))
    }

    pub(crate) fn build(&self, params: &CapsuleParams) -> Box<T> {
        match self {
            ItemBuilder::Instance(make) => make(),
            ItemBuilder::Builder(f) => f(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Cwd;
    impl Context for Cwd {
        fn encapsulate(&mut self) -> Result<Value, CaptureError> {
            Ok(Value::String("/tmp".into()))
        }
        fn default_key(&self) -> Key {
            Key::from("cwd")
        }
    }

    fn construct_cwd(_fields: &toml::Table) -> Result<Box<dyn Context>, crate::CapsulaError> {
        Ok(Box::new(Cwd))
    }

    #[test]
    fn registering_the_same_name_twice_fails() {
        let registry = ContextRegistry::new();
        registry.register("Cwd", construct_cwd).unwrap();
        let err = registry.register("Cwd", construct_cwd).unwrap_err();
        assert!(matches!(err, crate::CapsulaError::Configuration { .. }));
    }

    #[test]
    fn construct_looks_up_by_name() {
        let registry = ContextRegistry::new();
        registry.register("Cwd", construct_cwd).unwrap();
        let item = registry.construct("Cwd", &toml::Table::new()).unwrap();
        assert_eq!(item.default_key(), Key::from("cwd"));
    }

    #[test]
    fn construct_with_unknown_name_fails_loudly() {
        let registry = ContextRegistry::new();
        let err = registry.construct("NoSuchThing", &toml::Table::new()).unwrap_err();
        assert!(matches!(err, crate::CapsulaError::Configuration { .. }));
    }
}
