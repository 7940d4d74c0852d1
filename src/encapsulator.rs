//! `Encapsulator`: an ordered collection of contexts and watchers that
//! produces a [`Capsule`] snapshot, plus the thread-local "current
//! encapsulator" stack that lets [`crate::ambient::record`] reach whatever
//! encapsulator is active.

use crate::capsule::{Capsule, ExceptionInfo};
use crate::item::{Context, Reporter, Watcher, WatcherScope};
use crate::key::Key;
use crate::outcome::PanicState;
use crate::CapsulaError;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::replace;
use std::rc::Rc;

enum Item {
    Context(Box<dyn Context>),
    Watcher(Box<dyn Watcher>),
}

/// An ordered set of capsule items that produces [`Capsule`] snapshots.
///
/// Items are kept in insertion order; [`Encapsulator::encapsulate`] walks
/// them in that order, and [`Encapsulator::watch`] both opens and closes
/// watcher scopes in that same insertion order, so the first-inserted
/// watcher is the first torn down.
#[derive(Default)]
pub struct Encapsulator {
    items: Vec<(Key, Item)>,
}

impl std::fmt::Debug for Encapsulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encapsulator")
            .field("keys", &self.items.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

impl Encapsulator {
    /// Creates an empty encapsulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a context under its own [`Context::default_key`], or `key` if
    /// given. Fails if the key is already taken.
    pub fn add_context(&mut self, key: Option<Key>, context: Box<dyn Context>) -> Result<(), CapsulaError> {
        let key = key.unwrap_or_else(|| context.default_key());
        self.insert(key, Item::Context(context))
    }

    /// Adds a watcher under its own [`Watcher::default_key`], or `key` if
    /// given.
    pub fn add_watcher(&mut self, key: Option<Key>, watcher: Box<dyn Watcher>) -> Result<(), CapsulaError> {
        let key = key.unwrap_or_else(|| watcher.default_key());
        self.insert(key, Item::Watcher(watcher))
    }

    fn insert(&mut self, key: Key, item: Item) -> Result<(), CapsulaError> {
        if self.items.iter().any(|(existing, _)| existing == &key) {
            return Err(CapsulaError::KeyConflict { key });
        }
        self.items.push((key, item));
        Ok(())
    }

    /// Opens every watcher's scope, in insertion order. The returned
    /// [`WatcherGroup`] tears them down in that same order when closed.
    pub fn watch(&self) -> crate::watcher_group::WatcherGroup {
        let scopes: Vec<Box<dyn WatcherScope>> = self
            .items
            .iter()
            .filter_map(|(_, item)| match item {
                Item::Watcher(w) => Some(w.watch()),
                Item::Context(_) => None,
            })
            .collect();
        crate::watcher_group::WatcherGroup::new(scopes)
    }

    /// Calls `encapsulate` on every item, in insertion order, folding
    /// non-aborting failures into [`Capsule::fails`] and returning
    /// `Err` immediately for the first `abort_on_error` item that fails.
    #[tracing::instrument(skip(self), fields(items = self.items.len()))]
    pub fn encapsulate(&mut self) -> Result<Capsule, CapsulaError> {
        let mut data = HashMap::new();
        let mut fails = HashMap::new();

        for (key, item) in &mut self.items {
            let abort_on_error;
            let captured: Result<Value, crate::item::CaptureError> = match item {
                Item::Context(c) => {
                    abort_on_error = c.abort_on_error();
                    c.encapsulate()
                }
                Item::Watcher(w) => {
                    abort_on_error = w.abort_on_error();
                    w.encapsulate()
                }
            };

            match captured {
                Ok(value) => {
                    data.insert(key.clone(), value);
                }
                Err(source) if abort_on_error => {
                    return Err(CapsulaError::CaptureFailure { key: key.clone(), source });
                }
                Err(source) => {
                    tracing::warn!(%key, error = %source, "capsule item capture failed, folding into fails");
                    fails.insert(key.clone(), ExceptionInfo::from_error(&*source));
                }
            }
        }

        Ok(Capsule::new(data, fails))
    }

    /// Records a value directly under `key`, bypassing the context/watcher
    /// machinery. Used by [`crate::ambient::record`].
    pub fn record(&mut self, key: Key, value: Value) -> Result<(), CapsulaError> {
        self.add_context(Some(key), Box::new(crate::builtin::ObjectContext::new(value)))
    }
}

thread_local! {
    static CURRENT_ENCAPSULATOR: RefCell<Option<Rc<RefCell<Encapsulator>>>> = RefCell::new(None);
}

/// Runs `f` with `encapsulator` installed as the current thread's ambient
/// encapsulator, restoring whatever was previously current on exit — even
/// if `f` panics.
pub fn enter<R>(encapsulator: Rc<RefCell<Encapsulator>>, f: impl FnOnce() -> R) -> R {
    let prev = CURRENT_ENCAPSULATOR.with(|current| replace(&mut *current.borrow_mut(), Some(encapsulator)));
    let _restore = scopeguard::guard(prev, |prev| {
        CURRENT_ENCAPSULATOR.with(|current| *current.borrow_mut() = prev);
    });
    f()
}

/// Returns the current thread's ambient encapsulator, if one is active.
pub fn current() -> Option<Rc<RefCell<Encapsulator>>> {
    CURRENT_ENCAPSULATOR.with(|current| current.borrow().clone())
}

/// Records `value` under `key` in the current thread's ambient encapsulator.
/// Fails with [`CapsulaError::NoEncapsulator`] if none is active.
pub fn record(key: Key, value: Value) -> Result<(), CapsulaError> {
    let current = current().ok_or(CapsulaError::NoEncapsulator)?;
    current.borrow_mut().record(key, value)
}

/// A reporter that does nothing, used as the zero-reporter default in tests
/// and wherever a caller wants to stage a run with no output sink.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _capsule: &Capsule) -> Result<(), crate::item::CaptureError> {
        Ok(())
    }
}
