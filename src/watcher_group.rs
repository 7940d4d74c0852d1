//! Teardown, in insertion order, of a set of already-open [`WatcherScope`]s.

use crate::item::WatcherScope;
use crate::outcome::PanicState;

/// Holds every open [`WatcherScope`] for one [`crate::Encapsulator::watch`]
/// call. Scopes were opened in insertion order; [`WatcherGroup::close`]
/// tears them down in that same order, so the first-inserted watcher is the
/// first torn down.
pub struct WatcherGroup {
    scopes: Vec<Box<dyn WatcherScope>>,
}

impl WatcherGroup {
    pub(crate) fn new(scopes: Vec<Box<dyn WatcherScope>>) -> Self {
        Self { scopes }
    }

    /// Tears down every scope in insertion order (first-inserted first).
    ///
    /// `outcome` is a read-only view of the routine's panic, if any. Once a
    /// scope's `exit` returns `true` for a present panic, later scopes in
    /// this group are shown `None` instead — but this is purely advisory
    /// bookkeeping for the group itself. The caller retains ownership of
    /// `outcome` and decides independently whether to resume it; `close`
    /// never consumes or downgrades the original panic.
    pub fn close(self, outcome: Option<&PanicState>) {
        let mut suppressed = false;
        for mut scope in self.scopes {
            let visible = if suppressed { None } else { outcome };
            if scope.exit(visible) && visible.is_some() {
                suppressed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recording {
        log: Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
        handles: bool,
    }

    impl WatcherScope for Recording {
        fn exit(&mut self, outcome: Option<&PanicState>) -> bool {
            self.log.borrow_mut().push(self.name);
            self.handles && outcome.is_some()
        }
    }

    #[test]
    fn scopes_close_in_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let group = WatcherGroup::new(vec![
            Box::new(Recording { log: log.clone(), name: "first", handles: false }),
            Box::new(Recording { log: log.clone(), name: "second", handles: false }),
            Box::new(Recording { log: log.clone(), name: "third", handles: false }),
        ]);
        group.close(None);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    struct Observing {
        log: Rc<RefCell<Vec<bool>>>,
    }

    impl WatcherScope for Observing {
        fn exit(&mut self, outcome: Option<&PanicState>) -> bool {
            self.log.borrow_mut().push(outcome.is_some());
            false
        }
    }

    #[test]
    fn handled_panic_is_invisible_to_later_scopes() {
        let saw = Rc::new(RefCell::new(Vec::new()));
        let group = WatcherGroup::new(vec![
            // opened first, so closed first; handles the panic.
            Box::new(Recording { log: Rc::new(RefCell::new(Vec::new())), name: "first", handles: true }),
            // opened last, so closed last.
            Box::new(Observing { log: saw.clone() }),
        ]);
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let outcome = PanicState::new(payload, None);
        group.close(Some(&outcome));
        // The first scope handled it, so the later `Observing` scope saw no panic.
        assert_eq!(*saw.borrow(), vec![false]);
        // The caller's own reference is untouched regardless.
        assert!(outcome.message().is_some());
    }
}
