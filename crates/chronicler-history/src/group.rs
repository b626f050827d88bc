/// Atomic groups.
///
/// A group brackets the records made between its start and end flags so
/// that one undo or redo traverses all of them. Groups nest and must close
/// innermost first; `end_group` enforces this.
///
/// Debounced groups (from `wrap_debounced`) stay open across calls that
/// arrive within their delay and close once the delay elapses, or as soon
/// as the user navigates the history.
use std::time::{Duration, Instant};

use crate::error::{HistoryError, Result};
use crate::manager::History;
use crate::stack::{Entry, FlagSide, GroupFlag, GroupId, Stack};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Debounce {
    key: u64,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct OpenGroup {
    id: GroupId,
    name: String,
    debounce: Option<Debounce>,
}

/// Groups whose start flag is on the stack but whose end flag is not yet.
#[derive(Debug, Default)]
pub(crate) struct OpenGroups {
    open: Vec<OpenGroup>,
    /// Bumped by `clear`, which abandons every open group.
    generation: u64,
    next_key: u64,
}

impl OpenGroups {
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn abandon_all(&mut self) {
        self.open.clear();
        self.generation += 1;
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }
}

/// Pushes the end flag of `group`.
fn push_end(stack: &mut Stack, group: OpenGroup) {
    tracing::debug!("Closing group `{}`", group.name);
    stack.push(Entry::Flag(GroupFlag {
        group: group.id,
        side: FlagSide::End,
        name: group.name,
    }));
}

/// An open group returned by `History::start_group`.
///
/// A handle obtained while recording was blocked is inert: nothing was
/// pushed and ending it does nothing.
#[derive(Debug)]
#[must_use = "a started group must be passed to `end_group`"]
pub struct GroupHandle {
    id: Option<GroupId>,
    generation: u64,
    name: String,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the start flag was actually pushed.
    pub fn is_recorded(&self) -> bool {
        self.id.is_some()
    }
}

/// Ends its group when dropped, so a panicking body still closes it.
struct GroupScope<'a> {
    history: &'a History,
    handle: Option<GroupHandle>,
}

impl<'a> GroupScope<'a> {
    fn open(history: &'a History, name: String) -> Self {
        Self {
            history,
            handle: Some(history.start_group(name)),
        }
    }

    fn finish(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.history.end_group(handle),
            None => Ok(()),
        }
    }
}

impl Drop for GroupScope<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.history.end_group(handle) {
                tracing::warn!("Failed to close group: {e}");
            }
        }
    }
}

impl History {
    /// Pushes a start flag and returns the handle that closes the group.
    pub fn start_group(&self, name: impl Into<String>) -> GroupHandle {
        let name = name.into();
        if self.is_blocked() {
            let generation = self.state().groups.generation;
            return GroupHandle {
                id: None,
                generation,
                name,
            };
        }
        self.settle_timers();
        let handle = self.open_group(name, None);
        self.emit_change();
        handle
    }

    /// Pushes the end flag of `handle`'s group.
    ///
    /// Debounced groups nested inside it are closed first. Once a start flag
    /// has been pushed its end flag is pushed even if recording is blocked
    /// by now. Ending a group abandoned by `clear` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MalformedGroup` if the group is not open or an explicit
    /// group nested inside it is still open.
    pub fn end_group(&self, handle: GroupHandle) -> Result<()> {
        let Some(id) = handle.id else {
            return Ok(());
        };
        {
            let mut guard = self.state_mut();
            let state = &mut *guard;
            if handle.generation != state.groups.generation {
                tracing::debug!("Group `{}` was abandoned by clear", handle.name);
                return Ok(());
            }
            let Some(position) = state.groups.open.iter().rposition(|g| g.id == id) else {
                return Err(HistoryError::malformed_group(format!(
                    "group `{}` is not open",
                    handle.name
                )));
            };
            if let Some(inner) = state.groups.open[position + 1..]
                .iter()
                .find(|g| g.debounce.is_none())
            {
                return Err(HistoryError::malformed_group(format!(
                    "group `{}` closed while nested group `{}` is still open",
                    handle.name, inner.name
                )));
            }
            while state.groups.open.len() > position {
                if let Some(group) = state.groups.open.pop() {
                    push_end(&mut state.stack, group);
                }
            }
        }
        self.emit_change();
        Ok(())
    }

    /// Runs `f` inside one group, so everything it records undoes as a unit.
    ///
    /// # Errors
    ///
    /// Returns `MalformedGroup` if `f` left a nested explicit group open.
    pub fn group<R>(&self, name: impl Into<String>, f: impl FnOnce() -> R) -> Result<R> {
        let scope = GroupScope::open(self, name.into());
        let out = f();
        scope.finish()?;
        Ok(out)
    }

    /// Wraps `f` so that each call runs inside its own group.
    pub fn wrap<A, R, F>(&self, name: impl Into<String>, mut f: F) -> impl FnMut(A) -> R
    where
        F: FnMut(A) -> R,
    {
        let history = self.clone();
        let name = name.into();
        move |args| {
            let scope = GroupScope::open(&history, name.clone());
            let out = f(args);
            if let Err(e) = scope.finish() {
                tracing::warn!("Wrapped call left history malformed: {e}");
            }
            out
        }
    }

    /// Wraps `f` so that calls arriving within `delay` of each other share
    /// one group, which closes `delay` after the last call.
    pub fn wrap_debounced<A, R, F>(
        &self,
        name: impl Into<String>,
        delay: Duration,
        mut f: F,
    ) -> impl FnMut(A) -> R
    where
        F: FnMut(A) -> R,
    {
        let history = self.clone();
        let name = name.into();
        let key = self.state_mut().groups.next_key();
        move |args| {
            history.touch_debounced(key, &name, delay);
            f(args)
        }
    }

    fn open_group(&self, name: String, debounce: Option<Debounce>) -> GroupHandle {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let id = GroupId(state.alloc_id());
        tracing::debug!("Opening group `{name}`");
        state.stack.push(Entry::Flag(GroupFlag {
            group: id,
            side: FlagSide::Start,
            name: name.clone(),
        }));
        state.groups.open.push(OpenGroup {
            id,
            name: name.clone(),
            debounce,
        });
        GroupHandle {
            id: Some(id),
            generation: state.groups.generation,
            name,
        }
    }

    /// Opens the debounced group for `key`, or pushes its deadline back.
    fn touch_debounced(&self, key: u64, name: &str, delay: Duration) {
        if self.is_blocked() {
            return;
        }
        self.settle_timers();
        let deadline = self.now() + delay;

        let extended = {
            let mut state = self.state_mut();
            let open = state
                .groups
                .open
                .iter_mut()
                .find(|g| g.debounce.is_some_and(|d| d.key == key));
            match open {
                Some(group) => {
                    group.debounce = Some(Debounce { key, deadline });
                    true
                }
                None => false,
            }
        };

        if !extended {
            // The handle is not needed: debounced groups close through their deadline.
            let _ = self.open_group(name.to_string(), Some(Debounce { key, deadline }));
            self.emit_change();
        }
    }

    /// Closes innermost debounced groups whose deadline has passed. Returns
    /// whether any group closed.
    pub(crate) fn close_due_groups(&self, now: Instant) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let mut closed = false;
        while state
            .groups
            .open
            .last()
            .is_some_and(|g| g.debounce.is_some_and(|d| d.deadline <= now))
        {
            if let Some(group) = state.groups.open.pop() {
                push_end(&mut state.stack, group);
                closed = true;
            }
        }
        closed
    }

    /// Closes every open debounced group before navigation.
    ///
    /// # Errors
    ///
    /// Returns `GroupOpen` without closing anything if an explicit group is open.
    pub(crate) fn close_debounced_groups(&self) -> Result<()> {
        let closed = {
            let mut guard = self.state_mut();
            let state = &mut *guard;
            if let Some(explicit) = state.groups.open.iter().rev().find(|g| g.debounce.is_none()) {
                return Err(HistoryError::GroupOpen {
                    name: explicit.name.clone(),
                });
            }
            let closed = !state.groups.open.is_empty();
            while let Some(group) = state.groups.open.pop() {
                push_end(&mut state.stack, group);
            }
            closed
        };
        if closed {
            self.emit_change();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::HistoryConfig;
    use crate::record::Record;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn setup() -> (History, ManualClock, Log) {
        let clock = ManualClock::new();
        let history = History::with_clock(HistoryConfig::default(), Rc::new(clock.clone()));
        (history, clock, Rc::new(RefCell::new(Vec::new())))
    }

    fn record(history: &History, log: &Log, name: &str) {
        let (u, r) = (Rc::clone(log), Rc::clone(log));
        let (undo, redo) = (format!("undo {name}"), format!("redo {name}"));
        history
            .record(
                Record::new(
                    move || {
                        u.borrow_mut().push(undo.clone());
                        Ok(())
                    },
                    move || {
                        r.borrow_mut().push(redo.clone());
                        Ok(())
                    },
                )
                .named(name),
            )
            .expect("record");
    }

    #[test]
    fn test_group_undoes_members_in_reverse() {
        let (history, _clock, log) = setup();
        let handle = history.start_group("move");
        record(&history, &log, "a");
        record(&history, &log, "b");
        history.end_group(handle).expect("end");

        assert!(history.undo().expect("undo"));
        assert_eq!(history.cursor(), -1);
        assert_eq!(*log.borrow(), vec!["undo b", "undo a"]);

        log.borrow_mut().clear();
        assert!(history.redo().expect("redo"));
        assert_eq!(history.cursor(), 3);
        assert_eq!(*log.borrow(), vec!["redo a", "redo b"]);
    }

    #[test]
    fn test_group_lists_as_one_item() {
        let (history, _clock, log) = setup();
        record(&history, &log, "before");
        let handle = history.start_group("batch");
        record(&history, &log, "a");
        record(&history, &log, "b");
        history.end_group(handle).expect("end");

        let items = history.list();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "batch");
        assert_eq!(items[1].index, 3);
        assert!(items[1].executed);
    }

    #[test]
    fn test_nested_groups_collapse_to_outer() {
        let (history, _clock, log) = setup();
        let outer = history.start_group("outer");
        record(&history, &log, "a");
        let inner = history.start_group("inner");
        record(&history, &log, "b");
        history.end_group(inner).expect("end inner");
        record(&history, &log, "c");
        history.end_group(outer).expect("end outer");

        let items = history.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "outer");

        history.undo().expect("undo");
        assert_eq!(*log.borrow(), vec!["undo c", "undo b", "undo a"]);
        assert_eq!(history.cursor(), -1);
    }

    #[test]
    fn test_empty_group_traverses() {
        let (history, _clock, _log) = setup();
        let handle = history.start_group("nothing");
        history.end_group(handle).expect("end");

        assert_eq!(history.list()[0].index, 0);
        assert!(history.undo().expect("undo"));
        assert_eq!(history.cursor(), -1);
        assert!(history.redo().expect("redo"));
        assert_eq!(history.cursor(), 1);
    }

    #[test]
    fn test_end_outer_before_inner_is_malformed() {
        let (history, _clock, _log) = setup();
        let outer = history.start_group("outer");
        let inner = history.start_group("inner");

        let err = history.end_group(outer).unwrap_err();
        assert!(matches!(err, HistoryError::MalformedGroup { .. }));
        history.end_group(inner).expect("end inner");
    }

    #[test]
    fn test_undo_while_group_open_is_refused() {
        let (history, _clock, log) = setup();
        let handle = history.start_group("open");
        record(&history, &log, "a");

        let err = history.undo().unwrap_err();
        assert!(matches!(err, HistoryError::GroupOpen { ref name } if name == "open"));
        assert!(log.borrow().is_empty());
        history.end_group(handle).expect("end");
        assert!(history.undo().expect("undo"));
    }

    #[test]
    fn test_blocked_start_gives_inert_handle() {
        let (history, _clock, _log) = setup();
        let token = history.block_saving();
        let handle = history.start_group("ignored");
        assert!(!handle.is_recorded());
        history.release_block(token);

        history.end_group(handle).expect("end");
        assert!(history.is_empty());
    }

    #[test]
    fn test_end_flag_pushed_even_when_blocked() {
        let (history, _clock, log) = setup();
        let handle = history.start_group("g");
        record(&history, &log, "a");
        let token = history.block_saving();
        history.end_group(handle).expect("end");
        history.release_block(token);

        assert_eq!(history.len(), 3);
        assert_eq!(history.list().len(), 1);
    }

    #[test]
    fn test_clear_abandons_open_groups() {
        let (history, _clock, log) = setup();
        let handle = history.start_group("g");
        record(&history, &log, "a");
        history.clear().expect("clear");

        history.end_group(handle).expect("abandoned end");
        assert!(history.is_empty());
        assert!(history.undo().is_ok());
    }

    #[test]
    fn test_group_helper_returns_value() {
        let (history, _clock, log) = setup();
        let out = history
            .group("batch", || {
                record(&history, &log, "a");
                record(&history, &log, "b");
                7
            })
            .expect("group");
        assert_eq!(out, 7);
        assert_eq!(history.list().len(), 1);
    }

    #[test]
    fn test_wrap_groups_each_call() {
        let (history, _clock, log) = setup();
        let h = history.clone();
        let l = Rc::clone(&log);
        let mut set_pair = history.wrap("pair", move |n: u32| {
            record(&h, &l, &format!("x{n}"));
            record(&h, &l, &format!("y{n}"));
            n * 2
        });

        assert_eq!(set_pair(1), 2);
        assert_eq!(set_pair(2), 4);

        let items = history.list();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.name == "pair"));
    }

    #[test]
    fn test_debounced_wrap_shares_group_within_delay() {
        let (history, clock, log) = setup();
        let h = history.clone();
        let l = Rc::clone(&log);
        let mut nudge = history.wrap_debounced("nudge", Duration::from_millis(200), move |n: u32| {
            record(&h, &l, &format!("n{n}"));
        });

        nudge(1);
        clock.advance_ms(150);
        nudge(2);
        clock.advance_ms(150);
        nudge(3);
        clock.advance_ms(200);
        history.tick();

        let items = history.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "nudge");

        nudge(4);
        history.undo().expect("undo");
        assert_eq!(history.list().len(), 2);
        assert_eq!(*log.borrow(), vec!["undo n4"]);
    }

    #[test]
    fn test_debounced_group_closes_before_later_record() {
        let (history, clock, log) = setup();
        let h = history.clone();
        let l = Rc::clone(&log);
        let mut nudge = history.wrap_debounced("nudge", Duration::from_millis(100), move |_: ()| {
            record(&h, &l, "n");
        });

        nudge(());
        clock.advance_ms(100);
        record(&history, &log, "after");

        let items = history.list();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "after");
    }

    #[test]
    fn test_undo_closes_open_debounced_group() {
        let (history, _clock, log) = setup();
        let h = history.clone();
        let l = Rc::clone(&log);
        let mut nudge = history.wrap_debounced("nudge", Duration::from_secs(10), move |n: u32| {
            record(&h, &l, &format!("n{n}"));
        });

        nudge(1);
        nudge(2);
        history.undo().expect("undo");
        assert_eq!(*log.borrow(), vec!["undo n2", "undo n1"]);
        assert_eq!(history.cursor(), -1);
    }
}
