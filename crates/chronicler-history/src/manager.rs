/// Core undo/redo history: a linear stack of records and group flags with a
/// movable cursor.
///
/// Recording appends after the cursor and drops the redo tail. Undo and redo
/// walk the cursor, replaying stored actions with recording suppressed so
/// that actions may call ordinary editor mutation APIs without growing the
/// stack. Every mutating or cursor-moving call ends with a `change`
/// notification.
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use serde::Serialize;

use crate::block::{BlockGuard, BlockSet, BlockToken};
use crate::chain::Chain;
use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::error::{Direction, HistoryError, Result};
use crate::group::OpenGroups;
use crate::notify::{Listeners, SubscriptionId};
use crate::record::{Action, Record, RecordId};
use crate::stack::{Entry, EntryKind, FlagSide, Stack, StoredRecord};

/// One row of `History::list`: a record, or a whole group collapsed to one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    pub name: String,
    /// Stack index to pass to `History::goto`.
    pub index: usize,
    /// Whether the entry is at or before the cursor.
    pub executed: bool,
}

pub(crate) struct State {
    pub stack: Stack,
    pub blocks: BlockSet,
    pub chains: HashMap<String, Chain>,
    pub groups: OpenGroups,
    pub listeners: Listeners,
    pub config: HistoryConfig,
    /// Incremented on every `change` emission.
    pub version: u64,
    /// True while `undo`/`redo` is running stored actions.
    pub replaying: bool,
    next_id: u64,
}

impl State {
    fn new(config: HistoryConfig) -> Self {
        Self {
            stack: Stack::default(),
            blocks: BlockSet::default(),
            chains: HashMap::new(),
            groups: OpenGroups::default(),
            listeners: Listeners::default(),
            config,
            version: 0,
            replaying: false,
            next_id: 0,
        }
    }

    pub fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Undo/redo history for one editor.
///
/// `History` is a cheap handle onto shared, single-threaded state: clone it
/// into stored actions and UI callbacks that need to record or navigate.
/// Calls made from inside a replayed action are suppressed (recording) or
/// rejected (navigation), never interleaved.
#[derive(Clone)]
pub struct History {
    state: Rc<RefCell<State>>,
    clock: Rc<dyn Clock>,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("History")
            .field("len", &state.stack.len())
            .field("cursor", &state.stack.cursor())
            .field("blocks", &state.blocks.held())
            .field("open_chains", &state.chains.len())
            .field("open_groups", &state.groups.len())
            .field("listeners", &state.listeners.len())
            .field("version", &state.version)
            .field("replaying", &state.replaying)
            .finish()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

/// Marks the history as replaying for as long as it lives.
struct ReplayGuard<'a> {
    history: &'a History,
}

impl<'a> ReplayGuard<'a> {
    fn enter(history: &'a History) -> Self {
        history.state_mut().replaying = true;
        Self { history }
    }
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.history.state_mut().replaying = false;
    }
}

/// A stored action moved out of the stack while it runs. Puts the action
/// back when dropped, including when the action panics.
struct LentAction<'a> {
    history: &'a History,
    id: RecordId,
    direction: Direction,
    action: Option<Action>,
}

impl LentAction<'_> {
    fn run(&mut self) -> anyhow::Result<()> {
        match self.action.as_mut() {
            Some(action) => action(),
            None => Ok(()),
        }
    }
}

impl Drop for LentAction<'_> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            self.history
                .state_mut()
                .stack
                .restore_action(self.id, self.direction, action);
        }
    }
}

impl History {
    /// Creates an empty history driven by the system clock.
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    /// Creates an empty history whose chain and group deadlines use `clock`.
    pub fn with_clock(config: HistoryConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new(config))),
            clock,
        }
    }

    pub(crate) fn state(&self) -> Ref<'_, State> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn config(&self) -> HistoryConfig {
        self.state().config.clone()
    }

    // ── Recording ──────────────────────────────────────────────────────

    /// Pushes `record` after the cursor, discarding the redo tail.
    ///
    /// Returns `Ok(None)` without touching the stack while recording is
    /// blocked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record has neither an undo nor a
    /// redo action.
    pub fn record(&self, record: Record) -> Result<Option<RecordId>> {
        if self.is_blocked() {
            tracing::trace!("Recording blocked, dropping {:?}", record.name());
            return Ok(None);
        }
        if !record.has_action() {
            return Err(HistoryError::invalid_argument(
                "record has neither an undo nor a redo action",
            ));
        }

        self.settle_timers();

        let id = {
            let mut state = self.state_mut();
            let id = RecordId(state.alloc_id());
            tracing::debug!(
                "Recording {:?} at index {}",
                record.name(),
                state.stack.applied()
            );
            state
                .stack
                .push(Entry::Record(StoredRecord::new(id, record)));
            id
        };

        self.emit_change();
        Ok(Some(id))
    }

    // ── Navigation ─────────────────────────────────────────────────────

    /// Undoes the entry at the cursor; a group end flag undoes the whole group.
    ///
    /// Returns `Ok(false)` when there is nothing to undo. Emits `change` on
    /// every outcome, errors included.
    ///
    /// # Errors
    ///
    /// Fails without moving if called from a replayed action or while an
    /// explicit group is open. A failing undo action leaves its record
    /// applied and returns `HistoryError::Action`.
    pub fn undo(&self) -> Result<bool> {
        let outcome = self.begin_navigation("undo").and_then(|()| {
            let _replay = ReplayGuard::enter(self);
            self.step_back()
        });
        self.emit_change();
        outcome
    }

    /// Redoes the entry after the cursor; a group start flag redoes the whole group.
    ///
    /// Mirrors [`History::undo`].
    ///
    /// # Errors
    ///
    /// Same conditions as [`History::undo`]; a failing redo action leaves
    /// its record unapplied.
    pub fn redo(&self) -> Result<bool> {
        let outcome = self.begin_navigation("redo").and_then(|()| {
            let _replay = ReplayGuard::enter(self);
            self.step_forward()
        });
        self.emit_change();
        outcome
    }

    /// Undoes or redoes until the cursor reaches `target`, clamped to
    /// `[-1, len - 1]`.
    ///
    /// Each step emits its own `change`. A target inside a group stops on
    /// the far side of that group.
    ///
    /// # Errors
    ///
    /// Propagates the first failing step.
    pub fn goto(&self, target: isize) -> Result<()> {
        if self.state().replaying {
            return Err(HistoryError::Replaying { operation: "goto" });
        }
        let target = target.clamp(-1, self.len() as isize - 1);

        if target < self.cursor() {
            while target < self.cursor() {
                if !self.undo()? {
                    break;
                }
            }
        } else {
            while target > self.cursor() {
                if !self.redo()? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Closes every chain, abandons open groups, empties the stack and
    /// resets the cursor.
    ///
    /// # Errors
    ///
    /// Returns `Replaying` if called from a replayed action.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.state_mut();
            if state.replaying {
                return Err(HistoryError::Replaying { operation: "clear" });
            }
            state.chains.clear();
            state.groups.abandon_all();
            state.stack.clear();
        }
        tracing::debug!("History cleared");
        self.emit_change();
        Ok(())
    }

    fn begin_navigation(&self, operation: &'static str) -> Result<()> {
        if self.state().replaying {
            return Err(HistoryError::Replaying { operation });
        }
        self.settle_timers();
        self.close_debounced_groups()
    }

    fn set_applied(&self, applied: usize) {
        self.state_mut().stack.set_applied(applied);
    }

    fn step_back(&self) -> Result<bool> {
        let (top, kind) = {
            let state = self.state();
            let Some(top) = state.stack.top() else {
                return Ok(false);
            };
            (top, state.stack.kind(top))
        };

        match kind {
            Some(EntryKind::Record) => {
                self.replay(top, Direction::Undo)?;
                self.set_applied(top);
            }
            Some(EntryKind::GroupEnd) => {
                let start = self.state().stack.pair_of(top);
                let start = start.ok_or_else(|| {
                    HistoryError::malformed_group(format!("end flag at {top} has no start flag"))
                })?;
                self.set_applied(top);
                for index in (start + 1..top).rev() {
                    self.replay(index, Direction::Undo)?;
                    self.set_applied(index);
                }
                self.set_applied(start);
                tracing::debug!("Undid group spanning {start}..={top}");
            }
            // A bare start flag is only reachable after a group member failed.
            Some(EntryKind::GroupStart) | None => self.set_applied(top),
        }
        Ok(true)
    }

    fn step_forward(&self) -> Result<bool> {
        let (next, kind) = {
            let state = self.state();
            let next = state.stack.applied();
            if next >= state.stack.len() {
                return Ok(false);
            }
            (next, state.stack.kind(next))
        };

        match kind {
            Some(EntryKind::Record) => {
                self.replay(next, Direction::Redo)?;
                self.set_applied(next + 1);
            }
            Some(EntryKind::GroupStart) => {
                let end = self.state().stack.pair_of(next);
                let end = end.ok_or_else(|| {
                    HistoryError::malformed_group(format!("start flag at {next} has no end flag"))
                })?;
                self.set_applied(next + 1);
                for index in next + 1..end {
                    self.replay(index, Direction::Redo)?;
                    self.set_applied(index + 1);
                }
                self.set_applied(end + 1);
                tracing::debug!("Redid group spanning {next}..={end}");
            }
            Some(EntryKind::GroupEnd) | None => self.set_applied(next + 1),
        }
        Ok(true)
    }

    /// Runs one stored action of the record at `index` with recording blocked.
    ///
    /// The action is moved out of the stack for the call so the action may
    /// use this history freely. Flags and missing actions are no-ops.
    fn replay(&self, index: usize, direction: Direction) -> Result<()> {
        let taken = self.state_mut().stack.take_action(index, direction);
        let Some((id, name, action)) = taken else {
            return Ok(());
        };

        let outcome = {
            let mut lent = LentAction {
                history: self,
                id,
                direction,
                action: Some(action),
            };
            let _block = self.suppress();
            lent.run()
        };

        outcome.map_err(|source| {
            let name = name.unwrap_or_else(|| self.state().config.unnamed_label.clone());
            tracing::warn!("{direction} action of `{name}` failed: {source:#}");
            HistoryError::Action {
                name,
                direction,
                source,
            }
        })
    }

    // ── Inspection ─────────────────────────────────────────────────────

    /// Lists the history at unit granularity: each top-level group is one
    /// item positioned just before its end flag, each ungrouped record is
    /// one item at its own index.
    pub fn list(&self) -> Vec<HistoryItem> {
        let state = self.state();
        let stack = &state.stack;
        let label = state.config.unnamed_label.as_str();
        let cursor = stack.cursor();
        let entries = stack.entries();

        let item = |name: Option<&str>, index: usize| HistoryItem {
            name: match name {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => label.to_string(),
            },
            index,
            executed: index as isize <= cursor,
        };

        let mut items = Vec::new();
        let mut index = 0;
        while index < entries.len() {
            match &entries[index] {
                Entry::Record(record) => {
                    items.push(item(record.name.as_deref(), index));
                    index += 1;
                }
                Entry::Flag(flag) if flag.side == FlagSide::Start => match stack.pair_of(index) {
                    Some(end) => {
                        items.push(item(Some(flag.name.as_str()), end - 1));
                        index = end + 1;
                    }
                    None => {
                        // Still-open group: everything after it belongs to it so far.
                        items.push(item(Some(flag.name.as_str()), entries.len() - 1));
                        break;
                    }
                },
                Entry::Flag(_) => index += 1,
            }
        }
        items
    }

    /// Index of the most recently applied entry, `-1` when nothing is applied.
    pub fn cursor(&self) -> isize {
        self.state().stack.cursor()
    }

    /// Number of stack entries, flags included.
    pub fn len(&self) -> usize {
        self.state().stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn can_undo(&self) -> bool {
        self.cursor() >= 0
    }

    pub fn can_redo(&self) -> bool {
        let state = self.state();
        state.stack.applied() < state.stack.len()
    }

    /// Label of the unit the next `undo` would revert.
    pub fn undo_label(&self) -> Option<String> {
        self.list()
            .into_iter()
            .rev()
            .find(|item| item.executed)
            .map(|item| item.name)
    }

    /// Label of the unit the next `redo` would reapply.
    pub fn redo_label(&self) -> Option<String> {
        self.list()
            .into_iter()
            .find(|item| !item.executed)
            .map(|item| item.name)
    }

    // ── Notification ───────────────────────────────────────────────────

    /// Registers a `change` listener.
    ///
    /// Listeners run after the history has released its internal state, so
    /// they may read or mutate the history.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> SubscriptionId {
        self.state_mut().listeners.add(Rc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state_mut().listeners.remove(id)
    }

    /// Number of `change` notifications emitted so far.
    pub fn version(&self) -> u64 {
        self.state().version
    }

    pub(crate) fn emit_change(&self) {
        let listeners = {
            let mut state = self.state_mut();
            state.version += 1;
            state.listeners.snapshot()
        };
        for listener in listeners {
            listener();
        }
    }

    // ── Suppression ────────────────────────────────────────────────────

    /// Blocks recording until the returned token is released.
    pub fn block_saving(&self) -> BlockToken {
        self.state_mut().blocks.acquire()
    }

    /// Releases a block. Returns `false` if the token was not held here.
    pub fn release_block(&self, token: BlockToken) -> bool {
        self.state_mut().blocks.release(&token)
    }

    pub fn is_blocked(&self) -> bool {
        self.state().blocks.is_blocked()
    }

    /// Blocks recording for the lifetime of the returned guard.
    pub fn suppress(&self) -> BlockGuard<'_> {
        BlockGuard::new(self)
    }

    /// Runs `f` with recording blocked.
    pub fn run_without_saving<R>(&self, f: impl FnOnce() -> R) -> R {
        let _block = self.suppress();
        f()
    }

    // ── Timers ─────────────────────────────────────────────────────────

    /// Fires due timers: expires idle chains and closes debounced groups
    /// whose delay has elapsed. Call from the host event loop.
    pub fn tick(&self) {
        if self.state().replaying {
            return;
        }
        self.settle_timers();
    }

    pub(crate) fn settle_timers(&self) {
        let now = self.now();
        self.expire_chains(now);
        if self.close_due_groups(now) {
            self.emit_change();
        }
    }
}
