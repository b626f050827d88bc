/// The linear record stack and its cursor.
///
/// Groups are stored inline as a pair of flag entries sharing a `GroupId`.
/// A flag finds its partner by scanning the stack, so no entry holds a
/// reference to another.
use std::fmt;

use crate::error::Direction;
use crate::record::{Action, Record, RecordId};

/// Identifier shared by the start and end flags of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlagSide {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupFlag {
    pub group: GroupId,
    pub side: FlagSide,
    pub name: String,
}

pub(crate) struct StoredRecord {
    pub id: RecordId,
    pub name: Option<String>,
    pub undo: Option<Action>,
    pub redo: Option<Action>,
}

impl StoredRecord {
    pub fn new(id: RecordId, record: Record) -> Self {
        Self {
            id,
            name: record.name,
            undo: record.undo,
            redo: record.redo,
        }
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<Action> {
        match direction {
            Direction::Undo => &mut self.undo,
            Direction::Redo => &mut self.redo,
        }
    }
}

pub(crate) enum Entry {
    Record(StoredRecord),
    Flag(GroupFlag),
}

/// Shape of an entry, without borrowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Record,
    GroupStart,
    GroupEnd,
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Record(_) => EntryKind::Record,
            Entry::Flag(flag) if flag.side == FlagSide::Start => EntryKind::GroupStart,
            Entry::Flag(_) => EntryKind::GroupEnd,
        }
    }

    fn is_flag(&self, group: GroupId, side: FlagSide) -> bool {
        matches!(self, Entry::Flag(flag) if flag.group == group && flag.side == side)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Record(record) => f
                .debug_struct("Record")
                .field("id", &record.id)
                .field("name", &record.name)
                .finish(),
            Entry::Flag(flag) => f
                .debug_struct("Flag")
                .field("group", &flag.group)
                .field("side", &flag.side)
                .field("name", &flag.name)
                .finish(),
        }
    }
}

/// Entries in insertion order plus the number of entries currently applied.
///
/// `applied` is the cursor plus one: entries `[0, applied)` are applied,
/// the rest are the redo tail.
#[derive(Debug, Default)]
pub(crate) struct Stack {
    entries: Vec<Entry>,
    applied: usize,
}

impl Stack {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Index of the most recently applied entry, `-1` when none.
    pub fn cursor(&self) -> isize {
        self.applied as isize - 1
    }

    /// Index of the most recently applied entry.
    pub fn top(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    pub fn kind(&self, index: usize) -> Option<EntryKind> {
        self.entries.get(index).map(Entry::kind)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn set_applied(&mut self, applied: usize) {
        debug_assert!(applied <= self.entries.len());
        self.applied = applied.min(self.entries.len());
    }

    /// Drops the redo tail, appends `entry` and makes it the applied top.
    pub fn push(&mut self, entry: Entry) {
        self.entries.truncate(self.applied);
        self.entries.push(entry);
        self.applied = self.entries.len();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied = 0;
    }

    /// Index of the partner flag of the flag at `index`.
    pub fn pair_of(&self, index: usize) -> Option<usize> {
        let Some(Entry::Flag(flag)) = self.entries.get(index) else {
            return None;
        };
        match flag.side {
            FlagSide::Start => self.entries[index + 1..]
                .iter()
                .position(|e| e.is_flag(flag.group, FlagSide::End))
                .map(|offset| index + 1 + offset),
            FlagSide::End => self.entries[..index]
                .iter()
                .rposition(|e| e.is_flag(flag.group, FlagSide::Start)),
        }
    }

    pub fn position_of(&self, id: RecordId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Entry::Record(r) if r.id == id))
    }

    /// The record `id`, if it is on the stack and applied.
    pub fn applied_record_mut(&mut self, id: RecordId) -> Option<&mut StoredRecord> {
        let index = self.position_of(id)?;
        if index >= self.applied {
            return None;
        }
        match self.entries.get_mut(index) {
            Some(Entry::Record(record)) => Some(record),
            _ => None,
        }
    }

    /// Moves one action out of the record at `index` so it can run without
    /// the stack being borrowed. Returns the record's id and label as well.
    pub fn take_action(
        &mut self,
        index: usize,
        direction: Direction,
    ) -> Option<(RecordId, Option<String>, Action)> {
        let Some(Entry::Record(record)) = self.entries.get_mut(index) else {
            return None;
        };
        let action = record.slot(direction).take()?;
        Some((record.id, record.name.clone(), action))
    }

    /// Puts an action taken with `take_action` back into its record.
    pub fn restore_action(&mut self, id: RecordId, direction: Direction, action: Action) {
        let Some(index) = self.position_of(id) else {
            return;
        };
        if let Some(Entry::Record(record)) = self.entries.get_mut(index) {
            let slot = record.slot(direction);
            if slot.is_none() {
                *slot = Some(action);
            }
        }
    }
}
