//! Undo/redo history engine for interactive editors.
//!
//! Provides a [`History`]: a linear, navigable log of reversible records
//! with a movable cursor, nested atomic groups, time-windowed coalescing of
//! rapid edits, and suppression of recording while stored actions replay.
//! Callers supply the undo and redo actions; the history only sequences and
//! replays them and emits a `change` notification after each step.
pub mod block;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod group;
pub mod manager;
pub mod notify;
pub mod record;
mod stack;

pub use block::{BlockGuard, BlockToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HistoryConfig;
pub use error::{Direction, HistoryError, Result};
pub use group::GroupHandle;
pub use manager::{History, HistoryItem};
pub use notify::SubscriptionId;
pub use record::{Action, Record, RecordId};
