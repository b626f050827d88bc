/// Coalescing chains.
///
/// A burst of edits for one gesture (a drag, a run of keystrokes) shares a
/// chain id. The first edit records normally and keeps its undo action as
/// the inverse of the whole burst; later edits within the delay only replace
/// the record's redo action, so redo always lands on the latest state.
use std::time::{Duration, Instant};

use crate::error::{HistoryError, Result};
use crate::manager::History;
use crate::record::{Record, RecordId};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Chain {
    pub record: RecordId,
    pub deadline: Instant,
}

impl History {
    /// Coalesces `record` into the open chain `id`, using the configured delay.
    ///
    /// # Errors
    ///
    /// See [`History::coalesce_with_delay`].
    pub fn coalesce(&self, id: &str, record: Record) -> Result<Option<RecordId>> {
        let delay = self.state().config.coalesce_delay();
        self.coalesce_with_delay(id, record, delay)
    }

    /// Coalesces `record` into the open chain `id`, or starts a new chain.
    ///
    /// A chain stays open for `delay` after its latest call. Entries recorded
    /// after the chain's record do not break it, but once that record has
    /// been undone or truncated away a fresh record is pushed instead.
    /// Continuing a chain swaps in the new redo action (if any) and leaves
    /// the stack shape alone, so no `change` is emitted for it.
    ///
    /// Returns `Ok(None)` while recording is blocked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty id or a record with no action.
    pub fn coalesce_with_delay(
        &self,
        id: &str,
        mut record: Record,
        delay: Duration,
    ) -> Result<Option<RecordId>> {
        if self.is_blocked() {
            return Ok(None);
        }
        if id.is_empty() {
            return Err(HistoryError::invalid_argument("chain id must not be empty"));
        }
        if !record.has_action() {
            return Err(HistoryError::invalid_argument(
                "record has neither an undo nor a redo action",
            ));
        }

        self.settle_timers();
        let deadline = self.now() + delay;

        let continued = {
            let mut guard = self.state_mut();
            let state = &mut *guard;
            match state.chains.get(id).map(|chain| chain.record) {
                Some(chained) => match state.stack.applied_record_mut(chained) {
                    Some(target) => {
                        if let Some(redo) = record.redo.take() {
                            target.redo = Some(redo);
                        }
                        state.chains.insert(
                            id.to_string(),
                            Chain {
                                record: chained,
                                deadline,
                            },
                        );
                        Some(chained)
                    }
                    None => {
                        state.chains.remove(id);
                        tracing::debug!("Chain `{id}` lost its record, starting a new one");
                        None
                    }
                },
                None => None,
            }
        };

        if let Some(chained) = continued {
            tracing::trace!("Extended chain `{id}`");
            return Ok(Some(chained));
        }

        let Some(recorded) = self.record(record)? else {
            return Ok(None);
        };
        self.state_mut().chains.insert(
            id.to_string(),
            Chain {
                record: recorded,
                deadline,
            },
        );
        tracing::debug!("Opened chain `{id}`");
        Ok(Some(recorded))
    }

    /// Ends the merging window of chain `id` now. Returns `false` if it was not open.
    pub fn close_chain(&self, id: &str) -> bool {
        let closed = self.state_mut().chains.remove(id).is_some();
        if closed {
            tracing::debug!("Closed chain `{id}`");
        }
        closed
    }

    /// Whether chain `id` is open and its delay has not yet elapsed.
    pub fn has_open_chain(&self, id: &str) -> bool {
        let now = self.now();
        self.state()
            .chains
            .get(id)
            .is_some_and(|chain| chain.deadline > now)
    }

    pub(crate) fn expire_chains(&self, now: Instant) {
        self.state_mut().chains.retain(|id, chain| {
            let open = chain.deadline > now;
            if !open {
                tracing::trace!("Chain `{id}` expired");
            }
            open
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::HistoryConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn setup() -> (History, ManualClock, Log) {
        let clock = ManualClock::new();
        let history = History::with_clock(HistoryConfig::default(), Rc::new(clock.clone()));
        (history, clock, Rc::new(RefCell::new(Vec::new())))
    }

    fn logged(log: &Log, undo: &'static str, redo: &'static str) -> Record {
        let (u, r) = (Rc::clone(log), Rc::clone(log));
        Record::new(
            move || {
                u.borrow_mut().push(undo);
                Ok(())
            },
            move || {
                r.borrow_mut().push(redo);
                Ok(())
            },
        )
    }

    #[test]
    fn test_chain_merges_within_delay() {
        let (history, clock, log) = setup();
        let first = history.coalesce("drag", logged(&log, "u1", "r1")).expect("coalesce");
        clock.advance_ms(100);
        let second = history.coalesce("drag", logged(&log, "u2", "r2")).expect("coalesce");

        assert_eq!(first, second);
        assert_eq!(history.list().len(), 1);

        history.undo().expect("undo");
        history.redo().expect("redo");
        assert_eq!(*log.borrow(), vec!["u1", "r2"]);
    }

    #[test]
    fn test_chain_expires_after_delay() {
        let (history, clock, log) = setup();
        history.coalesce("drag", logged(&log, "u1", "r1")).expect("coalesce");
        clock.advance_ms(312);
        assert!(!history.has_open_chain("drag"));

        history.coalesce("drag", logged(&log, "u2", "r2")).expect("coalesce");
        assert_eq!(history.list().len(), 2);
    }

    #[test]
    fn test_each_call_reschedules_expiry() {
        let (history, clock, log) = setup();
        for _ in 0..5 {
            history.coalesce("drag", logged(&log, "u", "r")).expect("coalesce");
            clock.advance_ms(300);
        }
        assert!(history.has_open_chain("drag"));
        assert_eq!(history.list().len(), 1);
    }

    #[test]
    fn test_explicit_delay() {
        let (history, clock, log) = setup();
        history
            .coalesce_with_delay("type", logged(&log, "u", "r"), Duration::from_millis(1000))
            .expect("coalesce");
        clock.advance_ms(900);
        assert!(history.has_open_chain("type"));
        clock.advance_ms(100);
        assert!(!history.has_open_chain("type"));
    }

    #[test]
    fn test_chains_are_keyed_by_id() {
        let (history, _clock, log) = setup();
        history.coalesce("a", logged(&log, "ua", "ra")).expect("coalesce");
        history.coalesce("b", logged(&log, "ub", "rb")).expect("coalesce");
        assert_eq!(history.list().len(), 2);
    }

    #[test]
    fn test_close_chain_starts_fresh_record() {
        let (history, _clock, log) = setup();
        history.coalesce("drag", logged(&log, "u1", "r1")).expect("coalesce");
        assert!(history.close_chain("drag"));
        assert!(!history.close_chain("drag"));

        history.coalesce("drag", logged(&log, "u2", "r2")).expect("coalesce");
        assert_eq!(history.list().len(), 2);
    }

    #[test]
    fn test_chain_does_not_merge_into_undone_record() {
        let (history, _clock, log) = setup();
        history.coalesce("drag", logged(&log, "u1", "r1")).expect("coalesce");
        history.undo().expect("undo");

        history.coalesce("drag", logged(&log, "u2", "r2")).expect("coalesce");
        let items = history.list();
        assert_eq!(items.len(), 1);
        assert!(items[0].executed);

        history.undo().expect("undo");
        assert_eq!(*log.borrow(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_interleaved_chains_keep_merging() {
        let (history, clock, log) = setup();
        let x = history.coalesce("x", logged(&log, "ux1", "rx1")).expect("coalesce");
        history.coalesce("y", logged(&log, "uy", "ry")).expect("coalesce");
        clock.advance_ms(50);
        let again = history.coalesce("x", logged(&log, "ux2", "rx2")).expect("coalesce");

        assert_eq!(x, again);
        assert_eq!(history.list().len(), 2);
        assert!(history.has_open_chain("x"));

        history.goto(-1).expect("goto");
        history.goto(1).expect("goto");
        assert_eq!(*log.borrow(), vec!["uy", "ux1", "rx2", "ry"]);
    }

    #[test]
    fn test_continuing_chain_does_not_emit() {
        let (history, _clock, log) = setup();
        history.coalesce("drag", logged(&log, "u1", "r1")).expect("coalesce");
        let version = history.version();
        history.coalesce("drag", logged(&log, "u2", "r2")).expect("coalesce");
        assert_eq!(history.version(), version);
    }

    #[test]
    fn test_blocked_coalesce_is_noop() {
        let (history, _clock, log) = setup();
        let token = history.block_saving();
        assert!(history
            .coalesce("drag", logged(&log, "u", "r"))
            .expect("coalesce")
            .is_none());
        assert!(!history.has_open_chain("drag"));
        history.release_block(token);
        assert!(history.is_empty());
    }

    #[test]
    fn test_empty_id_is_invalid() {
        let (history, _clock, log) = setup();
        let err = history.coalesce("", logged(&log, "u", "r")).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidArgument { .. }));
    }

    #[test]
    fn test_clear_closes_chains() {
        let (history, _clock, log) = setup();
        history.coalesce("drag", logged(&log, "u", "r")).expect("coalesce");
        history.clear().expect("clear");
        assert!(!history.has_open_chain("drag"));
    }
}
