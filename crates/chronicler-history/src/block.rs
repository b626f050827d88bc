/// Recording suppression.
///
/// Any number of independent holders may block recording at once; recording
/// resumes only when every token has been released.
use std::collections::HashSet;

use crate::manager::History;

/// Proof of a held block, returned by `History::block_saving`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BlockToken(u64);

#[derive(Debug, Default)]
pub(crate) struct BlockSet {
    held: HashSet<u64>,
    next: u64,
}

impl BlockSet {
    pub fn acquire(&mut self) -> BlockToken {
        let token = self.next;
        self.next += 1;
        self.held.insert(token);
        BlockToken(token)
    }

    /// Returns `false` if the token was not held.
    pub fn release(&mut self, token: &BlockToken) -> bool {
        self.held.remove(&token.0)
    }

    pub fn is_blocked(&self) -> bool {
        !self.held.is_empty()
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }
}

/// Holds a block until dropped, including during panic unwinding.
#[must_use = "recording resumes as soon as the guard is dropped"]
pub struct BlockGuard<'a> {
    history: &'a History,
    token: Option<BlockToken>,
}

impl<'a> BlockGuard<'a> {
    pub(crate) fn new(history: &'a History) -> Self {
        let token = history.block_saving();
        Self {
            history,
            token: Some(token),
        }
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.history.release_block(token);
        }
    }
}
