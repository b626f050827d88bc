/// Records: the reversible units callers hand to the history.
use std::fmt;

/// A stored forward or inverse operation.
///
/// Actions are opaque to the history; they capture whatever context they
/// need (document handles, the `History` itself) explicitly.
pub type Action = Box<dyn FnMut() -> anyhow::Result<()>>;

/// Handle to a record that was pushed onto the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) u64);

/// One reversible unit: an inverse action, a forward action and an optional label.
///
/// Either action may be absent (that side is a no-op on traversal), but a
/// record with neither is rejected by `History::record`.
#[derive(Default)]
pub struct Record {
    pub(crate) name: Option<String>,
    pub(crate) undo: Option<Action>,
    pub(crate) redo: Option<Action>,
}

impl Record {
    /// Creates a record from an undo and a redo action.
    pub fn new<U, R>(undo: U, redo: R) -> Self
    where
        U: FnMut() -> anyhow::Result<()> + 'static,
        R: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self {
            name: None,
            undo: Some(Box::new(undo)),
            redo: Some(Box::new(redo)),
        }
    }

    /// Creates a record with no actions and no name.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets the label shown by `History::list`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_undo<U>(mut self, undo: U) -> Self
    where
        U: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.undo = Some(Box::new(undo));
        self
    }

    pub fn with_redo<R>(mut self, redo: R) -> Self
    where
        R: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.redo = Some(Box::new(redo));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the record carries at least one action.
    pub fn has_action(&self) -> bool {
        self.undo.is_some() || self.redo.is_some()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("name", &self.name)
            .field("has_undo", &self.undo.is_some())
            .field("has_redo", &self.redo.is_some())
            .finish()
    }
}
