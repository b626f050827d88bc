use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Which stored action of a record was being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undo => f.write_str("undo"),
            Self::Redo => f.write_str("redo"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("malformed group: {message}")]
    MalformedGroup { message: String },

    #[error("cannot navigate history while group `{name}` is open")]
    GroupOpen { name: String },

    #[error("cannot {operation} while history is replaying an action")]
    Replaying { operation: &'static str },

    #[error("{direction} action of `{name}` failed")]
    Action {
        name: String,
        direction: Direction,
        #[source]
        source: anyhow::Error,
    },
}

impl HistoryError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn malformed_group(message: impl Into<String>) -> Self {
        Self::MalformedGroup {
            message: message.into(),
        }
    }
}
