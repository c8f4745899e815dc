use std::error::Error as StdError;
use std::fmt;

/// Why a turn was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user asked to stop.
    Stopped,
    /// The request deadline expired.
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Everything that can end a turn early.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TurnError {
    /// Non-2xx response, or an error record sent inside the stream.
    #[error("{message}")]
    Provider { status: Option<u16>, message: String },

    /// DNS, TLS, connection reset and friends.
    #[error("network error: {0}")]
    Transport(String),

    #[error("generation {0}")]
    Cancelled(CancelReason),

    #[error("malformed stream record: {0}")]
    Decode(String),
}

impl TurnError {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<reqwest::Error> for TurnError {
    fn from(e: reqwest::Error) -> Self {
        // Keep the whole source chain; reqwest's top-level message is terse.
        let mut msg = e.to_string();
        let mut src = e.source();
        while let Some(s) = src {
            msg.push_str(": ");
            msg.push_str(&s.to_string());
            src = s.source();
        }
        Self::Transport(msg)
    }
}
