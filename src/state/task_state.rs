/// Crawl task state definitions
///
/// A task moves `Pending -> InFlight -> Done | FailedRetryable | PermanentlyFailed`.
/// Retryable failures go back to `Pending` while attempts remain.
use std::fmt;

/// Represents the current state of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting in the frontier
    Pending,

    /// Claimed by a worker; no other worker may fetch this URL
    InFlight,

    /// Fetched, processed and persisted
    Done,

    /// Failed, but may be attempted again (retry or a later resumed run)
    FailedRetryable,

    /// Retry budget exhausted or failure not retryable; never re-enqueued this run
    PermanentlyFailed,
}

impl TaskState {
    /// Returns true if the task will not be handed out again in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::PermanentlyFailed)
    }

    /// Returns true if a resumed run should pick the task up again
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight | Self::FailedRetryable)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Done)
                | (InFlight, Pending)
                | (InFlight, FailedRetryable)
                | (InFlight, PermanentlyFailed)
                | (FailedRetryable, Pending)
        )
    }

    /// Converts the task state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::FailedRetryable => "failed_retryable",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Parses a task state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed_retryable" => Some(Self::FailedRetryable),
            "permanently_failed" => Some(Self::PermanentlyFailed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
