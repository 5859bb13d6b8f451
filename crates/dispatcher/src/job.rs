//! Job records as stored in the shared queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle state
///
/// Transitions are monotonic: `Created -> Running -> {Completed | Failed | Canceled}`.
/// `Created` is only ever written by the submission path, never by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    /// Stored representation of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Whether the state is one of the three terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// Stored state string did not match any [`JobState`]
#[derive(Debug, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownJobState(pub String);

/// Full job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    /// Opaque payload, interpreted only by the resolved plugin
    pub input_data: String,
    pub state: JobState,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
}

/// A job that this instance has moved from `CREATED` to `RUNNING`
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    pub input_data: String,
    pub created: DateTime<Utc>,
    pub started: DateTime<Utc>,
}

/// Definition of a job to submit
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub input_data: String,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, input_data: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            input_data: input_data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_storage_string() {
        for state in [
            JobState::Created,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Canceled,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let err = "cancelled".parse::<JobState>().unwrap_err();
        assert_eq!(err.to_string(), "unknown job state: cancelled");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
    }
}
