use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical step name type used throughout the engine.
pub type StepName = String;

/// Lifecycle state of a single step.
///
/// ```text
/// pending -> dispatched -> complete
///                       -> retrying -> pending
///                       -> failed
/// pending | dispatched  -> blocked   (ancestor failed terminally)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Dispatched,
    Retrying,
    Complete,
    Failed,
    Blocked,
}

impl StepState {
    /// No further transition is permitted from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Complete | StepState::Failed | StepState::Blocked)
    }

    /// Handed to a handler, or waiting on a retry timer.
    pub fn is_in_flight(self) -> bool {
        matches!(self, StepState::Dispatched | StepState::Retrying)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Dispatched => "dispatched",
            StepState::Retrying => "retrying",
            StepState::Complete => "complete",
            StepState::Failed => "failed",
            StepState::Blocked => "blocked",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a task, aggregated from its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Complete,
    BlockedByFailures,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete
                | TaskStatus::BlockedByFailures
                | TaskStatus::Error
                | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::BlockedByFailures => "blocked_by_failures",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a handler failure.
///
/// - `Validation`: the step's inputs are malformed. Never retried.
/// - `Permanent`: business-rule rejection. Never retried.
/// - `Retryable`: transient failure reported by the handler.
/// - `Handler`: transient failure of the handler itself (panic, timeout,
///   process spawn error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Permanent,
    Retryable,
    Handler,
}

impl ErrorKind {
    /// Whether failures of this kind may be retried at all.
    pub fn allows_retry(self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Handler)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Retryable => "retryable",
            ErrorKind::Handler => "handler",
        };
        f.write_str(s)
    }
}

/// Where committed tasks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Keep tasks in memory only (lost on restart).
    Memory,
    /// Additionally snapshot every committed task to `<state_dir>/tasks/`.
    File,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}

/// Shape of the retry delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(format!(
                "invalid backoff: {other} (expected \"fixed\" or \"exponential\")"
            )),
        }
    }
}

/// Parse a duration string like `"500ms"`, `"3s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn huge_durations_are_rejected_not_wrapped() {
        let max = u64::MAX.to_string();
        assert!(parse_duration(&format!("{max}h")).unwrap_err().contains("too large"));
        assert!(parse_duration(&format!("{}m", u64::MAX / 30)).is_err());
        assert_eq!(
            parse_duration(&format!("{max}s")),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn terminal_states() {
        assert!(StepState::Complete.is_terminal());
        assert!(StepState::Blocked.is_terminal());
        assert!(!StepState::Retrying.is_terminal());
        assert!(TaskStatus::BlockedByFailures.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(StepState::Retrying.is_in_flight());
        assert!(!StepState::Pending.is_in_flight());
    }

    #[test]
    fn only_transient_kinds_allow_retry() {
        assert!(!ErrorKind::Validation.allows_retry());
        assert!(!ErrorKind::Permanent.allows_retry());
        assert!(ErrorKind::Retryable.allows_retry());
        assert!(ErrorKind::Handler.allows_retry());
    }
}
