//! Circuit breaker for stagnating agent loops
//!
//! A persistent state machine per `(project, agent)`. Consecutive loops
//! without progress, or with the same error repeating, count toward the
//! stagnation threshold; reaching it trips the breaker and the loop engine
//! refuses further invocations until an explicit reset. Every transition is
//! recorded in a bounded history.

use super::status::{LoopStatus, RalphStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bound on recorded transitions
pub const MAX_CIRCUIT_ENTRIES: usize = 50;

/// Breaker state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    #[default]
    Closed,
    Tripped,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Tripped => "tripped",
        }
    }
}

/// One recorded transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state: String,
    pub to_state: String,
    pub reason: String,
    pub no_progress_count: u32,
    pub same_error_count: u32,
    pub test_loop_count: u32,
    pub completion_count: u32,
}

/// The persistent breaker document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub project: String,
    pub agent: String,
    #[serde(default)]
    pub state: CircuitState,
    #[serde(default)]
    pub no_progress_count: u32,
    #[serde(default)]
    pub same_error_count: u32,
    /// Instrumentation only; surfaced in history, never drives transitions
    #[serde(default)]
    pub test_loop_count: u32,
    /// Instrumentation only; surfaced in history, never drives transitions
    #[serde(default)]
    pub completion_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub entries: Vec<CircuitEntry>,
}

/// What one loop looked like to the breaker
#[derive(Debug, Clone, Default)]
pub struct LoopObservation {
    /// Parsed trailer; `has_status=false` counts as no progress
    pub status: RalphStatus,
    /// Error message from the invocation, when it failed
    pub error: Option<String>,
}

impl CircuitBreaker {
    pub fn new(project: &str, agent: &str) -> Self {
        Self {
            project: project.to_string(),
            agent: agent.to_string(),
            ..Self::default()
        }
    }

    /// Whether the breaker currently refuses invocations
    pub fn is_tripped(&self) -> bool {
        self.state == CircuitState::Tripped
    }

    /// Feed one loop's outcome through the transition rules.
    ///
    /// Returns `true` when this observation tripped the breaker.
    pub fn observe(&mut self, observation: &LoopObservation, threshold: u32) -> bool {
        if observation.status.made_progress() {
            self.no_progress_count = 0;
        } else {
            self.no_progress_count += 1;
        }

        match &observation.error {
            Some(error) => {
                if self.last_error.as_deref() == Some(error.as_str()) {
                    self.same_error_count += 1;
                } else {
                    self.same_error_count = 1;
                    self.last_error = Some(error.clone());
                }
            }
            None => {
                self.same_error_count = 0;
                self.last_error = None;
            }
        }

        if !observation.status.tests_status.is_empty() {
            self.test_loop_count += 1;
        }
        if observation.status.status == LoopStatus::Complete {
            self.completion_count += 1;
        }

        if self.state == CircuitState::Closed
            && (self.no_progress_count >= threshold || self.same_error_count >= threshold)
        {
            let reason = if self.no_progress_count >= threshold {
                format!("no progress for {} consecutive loops", self.no_progress_count)
            } else {
                format!("same error repeated {} times", self.same_error_count)
            };
            self.transition(CircuitState::Tripped, &reason);
            return true;
        }
        false
    }

    /// Clear all counters and return to closed
    pub fn reset(&mut self) {
        let was_tripped = self.is_tripped();
        self.no_progress_count = 0;
        self.same_error_count = 0;
        self.test_loop_count = 0;
        self.completion_count = 0;
        self.last_error = None;
        if was_tripped {
            self.transition(CircuitState::Closed, "reset");
        } else {
            self.state = CircuitState::Closed;
        }
    }

    fn transition(&mut self, to: CircuitState, reason: &str) {
        let entry = CircuitEntry {
            timestamp: Utc::now(),
            from_state: self.state.as_str().to_string(),
            to_state: to.as_str().to_string(),
            reason: reason.to_string(),
            no_progress_count: self.no_progress_count,
            same_error_count: self.same_error_count,
            test_loop_count: self.test_loop_count,
            completion_count: self.completion_count,
        };
        self.state = to;
        self.entries.push(entry);
        if self.entries.len() > MAX_CIRCUIT_ENTRIES {
            let excess = self.entries.len() - MAX_CIRCUIT_ENTRIES;
            self.entries.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ralph::status::parse_status;

    fn no_status() -> LoopObservation {
        LoopObservation::default()
    }

    fn with_progress() -> LoopObservation {
        LoopObservation {
            status: parse_status("RALPH_STATUS:\nTASKS_COMPLETED: 1\n"),
            error: None,
        }
    }

    #[test]
    fn test_trips_after_threshold_no_progress() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        assert!(!breaker.observe(&no_status(), 3));
        assert!(!breaker.observe(&no_status(), 3));
        assert!(breaker.observe(&no_status(), 3));
        assert!(breaker.is_tripped());

        let entry = breaker.entries.last().unwrap();
        assert_eq!(entry.from_state, "closed");
        assert_eq!(entry.to_state, "tripped");
        assert_eq!(entry.no_progress_count, 3);
    }

    #[test]
    fn test_threshold_one_trips_immediately() {
        let mut breaker = CircuitBreaker::new("", "ralph");
        assert!(breaker.observe(&no_status(), 1));
        assert!(breaker.is_tripped());
    }

    #[test]
    fn test_progress_resets_counter() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        breaker.observe(&no_status(), 3);
        breaker.observe(&no_status(), 3);
        breaker.observe(&with_progress(), 3);
        assert_eq!(breaker.no_progress_count, 0);
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn test_repeated_identical_error_trips() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        let failing = LoopObservation {
            status: with_progress().status,
            error: Some("exec failed: connection reset".to_string()),
        };
        assert!(!breaker.observe(&failing, 2));
        assert!(breaker.observe(&failing, 2));
        assert!(breaker.is_tripped());
        assert!(breaker.entries.last().unwrap().reason.contains("same error"));
    }

    #[test]
    fn test_different_errors_do_not_accumulate() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        let first = LoopObservation {
            status: with_progress().status,
            error: Some("error A".to_string()),
        };
        let second = LoopObservation {
            status: with_progress().status,
            error: Some("error B".to_string()),
        };
        breaker.observe(&first, 3);
        breaker.observe(&second, 3);
        assert_eq!(breaker.same_error_count, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        breaker.observe(&no_status(), 1);
        assert!(breaker.is_tripped());
        breaker.reset();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.no_progress_count, 0);
        assert_eq!(breaker.same_error_count, 0);
        let entry = breaker.entries.last().unwrap();
        assert_eq!(entry.reason, "reset");
        assert_eq!(entry.to_state, "closed");
    }

    #[test]
    fn test_instrumentation_counters_do_not_trip() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        let observation = LoopObservation {
            status: parse_status(
                "RALPH_STATUS:\nSTATUS: COMPLETE\nTASKS_COMPLETED: 1\nTESTS_STATUS: ok\n",
            ),
            error: None,
        };
        for _ in 0..10 {
            assert!(!breaker.observe(&observation, 2));
        }
        assert_eq!(breaker.test_loop_count, 10);
        assert_eq!(breaker.completion_count, 10);
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn test_history_bounded_to_fifty() {
        let mut breaker = CircuitBreaker::new("myapp", "ralph");
        for i in 0..60 {
            breaker.observe(&no_status(), 1);
            breaker.reset();
            let _ = i;
        }
        assert!(breaker.entries.len() <= MAX_CIRCUIT_ENTRIES);
    }
}
