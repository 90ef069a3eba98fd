//! RALPH_STATUS trailer parsing
//!
//! The in-container agent ends each turn with a structured block:
//!
//! ```text
//! RALPH_STATUS:
//! STATUS: IN_PROGRESS
//! EXIT_SIGNAL: false
//! TASKS_COMPLETED: 2
//! FILES_MODIFIED: 5
//! TESTS_STATUS: ok
//! WORK_TYPE: refactor
//! RECOMMENDATION: keep going
//! ```
//!
//! The parser takes the last block in the output, ignores unknown keys,
//! defaults missing keys to zero/empty, and matches STATUS
//! case-insensitively. No block at all means "no progress this loop".

/// Opening marker line of a status block
const MARKER: &str = "RALPH_STATUS:";

/// Agent-reported loop status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopStatus {
    #[default]
    InProgress,
    Complete,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::InProgress => "IN_PROGRESS",
            LoopStatus::Complete => "COMPLETE",
        }
    }
}

/// Parsed status trailer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RalphStatus {
    /// Whether a block was found at all
    pub has_status: bool,
    pub status: LoopStatus,
    pub exit_signal: bool,
    pub tasks_completed: u32,
    pub files_modified: u32,
    pub tests_status: String,
    pub work_type: String,
    pub recommendation: String,
}

impl RalphStatus {
    /// The agent asked the loop to stop
    pub fn requested_exit(&self) -> bool {
        self.exit_signal || self.status == LoopStatus::Complete
    }

    /// Whether this loop made observable progress
    pub fn made_progress(&self) -> bool {
        self.has_status && (self.tasks_completed > 0 || self.files_modified > 0)
    }
}

/// Parse the trailing status block out of agent stdout
pub fn parse_status(output: &str) -> RalphStatus {
    let lines: Vec<&str> = output.lines().collect();
    let Some(start) = lines.iter().rposition(|line| line.trim() == MARKER) else {
        return RalphStatus::default();
    };

    let mut status = RalphStatus {
        has_status: true,
        ..RalphStatus::default()
    };

    for line in &lines[start + 1..] {
        let Some((key, value)) = line.split_once(':') else {
            // End of the fenced region.
            break;
        };
        let value = value.trim();
        match key.trim() {
            "STATUS" => {
                if value.eq_ignore_ascii_case("complete") {
                    status.status = LoopStatus::Complete;
                }
            }
            "EXIT_SIGNAL" => status.exit_signal = value.eq_ignore_ascii_case("true"),
            "TASKS_COMPLETED" => status.tasks_completed = value.parse().unwrap_or(0),
            "FILES_MODIFIED" => status.files_modified = value.parse().unwrap_or(0),
            "TESTS_STATUS" => status.tests_status = value.to_string(),
            "WORK_TYPE" => status.work_type = value.to_string(),
            "RECOMMENDATION" => status.recommendation = value.to_string(),
            // Unknown keys are ignored for forward compatibility.
            _ => {}
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_has_no_status() {
        let status = parse_status("");
        assert!(!status.has_status);
        assert_eq!(status.status, LoopStatus::InProgress);
        assert!(!status.requested_exit());
        assert!(!status.made_progress());
    }

    #[test]
    fn test_full_block() {
        let output = "noise\nRALPH_STATUS:\nSTATUS: COMPLETE\nEXIT_SIGNAL: true\n\
                      TASKS_COMPLETED: 2\nFILES_MODIFIED: 5\nTESTS_STATUS: ok\n\
                      WORK_TYPE: refactor\nRECOMMENDATION: stop\n\n";
        let status = parse_status(output);
        assert!(status.has_status);
        assert_eq!(status.status, LoopStatus::Complete);
        assert!(status.exit_signal);
        assert_eq!(status.tasks_completed, 2);
        assert_eq!(status.files_modified, 5);
        assert_eq!(status.tests_status, "ok");
        assert_eq!(status.work_type, "refactor");
        assert_eq!(status.recommendation, "stop");
        assert!(status.requested_exit());
    }

    #[test]
    fn test_last_block_wins() {
        let output = "RALPH_STATUS:\nSTATUS: IN_PROGRESS\nTASKS_COMPLETED: 1\n\n\
                      later noise\n\
                      RALPH_STATUS:\nSTATUS: COMPLETE\nTASKS_COMPLETED: 9\n";
        let status = parse_status(output);
        assert_eq!(status.status, LoopStatus::Complete);
        assert_eq!(status.tasks_completed, 9);
    }

    #[test]
    fn test_status_is_case_insensitive() {
        let status = parse_status("RALPH_STATUS:\nSTATUS: complete\n");
        assert_eq!(status.status, LoopStatus::Complete);
        let status = parse_status("RALPH_STATUS:\nSTATUS: In_Progress\n");
        assert_eq!(status.status, LoopStatus::InProgress);
    }

    #[test]
    fn test_unknown_keys_ignored_missing_default() {
        let status = parse_status("RALPH_STATUS:\nNOVEL_KEY: whatever\nFILES_MODIFIED: 3\n");
        assert!(status.has_status);
        assert_eq!(status.files_modified, 3);
        assert_eq!(status.tasks_completed, 0);
        assert_eq!(status.tests_status, "");
        assert!(!status.exit_signal);
    }

    #[test]
    fn test_block_ends_at_non_field_line() {
        let status =
            parse_status("RALPH_STATUS:\nTASKS_COMPLETED: 4\n\nTASKS_COMPLETED: 7\n");
        // The blank line closed the block; the second field belongs to prose.
        assert_eq!(status.tasks_completed, 4);
    }

    #[test]
    fn test_garbage_integers_default_to_zero() {
        let status = parse_status("RALPH_STATUS:\nTASKS_COMPLETED: many\n");
        assert_eq!(status.tasks_completed, 0);
    }

    #[test]
    fn test_progress_requires_counters() {
        let status = parse_status("RALPH_STATUS:\nSTATUS: IN_PROGRESS\n");
        assert!(status.has_status);
        assert!(!status.made_progress());
        let status = parse_status("RALPH_STATUS:\nFILES_MODIFIED: 1\n");
        assert!(status.made_progress());
    }
}
