//! Structured results returned by the engine.
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::ScriptFailure;

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create links, then run the init script.
    Install,
    /// Remove links, then run the cleanup script.
    Uninstall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Overall result of one module transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Every phase succeeded.
    Success,
    /// Something was changed (or a script ran) before the failure.
    PartialFailure,
    /// Validation failed; the filesystem was not touched.
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Coordinator state.
///
/// ```text
/// Idle → Validating → Aborted
///                   → Linking → LinkFailed
///                             → LinkedNoScript
///                             → ScriptRunning → Done
///                                             → ScriptFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Checking every mapping; no mutation.
    Validating,
    /// Validation failed. Terminal.
    Aborted,
    /// Creating or removing links.
    Linking,
    /// Linking failed (after rollback for install). Terminal.
    LinkFailed,
    /// Links done and no script configured. Terminal success.
    LinkedNoScript,
    /// Running the lifecycle script.
    ScriptRunning,
    /// Links done, script failed; links stay in place. Terminal.
    ScriptFailed,
    /// Everything succeeded. Terminal success.
    Done,
}

impl Phase {
    /// Whether the state machine may move from `self` to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Validating)
                | (Self::Validating, Self::Aborted | Self::Linking)
                | (
                    Self::Linking,
                    Self::LinkFailed | Self::LinkedNoScript | Self::ScriptRunning
                )
                | (Self::ScriptRunning, Self::Done | Self::ScriptFailed)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::LinkFailed | Self::LinkedNoScript | Self::ScriptFailed | Self::Done
        )
    }

    /// Terminal states that count as success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::LinkedNoScript | Self::Done)
    }
}

/// Per-mapping result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// A new symlink was created.
    Created,
    /// An owned symlink was removed.
    Removed,
    /// Already in the desired state (linked for install, absent for uninstall).
    SkippedAlreadyCorrect,
    /// Created, then removed again by the install rollback.
    RolledBack,
    /// Never acted on because the transaction stopped first.
    NotAttempted,
    /// The mapping failed.
    Failed(String),
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Removed => write!(f, "removed"),
            Self::SkippedAlreadyCorrect => write!(f, "already correct"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::NotAttempted => write!(f, "not attempted"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of one mapping, with enough identity to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingOutcome {
    /// Position in manifest order (zero-based).
    pub index: usize,
    /// Mapping source.
    pub source: PathBuf,
    /// Resolved target path.
    pub target: PathBuf,
    /// What happened.
    #[serde(flatten)]
    pub outcome: LinkOutcome,
}

/// Result of running a lifecycle script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStatus {
    /// Script path.
    pub script: PathBuf,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Failure, if the script did not succeed.
    pub failure: Option<ScriptFailure>,
}

impl ScriptStatus {
    /// Whether the script exited with code zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything the engine knows about one install or uninstall call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Module name.
    pub module: String,
    /// Install or uninstall.
    pub operation: Operation,
    /// Overall status.
    pub status: Status,
    /// Final coordinator state.
    pub phase: Phase,
    /// Every state visited, in order, starting at [`Phase::Idle`].
    pub trail: Vec<Phase>,
    /// Per-mapping outcomes in manifest order.
    pub outcomes: Vec<MappingOutcome>,
    /// Script result, when a script ran (or failed to start).
    pub script: Option<ScriptStatus>,
}

impl Report {
    /// A fresh report in the [`Phase::Idle`] state.
    #[must_use]
    pub fn new(module: &str, operation: Operation) -> Self {
        Self {
            module: module.to_string(),
            operation,
            status: Status::Aborted,
            phase: Phase::Idle,
            trail: vec![Phase::Idle],
            outcomes: Vec::new(),
            script: None,
        }
    }

    /// Number of mappings whose outcome equals `outcome`.
    #[must_use]
    pub fn count(&self, outcome: &LinkOutcome) -> usize {
        self.outcomes.iter().filter(|o| &o.outcome == outcome).count()
    }

    /// Number of mappings that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, LinkOutcome::Failed(_)))
            .count()
    }

    /// Whether the transaction ended in a success state.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }
}

/// Alias used by install callers.
pub type InstallReport = Report;
/// Alias used by uninstall callers.
pub type UninstallReport = Report;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const ALL: [Phase; 9] = [
        Phase::Idle,
        Phase::Validating,
        Phase::Aborted,
        Phase::Linking,
        Phase::LinkFailed,
        Phase::LinkedNoScript,
        Phase::ScriptRunning,
        Phase::ScriptFailed,
        Phase::Done,
    ];

    #[test]
    fn terminal_phases_have_no_successors() {
        for from in ALL {
            if from.is_terminal() {
                for to in ALL {
                    assert!(!from.can_advance_to(to), "{from:?} -> {to:?}");
                }
            }
        }
    }

    #[test]
    fn linking_never_follows_idle_directly() {
        assert!(!Phase::Idle.can_advance_to(Phase::Linking));
        assert!(!Phase::Validating.can_advance_to(Phase::ScriptRunning));
        assert!(!Phase::Aborted.can_advance_to(Phase::Linking));
    }

    #[test]
    fn success_phases() {
        let successes: Vec<Phase> = ALL.into_iter().filter(|p| p.is_success()).collect();
        assert_eq!(successes, vec![Phase::LinkedNoScript, Phase::Done]);
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = Report::new("vim", Operation::Install);
        for (index, outcome) in [
            LinkOutcome::Created,
            LinkOutcome::Created,
            LinkOutcome::Failed("x".to_string()),
        ]
        .into_iter()
        .enumerate()
        {
            report.outcomes.push(MappingOutcome {
                index,
                source: PathBuf::from("/s"),
                target: PathBuf::from("/t"),
                outcome,
            });
        }
        assert_eq!(report.count(&LinkOutcome::Created), 2);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = MappingOutcome {
            index: 0,
            source: PathBuf::from("/s"),
            target: PathBuf::from("/t"),
            outcome: LinkOutcome::Failed("boom".to_string()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "boom");
        assert_eq!(json["target"], "/t");
    }
}
