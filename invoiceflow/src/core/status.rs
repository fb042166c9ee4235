//! Run status, stage mode, and decision enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// The run is executing (or waiting to be driven).
    Running,
    /// The run is parked at the review stage awaiting a decision.
    Suspended,
    /// The run reached `COMPLETE`.
    Completed,
    /// The run failed; its state bag is preserved for diagnosis.
    Failed,
    /// A reviewer rejected the document.
    ManualHandlingRequired,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl RunStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ManualHandlingRequired => "manual-handling-required",
        }
    }

    /// Returns true if the run can never advance again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::ManualHandlingRequired
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "manual-handling-required" => Ok(Self::ManualHandlingRequired),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Whether a stage's result depends only on its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageMode {
    /// Same inputs, same outputs.
    Deterministic,
    /// Depends on an external decision.
    NonDeterministic,
}

impl fmt::Display for StageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deterministic => write!(f, "deterministic"),
            Self::NonDeterministic => write!(f, "non-deterministic"),
        }
    }
}

/// Decision recorded when a review is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Continue the main sequence.
    Accept,
    /// Hand the document off for manual handling.
    Reject,
    /// Operator cancellation; ends the run as failed.
    Cancel,
}

impl Decision {
    /// Returns the wire name of the decision.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            "CANCEL" => Ok(Self::Cancel),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// Outcome of the post-match branch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Skip the review stages.
    Continue,
    /// Route through the checkpoint and review stages.
    Pause,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Pause => write!(f, "pause"),
        }
    }
}
