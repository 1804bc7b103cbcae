use chrono::{DateTime, Utc};
use ephemera_domain::{LayerName, OutputSet, Phase};
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Overall verdict of a scenario run. Teardown failures are not a separate
/// outcome — they are recorded in the report's errors and surface through
/// [`RunReport::into_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    ApplyFailed,
    VerificationFailed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Passed => write!(f, "passed"),
            RunOutcome::ApplyFailed => write!(f, "apply failed"),
            RunOutcome::VerificationFailed => write!(f, "verification failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    /// Never reached — an earlier layer's apply failed first.
    NotApplied,
    Applied,
    ApplyFailed,
    Destroyed,
    DestroyFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer: LayerName,
    pub status: LayerStatus,
    /// Outputs captured at apply time; None when the layer never applied.
    pub outputs: Option<OutputSet>,
}

/// Timestamped trail of everything the runner did, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    ScenarioStarted {
        at: DateTime<Utc>,
        scenario: String,
        suffix: String,
    },
    LayerApplied {
        at: DateTime<Utc>,
        layer: LayerName,
    },
    LayerApplyFailed {
        at: DateTime<Utc>,
        layer: LayerName,
        error: String,
    },
    AssertionFailed {
        at: DateTime<Utc>,
        layer: LayerName,
        expectation: String,
        detail: String,
    },
    VerificationPassed {
        at: DateTime<Utc>,
    },
    VerificationFailed {
        at: DateTime<Utc>,
        failures: usize,
    },
    LayerDestroyed {
        at: DateTime<Utc>,
        layer: LayerName,
    },
    LayerDestroyFailed {
        at: DateTime<Utc>,
        layer: LayerName,
        error: String,
    },
    ScenarioFinished {
        at: DateTime<Utc>,
        outcome: RunOutcome,
    },
}

/// The result of one scenario run. The report exists whatever happened;
/// only pre-flight validation refuses to produce one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: String,
    pub suffix: String,
    pub outcome: RunOutcome,
    /// Terminal phase — always `Destroyed` once `run` returns.
    pub phase: Phase,
    pub layers: Vec<LayerOutcome>,
    pub events: Vec<RunEvent>,
    pub errors: Vec<String>,
}

impl RunReport {
    /// True only when everything held: all applies, all assertions, and
    /// all destroys.
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed && self.errors.is_empty()
    }

    /// Collapse to a `Result` for test harness use: any apply, assertion,
    /// or teardown failure becomes the error.
    pub fn into_result(self) -> Result<(), RunError> {
        if self.passed() {
            return Ok(());
        }
        let message = if self.errors.is_empty() {
            self.outcome.to_string()
        } else {
            format!("{}: {}", self.outcome, self.errors.join("; "))
        };
        Err(RunError::Failed {
            scenario: self.scenario,
            message,
        })
    }
}
