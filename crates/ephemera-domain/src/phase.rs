use serde::{Deserialize, Serialize};

use crate::types::LayerName;

/// Per-scenario lifecycle.
///
/// ```text
/// NotStarted → Applying(layer) → { Applied | ApplyFailed }
/// Applied → Verifying → { Verified | VerificationFailed }
/// any non-terminal state → Destroying → Destroyed
/// ```
///
/// `Destroyed` is the only terminal state and is always reached;
/// `ApplyFailed` and `VerificationFailed` are recorded on the report but
/// never block teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Applying { layer: LayerName },
    Applied,
    ApplyFailed,
    Verifying,
    Verified,
    VerificationFailed,
    Destroying,
    Destroyed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Destroyed)
    }

    pub fn can_transition_to(&self, next: &Phase) -> bool {
        use Phase::*;
        match (self, next) {
            // Destruction can start from any non-terminal state.
            (Destroyed, _) => false,
            (Destroying, Destroyed) => true,
            (Destroying, _) => false,
            (_, Destroying) => true,

            (NotStarted, Applying { .. }) => true,
            (Applying { .. }, Applying { .. }) => true,
            (Applying { .. }, Applied) => true,
            (Applying { .. }, ApplyFailed) => true,
            (Applied, Verifying) => true,
            (Verifying, Verified) => true,
            (Verifying, VerificationFailed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::Applying { layer } => write!(f, "applying {}", layer),
            Phase::Applied => write!(f, "applied"),
            Phase::ApplyFailed => write!(f, "apply failed"),
            Phase::Verifying => write!(f, "verifying"),
            Phase::Verified => write!(f, "verified"),
            Phase::VerificationFailed => write!(f, "verification failed"),
            Phase::Destroying => write!(f, "destroying"),
            Phase::Destroyed => write!(f, "destroyed"),
        }
    }
}
