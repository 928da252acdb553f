use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Pipeline phase. Declaration order is the order of the phase graph.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum VdwPhase {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "phase_1_mood")]
    Phase1Mood,
    #[serde(rename = "phase_1_validation")]
    Phase1Validation,
    #[serde(rename = "phase_2_architecture")]
    Phase2Architecture,
    #[serde(rename = "phase_2_validation")]
    Phase2Validation,
    #[serde(rename = "phase_3_specification")]
    Phase3Specification,
    #[serde(rename = "phase_3_validation")]
    Phase3Validation,
    #[serde(rename = "phase_4_implementation")]
    Phase4Implementation,
    #[serde(rename = "phase_4_validation")]
    Phase4Validation,
    #[serde(rename = "phase_5_testing")]
    Phase5Testing,
    #[serde(rename = "phase_5_validation")]
    Phase5Validation,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl VdwPhase {
    pub const ALL: [VdwPhase; 13] = [
        Self::Idle,
        Self::Phase1Mood,
        Self::Phase1Validation,
        Self::Phase2Architecture,
        Self::Phase2Validation,
        Self::Phase3Specification,
        Self::Phase3Validation,
        Self::Phase4Implementation,
        Self::Phase4Validation,
        Self::Phase5Testing,
        Self::Phase5Validation,
        Self::Completed,
        Self::Failed,
    ];

    /// Phases that run a handler, in pipeline order.
    pub const EXECUTION_PHASES: [VdwPhase; 5] = [
        Self::Phase1Mood,
        Self::Phase2Architecture,
        Self::Phase3Specification,
        Self::Phase4Implementation,
        Self::Phase5Testing,
    ];

    pub const VALIDATION_PHASES: [VdwPhase; 5] = [
        Self::Phase1Validation,
        Self::Phase2Validation,
        Self::Phase3Validation,
        Self::Phase4Validation,
        Self::Phase5Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Phase1Mood => "phase_1_mood",
            Self::Phase1Validation => "phase_1_validation",
            Self::Phase2Architecture => "phase_2_architecture",
            Self::Phase2Validation => "phase_2_validation",
            Self::Phase3Specification => "phase_3_specification",
            Self::Phase3Validation => "phase_3_validation",
            Self::Phase4Implementation => "phase_4_implementation",
            Self::Phase4Validation => "phase_4_validation",
            Self::Phase5Testing => "phase_5_testing",
            Self::Phase5Validation => "phase_5_validation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == s)
    }

    pub fn is_execution(&self) -> bool {
        Self::EXECUTION_PHASES.contains(self)
    }

    pub fn is_validation(&self) -> bool {
        Self::VALIDATION_PHASES.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stage number (1..=5) for execution and validation phases.
    pub fn number(&self) -> Option<u8> {
        match self {
            Self::Phase1Mood | Self::Phase1Validation => Some(1),
            Self::Phase2Architecture | Self::Phase2Validation => Some(2),
            Self::Phase3Specification | Self::Phase3Validation => Some(3),
            Self::Phase4Implementation | Self::Phase4Validation => Some(4),
            Self::Phase5Testing | Self::Phase5Validation => Some(5),
            _ => None,
        }
    }

    /// Gate that follows an execution phase.
    pub fn validation_phase(&self) -> Option<VdwPhase> {
        match self {
            Self::Phase1Mood => Some(Self::Phase1Validation),
            Self::Phase2Architecture => Some(Self::Phase2Validation),
            Self::Phase3Specification => Some(Self::Phase3Validation),
            Self::Phase4Implementation => Some(Self::Phase4Validation),
            Self::Phase5Testing => Some(Self::Phase5Validation),
            _ => None,
        }
    }

    /// Execution phase a validation gate reviews (and returns to on rejection).
    pub fn execution_phase(&self) -> Option<VdwPhase> {
        match self {
            Self::Phase1Validation => Some(Self::Phase1Mood),
            Self::Phase2Validation => Some(Self::Phase2Architecture),
            Self::Phase3Validation => Some(Self::Phase3Specification),
            Self::Phase4Validation => Some(Self::Phase4Implementation),
            Self::Phase5Validation => Some(Self::Phase5Testing),
            _ => None,
        }
    }

    /// Execution phase entered when this gate is approved. `None` for the last gate.
    pub fn next_execution(&self) -> Option<VdwPhase> {
        match self {
            Self::Phase1Validation => Some(Self::Phase2Architecture),
            Self::Phase2Validation => Some(Self::Phase3Specification),
            Self::Phase3Validation => Some(Self::Phase4Implementation),
            Self::Phase4Validation => Some(Self::Phase5Testing),
            _ => None,
        }
    }

    /// Execution phase whose output must exist before entering `self`.
    pub fn prerequisite(&self) -> Option<VdwPhase> {
        match self {
            Self::Phase2Architecture => Some(Self::Phase1Mood),
            Self::Phase3Specification => Some(Self::Phase2Architecture),
            Self::Phase4Implementation => Some(Self::Phase3Specification),
            Self::Phase5Testing => Some(Self::Phase4Implementation),
            Self::Completed => Some(Self::Phase5Testing),
            _ => None,
        }
    }
}

impl std::str::FromStr for VdwPhase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownPhase(s.to_string()))
    }
}

impl std::fmt::Display for VdwPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
