//! Correction records and the verification state machine vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a detected learner mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    Grammar,
    Vocabulary,
    Pronunciation,
    StyleRegister,
}

impl CorrectionType {
    pub const ALL: [CorrectionType; 4] = [
        CorrectionType::Grammar,
        CorrectionType::Vocabulary,
        CorrectionType::Pronunciation,
        CorrectionType::StyleRegister,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionType::Grammar => "grammar",
            CorrectionType::Vocabulary => "vocabulary",
            CorrectionType::Pronunciation => "pronunciation",
            CorrectionType::StyleRegister => "style_register",
        }
    }

    /// Parse a wire value; `None` for anything outside the enumerated set.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == raw)
    }

    /// Comma-separated list of valid wire values, for error messages.
    pub fn valid_values() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Verification lifecycle of one correction.
///
/// Transitions are monotonic: `detected → verifying → {verified | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStatus {
    Detected,
    Verifying,
    Verified,
    Failed,
}

impl CorrectionStatus {
    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: CorrectionStatus) -> bool {
        matches!(
            (self, next),
            (CorrectionStatus::Detected, CorrectionStatus::Verifying)
                | (CorrectionStatus::Verifying, CorrectionStatus::Verified)
                | (CorrectionStatus::Verifying, CorrectionStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CorrectionStatus::Verified | CorrectionStatus::Failed)
    }
}

/// Learner's reaction to a surfaced correction. Independent of the
/// verification lifecycle; settable at any post-detected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFeedback {
    Agree,
    Disagree,
}

/// Verification outcome produced by the verify proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedCorrection {
    pub rule: String,
    pub confidence: f64,
    pub category: String,
    pub is_ambiguous: bool,
    pub verified_at: DateTime<Utc>,
    pub model: String,
}

/// One detected correction and its verification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub id: String,
    pub original: String,
    pub corrected: String,
    pub correction_type: CorrectionType,
    pub status: CorrectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ambiguous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<UserFeedback>,
}

impl CorrectionRecord {
    pub fn detected(
        original: impl Into<String>,
        corrected: impl Into<String>,
        correction_type: CorrectionType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original: original.into(),
            corrected: corrected.into(),
            correction_type,
            status: CorrectionStatus::Detected,
            rule: None,
            confidence: None,
            is_ambiguous: None,
            verified_at: None,
            user_feedback: None,
        }
    }
}
