//! Token accounting vocabulary: upstream usage reports, the fixed pricing
//! table, estimators, and the ledger snapshot exchanged over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed per-token prices in USD, by bucket.
pub mod pricing {
    pub const TEXT_INPUT: f64 = 5e-6;
    pub const TEXT_OUTPUT: f64 = 2e-5;
    pub const AUDIO_INPUT: f64 = 4e-5;
    pub const AUDIO_OUTPUT: f64 = 8e-5;
}

/// Reason string reported when a request is blocked by the token limit.
pub const REASON_TOKEN_LIMIT: &str = "token_limit_exceeded";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream usage reports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text/audio token split inside an upstream usage report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub text_tokens: u64,
    #[serde(default)]
    pub audio_tokens: u64,
}

/// Usage as reported by the upstream realtime service.
///
/// Counters are cumulative session totals, not per-response deltas: each
/// report replaces the previous one wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub input_token_details: Option<TokenDetails>,
    #[serde(default)]
    pub output_token_details: Option<TokenDetails>,
}

impl UsageReport {
    /// The session total: the explicit total when present, else the sum.
    pub fn session_total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }
}

/// Per-bucket token counters kept by the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBreakdown {
    pub text_in: u64,
    pub audio_in: u64,
    pub text_out: u64,
    pub audio_out: u64,
}

impl UsageBreakdown {
    pub fn from_report(report: &UsageReport) -> Self {
        let input = report.input_token_details.unwrap_or_default();
        let output = report.output_token_details.unwrap_or_default();
        Self {
            text_in: input.text_tokens,
            audio_in: input.audio_tokens,
            text_out: output.text_tokens,
            audio_out: output.audio_tokens,
        }
    }

    /// Cost of these buckets at the fixed pricing table.
    pub fn cost(&self) -> f64 {
        self.text_in as f64 * pricing::TEXT_INPUT
            + self.audio_in as f64 * pricing::AUDIO_INPUT
            + self.text_out as f64 * pricing::TEXT_OUTPUT
            + self.audio_out as f64 * pricing::AUDIO_OUTPUT
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Estimators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rough token estimate for a piece of text: ~1.3 tokens per word.
pub fn estimate_tokens_from_text(text: &str) -> u64 {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).ceil() as u64
}

/// Rough token estimate for audio: ~150 tokens per minute.
pub fn estimate_tokens_from_audio(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * 150.0 / 60.0).ceil() as u64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ledger snapshot & request decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-through view of a ledger entry, with computed fields resolved.
///
/// This is the wire shape for `/token-usage/:key` and the `tokenUsage`
/// object merged into the `/token` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub limit: u64,
    pub estimated_tokens: u64,
    pub actual_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub breakdown: UsageBreakdown,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub request_count: u64,
    pub conversation_active: bool,
    pub current_tokens: u64,
    pub remaining_tokens: u64,
    pub usage_percent: f64,
    pub is_near_limit: bool,
    pub is_at_limit: bool,
}

/// Outcome of a limit check for one credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RequestDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_token_limit(&self) -> bool {
        !self.allowed && self.reason.as_deref() == Some(REASON_TOKEN_LIMIT)
    }
}
