//! End-to-end accounting flow over the public ledger API: issue a
//! credential, estimate, reconcile with actuals, enforce the limit, and
//! sweep.

use chrono::{Duration, Utc};

use tinge_domain::usage::{
    estimate_tokens_from_audio, estimate_tokens_from_text, pricing, TokenDetails, UsageReport,
};
use tinge_gateway::ledger::UsageLedger;

#[test]
fn issue_estimate_actual_reconciliation() {
    let ledger = UsageLedger::new(15_000, true);

    // Credential issued.
    let snapshot = ledger.initialize("ek_1", None);
    assert_eq!(snapshot.limit, 15_000);
    assert_eq!(snapshot.current_tokens, 0);

    // Estimate: "hola mundo" (2 words) + 0.5 s of audio.
    let text_tokens = estimate_tokens_from_text("hola mundo");
    let audio_tokens = estimate_tokens_from_audio(0.5);
    assert_eq!(text_tokens + audio_tokens, 5);
    let cost =
        text_tokens as f64 * pricing::TEXT_INPUT + audio_tokens as f64 * pricing::AUDIO_INPUT;
    let snapshot = ledger
        .apply_estimate("ek_1", text_tokens + audio_tokens, cost)
        .unwrap();
    assert_eq!(snapshot.estimated_tokens, 5);
    assert_eq!(snapshot.current_tokens, 5);

    // Actual report arrives: cumulative totals replace, estimate resets.
    let report = UsageReport {
        input_tokens: 10,
        output_tokens: 5,
        total_tokens: Some(15),
        input_token_details: Some(TokenDetails {
            text_tokens: 4,
            audio_tokens: 6,
        }),
        output_token_details: Some(TokenDetails {
            text_tokens: 3,
            audio_tokens: 2,
        }),
    };
    let snapshot = ledger.apply_actual("ek_1", &report).unwrap();
    assert_eq!(snapshot.actual_tokens, 15);
    assert_eq!(snapshot.estimated_tokens, 0);
    assert_eq!(snapshot.input_tokens, 10);
    assert_eq!(snapshot.output_tokens, 5);
    assert!((snapshot.actual_cost - 0.000_480).abs() < 1e-12);
    assert_eq!(snapshot.current_tokens, 15);
}

#[test]
fn limit_is_enforced_at_the_boundary() {
    let ledger = UsageLedger::new(10, true);
    ledger.initialize("ek_2", None);

    ledger.apply_estimate("ek_2", 9, 0.0).unwrap();
    assert!(ledger.can_make_request("ek_2").allowed);

    ledger.apply_estimate("ek_2", 1, 0.0).unwrap();
    let decision = ledger.can_make_request("ek_2");
    assert!(decision.is_token_limit());
    assert_eq!(decision.reason.as_deref(), Some("token_limit_exceeded"));

    let snapshot = ledger.get("ek_2").unwrap();
    assert!(snapshot.is_at_limit);
    assert_eq!(snapshot.remaining_tokens, 0);
}

#[test]
fn sweep_expires_idle_keys_but_not_active_conversations() {
    let ledger = UsageLedger::new(15_000, true);
    ledger.initialize("idle", None);
    ledger.initialize("busy", None);
    ledger.set_conversation_active("busy", true);

    // Nothing expires inside the idle window.
    assert_eq!(ledger.sweep_expired(Utc::now() + Duration::minutes(30)), 0);

    // Two hours later the idle key is gone; the active one survives.
    let removed = ledger.sweep_expired(Utc::now() + Duration::hours(2));
    assert_eq!(removed, 1);
    assert!(ledger.get("idle").is_none());
    assert!(ledger.get("busy").is_some());
}

#[test]
fn reset_returns_a_zeroed_ledger() {
    let ledger = UsageLedger::new(15_000, true);
    ledger.initialize("ek_3", None);
    ledger.apply_estimate("ek_3", 1_000, 0.01).unwrap();

    let snapshot = ledger.reset("ek_3").unwrap();
    assert_eq!(snapshot.estimated_tokens, 0);
    assert_eq!(snapshot.current_tokens, 0);
    assert!(snapshot.usage_percent.abs() < f64::EPSILON);
    assert_eq!(snapshot.limit, 15_000);
}
