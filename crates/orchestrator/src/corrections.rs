//! Correction log and the async verification pipeline.
//!
//! Detected corrections enter the log with status `detected`, move through
//! `verifying`, and settle in `verified` or `failed`. Transitions are
//! monotonic; anything else is logged and dropped. User feedback is an
//! independent attribute and never re-runs verification.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tinge_domain::correction::{
    CorrectionRecord, CorrectionStatus, CorrectionType, UserFeedback, VerifiedCorrection,
};

use crate::gateway::GatewayClient;
use crate::ui::{UiEvent, UiSink};

pub struct CorrectionLog {
    records: RwLock<HashMap<String, CorrectionRecord>>,
}

impl CorrectionLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a newly detected correction.
    pub fn detect(
        &self,
        original: impl Into<String>,
        corrected: impl Into<String>,
        correction_type: CorrectionType,
    ) -> CorrectionRecord {
        let record = CorrectionRecord::detected(original, corrected, correction_type);
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<CorrectionRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn transition(
        &self,
        id: &str,
        next: CorrectionStatus,
        apply: impl FnOnce(&mut CorrectionRecord),
    ) -> Option<CorrectionRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        if !record.status.can_transition_to(next) {
            tracing::warn!(
                correction_id = id,
                from = ?record.status,
                to = ?next,
                "rejected non-monotonic correction transition"
            );
            return None;
        }
        record.status = next;
        apply(record);
        Some(record.clone())
    }

    pub fn mark_verifying(&self, id: &str) -> Option<CorrectionRecord> {
        self.transition(id, CorrectionStatus::Verifying, |_| {})
    }

    pub fn complete(&self, id: &str, outcome: &VerifiedCorrection) -> Option<CorrectionRecord> {
        self.transition(id, CorrectionStatus::Verified, |record| {
            record.rule = Some(outcome.rule.clone());
            record.confidence = Some(outcome.confidence);
            record.is_ambiguous = Some(outcome.is_ambiguous);
            record.verified_at = Some(outcome.verified_at);
        })
    }

    pub fn fail(&self, id: &str) -> Option<CorrectionRecord> {
        self.transition(id, CorrectionStatus::Failed, |_| {})
    }

    /// Store the learner's reaction. Allowed at any post-detected state;
    /// does not touch the verification lifecycle.
    pub fn set_feedback(&self, id: &str, feedback: UserFeedback) -> Option<CorrectionRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        record.user_feedback = Some(feedback);
        Some(record.clone())
    }
}

impl Default for CorrectionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the async verification of one detected correction, fanning status
/// out to the UI.
pub async fn run_verification(
    log: Arc<CorrectionLog>,
    gateway: Arc<GatewayClient>,
    ui: UiSink,
    correction_id: String,
) {
    let Some(record) = log.mark_verifying(&correction_id) else {
        return;
    };
    ui.emit(UiEvent::VerificationStarted {
        correction_id: correction_id.clone(),
    });

    match gateway.verify_correction(&record).await {
        Ok(outcome) => {
            log.complete(&correction_id, &outcome);
            ui.emit(UiEvent::VerificationSucceeded {
                correction_id,
                outcome,
            });
        }
        Err(e) => {
            log.fail(&correction_id);
            ui.emit(UiEvent::VerificationFailed {
                correction_id,
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn outcome() -> VerifiedCorrection {
        VerifiedCorrection {
            rule: "preterite for completed actions".into(),
            confidence: 0.92,
            category: "grammar".into(),
            is_ambiguous: false,
            verified_at: Utc::now(),
            model: "test-model".into(),
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let log = CorrectionLog::new();
        let record = log.detect("yo fue", "yo fui", CorrectionType::Grammar);
        assert_eq!(record.status, CorrectionStatus::Detected);

        let record = log.mark_verifying(&record.id).unwrap();
        assert_eq!(record.status, CorrectionStatus::Verifying);

        let record = log.complete(&record.id, &outcome()).unwrap();
        assert_eq!(record.status, CorrectionStatus::Verified);
        assert_eq!(record.confidence, Some(0.92));
        assert!(record.verified_at.is_some());
    }

    #[test]
    fn skipping_verifying_is_rejected() {
        let log = CorrectionLog::new();
        let record = log.detect("a", "b", CorrectionType::Vocabulary);
        assert!(log.complete(&record.id, &outcome()).is_none());
        assert_eq!(log.get(&record.id).unwrap().status, CorrectionStatus::Detected);
    }

    #[test]
    fn terminal_states_stay_terminal() {
        let log = CorrectionLog::new();
        let record = log.detect("a", "b", CorrectionType::Grammar);
        log.mark_verifying(&record.id);
        log.fail(&record.id);
        assert!(log.complete(&record.id, &outcome()).is_none());
        assert!(log.mark_verifying(&record.id).is_none());
        assert_eq!(log.get(&record.id).unwrap().status, CorrectionStatus::Failed);
    }

    #[test]
    fn feedback_is_independent_of_lifecycle() {
        let log = CorrectionLog::new();
        let record = log.detect("a", "b", CorrectionType::Pronunciation);

        let record = log.set_feedback(&record.id, UserFeedback::Disagree).unwrap();
        assert_eq!(record.user_feedback, Some(UserFeedback::Disagree));
        assert_eq!(record.status, CorrectionStatus::Detected);

        log.mark_verifying(&record.id);
        log.complete(&record.id, &outcome());
        let record = log.set_feedback(&record.id, UserFeedback::Agree).unwrap();
        assert_eq!(record.user_feedback, Some(UserFeedback::Agree));
        assert_eq!(record.status, CorrectionStatus::Verified);
    }
}
