use std::sync::Arc;

use chrono::{DateTime, Utc};

use tinge_domain::config::GatewayConfig;
use tinge_upstream::{KnowledgeSearchClient, RealtimeSessionClient, TranscriptionClient, VerifyClient};

use crate::ledger::UsageLedger;

/// Shared application state passed to all API handlers.
///
/// Upstream clients are `None` when their configuration is missing; the
/// handlers that need them answer with their own error in that case.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Per-credential token-usage ledger (process-wide, swept periodically).
    pub ledger: Arc<UsageLedger>,
    pub realtime: Option<Arc<RealtimeSessionClient>>,
    pub transcription: Option<Arc<TranscriptionClient>>,
    pub search: Option<Arc<KnowledgeSearchClient>>,
    pub verify: Option<Arc<VerifyClient>>,
    pub started_at: DateTime<Utc>,
}
