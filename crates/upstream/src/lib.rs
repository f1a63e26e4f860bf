//! HTTP clients for the upstream services the gateway proxies:
//! realtime session minting, audio transcription, knowledge search, and
//! correction verification.
//!
//! Each client owns its `reqwest::Client` with a bounded timeout and maps
//! transport failures through [`util::from_reqwest`] so callers can
//! distinguish timeouts from other network errors.

pub mod realtime;
pub mod search;
pub mod transcription;
pub mod verify;

pub(crate) mod util;

pub use realtime::{MintedSession, RealtimeSessionClient};
pub use search::{KnowledgeSearchClient, SearchRequest};
pub use transcription::TranscriptionClient;
pub use verify::{VerifyClient, VerifyOutcome, VerifyRequest};
