//! Tinge backend gateway: mints ephemeral realtime credentials, proxies
//! transcription / knowledge search / correction verification, and keeps the
//! per-credential token-usage ledger.

pub mod api;
pub mod cors;
pub mod ledger;
pub mod state;
