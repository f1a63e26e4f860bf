//! Shared domain types for the Tinge realtime tutoring core.
//!
//! Everything here is serialization-level vocabulary used by both the
//! backend gateway and the client orchestrator: errors, configuration,
//! token accounting math, utterances, corrections, and tool definitions.

pub mod config;
pub mod correction;
pub mod error;
pub mod tool;
pub mod usage;
pub mod utterance;

pub use error::{Error, Result};
