//! Configuration for the gateway process and the client session engine.
//!
//! The gateway is configured entirely from environment variables (it runs as
//! a twelve-factor service); the session engine is configured by its
//! embedding application through [`SessionConfig`].

mod gateway;
mod session;

pub use gateway::GatewayConfig;
pub use session::SessionConfig;

use std::fmt;

/// Severity of a configuration issue found by `validate()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single issue found while validating configuration.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigIssue {
    pub fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field,
            message: message.into(),
        }
    }

    pub fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field,
            message: message.into(),
        }
    }
}
