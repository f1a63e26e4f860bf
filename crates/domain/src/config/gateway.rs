use super::ConfigIssue;

/// Environment-derived configuration for the backend gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen port (`PORT`).
    pub port: u16,
    /// Upstream API key (`OPENAI_API_KEY`). Endpoints that require it
    /// answer with their own error when it is absent.
    pub openai_api_key: Option<String>,
    /// Base URL of the upstream model service.
    pub openai_base_url: String,
    /// Realtime model requested when minting session credentials.
    pub realtime_model: String,
    /// Realtime voice requested when minting session credentials.
    pub realtime_voice: String,
    /// Deployed frontend origin allowed by CORS (`FRONTEND_URL`).
    pub frontend_url: Option<String>,
    /// Per-credential token limit (`MAX_TOKENS_PER_KEY`).
    pub max_tokens_per_key: u64,
    /// Whether token limits are enforced at all (`TOKEN_LIMIT_ENABLED`).
    pub token_limit_enabled: bool,
    /// Gates info/debug logging (`TINGE_BACKEND_DEBUG_LOGS`); warn/error
    /// are always emitted.
    pub debug_logs: bool,
    /// Deployment environment label reported by `/health` (`TINGE_ENV`).
    pub environment: String,
    /// Base URL of the retrieval service (`KNOWLEDGE_SEARCH_URL`).
    pub knowledge_search_url: Option<String>,
    /// Budget for a single knowledge-search round trip.
    pub search_timeout_ms: u64,
    /// Budget for a single correction-verify round trip.
    pub verify_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            realtime_model: "gpt-4o-realtime-preview-2024-12-17".into(),
            realtime_voice: "verse".into(),
            frontend_url: None,
            max_tokens_per_key: 15_000,
            token_limit_enabled: true,
            debug_logs: false,
            environment: "development".into(),
            knowledge_search_url: None,
            search_timeout_ms: 8_000,
            verify_timeout_ms: 8_000,
        }
    }
}

impl GatewayConfig {
    /// Build the configuration from process environment variables.
    ///
    /// Unparseable numeric values fall back to their defaults; the fallback
    /// is reported by [`validate`](Self::validate) rather than aborting.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parsed("PORT", defaults.port),
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            openai_base_url: env_nonempty("OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url),
            realtime_model: env_nonempty("REALTIME_MODEL").unwrap_or(defaults.realtime_model),
            realtime_voice: env_nonempty("REALTIME_VOICE").unwrap_or(defaults.realtime_voice),
            frontend_url: env_nonempty("FRONTEND_URL"),
            max_tokens_per_key: env_parsed("MAX_TOKENS_PER_KEY", defaults.max_tokens_per_key),
            token_limit_enabled: env_flag("TOKEN_LIMIT_ENABLED", true),
            debug_logs: env_flag("TINGE_BACKEND_DEBUG_LOGS", false),
            environment: env_nonempty("TINGE_ENV").unwrap_or(defaults.environment),
            knowledge_search_url: env_nonempty("KNOWLEDGE_SEARCH_URL"),
            search_timeout_ms: env_parsed("KNOWLEDGE_SEARCH_TIMEOUT_MS", defaults.search_timeout_ms),
            verify_timeout_ms: env_parsed("CORRECTION_VERIFY_TIMEOUT_MS", defaults.verify_timeout_ms),
        }
    }

    /// Validate the configuration, returning issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.openai_api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "OPENAI_API_KEY",
                "not set — /token, /transcribe and /correction/verify will answer 500",
            ));
        }
        if self.frontend_url.is_none() {
            issues.push(ConfigIssue::warning(
                "FRONTEND_URL",
                "not set — only local development origins are allowed by CORS",
            ));
        }
        if self.knowledge_search_url.is_none() {
            issues.push(ConfigIssue::warning(
                "KNOWLEDGE_SEARCH_URL",
                "not set — /knowledge/search will answer 502",
            ));
        }
        if self.max_tokens_per_key == 0 {
            issues.push(ConfigIssue::error(
                "MAX_TOKENS_PER_KEY",
                "must be greater than zero",
            ));
        }

        issues
    }
}

// ── Env helpers ────────────────────────────────────────────────────

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_nonempty(name) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "unparseable env value, using default");
                default
            }
        },
        None => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env_nonempty(name) {
        Some(raw) => !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_tokens_per_key, 15_000);
        assert!(cfg.token_limit_enabled);
        assert!(!cfg.debug_logs);
        assert_eq!(cfg.search_timeout_ms, 8_000);
    }

    #[test]
    fn missing_api_key_is_a_warning_not_an_error() {
        let cfg = GatewayConfig::default();
        let issues = cfg.validate();
        let key_issue = issues
            .iter()
            .find(|i| i.field == "OPENAI_API_KEY")
            .expect("issue for missing key");
        assert_eq!(key_issue.severity, super::super::ConfigSeverity::Warning);
    }

    #[test]
    fn zero_limit_is_an_error() {
        let cfg = GatewayConfig {
            max_tokens_per_key: 0,
            ..GatewayConfig::default()
        };
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == super::super::ConfigSeverity::Error));
    }

    #[test]
    fn env_flag_parses_negatives() {
        std::env::set_var("TINGE_TEST_FLAG_A", "false");
        assert!(!env_flag("TINGE_TEST_FLAG_A", true));
        std::env::set_var("TINGE_TEST_FLAG_A", "1");
        assert!(env_flag("TINGE_TEST_FLAG_A", false));
        std::env::remove_var("TINGE_TEST_FLAG_A");
        assert!(env_flag("TINGE_TEST_FLAG_A", true));
    }
}
