use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinge_domain::config::{ConfigSeverity, GatewayConfig};
use tinge_gateway::api;
use tinge_gateway::cors::build_cors_layer;
use tinge_gateway::ledger::UsageLedger;
use tinge_gateway::state::AppState;
use tinge_upstream::{
    KnowledgeSearchClient, RealtimeSessionClient, TranscriptionClient, VerifyClient,
};

/// Interval between ledger expiry sweeps.
const SWEEP_INTERVAL_SECS: u64 = 15 * 60;

const VERIFY_MODEL: &str = "gpt-4o-mini";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Parser)]
#[command(name = "tinge-gateway", about = "Tinge backend session gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            let config = GatewayConfig::from_env();
            init_tracing(config.debug_logs);
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("tinge-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing.
///
/// With debug logs off only warn/error are emitted; `RUST_LOG` overrides
/// either default.
fn init_tracing(debug_logs: bool) {
    let default_filter = if debug_logs {
        "info,tinge_gateway=debug,tinge_upstream=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<GatewayConfig>) -> anyhow::Result<()> {
    tracing::info!("tinge gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Usage ledger ─────────────────────────────────────────────────
    let ledger = Arc::new(UsageLedger::new(
        config.max_tokens_per_key,
        config.token_limit_enabled,
    ));
    tracing::info!(
        limit = config.max_tokens_per_key,
        enabled = config.token_limit_enabled,
        "usage ledger ready"
    );

    // ── Upstream clients ─────────────────────────────────────────────
    let realtime = match &config.openai_api_key {
        Some(key) => Some(Arc::new(
            RealtimeSessionClient::new(
                &config.openai_base_url,
                key,
                &config.realtime_model,
                &config.realtime_voice,
            )
            .context("building realtime client")?,
        )),
        None => None,
    };
    let transcription = match &config.openai_api_key {
        Some(key) => Some(Arc::new(
            TranscriptionClient::new(&config.openai_base_url, key, TRANSCRIPTION_MODEL)
                .context("building transcription client")?,
        )),
        None => None,
    };
    let verify = match &config.openai_api_key {
        Some(key) => Some(Arc::new(
            VerifyClient::new(
                &config.openai_base_url,
                key,
                VERIFY_MODEL,
                Duration::from_millis(config.verify_timeout_ms),
            )
            .context("building verify client")?,
        )),
        None => None,
    };
    let search = match &config.knowledge_search_url {
        Some(url) => Some(Arc::new(
            KnowledgeSearchClient::new(url, Duration::from_millis(config.search_timeout_ms))
                .context("building knowledge search client")?,
        )),
        None => None,
    };
    tracing::info!(
        realtime = realtime.is_some(),
        transcription = transcription.is_some(),
        verify = verify.is_some(),
        search = search.is_some(),
        "upstream clients ready"
    );

    let state = AppState {
        config: config.clone(),
        ledger: ledger.clone(),
        realtime,
        transcription,
        search,
        verify,
        started_at: Utc::now(),
    };

    // ── Ledger expiry sweep ──────────────────────────────────────────
    let sweep = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await; // first tick fires immediately, skip it
            loop {
                interval.tick().await;
                match ledger.sweep_expired(Utc::now()) {
                    0 => {}
                    n => tracing::info!(removed = n, "expired ledger entries removed"),
                }
            }
        })
    };

    // ── CORS + middleware stack ──────────────────────────────────────
    let cors_layer = build_cors_layer(config.frontend_url.clone());
    let max_concurrent = std::env::var("TINGE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, env = %config.environment, "tinge gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("axum server error")?;

    // The ledger is process-lifetime state: stop the sweep explicitly.
    sweep.abort();
    tracing::info!("tinge gateway stopped");
    Ok(())
}
