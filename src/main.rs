//! TIPGUARD — Deterministic Shadow Pipeline for Betting Recommendations
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the run policy from the environment (once), opens the
//! reference store, seeds it idempotently, and serves the pipeline API
//! with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use tipguard::config::AppConfig;
use tipguard::pipeline::PipelineContext;
use tipguard::policy::RunPolicy;
use tipguard::server;
use tipguard::store;

const BANNER: &str = r#"
 _____ ___ ____   ____ _   _   _    ____  ____
|_   _|_ _|  _ \ / ___| | | | / \  |  _ \|  _ \
  | |  | || |_) | |  _| | | |/ _ \ | |_) | | | |
  | |  | ||  __/| |_| | |_| / ___ \|  _ <| |_| |
  |_| |___|_|    \____|\___/_/   \_\_| \_\____/

  Deterministic Shadow Pipeline — v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_or_default("config.toml")?;

    init_logging();

    println!("{BANNER}");

    // Gating surface is read from the environment exactly once, here.
    let policy = RunPolicy::from_env();
    info!(
        kill_switch = policy.kill_switch,
        max_matches = policy.max_matches,
        markets = ?policy.markets,
        strict_schema = policy.schema_validate_strict,
        live_io = policy.live_calls_allowed(),
        "Run policy constructed"
    );

    // -- Reference store ---------------------------------------------------

    let pool = store::connect(&cfg.server.database_url).await?;
    store::migrate(&pool).await?;
    let inserted = store::seed(&pool, &store::SeedData::sample()).await?;
    info!(inserted, "Seed pass complete (idempotent)");

    // -- Serve -------------------------------------------------------------

    let port = cfg.server.port;
    let state = Arc::new(PipelineContext::new(pool, cfg, policy));
    server::serve(state, port).await?;

    info!("TIPGUARD shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tipguard=info"));

    let json_logging = std::env::var("TIPGUARD_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
