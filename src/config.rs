//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Thresholds live here and are explicit configuration, never learned;
//! run-scoped gating (caps, kill-switch) lives in [`crate::policy`] and
//! is read from the environment exactly once per process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use tracing::info;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub analyzer: AnalyzerConfig,
    pub ingestion: IngestionConfig,
    pub reports: ReportsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    /// Estimator selected by logic version, e.g. "odds_implied_v1".
    pub estimator: String,
    /// Floor on decision confidence; below it a market downgrades to NO_BET.
    pub min_confidence: f64,
    pub min_separation: SeparationThresholds,
}

/// Per-market separation thresholds. More volatile markets require a
/// wider margin between the leading and runner-up probability.
#[derive(Debug, Deserialize, Clone)]
pub struct SeparationThresholds {
    pub one_x_two: f64,
    pub over_under_25: f64,
    pub gg_ng: f64,
}

impl SeparationThresholds {
    /// Threshold for a given market.
    pub fn for_market(&self, market: &crate::types::Market) -> f64 {
        match market {
            crate::types::Market::OneXTwo => self.one_x_two,
            crate::types::Market::OverUnder25 => self.over_under_25,
            crate::types::Market::GgNg => self.gg_ng,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Hard timeout on a single connector fetch; on expiry the match
    /// degrades to a per-match error report, siblings unaffected.
    pub timeout_secs: u64,
    /// Recorded fixture set consumed by the `recorded` connector.
    pub fixtures_path: String,
    /// Base URL for the stub live source (only used when live IO is allowed).
    pub live_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportsConfig {
    /// Directory for persisted report and live-awareness artifacts.
    pub dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8787,
                database_url: "sqlite::memory:".to_string(),
            },
            analyzer: AnalyzerConfig {
                estimator: "odds_implied_v1".to_string(),
                min_confidence: 0.62,
                min_separation: SeparationThresholds {
                    one_x_two: 0.10,
                    over_under_25: 0.08,
                    gg_ng: 0.08,
                },
            },
            ingestion: IngestionConfig {
                timeout_secs: 10,
                fixtures_path: "fixtures/recorded_fixtures.json".to_string(),
                live_base_url: "http://127.0.0.1:9090".to_string(),
            },
            reports: ReportsConfig {
                dir: "reports".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load configuration, falling back to compiled defaults when the
    /// file is absent. A malformed file is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            info!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }
}
