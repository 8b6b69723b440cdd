//! Run policy: the explicit gating surface for a pipeline run.
//!
//! All environment-driven gating (kill-switch, activation caps, market
//! whitelist, strict schema validation, live-IO permission) is read once
//! at process startup into a `RunPolicy` value and passed into the
//! orchestrator. Business logic never reads ambient global state.

use serde::Serialize;
use tracing::warn;

use crate::types::Market;

/// Compiled ceiling on matches per run. Enforced regardless of the
/// configured `ACTIVATION_MAX_MATCHES` value.
pub const ACTIVATION_MAX_MATCHES_HARD_CAP: u32 = 10;

/// Gating policy for one process / run. Constructed once; immutable.
#[derive(Debug, Clone, Serialize)]
pub struct RunPolicy {
    /// Hard kill-switch: refuses every run before any side effect.
    pub kill_switch: bool,
    /// Cap on matches per run, already clamped to the compiled ceiling.
    /// Zero means activation is off and every run is refused.
    pub max_matches: u32,
    /// Allowed markets in canonical order. Default: 1X2 only.
    pub markets: Vec<Market>,
    /// When true, report schema validation failures fail the run.
    pub schema_validate_strict: bool,
    /// Gates whether the ingestion collaborator may perform live calls.
    pub live_io_allowed: bool,
    /// Second gate required for the real live provider specifically.
    pub real_provider_live: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            kill_switch: false,
            max_matches: 1,
            markets: vec![Market::OneXTwo],
            schema_validate_strict: false,
            live_io_allowed: false,
            real_provider_live: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl RunPolicy {
    /// Build the policy from the environment. Called once at startup.
    pub fn from_env() -> Self {
        let max_matches = std::env::var("ACTIVATION_MAX_MATCHES")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .min(ACTIVATION_MAX_MATCHES_HARD_CAP);

        let markets = match std::env::var("ACTIVATION_MARKETS") {
            Ok(raw) if !raw.trim().is_empty() => Self::parse_markets(&raw),
            _ => vec![Market::OneXTwo],
        };

        Self {
            kill_switch: env_flag("ACTIVATION_KILL_SWITCH"),
            max_matches,
            markets,
            schema_validate_strict: env_flag("REPORT_SCHEMA_VALIDATE_STRICT"),
            live_io_allowed: env_flag("LIVE_IO_ALLOWED"),
            real_provider_live: env_flag("REAL_PROVIDER_LIVE"),
        }
    }

    /// Parse a comma-separated market list, dropping unknown tokens with
    /// a warning, deduplicating, and restoring canonical order.
    fn parse_markets(raw: &str) -> Vec<Market> {
        let mut parsed: Vec<Market> = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<Market>() {
                Ok(market) => {
                    if !parsed.contains(&market) {
                        parsed.push(market);
                    }
                }
                Err(_) => warn!(token, "Ignoring unknown market in ACTIVATION_MARKETS"),
            }
        }
        let mut canonical: Vec<Market> = Market::CANONICAL_ORDER
            .iter()
            .copied()
            .filter(|m| parsed.contains(m))
            .collect();
        if canonical.is_empty() {
            canonical.push(Market::OneXTwo);
        }
        canonical
    }

    /// Whether the live stub provider may be called at all.
    pub fn live_calls_allowed(&self) -> bool {
        self.live_io_allowed && self.real_provider_live
    }

    /// Restrict a requested market list to the allowed set, preserving
    /// canonical order. Returns `None` when the request is not a subset.
    pub fn restrict_markets(&self, requested: &[Market]) -> Option<Vec<Market>> {
        if requested.iter().any(|m| !self.markets.contains(m)) {
            return None;
        }
        Some(
            Market::CANONICAL_ORDER
                .iter()
                .copied()
                .filter(|m| requested.contains(m))
                .collect(),
        )
    }
}
