//! Live awareness artifacts.
//!
//! Summarizes live-vs-recorded snapshot freshness for one scope into
//! `live_awareness.json` and `live_awareness.md`. Informational only:
//! read-only diagnostics that never feed back into decisions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Freshness summary for one scope (a fixture).
#[derive(Debug, Clone, Serialize)]
pub struct LiveAwarenessState {
    pub schema_version: u32,
    pub computed_at_utc: DateTime<Utc>,
    pub scope_id: String,
    pub has_live_shadow: bool,
    pub latest_live_observed_at_utc: Option<DateTime<Utc>>,
    pub latest_recorded_observed_at_utc: Option<DateTime<Utc>>,
    pub observed_gap_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Compute the awareness state from observed-at timestamps.
/// Deterministic: same inputs, same output.
pub fn compute_live_awareness(
    scope_id: &str,
    latest_live: Option<DateTime<Utc>>,
    latest_recorded: Option<DateTime<Utc>>,
    computed_at_utc: DateTime<Utc>,
) -> LiveAwarenessState {
    let has_live_shadow = latest_live.is_some();
    let observed_gap_ms = match (latest_live, latest_recorded) {
        (Some(live), Some(recorded)) => Some((live - recorded).num_milliseconds()),
        _ => None,
    };
    let notes = if has_live_shadow {
        None
    } else {
        Some("no live_shadow snapshots".to_string())
    };

    LiveAwarenessState {
        schema_version: 1,
        computed_at_utc,
        scope_id: scope_id.to_string(),
        has_live_shadow,
        latest_live_observed_at_utc: latest_live,
        latest_recorded_observed_at_utc: latest_recorded,
        observed_gap_ms,
        notes,
    }
}

/// Write `live_awareness.json` and `live_awareness.md` under `dir`.
pub fn write_artifacts(dir: &str, state: &LiveAwarenessState) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact dir: {dir}"))?;

    let json_path = Path::new(dir).join("live_awareness.json");
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise live awareness state")?;
    std::fs::write(&json_path, json)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    let md_path = Path::new(dir).join("live_awareness.md");
    let fmt_opt = |v: &Option<DateTime<Utc>>| {
        v.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "n/a".to_string())
    };
    let md = format!(
        "# Live awareness — {}\n\n\
         - has_live_shadow: {}\n\
         - latest_live_observed_at_utc: {}\n\
         - latest_recorded_observed_at_utc: {}\n\
         - observed_gap_ms: {}\n",
        state.scope_id,
        state.has_live_shadow,
        fmt_opt(&state.latest_live_observed_at_utc),
        fmt_opt(&state.latest_recorded_observed_at_utc),
        state
            .observed_gap_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
    );
    std::fs::write(&md_path, md)
        .with_context(|| format!("Failed to write {}", md_path.display()))?;

    debug!(dir, scope = %state.scope_id, "Live awareness artifacts written");
    Ok(())
}
