//! Evaluation & audit subsystem.
//!
//! Content checksums over normalized decision payloads (the mechanism by
//! which cross-run regressions are detected), market outcome resolution
//! against realized results, KPI aggregation over realized outcomes, and
//! the observational stability guardrail.
//!
//! Everything here is a pure function of its inputs except
//! [`aggregate_kpis`], which performs a read-only query and is safely
//! re-runnable.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt;

use crate::store;
use crate::types::{DecisionKind, FinalResult, Market, MarketDecision, MarketOutcome, MatchStatus};

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Keys excluded from checksums: wall-clock fields that legitimately
/// differ between otherwise identical runs.
const VOLATILE_KEYS: &[&str] = &[
    "generated_at",
    "observed_at_utc",
    "evaluated_at_utc",
    "reference_date_utc",
    "run_id",
];

/// Recursively remove volatile keys from a JSON value.
pub fn strip_volatile(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(strip_volatile).collect())
        }
        other => other.clone(),
    }
}

/// SHA-256 hex digest over the canonical serialization of a JSON value.
/// serde_json maps are BTreeMap-backed, so key order is stable and equal
/// inputs always yield equal checksums.
pub fn checksum_report(value: &serde_json::Value) -> String {
    let canonical = value.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Checksum of a serializable payload after volatile-field stripping.
pub fn checksum_of<T: Serialize>(payload: &T) -> String {
    let value = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    checksum_report(&strip_volatile(&value))
}

/// The checksum triple recorded in every report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    /// Hash of the evaluation payload (KPIs + market outcomes).
    pub evaluation_report_checksum: String,
    /// Hash of the normalized decision set alone.
    pub proposal_checksum: String,
    /// Hash of decisions plus their resolved outcomes.
    pub output_hash: String,
}

/// Compute the report checksum triple from normalized payloads.
pub fn compute_checksums(
    decisions: &[MarketDecision],
    outcomes: &BTreeMap<Market, MarketOutcome>,
    kpis: &EvaluationRecord,
) -> Checksums {
    Checksums {
        evaluation_report_checksum: checksum_of(&(kpis, outcomes)),
        proposal_checksum: checksum_of(&decisions),
        output_hash: checksum_of(&(decisions, outcomes)),
    }
}

// ---------------------------------------------------------------------------
// Outcome resolution
// ---------------------------------------------------------------------------

/// Resolve each decided market against the final result.
///
/// NO_PREDICTION / NO_BET resolve NEUTRAL; a non-FINAL status resolves
/// everything NEUTRAL.
pub fn resolve_markets(
    decisions: &[MarketDecision],
    final_result: &FinalResult,
) -> BTreeMap<Market, MarketOutcome> {
    let mut outcomes = BTreeMap::new();
    for decision in decisions {
        let outcome = if final_result.status != MatchStatus::Final {
            MarketOutcome::Neutral
        } else {
            match (decision.decision, decision.selection) {
                (DecisionKind::Play, Some(pick)) => {
                    let actual = match decision.market {
                        Market::OneXTwo => final_result.result_1x2(),
                        Market::OverUnder25 => final_result.result_ou25(),
                        Market::GgNg => final_result.result_ggng(),
                    };
                    if pick == actual {
                        MarketOutcome::Success
                    } else {
                        MarketOutcome::Failure
                    }
                }
                _ => MarketOutcome::Neutral,
            }
        };
        outcomes.insert(decision.market, outcome);
    }
    outcomes
}

// ---------------------------------------------------------------------------
// Stability guardrail
// ---------------------------------------------------------------------------

/// Leading-probability jump (vs the prior run for the same match) above
/// which the guardrail fires.
const GUARDRAIL_MAX_PROB_JUMP: f64 = 0.25;

/// Observational stability check. Firing never changes a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stability {
    pub guardrail_triggered: bool,
    pub notes: Vec<String>,
}

/// Compare the current decision set with the prior run for the same
/// match. A jump in any market's leading-selection probability beyond
/// [`GUARDRAIL_MAX_PROB_JUMP`] trips the guardrail.
pub fn check_stability(
    current: &[MarketDecision],
    prior: Option<&[MarketDecision]>,
) -> Stability {
    let mut stability = Stability::default();
    let Some(prior) = prior else {
        return stability;
    };

    for decision in current {
        let Some(previous) = prior.iter().find(|p| p.market == decision.market) else {
            continue;
        };
        for (selection, p_now) in &decision.probabilities {
            let Some(p_before) = previous.probabilities.get(selection) else {
                continue;
            };
            let jump = (p_now - p_before).abs();
            if jump > GUARDRAIL_MAX_PROB_JUMP {
                stability.guardrail_triggered = true;
                stability.notes.push(format!(
                    "{} {} probability moved {:.2} -> {:.2}",
                    decision.market, selection, p_before, p_now,
                ));
            }
        }
    }
    stability
}

// ---------------------------------------------------------------------------
// KPI aggregation
// ---------------------------------------------------------------------------

/// Aggregation period, UTC-bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Day => write!(f, "DAY"),
            Period::Week => write!(f, "WEEK"),
            Period::Month => write!(f, "MONTH"),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DAY" => Ok(Period::Day),
            "WEEK" => Ok(Period::Week),
            "MONTH" => Ok(Period::Month),
            _ => Err(anyhow::anyhow!("Unknown period: {s}")),
        }
    }
}

/// Aggregated KPIs over realized outcomes for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub reference_date_utc: DateTime<Utc>,
    pub period: Period,
    pub total: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

/// UTC bounds [start, end) for the period containing the reference date.
/// Weeks are ISO weeks starting Monday 00:00 UTC.
pub fn period_bounds(period: Period, reference: &DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day_start = Utc
        .with_ymd_and_hms(reference.year(), reference.month(), reference.day(), 0, 0, 0)
        .unwrap();
    match period {
        Period::Day => (day_start, day_start + Duration::days(1)),
        Period::Week => {
            let days_back = i64::from(reference.weekday().num_days_from_monday());
            let start = day_start - Duration::days(days_back);
            (start, start + Duration::days(7))
        }
        Period::Month => {
            let start = Utc
                .with_ymd_and_hms(reference.year(), reference.month(), 1, 0, 0, 0)
                .unwrap();
            let end = if reference.month() == 12 {
                Utc.with_ymd_and_hms(reference.year() + 1, 1, 1, 0, 0, 0).unwrap()
            } else {
                Utc.with_ymd_and_hms(reference.year(), reference.month() + 1, 1, 0, 0, 0)
                    .unwrap()
            };
            (start, end)
        }
    }
}

/// Compute KPIs for a period relative to a reference date.
///
/// Pure aggregation over previously evaluated outcome rows: NEUTRAL
/// outcomes are excluded, only SUCCESS/FAILURE count, and
/// `hit_rate + miss_rate = 1` whenever total > 0. Performs no writes.
pub async fn aggregate_kpis(
    pool: &SqlitePool,
    period: Period,
    reference_date_utc: DateTime<Utc>,
) -> Result<EvaluationRecord, sqlx::Error> {
    let (start, end) = period_bounds(period, &reference_date_utc);
    let rows = store::list_outcomes_between(pool, &start, &end).await?;

    let hits = rows
        .iter()
        .filter(|r| r.outcome == MarketOutcome::Success)
        .count() as u64;
    let misses = rows
        .iter()
        .filter(|r| r.outcome == MarketOutcome::Failure)
        .count() as u64;
    let total = hits + misses;

    let (hit_rate, miss_rate) = if total == 0 {
        (0.0, 0.0)
    } else {
        let hit_rate = hits as f64 / total as f64;
        (hit_rate, 1.0 - hit_rate)
    };

    Ok(EvaluationRecord {
        reference_date_utc,
        period,
        total,
        hits,
        misses,
        hit_rate,
        miss_rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
