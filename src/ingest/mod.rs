//! Ingestion boundary.
//!
//! Defines the `SnapshotSource` trait implemented by data connectors and
//! the typed snapshot model. External JSON enters through a fallible
//! parse step: unknown or malformed shapes produce a typed
//! [`ValidationError`], never a best-effort guess. A parsed snapshot is
//! immutable for the rest of the run.

pub mod live;
pub mod recorded;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MatchStatus;

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Rejection reasons at the fixture/adapter boundary. These are raised
/// before a snapshot enters the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Odds must be > 0: {selection} = {value}")]
    NonPositiveOdds { selection: &'static str, value: f64 },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid UTC timestamp in {field}: {raw}")]
    InvalidTimestamp { field: &'static str, raw: String },

    #[error("Invalid match status: {0}")]
    InvalidStatus(String),

    #[error("Duplicate match_id in fixture set: {0}")]
    DuplicateMatchRef(String),

    #[error("Claim reliability out of range [0,1]: {0}")]
    ClaimReliabilityOutOfRange(f64),

    #[error("Malformed snapshot payload: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Raw (untrusted) shapes
// ---------------------------------------------------------------------------

/// Decimal odds for the 1X2 market as delivered by a connector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Odds1x2 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

/// Goal-scoring trend evidence. Optional; OU25/GGNG markets are
/// NO_PREDICTION without it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GoalsTrend {
    pub home_avg: f64,
    pub away_avg: f64,
    pub home_conceded_avg: f64,
    pub away_conceded_avg: f64,
}

/// Category of an ingested news claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimKind {
    Injury,
    Suspension,
    TeamNews,
}

/// One injury/news claim attached to a snapshot. Claims feed evidence
/// quality only; they never select a pick directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub source: String,
    pub kind: ClaimKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    pub detail: String,
    /// Source reliability in [0, 1].
    pub reliability: f64,
}

/// Untrusted connector payload, exactly as deserialized. All fields are
/// optional; [`RawSnapshot::parse`] promotes it to a typed [`Snapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub source_ref: Option<String>,
    pub match_id: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub competition: Option<String>,
    pub kickoff_utc: Option<String>,
    pub observed_at_utc: Option<String>,
    pub odds_1x2: Option<Odds1x2>,
    pub status: Option<String>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    pub goals_trend: Option<GoalsTrend>,
}

fn parse_utc_field(
    field: &'static str,
    raw: Option<&str>,
) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.ok_or(ValidationError::MissingField(field))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp {
            field,
            raw: raw.to_string(),
        })
}

impl RawSnapshot {
    /// Deserialize an arbitrary JSON value into the raw shape. Shape
    /// mismatches surface as [`ValidationError::Malformed`].
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Validate and promote to a typed, immutable [`Snapshot`].
    pub fn parse(self) -> Result<Snapshot, ValidationError> {
        let source_ref = self
            .source_ref
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingField("source_ref"))?;
        let match_id = self
            .match_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingField("match_id"))?;
        let home_team = self
            .home_team
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingField("home_team"))?;
        let away_team = self
            .away_team
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingField("away_team"))?;

        let kickoff_utc = parse_utc_field("kickoff_utc", self.kickoff_utc.as_deref())?;
        let observed_at_utc = parse_utc_field("observed_at_utc", self.observed_at_utc.as_deref())?;

        let odds_1x2 = self.odds_1x2.ok_or(ValidationError::MissingField("odds_1x2"))?;
        for (selection, value) in [
            ("home", odds_1x2.home),
            ("draw", odds_1x2.draw),
            ("away", odds_1x2.away),
        ] {
            if !(value > 0.0) {
                return Err(ValidationError::NonPositiveOdds { selection, value });
            }
        }

        let status_raw = self.status.ok_or(ValidationError::MissingField("status"))?;
        let status = status_raw
            .parse::<MatchStatus>()
            .map_err(|_| ValidationError::InvalidStatus(status_raw))?;

        for claim in &self.claims {
            if !(0.0..=1.0).contains(&claim.reliability) {
                return Err(ValidationError::ClaimReliabilityOutOfRange(claim.reliability));
            }
        }

        Ok(Snapshot {
            source_ref,
            match_ref: MatchRef {
                match_id,
                home_text: home_team,
                away_text: away_team,
                competition: self.competition,
                kickoff_hint_utc: Some(kickoff_utc),
                window_hours: MatchRef::DEFAULT_WINDOW_HOURS,
            },
            observed_at_utc,
            odds_1x2,
            status,
            claims: self.claims,
            goals_trend: self.goals_trend,
        })
    }
}

// ---------------------------------------------------------------------------
// Typed snapshot
// ---------------------------------------------------------------------------

/// Loose reference to a match: team texts plus a kickoff window. The
/// resolver maps this to a canonical match identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRef {
    /// Source-side match identifier (not the canonical id).
    pub match_id: String,
    pub home_text: String,
    pub away_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<String>,
    pub kickoff_hint_utc: Option<DateTime<Utc>>,
    pub window_hours: u32,
}

impl MatchRef {
    /// Window applied around the kickoff hint.
    pub const DEFAULT_WINDOW_HOURS: u32 = 24;
}

/// One immutable, validated observation of match facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_ref: String,
    pub match_ref: MatchRef,
    pub observed_at_utc: DateTime<Utc>,
    pub odds_1x2: Odds1x2,
    pub status: MatchStatus,
    pub claims: Vec<Claim>,
    pub goals_trend: Option<GoalsTrend>,
}

/// Reject fixture sets carrying the same source match_id twice.
pub fn validate_fixture_set(snapshots: &[RawSnapshot]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for raw in snapshots {
        if let Some(id) = raw.match_id.as_deref() {
            if !seen.insert(id.to_string()) {
                return Err(ValidationError::DuplicateMatchRef(id.to_string()));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connector seam
// ---------------------------------------------------------------------------

/// Abstraction over ingestion adapters.
///
/// Implementors produce one raw snapshot per match reference. Live
/// connectors must only be constructed when the run policy allows live
/// IO; recorded connectors read bundled fixture sets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the raw snapshot for a match, or `None` when the source has
    /// no fixture for it.
    async fn fetch(&self, match_id: &str) -> anyhow::Result<Option<RawSnapshot>>;

    /// Connector name for logging and report audit fields.
    fn name(&self) -> &str;

    /// Whether this connector performs live (non-recorded) calls.
    fn is_live(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Connector registry
// ---------------------------------------------------------------------------

/// Resolve a connector by name, enforcing the live-IO gate.
///
/// The live connector is refused (not merely disabled) when the policy
/// does not allow live calls, so a misconfigured request fails loudly
/// instead of silently reading stale data.
pub fn connector_for(
    name: &str,
    policy: &crate::policy::RunPolicy,
    cfg: &crate::config::IngestionConfig,
) -> Result<Box<dyn SnapshotSource>, crate::types::PipelineError> {
    use crate::types::PipelineError;

    match name {
        recorded::RECORDED_CONNECTOR => {
            let connector = recorded::RecordedConnector::load(&cfg.fixtures_path)
                .map_err(|e| PipelineError::Ingestion(e.to_string()))?;
            Ok(Box::new(connector))
        }
        live::LIVE_CONNECTOR => {
            if !policy.live_calls_allowed() {
                return Err(PipelineError::ConnectorNotFound(format!(
                    "{name} not available: live IO not allowed"
                )));
            }
            let api_key = std::env::var("LIVE_SOURCE_API_KEY").ok();
            let client = live::LiveSourceClient::new(&cfg.live_base_url, api_key, cfg.timeout_secs)
                .map_err(|e| PipelineError::Ingestion(e.to_string()))?;
            Ok(Box::new(client))
        }
        other => Err(crate::types::PipelineError::ConnectorNotFound(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
