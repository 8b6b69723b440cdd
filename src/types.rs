//! Shared types for the TIPGUARD pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that ingest, resolver, analyzer,
//! and pipeline modules can depend on them without circular references.
//!
//! Status and outcome fields are closed enums internally and serialize
//! to the documented string constants only at the report boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Markets & selections
// ---------------------------------------------------------------------------

/// A supported betting market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    /// Match result: home / draw / away.
    #[serde(rename = "1X2")]
    OneXTwo,
    /// Total goals over/under 2.5.
    #[serde(rename = "OU25")]
    OverUnder25,
    /// Both teams to score: yes (GG) / no (NG).
    #[serde(rename = "GGNG")]
    GgNg,
}

impl Market {
    /// Canonical evaluation order. Decisions are always emitted in this
    /// order regardless of request ordering or concurrency.
    pub const CANONICAL_ORDER: &'static [Market] =
        &[Market::OneXTwo, Market::OverUnder25, Market::GgNg];

    /// The selections this market can resolve to.
    pub fn selections(&self) -> &'static [Selection] {
        match self {
            Market::OneXTwo => &[Selection::Home, Selection::Draw, Selection::Away],
            Market::OverUnder25 => &[Selection::Over, Selection::Under],
            Market::GgNg => &[Selection::Gg, Selection::Ng],
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::OneXTwo => write!(f, "1X2"),
            Market::OverUnder25 => write!(f, "OU25"),
            Market::GgNg => write!(f, "GGNG"),
        }
    }
}

impl std::str::FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "1X2" => Ok(Market::OneXTwo),
            "OU25" | "OU_2.5" | "OVER_UNDER_25" => Ok(Market::OverUnder25),
            "GGNG" | "GG_NG" | "BTTS" => Ok(Market::GgNg),
            _ => Err(anyhow::anyhow!("Unknown market: {s}")),
        }
    }
}

/// A concrete pick within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Selection {
    Home,
    Draw,
    Away,
    Over,
    Under,
    Gg,
    Ng,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Selection::Home => "HOME",
            Selection::Draw => "DRAW",
            Selection::Away => "AWAY",
            Selection::Over => "OVER",
            Selection::Under => "UNDER",
            Selection::Gg => "GG",
            Selection::Ng => "NG",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Decision contract
// ---------------------------------------------------------------------------

/// Kind of per-market decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    /// Actionable recommendation for the leading selection.
    Play,
    /// Evidence available but thresholds not met.
    NoBet,
    /// Insufficient evidence or a recovered per-market failure.
    NoPrediction,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionKind::Play => write!(f, "PLAY"),
            DecisionKind::NoBet => write!(f, "NO_BET"),
            DecisionKind::NoPrediction => write!(f, "NO_PREDICTION"),
        }
    }
}

/// Structured rationale attached to a decision. Serialized as the
/// documented SCREAMING_SNAKE constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    SeparationBelowThreshold,
    ConfidenceBelowThreshold,
    InsufficientDataForMarket,
    MarketComputeError,
    OddsFavorite,
    ExpectedGoalsAbove,
    ExpectedGoalsBelow,
    BothTeamsScoringTrend,
    DefensiveStrengthPresent,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::SeparationBelowThreshold => "SEPARATION_BELOW_THRESHOLD",
            ReasonCode::ConfidenceBelowThreshold => "CONFIDENCE_BELOW_THRESHOLD",
            ReasonCode::InsufficientDataForMarket => "INSUFFICIENT_DATA_FOR_MARKET",
            ReasonCode::MarketComputeError => "MARKET_COMPUTE_ERROR",
            ReasonCode::OddsFavorite => "ODDS_FAVORITE",
            ReasonCode::ExpectedGoalsAbove => "EXPECTED_GOALS_ABOVE",
            ReasonCode::ExpectedGoalsBelow => "EXPECTED_GOALS_BELOW",
            ReasonCode::BothTeamsScoringTrend => "BOTH_TEAMS_SCORING_TREND",
            ReasonCode::DefensiveStrengthPresent => "DEFENSIVE_STRENGTH_PRESENT",
        };
        write!(f, "{s}")
    }
}

/// Probability distribution over a market's selections.
///
/// Probabilities are keyed by selection (stable ordering) and sum to 1
/// within [`Distribution::EPSILON`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub market: Market,
    pub probabilities: std::collections::BTreeMap<Selection, f64>,
}

impl Distribution {
    /// Tolerance for the sum-to-one invariant.
    pub const EPSILON: f64 = 1e-6;

    /// Build a distribution from (selection, weight) pairs, normalizing
    /// weights so probabilities sum to 1.
    pub fn from_weights(market: Market, weights: &[(Selection, f64)]) -> Self {
        let total: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
        let mut probabilities = std::collections::BTreeMap::new();
        for (sel, w) in weights {
            let p = if total > 0.0 { w.max(0.0) / total } else { 0.0 };
            probabilities.insert(*sel, p);
        }
        Self { market, probabilities }
    }

    /// Leading and runner-up (selection, probability), by probability
    /// descending with selection order as the deterministic tiebreaker.
    pub fn top_two(&self) -> Option<((Selection, f64), (Selection, f64))> {
        let mut items: Vec<(Selection, f64)> =
            self.probabilities.iter().map(|(s, p)| (*s, *p)).collect();
        items.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        match items.as_slice() {
            [first, second, ..] => Some((*first, *second)),
            _ => None,
        }
    }

    /// Margin between the leading and runner-up probability.
    pub fn separation(&self) -> f64 {
        self.top_two().map(|(a, b)| a.1 - b.1).unwrap_or(0.0)
    }

    /// Whether probabilities sum to 1 within tolerance.
    pub fn is_normalized(&self) -> bool {
        let sum: f64 = self.probabilities.values().sum();
        (sum - 1.0).abs() <= Self::EPSILON
    }
}

/// One per-market decision with its full rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDecision {
    pub market: Market,
    pub decision: DecisionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    pub probabilities: std::collections::BTreeMap<Selection, f64>,
    pub separation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    pub reasons: Vec<ReasonCode>,
}

impl fmt::Display for MarketDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.decision, self.selection) {
            (DecisionKind::Play, Some(sel)) => write!(
                f,
                "{} PLAY {} (sep={:.2} conf={:.2})",
                self.market,
                sel,
                self.separation,
                self.confidence.unwrap_or(0.0),
            ),
            _ => write!(f, "{} {}", self.market, self.decision),
        }
    }
}

/// Tally of decision kinds across one analysis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub play: u32,
    pub no_bet: u32,
    pub no_prediction: u32,
}

impl DecisionCounts {
    /// Tally a list of decisions.
    pub fn tally(decisions: &[MarketDecision]) -> Self {
        let mut counts = Self::default();
        for d in decisions {
            match d.decision {
                DecisionKind::Play => counts.play += 1,
                DecisionKind::NoBet => counts.no_bet += 1,
                DecisionKind::NoPrediction => counts.no_prediction += 1,
            }
        }
        counts
    }
}

/// Output of one analyzer invocation for one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub logic_version: String,
    /// "OK" when at least one market is a PLAY, otherwise "NO_PREDICTION".
    pub status: String,
    pub counts: DecisionCounts,
    pub decisions: Vec<MarketDecision>,
}

// ---------------------------------------------------------------------------
// Resolver contract
// ---------------------------------------------------------------------------

/// Resolution status. Ambiguity and absence are first-class results,
/// never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolverStatus {
    Resolved,
    Ambiguous,
    NotFound,
}

impl fmt::Display for ResolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverStatus::Resolved => write!(f, "RESOLVED"),
            ResolverStatus::Ambiguous => write!(f, "AMBIGUOUS"),
            ResolverStatus::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

// ---------------------------------------------------------------------------
// Match state & outcomes
// ---------------------------------------------------------------------------

/// Lifecycle status of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Final,
    Postponed,
    Abandoned,
    Unknown,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::Live => "LIVE",
            MatchStatus::Final => "FINAL",
            MatchStatus::Postponed => "POSTPONED",
            MatchStatus::Abandoned => "ABANDONED",
            MatchStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SCHEDULED" => Ok(MatchStatus::Scheduled),
            "LIVE" | "IN_PLAY" => Ok(MatchStatus::Live),
            "FINAL" | "FT" | "FINISHED" => Ok(MatchStatus::Final),
            "POSTPONED" => Ok(MatchStatus::Postponed),
            "ABANDONED" => Ok(MatchStatus::Abandoned),
            "UNKNOWN" => Ok(MatchStatus::Unknown),
            _ => Err(anyhow::anyhow!("Unknown match status: {s}")),
        }
    }
}

/// Realized final score plus status, used to resolve market outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub home_goals: u32,
    pub away_goals: u32,
    pub status: MatchStatus,
}

impl FinalResult {
    /// The realized 1X2 selection.
    pub fn result_1x2(&self) -> Selection {
        if self.home_goals > self.away_goals {
            Selection::Home
        } else if self.home_goals < self.away_goals {
            Selection::Away
        } else {
            Selection::Draw
        }
    }

    /// The realized OU25 selection: OVER when total goals >= 3.
    pub fn result_ou25(&self) -> Selection {
        if self.home_goals + self.away_goals >= 3 {
            Selection::Over
        } else {
            Selection::Under
        }
    }

    /// The realized GGNG selection: GG when both teams scored.
    pub fn result_ggng(&self) -> Selection {
        if self.home_goals > 0 && self.away_goals > 0 {
            Selection::Gg
        } else {
            Selection::Ng
        }
    }
}

/// Resolved outcome for one market's pick against the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketOutcome {
    Success,
    Failure,
    Neutral,
}

impl fmt::Display for MarketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketOutcome::Success => write!(f, "SUCCESS"),
            MarketOutcome::Failure => write!(f, "FAILURE"),
            MarketOutcome::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Domain-specific error types for TIPGUARD.
///
/// Resolver ambiguity/absence and per-market NO_PREDICTIONs are not
/// errors; they are first-class values in the report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Snapshot validation failed: {0}")]
    Validation(#[from] crate::ingest::ValidationError),

    #[error("Activation gate rejected: {reason}")]
    ActivationGateRejected { reason: String },

    #[error("Report schema validation failed: {}", .errors.join("; "))]
    SchemaValidation { errors: Vec<String> },

    #[error("Connector not found or not allowed: {0}")]
    ConnectorNotFound(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl PipelineError {
    /// Stable error code for the report boundary.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::ActivationGateRejected { .. } => "ACTIVATION_GATE_REJECTED",
            PipelineError::SchemaValidation { .. } => "SCHEMA_VALIDATION_ERROR",
            PipelineError::ConnectorNotFound(_) => "CONNECTOR_NOT_FOUND",
            PipelineError::Ingestion(_) => "INGESTION_ERROR",
            PipelineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
