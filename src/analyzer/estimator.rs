//! Probability estimators.
//!
//! An `Estimator` turns a snapshot into a per-market probability
//! distribution. Implementations are versioned ("logic_version"),
//! selected by explicit configuration, and must be deterministic: the
//! same snapshot always yields the same distribution.

use crate::ingest::Snapshot;
use crate::types::{Distribution, Market, Selection};

/// Threshold between OVER and UNDER in expected goals.
const EXPECTED_GOALS_LINE: f64 = 2.5;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    /// The snapshot carries no usable evidence for this market.
    #[error("Insufficient evidence for {0}")]
    InsufficientData(Market),

    /// The estimator itself failed; recovered per-market by the analyzer.
    #[error("Estimator failure for {market}: {message}")]
    Compute { market: Market, message: String },
}

/// Capability implemented by all versioned estimators.
pub trait Estimator: Send + Sync {
    /// Version tag recorded on every analysis run.
    fn logic_version(&self) -> &'static str;

    /// Compute the probability distribution for one market.
    fn distribution(&self, market: Market, snapshot: &Snapshot)
        -> Result<Distribution, EstimateError>;
}

/// Look up an estimator by logic version.
pub fn estimator_for(logic_version: &str) -> Option<Box<dyn Estimator>> {
    match logic_version {
        "odds_implied_v1" => Some(Box::new(OddsImpliedV1)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// odds_implied_v1
// ---------------------------------------------------------------------------

/// Odds-implied estimator, version 1.
///
/// 1X2 comes straight from inverse decimal odds (overround removed by
/// normalization). OU25 and GGNG need the goals-trend evidence block;
/// without it they report insufficient data rather than guessing.
pub struct OddsImpliedV1;

impl OddsImpliedV1 {
    fn one_x_two(&self, snapshot: &Snapshot) -> Distribution {
        let odds = snapshot.odds_1x2;
        Distribution::from_weights(
            Market::OneXTwo,
            &[
                (Selection::Home, 1.0 / odds.home),
                (Selection::Draw, 1.0 / odds.draw),
                (Selection::Away, 1.0 / odds.away),
            ],
        )
    }

    fn over_under(&self, snapshot: &Snapshot) -> Result<Distribution, EstimateError> {
        let trend = snapshot
            .goals_trend
            .ok_or(EstimateError::InsufficientData(Market::OverUnder25))?;
        let expected_goals = (trend.home_avg + trend.away_conceded_avg) / 2.0
            + (trend.away_avg + trend.home_conceded_avg) / 2.0;
        if !expected_goals.is_finite() {
            return Err(EstimateError::Compute {
                market: Market::OverUnder25,
                message: format!("non-finite expected goals: {expected_goals}"),
            });
        }
        let p_over = 0.5 + 0.5 * ((expected_goals - EXPECTED_GOALS_LINE) * 0.5).tanh();
        Ok(Distribution::from_weights(
            Market::OverUnder25,
            &[(Selection::Over, p_over), (Selection::Under, 1.0 - p_over)],
        ))
    }

    fn gg_ng(&self, snapshot: &Snapshot) -> Result<Distribution, EstimateError> {
        let trend = snapshot
            .goals_trend
            .ok_or(EstimateError::InsufficientData(Market::GgNg))?;
        let clamp01 = |v: f64| v.clamp(0.0, 1.0);
        let home_scoring = clamp01(trend.home_avg / 3.0);
        let away_scoring = clamp01(trend.away_avg / 3.0);
        let home_conceding = clamp01(trend.home_conceded_avg / 3.0);
        let away_conceding = clamp01(trend.away_conceded_avg / 3.0);
        let p_home_scores = home_scoring * away_conceding;
        let p_away_scores = away_scoring * home_conceding;
        let p_yes = p_home_scores * p_away_scores;
        Ok(Distribution::from_weights(
            Market::GgNg,
            &[(Selection::Gg, p_yes), (Selection::Ng, 1.0 - p_yes)],
        ))
    }
}

impl Estimator for OddsImpliedV1 {
    fn logic_version(&self) -> &'static str {
        "odds_implied_v1"
    }

    fn distribution(
        &self,
        market: Market,
        snapshot: &Snapshot,
    ) -> Result<Distribution, EstimateError> {
        match market {
            Market::OneXTwo => Ok(self.one_x_two(snapshot)),
            Market::OverUnder25 => self.over_under(snapshot),
            Market::GgNg => self.gg_ng(snapshot),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
