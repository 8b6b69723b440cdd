//! Decision engine.
//!
//! Applies deterministic policy thresholds to estimator distributions
//! and produces per-market decisions with structured reasons. Markets
//! are always evaluated in the canonical order 1X2, OU25, GGNG — the
//! order is part of the determinism contract. A per-market estimator
//! failure is recovered locally as NO_PREDICTION; it never aborts the
//! other markets or the run.

pub mod estimator;

use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::ingest::{Claim, Snapshot};
use crate::types::{
    AnalysisRun, DecisionCounts, DecisionKind, Distribution, Market, MarketDecision, ReasonCode,
    Selection,
};
use estimator::{EstimateError, Estimator};

// ---------------------------------------------------------------------------
// Evidence quality
// ---------------------------------------------------------------------------

/// Evidence quality in [0.5, 1.0], a pure function of claim reliability.
///
/// No claims means the odds stand unchallenged: quality 1.0. Claims pull
/// quality down toward 0.5, less so when the claiming sources are
/// reliable.
pub fn evidence_quality(claims: &[Claim]) -> f64 {
    if claims.is_empty() {
        return 1.0;
    }
    let mean_reliability: f64 =
        claims.iter().map(|c| c.reliability).sum::<f64>() / claims.len() as f64;
    0.5 + 0.5 * mean_reliability
}

/// Bounded confidence from distribution sharpness and evidence quality.
fn confidence_from(separation: f64, quality: f64) -> f64 {
    (0.5 + 2.0 * separation).clamp(0.0, 1.0) * quality
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct Analyzer {
    estimator: Box<dyn Estimator>,
}

impl Analyzer {
    pub fn new(estimator: Box<dyn Estimator>) -> Self {
        Self { estimator }
    }

    /// Build an analyzer from configuration, falling back to
    /// `odds_implied_v1` when the configured logic version is unknown.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let est = estimator::estimator_for(&config.estimator).unwrap_or_else(|| {
            warn!(
                estimator = %config.estimator,
                "Unknown estimator logic version, falling back to odds_implied_v1"
            );
            Box::new(estimator::OddsImpliedV1)
        });
        Self::new(est)
    }

    /// Version tag of the selected estimator.
    pub fn logic_version(&self) -> &'static str {
        self.estimator.logic_version()
    }

    /// Decide all requested markets for one snapshot.
    ///
    /// `markets` may arrive in any order; decisions come back in
    /// canonical order restricted to the requested set.
    pub fn decide(
        &self,
        snapshot: &Snapshot,
        config: &AnalyzerConfig,
        markets: &[Market],
    ) -> AnalysisRun {
        let quality = evidence_quality(&snapshot.claims);
        let mut decisions: Vec<MarketDecision> = Vec::new();

        for market in Market::CANONICAL_ORDER {
            if !markets.contains(market) {
                continue;
            }
            decisions.push(self.decide_market(*market, snapshot, config, quality));
        }

        let counts = DecisionCounts::tally(&decisions);
        let status = if counts.play > 0 { "OK" } else { "NO_PREDICTION" };
        AnalysisRun {
            logic_version: self.logic_version().to_string(),
            status: status.to_string(),
            counts,
            decisions,
        }
    }

    fn decide_market(
        &self,
        market: Market,
        snapshot: &Snapshot,
        config: &AnalyzerConfig,
        quality: f64,
    ) -> MarketDecision {
        let dist = match self.estimator.distribution(market, snapshot) {
            Ok(dist) => dist,
            Err(EstimateError::InsufficientData(m)) => {
                debug!(market = %m, "No usable evidence, NO_PREDICTION");
                return no_prediction(market, ReasonCode::InsufficientDataForMarket);
            }
            Err(EstimateError::Compute { market: m, message }) => {
                warn!(market = %m, %message, "Estimator failure recovered as NO_PREDICTION");
                return no_prediction(market, ReasonCode::MarketComputeError);
            }
        };

        let separation = dist.separation();
        let confidence = confidence_from(separation, quality);
        let risk = (1.0 - confidence).max(0.0);
        let min_separation = config.min_separation.for_market(&market);

        if separation < min_separation {
            debug!(
                %market,
                separation = format!("{separation:.3}"),
                threshold = format!("{min_separation:.3}"),
                "Separation below threshold"
            );
            return threshold_no_bet(
                market,
                &dist,
                separation,
                confidence,
                risk,
                ReasonCode::SeparationBelowThreshold,
            );
        }

        if confidence < config.min_confidence {
            debug!(
                %market,
                confidence = format!("{confidence:.3}"),
                threshold = format!("{:.3}", config.min_confidence),
                "Confidence below threshold"
            );
            return threshold_no_bet(
                market,
                &dist,
                separation,
                confidence,
                risk,
                ReasonCode::ConfidenceBelowThreshold,
            );
        }

        let leader = match dist.top_two() {
            Some(((sel, _), _)) => sel,
            // A one-selection distribution cannot occur for supported
            // markets; recover rather than panic.
            None => return no_prediction(market, ReasonCode::MarketComputeError),
        };

        MarketDecision {
            market,
            decision: DecisionKind::Play,
            selection: Some(leader),
            probabilities: dist.probabilities.clone(),
            separation,
            confidence: Some(confidence),
            risk: Some(risk),
            reasons: positive_reasons(market, leader),
        }
    }
}

fn no_prediction(market: Market, reason: ReasonCode) -> MarketDecision {
    MarketDecision {
        market,
        decision: DecisionKind::NoPrediction,
        selection: None,
        probabilities: Default::default(),
        separation: 0.0,
        confidence: None,
        risk: None,
        reasons: vec![reason],
    }
}

fn threshold_no_bet(
    market: Market,
    dist: &Distribution,
    separation: f64,
    confidence: f64,
    risk: f64,
    reason: ReasonCode,
) -> MarketDecision {
    MarketDecision {
        market,
        decision: DecisionKind::NoBet,
        selection: None,
        probabilities: dist.probabilities.clone(),
        separation,
        confidence: Some(confidence),
        risk: Some(risk),
        reasons: vec![reason],
    }
}

/// Positive rationale for a PLAY on the given leading selection.
fn positive_reasons(market: Market, leader: Selection) -> Vec<ReasonCode> {
    match (market, leader) {
        (Market::OneXTwo, _) => vec![ReasonCode::OddsFavorite],
        (Market::OverUnder25, Selection::Over) => vec![ReasonCode::ExpectedGoalsAbove],
        (Market::OverUnder25, _) => vec![ReasonCode::ExpectedGoalsBelow],
        (Market::GgNg, Selection::Gg) => vec![ReasonCode::BothTeamsScoringTrend],
        (Market::GgNg, _) => vec![ReasonCode::DefensiveStrengthPresent],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::ingest::{Claim, ClaimKind, GoalsTrend, MatchRef, Odds1x2, Snapshot};
    use crate::types::MatchStatus;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> Snapshot {
        Snapshot {
            source_ref: "recorded:test".into(),
            match_ref: MatchRef {
                match_id: "match-1001".into(),
                home_text: "Athletic Norte".into(),
                away_text: "River Sur".into(),
                competition: None,
                kickoff_hint_utc: Some(Utc.with_ymd_and_hms(2026, 8, 8, 18, 0, 0).unwrap()),
                window_hours: 24,
            },
            observed_at_utc: Utc.with_ymd_and_hms(2026, 8, 8, 12, 0, 0).unwrap(),
            odds_1x2: Odds1x2 {
                home: 2.10,
                draw: 3.20,
                away: 3.40,
            },
            status: MatchStatus::Scheduled,
            claims: Vec::new(),
            goals_trend: Some(GoalsTrend {
                home_avg: 2.2,
                away_avg: 1.7,
                home_conceded_avg: 1.5,
                away_conceded_avg: 1.9,
            }),
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(Box::new(estimator::OddsImpliedV1))
    }

    #[test]
    fn test_play_home_on_wide_separation() {
        let cfg = AppConfig::default().analyzer;
        let run = analyzer().decide(&snapshot(), &cfg, &[Market::OneXTwo]);
        assert_eq!(run.decisions.len(), 1);
        let d = &run.decisions[0];
        assert_eq!(d.decision, DecisionKind::Play);
        assert_eq!(d.selection, Some(Selection::Home));
        assert_eq!(d.reasons, vec![ReasonCode::OddsFavorite]);
        assert!(d.separation >= 0.10);
        assert_eq!(run.status, "OK");
        assert_eq!(run.counts.play, 1);
    }

    #[test]
    fn test_raised_separation_threshold_downgrades_to_no_bet() {
        let mut cfg = AppConfig::default().analyzer;
        cfg.min_separation.one_x_two = 0.20;
        let run = analyzer().decide(&snapshot(), &cfg, &[Market::OneXTwo]);
        let d = &run.decisions[0];
        assert_eq!(d.decision, DecisionKind::NoBet);
        assert!(d.selection.is_none());
        assert_eq!(d.reasons, vec![ReasonCode::SeparationBelowThreshold]);
        assert_eq!(run.status, "NO_PREDICTION");
    }

    #[test]
    fn test_confidence_threshold_downgrades_to_no_bet() {
        let mut cfg = AppConfig::default().analyzer;
        cfg.min_confidence = 0.99;
        let run = analyzer().decide(&snapshot(), &cfg, &[Market::OneXTwo]);
        let d = &run.decisions[0];
        assert_eq!(d.decision, DecisionKind::NoBet);
        assert_eq!(d.reasons, vec![ReasonCode::ConfidenceBelowThreshold]);
    }

    #[test]
    fn test_missing_goals_trend_is_no_prediction_for_ou_and_ggng_only() {
        let cfg = AppConfig::default().analyzer;
        let mut snap = snapshot();
        snap.goals_trend = None;
        let run = analyzer().decide(&snap, &cfg, Market::CANONICAL_ORDER);
        assert_eq!(run.decisions.len(), 3);
        assert_eq!(run.decisions[0].decision, DecisionKind::Play); // 1X2 unaffected
        assert_eq!(run.decisions[1].decision, DecisionKind::NoPrediction);
        assert_eq!(
            run.decisions[1].reasons,
            vec![ReasonCode::InsufficientDataForMarket]
        );
        assert_eq!(run.decisions[2].decision, DecisionKind::NoPrediction);
    }

    #[test]
    fn test_market_order_invariant_under_request_order() {
        let cfg = AppConfig::default().analyzer;
        let run = analyzer().decide(
            &snapshot(),
            &cfg,
            &[Market::GgNg, Market::OneXTwo, Market::OverUnder25],
        );
        let order: Vec<Market> = run.decisions.iter().map(|d| d.market).collect();
        assert_eq!(
            order,
            vec![Market::OneXTwo, Market::OverUnder25, Market::GgNg]
        );
    }

    #[test]
    fn test_determinism_byte_identical() {
        let cfg = AppConfig::default().analyzer;
        let a = analyzer().decide(&snapshot(), &cfg, Market::CANONICAL_ORDER);
        let b = analyzer().decide(&snapshot(), &cfg, Market::CANONICAL_ORDER);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_evidence_quality_monotonic_in_reliability() {
        let none = evidence_quality(&[]);
        let claim = |reliability| Claim {
            source: "example-news".into(),
            kind: ClaimKind::Injury,
            player: None,
            detail: "doubtful".into(),
            reliability,
        };
        let weak = evidence_quality(&[claim(0.2)]);
        let strong = evidence_quality(&[claim(0.9)]);
        assert_eq!(none, 1.0);
        assert!(weak < strong);
        assert!(strong < none);
        assert!(weak >= 0.5);
    }

    #[test]
    fn test_claims_can_push_confidence_below_threshold() {
        let cfg = AppConfig::default().analyzer;
        let mut snap = snapshot();
        snap.claims = vec![Claim {
            source: "rumour-mill".into(),
            kind: ClaimKind::TeamNews,
            player: None,
            detail: "rotation expected".into(),
            reliability: 0.0,
        }];
        // Quality drops to 0.5; confidence halves and falls under 0.62.
        let run = analyzer().decide(&snap, &cfg, &[Market::OneXTwo]);
        let d = &run.decisions[0];
        assert_eq!(d.decision, DecisionKind::NoBet);
        assert_eq!(d.reasons, vec![ReasonCode::ConfidenceBelowThreshold]);
    }

    #[test]
    fn test_from_config_falls_back_on_unknown_estimator() {
        let mut cfg = AppConfig::default().analyzer;
        cfg.estimator = "neural_net_v7".into();
        let analyzer = Analyzer::from_config(&cfg);
        assert_eq!(analyzer.logic_version(), "odds_implied_v1");
    }
}
