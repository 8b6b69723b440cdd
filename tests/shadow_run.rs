//! End-to-end shadow pipeline runs over a seeded in-memory reference
//! store and a recorded connector.

use std::sync::Arc;

use tipguard::analyzer::estimator::OddsImpliedV1;
use tipguard::config::AppConfig;
use tipguard::ingest::recorded::RecordedConnector;
use tipguard::ingest::{Odds1x2, RawSnapshot, SnapshotSource};
use tipguard::pipeline::{
    check_activation_gate, run_many, run_shadow_with_connector, PipelineContext, ShadowRunRequest,
};
use tipguard::pipeline::report::validate_report_schema;
use tipguard::policy::{RunPolicy, ACTIVATION_MAX_MATCHES_HARD_CAP};
use tipguard::store;
use tipguard::types::{DecisionKind, Market, PipelineError, ResolverStatus, Selection};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn raw_snapshot(match_id: &str, home: &str, away: &str, kickoff: &str) -> RawSnapshot {
    RawSnapshot {
        source_ref: Some(format!("recorded:{match_id}")),
        match_id: Some(match_id.to_string()),
        home_team: Some(home.to_string()),
        away_team: Some(away.to_string()),
        competition: Some("Example League".to_string()),
        kickoff_utc: Some(kickoff.to_string()),
        observed_at_utc: Some("2026-08-08T12:00:00Z".to_string()),
        odds_1x2: Some(Odds1x2 {
            home: 2.10,
            draw: 3.20,
            away: 3.40,
        }),
        status: Some("SCHEDULED".to_string()),
        claims: Vec::new(),
        goals_trend: None,
    }
}

async fn context(policy: RunPolicy) -> PipelineContext {
    let pool = store::connect("sqlite::memory:").await.unwrap();
    store::migrate(&pool).await.unwrap();
    store::seed(&pool, &store::SeedData::sample()).await.unwrap();

    let mut config = AppConfig::default();
    config.reports.dir = std::env::temp_dir()
        .join(format!("tipguard_e2e_reports_{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    PipelineContext::new(pool, config, policy)
}

fn request(connector: &str, match_id: &str) -> ShadowRunRequest {
    ShadowRunRequest {
        connector_name: connector.to_string(),
        match_id: match_id.to_string(),
        final_home_goals: 2,
        final_away_goals: 1,
        status: "FINAL".to_string(),
        markets: None,
    }
}

fn league_connector() -> RecordedConnector {
    RecordedConnector::from_snapshots(vec![raw_snapshot(
        "match-1001",
        "Athletic Norte",
        "River Sur",
        "2026-08-08T18:00:00Z",
    )])
    .unwrap()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shadow_run_resolves_and_plays_1x2() {
    let ctx = context(RunPolicy::default()).await;
    let connector = league_connector();
    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.schema_version, "report.v1");
    assert_eq!(report.canonical_flow, "/pipeline/shadow/run");
    assert!(report.error.is_none());

    assert_eq!(report.resolver.status, ResolverStatus::Resolved);
    assert_eq!(report.match_id.as_deref(), Some("match-1001"));

    assert_eq!(report.analysis.decisions.len(), 1);
    let decision = &report.analysis.decisions[0];
    assert_eq!(decision.market, Market::OneXTwo);
    assert_eq!(decision.decision, DecisionKind::Play);
    assert_eq!(decision.selection, Some(Selection::Home));
    assert!(decision.separation >= 0.10);
    assert_eq!(report.analysis.status, "OK");

    // HOME pick against a 2-1 final is a SUCCESS.
    assert_eq!(
        report.evaluation.market_outcomes[&Market::OneXTwo].to_string(),
        "SUCCESS"
    );
    assert_eq!(report.evaluation.kpis.hits, 1);
    assert_eq!(report.audit.matches_count, 1);

    let value = serde_json::to_value(&report).unwrap();
    let (passed, errors) = validate_report_schema(&value);
    assert!(passed, "schema errors: {errors:?}");
}

#[tokio::test]
async fn shadow_run_all_markets_in_canonical_order() {
    let policy = RunPolicy {
        markets: Market::CANONICAL_ORDER.to_vec(),
        ..RunPolicy::default()
    };
    let ctx = context(policy).await;
    let mut raw = raw_snapshot(
        "match-1001",
        "Athletic Norte",
        "River Sur",
        "2026-08-08T18:00:00Z",
    );
    raw.goals_trend = Some(tipguard::ingest::GoalsTrend {
        home_avg: 2.2,
        away_avg: 1.7,
        home_conceded_avg: 1.5,
        away_conceded_avg: 1.9,
    });
    let connector = RecordedConnector::from_snapshots(vec![raw]).unwrap();

    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::GgNg, Market::OneXTwo, Market::OverUnder25],
    )
    .await
    .unwrap();

    let order: Vec<Market> = report.analysis.decisions.iter().map(|d| d.market).collect();
    assert_eq!(order, Market::CANONICAL_ORDER.to_vec());
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_inputs_yield_identical_checksums() {
    let first = {
        let ctx = context(RunPolicy::default()).await;
        let connector = league_connector();
        run_shadow_with_connector(
            &ctx,
            &request("recorded", "match-1001"),
            &connector,
            &[Market::OneXTwo],
        )
        .await
        .unwrap()
    };
    let second = {
        let ctx = context(RunPolicy::default()).await;
        let connector = league_connector();
        run_shadow_with_connector(
            &ctx,
            &request("recorded", "match-1001"),
            &connector,
            &[Market::OneXTwo],
        )
        .await
        .unwrap()
    };

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        first.evaluation.checksums.proposal_checksum,
        second.evaluation.checksums.proposal_checksum
    );
    assert_eq!(
        first.evaluation.checksums.output_hash,
        second.evaluation.checksums.output_hash
    );
    assert_eq!(
        first.evaluation.checksums.evaluation_report_checksum,
        second.evaluation.checksums.evaluation_report_checksum
    );

    // Decisions themselves are byte-identical.
    assert_eq!(
        serde_json::to_vec(&first.analysis.decisions).unwrap(),
        serde_json::to_vec(&second.analysis.decisions).unwrap()
    );
}

// ---------------------------------------------------------------------------
// Resolver short-circuits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ambiguous_window_short_circuits_successfully() {
    let ctx = context(RunPolicy::default()).await;
    // A kickoff hint between the league (08-08 18:00) and cup
    // (08-09 20:00) fixtures puts both inside the 24h window.
    let connector = RecordedConnector::from_snapshots(vec![raw_snapshot(
        "match-1001",
        "Athletic Norte",
        "River Sur",
        "2026-08-09T07:00:00Z",
    )])
    .unwrap();

    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.resolver.status, ResolverStatus::Ambiguous);
    assert!(report.error.is_none(), "ambiguity is not an error");
    assert!(report.analysis.decisions.is_empty());
    assert_eq!(report.resolver.candidates.len(), 2);
    let candidate_notes: Vec<&String> = report
        .resolver
        .notes
        .iter()
        .filter(|n| n.starts_with("CANDIDATE "))
        .collect();
    assert_eq!(candidate_notes.len(), 2);

    let value = serde_json::to_value(&report).unwrap();
    let (passed, _) = validate_report_schema(&value);
    assert!(passed);
}

#[tokio::test]
async fn unknown_teams_short_circuit_not_found() {
    let ctx = context(RunPolicy::default()).await;
    let connector = RecordedConnector::from_snapshots(vec![raw_snapshot(
        "match-1001",
        "Phantom FC",
        "Ghost United",
        "2026-08-08T18:00:00Z",
    )])
    .unwrap();

    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.resolver.status, ResolverStatus::NotFound);
    assert!(report.error.is_none());
    assert!(report.analysis.decisions.is_empty());
}

// ---------------------------------------------------------------------------
// Adapter-level failures degrade to error reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_fixture_yields_error_report() {
    let ctx = context(RunPolicy::default()).await;
    let connector = league_connector();
    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-9999"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.error.as_deref(), Some("NO_FIXTURE"));
    assert!(report.detail.as_deref().unwrap().contains("match-9999"));
    assert!(report.analysis.decisions.is_empty());

    // Error reports are still complete, schema-valid reports.
    let value = serde_json::to_value(&report).unwrap();
    let (passed, errors) = validate_report_schema(&value);
    assert!(passed, "schema errors: {errors:?}");
}

#[tokio::test]
async fn invalid_odds_yield_validation_error_report() {
    let ctx = context(RunPolicy::default()).await;
    let mut raw = raw_snapshot(
        "match-1001",
        "Athletic Norte",
        "River Sur",
        "2026-08-08T18:00:00Z",
    );
    raw.odds_1x2 = Some(Odds1x2 {
        home: -2.0,
        draw: 3.2,
        away: 3.4,
    });
    let connector = RecordedConnector::from_snapshots(vec![raw]).unwrap();

    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.error.as_deref(), Some("VALIDATION_ERROR"));
    assert!(report.detail.as_deref().unwrap().contains("Odds"));
}

#[tokio::test]
async fn slow_connector_times_out_into_error_report() {
    struct SlowSource;

    #[async_trait::async_trait]
    impl SnapshotSource for SlowSource {
        async fn fetch(&self, _match_id: &str) -> anyhow::Result<Option<RawSnapshot>> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(None)
        }
        fn name(&self) -> &str {
            "slow"
        }
        fn is_live(&self) -> bool {
            false
        }
    }

    let mut ctx = context(RunPolicy::default()).await;
    ctx.config.ingestion.timeout_secs = 1;
    let report = run_shadow_with_connector(
        &ctx,
        &request("slow", "match-1001"),
        &SlowSource,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();

    assert_eq!(report.error.as_deref(), Some("INGESTION_ERROR"));
    assert!(report.detail.as_deref().unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Activation gate & batches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_over_cap_is_refused_before_ingestion() {
    let policy = RunPolicy {
        max_matches: 2,
        ..RunPolicy::default()
    };
    let ctx = context(policy).await;
    let requests: Vec<ShadowRunRequest> = (0..3)
        .map(|i| request("recorded", &format!("match-{i}")))
        .collect();

    match run_many(&ctx, requests).await {
        Err(PipelineError::ActivationGateRejected { reason }) => {
            assert!(reason.contains("exceeds cap"))
        }
        other => panic!("expected gate rejection, got ok={}", other.is_ok()),
    }
}

#[tokio::test]
async fn batch_reports_come_back_in_sorted_match_id_order() {
    let policy = RunPolicy {
        max_matches: 3,
        ..RunPolicy::default()
    };
    let mut ctx = context(policy).await;

    // The recorded connector resolves from this fixture file on every
    // sub-run, so write a real one with both fixtures.
    let fixtures = serde_json::to_string(&vec![
        raw_snapshot(
            "match-1001",
            "Athletic Norte",
            "River Sur",
            "2026-08-08T18:00:00Z",
        ),
        raw_snapshot(
            "match-2001",
            "Unión Central",
            "Deportivo Este",
            "2026-08-09T16:00:00Z",
        ),
    ])
    .unwrap();
    let fixtures_path = std::env::temp_dir().join(format!(
        "tipguard_e2e_fixtures_{}.json",
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&fixtures_path, fixtures).unwrap();
    ctx.config.ingestion.fixtures_path = fixtures_path.to_string_lossy().to_string();

    let requests = vec![
        request("recorded", "match-2001"),
        request("recorded", "match-1001"),
    ];
    let reports = run_many(&ctx, requests).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].match_id.as_deref(), Some("match-1001"));
    assert_eq!(reports[1].match_id.as_deref(), Some("match-2001"));
    assert!(reports.iter().all(|r| r.audit.matches_count == 1));
    assert!(reports.len() as u32 <= ACTIVATION_MAX_MATCHES_HARD_CAP);
}

#[tokio::test]
async fn gate_refuses_over_hard_cap_even_with_wide_policy() {
    let policy = RunPolicy {
        max_matches: 1000,
        ..RunPolicy::default()
    };
    assert!(matches!(
        check_activation_gate(&policy, ACTIVATION_MAX_MATCHES_HARD_CAP + 1, &[Market::OneXTwo]),
        Err(PipelineError::ActivationGateRejected { .. })
    ));
}

// ---------------------------------------------------------------------------
// Strict schema mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn strict_mode_passes_on_well_formed_report() {
    let policy = RunPolicy {
        schema_validate_strict: true,
        ..RunPolicy::default()
    };
    let ctx = context(policy).await;
    let connector = league_connector();
    let report = run_shadow_with_connector(
        &ctx,
        &request("recorded", "match-1001"),
        &connector,
        &[Market::OneXTwo],
    )
    .await
    .unwrap();
    assert_eq!(report.schema_version, "report.v1");
}

// ---------------------------------------------------------------------------
// Estimator determinism (library-level)
// ---------------------------------------------------------------------------

#[test]
fn estimator_is_deterministic_for_example_odds() {
    use tipguard::analyzer::estimator::Estimator;
    use tipguard::ingest::MatchRef;
    use tipguard::types::MatchStatus;

    let snapshot = tipguard::ingest::Snapshot {
        source_ref: "recorded:fixture-1".into(),
        match_ref: MatchRef {
            match_id: "match-1001".into(),
            home_text: "Athletic Norte".into(),
            away_text: "River Sur".into(),
            competition: None,
            kickoff_hint_utc: None,
            window_hours: 24,
        },
        observed_at_utc: chrono::Utc::now(),
        odds_1x2: Odds1x2 {
            home: 2.10,
            draw: 3.20,
            away: 3.40,
        },
        status: MatchStatus::Scheduled,
        claims: Vec::new(),
        goals_trend: None,
    };

    let est = OddsImpliedV1;
    let a = est.distribution(Market::OneXTwo, &snapshot).unwrap();
    let b = est.distribution(Market::OneXTwo, &snapshot).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
    assert!(a.separation() > 0.10);
}
