//! Pipeline orchestrator.
//!
//! The top-level state machine for one shadow run:
//! INGESTING → RESOLVING → ANALYZING → EVALUATING → AUDITING → DONE,
//! with ERROR absorbing from any stage. Enforces the activation gate
//! (kill-switch, match cap, market whitelist) before any ingestion work,
//! short-circuits on unresolved matches, and assembles exactly one
//! report per run. Retries are a caller concern; the orchestrator never
//! retries on its own.

pub mod report;

use chrono::Utc;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::awareness;
use crate::config::AppConfig;
use crate::evaluation::{
    self, check_stability, compute_checksums, resolve_markets, EvaluationRecord, Period, Stability,
};
use crate::ingest::{connector_for, SnapshotSource};
use crate::policy::{RunPolicy, ACTIVATION_MAX_MATCHES_HARD_CAP};
use crate::resolver::{self, MatchQuery};
use crate::store::{self, OutcomeRow};
use crate::types::{
    AnalysisRun, FinalResult, Market, MarketDecision, MatchStatus, PipelineError, ResolverStatus,
};
use report::{
    validate_report_schema, AuditSection, EvaluationSection, PipelineReport, ResolverSection,
    CANONICAL_FLOW_SHADOW_RUN, REPORT_SCHEMA_VERSION,
};

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// Stages of one pipeline run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ingesting,
    Resolving,
    Analyzing,
    Evaluating,
    Auditing,
    Done,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Ingesting => "INGESTING",
            RunState::Resolving => "RESOLVING",
            RunState::Analyzing => "ANALYZING",
            RunState::Evaluating => "EVALUATING",
            RunState::Auditing => "AUDITING",
            RunState::Done => "DONE",
            RunState::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

fn transition(run_id: &str, state: &mut RunState, next: RunState) {
    info!(run_id, from = %state, to = %next, "Pipeline state transition");
    *state = next;
}

// ---------------------------------------------------------------------------
// Context & request
// ---------------------------------------------------------------------------

/// Shared, read-mostly context for pipeline runs. One per process.
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub config: AppConfig,
    pub policy: RunPolicy,
    pub analyzer: Analyzer,
    /// Prior decision sets per canonical match id, for the stability
    /// guardrail. Append-only within a process.
    prior_runs: RwLock<HashMap<String, Vec<MarketDecision>>>,
}

impl PipelineContext {
    pub fn new(pool: SqlitePool, config: AppConfig, policy: RunPolicy) -> Self {
        let analyzer = Analyzer::from_config(&config.analyzer);
        Self {
            pool,
            config,
            policy,
            analyzer,
            prior_runs: RwLock::new(HashMap::new()),
        }
    }
}

/// Request body for the shadow-run entry point.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ShadowRunRequest {
    pub connector_name: String,
    pub match_id: String,
    pub final_home_goals: u32,
    pub final_away_goals: u32,
    pub status: String,
    /// Optional market subset; defaults to the policy's allowed set.
    #[serde(default)]
    pub markets: Option<Vec<Market>>,
}

// ---------------------------------------------------------------------------
// Activation gate
// ---------------------------------------------------------------------------

/// Check the activation gate for a run of `match_count` matches over the
/// requested markets. Violations refuse the run before any side effect.
/// Returns the requested markets restricted to canonical order.
pub fn check_activation_gate(
    policy: &RunPolicy,
    match_count: u32,
    requested_markets: &[Market],
) -> Result<Vec<Market>, PipelineError> {
    if policy.kill_switch {
        return Err(PipelineError::ActivationGateRejected {
            reason: "ACTIVATION_KILL_SWITCH is enabled".to_string(),
        });
    }
    if policy.max_matches == 0 {
        return Err(PipelineError::ActivationGateRejected {
            reason: "ACTIVATION_MAX_MATCHES is 0 (activation off)".to_string(),
        });
    }
    // The policy clamps on construction; the compiled ceiling is
    // re-checked here so a hand-built policy cannot widen the gate.
    let effective_cap = policy.max_matches.min(ACTIVATION_MAX_MATCHES_HARD_CAP);
    if match_count > effective_cap {
        return Err(PipelineError::ActivationGateRejected {
            reason: format!(
                "match count {match_count} exceeds cap ACTIVATION_MAX_MATCHES={effective_cap}"
            ),
        });
    }
    policy
        .restrict_markets(requested_markets)
        .ok_or_else(|| PipelineError::ActivationGateRejected {
            reason: format!(
                "requested markets {requested_markets:?} not a subset of allowed {:?}",
                policy.markets
            ),
        })
}

// ---------------------------------------------------------------------------
// Shadow run
// ---------------------------------------------------------------------------

/// Run the full shadow pipeline for one match, constructing the
/// connector from the request. Gate violations and storage faults are
/// typed errors; adapter-level failures come back as error reports.
pub async fn run_shadow(
    ctx: &PipelineContext,
    request: &ShadowRunRequest,
) -> Result<PipelineReport, PipelineError> {
    let requested = request
        .markets
        .clone()
        .unwrap_or_else(|| ctx.policy.markets.clone());
    let markets = check_activation_gate(&ctx.policy, 1, &requested)?;

    let connector = match connector_for(&request.connector_name, &ctx.policy, &ctx.config.ingestion)
    {
        Ok(c) => c,
        Err(e) => {
            let run_id = Uuid::new_v4().to_string();
            return assemble(
                ctx,
                &run_id,
                request,
                &markets,
                unresolved_section(ResolverStatus::NotFound),
                empty_analysis(ctx),
                Default::default(),
                Stability::default(),
                None,
                Some((e.code().to_string(), e.to_string())),
            )
            .await;
        }
    };
    run_shadow_with_connector(ctx, request, connector.as_ref(), &markets).await
}

/// Shadow run against an explicit connector (used directly by tests and
/// the batch runner; `run_shadow` resolves the connector by name first).
pub async fn run_shadow_with_connector(
    ctx: &PipelineContext,
    request: &ShadowRunRequest,
    connector: &dyn SnapshotSource,
    markets: &[Market],
) -> Result<PipelineReport, PipelineError> {
    let run_id = Uuid::new_v4().to_string();
    let mut state = RunState::Ingesting;
    info!(
        run_id = %run_id,
        match_id = %request.match_id,
        connector = connector.name(),
        ?markets,
        "Shadow run started"
    );

    // -- INGESTING --------------------------------------------------------

    let timeout = Duration::from_secs(ctx.config.ingestion.timeout_secs);
    let fetched = tokio::time::timeout(timeout, connector.fetch(&request.match_id)).await;

    let raw = match fetched {
        Err(_elapsed) => {
            transition(&run_id, &mut state, RunState::Error);
            return assemble(
                ctx,
                &run_id,
                request,
                markets,
                unresolved_section(ResolverStatus::NotFound),
                empty_analysis(ctx),
                Default::default(),
                Stability::default(),
                None,
                Some((
                    "INGESTION_ERROR".to_string(),
                    format!("connector fetch timed out after {}s", timeout.as_secs()),
                )),
            )
            .await;
        }
        Ok(Err(e)) => {
            transition(&run_id, &mut state, RunState::Error);
            return assemble(
                ctx,
                &run_id,
                request,
                markets,
                unresolved_section(ResolverStatus::NotFound),
                empty_analysis(ctx),
                Default::default(),
                Stability::default(),
                None,
                Some(("INGESTION_ERROR".to_string(), e.to_string())),
            )
            .await;
        }
        Ok(Ok(None)) => {
            transition(&run_id, &mut state, RunState::Error);
            return assemble(
                ctx,
                &run_id,
                request,
                markets,
                unresolved_section(ResolverStatus::NotFound),
                empty_analysis(ctx),
                Default::default(),
                Stability::default(),
                None,
                Some((
                    "NO_FIXTURE".to_string(),
                    format!("no fixture found for match_id={:?}", request.match_id),
                )),
            )
            .await;
        }
        Ok(Ok(Some(raw))) => raw,
    };

    let snapshot = match raw.parse() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            transition(&run_id, &mut state, RunState::Error);
            return assemble(
                ctx,
                &run_id,
                request,
                markets,
                unresolved_section(ResolverStatus::NotFound),
                empty_analysis(ctx),
                Default::default(),
                Stability::default(),
                None,
                Some(("VALIDATION_ERROR".to_string(), e.to_string())),
            )
            .await;
        }
    };

    // Live-awareness diagnostics: freshness of what we just observed.
    // Informational only; never feeds back into decisions.
    let (live_observed, recorded_observed) = if connector.is_live() {
        (Some(snapshot.observed_at_utc), None)
    } else {
        (None, Some(snapshot.observed_at_utc))
    };
    let awareness_state = awareness::compute_live_awareness(
        &snapshot.match_ref.match_id,
        live_observed,
        recorded_observed,
        Utc::now(),
    );
    if let Err(e) = awareness::write_artifacts(&ctx.config.reports.dir, &awareness_state) {
        warn!(error = %e, "Failed to persist live awareness artifacts");
    }

    // -- RESOLVING --------------------------------------------------------

    transition(&run_id, &mut state, RunState::Resolving);
    let resolution = resolver::resolve(&ctx.pool, &MatchQuery::from(&snapshot.match_ref)).await?;

    let resolver_section = ResolverSection {
        status: resolution.status,
        match_id: resolution.match_id.clone(),
        candidates: resolution.candidates.clone(),
        notes: resolution.notes.clone(),
    };

    // Ambiguity and absence short-circuit to report assembly with an
    // empty decision set: a successful run, not an error.
    if resolution.status != ResolverStatus::Resolved {
        transition(&run_id, &mut state, RunState::Auditing);
        let report = assemble(
            ctx,
            &run_id,
            request,
            markets,
            resolver_section,
            empty_analysis(ctx),
            Default::default(),
            Stability::default(),
            None,
            None,
        )
        .await?;
        transition(&run_id, &mut state, RunState::Done);
        return Ok(report);
    }
    let canonical_match_id = resolution
        .match_id
        .clone()
        .unwrap_or_else(|| request.match_id.clone());

    // -- ANALYZING --------------------------------------------------------

    transition(&run_id, &mut state, RunState::Analyzing);
    let analysis = ctx
        .analyzer
        .decide(&snapshot, &ctx.config.analyzer, markets);

    // -- EVALUATING -------------------------------------------------------

    transition(&run_id, &mut state, RunState::Evaluating);
    let now = Utc::now();
    let final_result = FinalResult {
        home_goals: request.final_home_goals,
        away_goals: request.final_away_goals,
        status: request
            .status
            .parse::<MatchStatus>()
            .unwrap_or(MatchStatus::Unknown),
    };
    let outcomes = resolve_markets(&analysis.decisions, &final_result);

    for decision in &analysis.decisions {
        if let Some(outcome) = outcomes.get(&decision.market) {
            store::insert_outcome(
                &ctx.pool,
                &OutcomeRow {
                    match_id: canonical_match_id.clone(),
                    market: decision.market,
                    pick: decision.selection,
                    outcome: *outcome,
                    evaluated_at_utc: now,
                },
            )
            .await?;
        }
    }

    let stability = {
        let prior = ctx.prior_runs.read().await.get(&canonical_match_id).cloned();
        let stability = check_stability(&analysis.decisions, prior.as_deref());
        ctx.prior_runs
            .write()
            .await
            .insert(canonical_match_id.clone(), analysis.decisions.clone());
        stability
    };
    if stability.guardrail_triggered {
        warn!(
            run_id = %run_id,
            match_id = %canonical_match_id,
            notes = ?stability.notes,
            "Stability guardrail triggered (observational only)"
        );
    }

    // -- AUDITING ---------------------------------------------------------

    transition(&run_id, &mut state, RunState::Auditing);
    let report = assemble(
        ctx,
        &run_id,
        request,
        markets,
        resolver_section,
        analysis,
        outcomes,
        stability,
        Some(canonical_match_id),
        None,
    )
    .await?;
    transition(&run_id, &mut state, RunState::Done);
    Ok(report)
}

// ---------------------------------------------------------------------------
// Batch runs
// ---------------------------------------------------------------------------

/// Run the shadow pipeline for several matches in one invocation.
///
/// The activation gate sees the full batch size up front. Matches are
/// processed in sorted `match_id` order with bounded parallelism, so
/// report order is deterministic; one match's failure (or cancellation)
/// degrades to its own error report without touching siblings.
pub async fn run_many(
    ctx: &PipelineContext,
    mut requests: Vec<ShadowRunRequest>,
) -> Result<Vec<PipelineReport>, PipelineError> {
    let requested = ctx.policy.markets.clone();
    check_activation_gate(&ctx.policy, requests.len() as u32, &requested)?;

    requests.sort_by(|a, b| a.match_id.cmp(&b.match_id));
    let parallelism = ctx.policy.max_matches.max(1) as usize;

    let reports: Vec<PipelineReport> = futures::stream::iter(requests.into_iter())
        .map(|request| async move {
            match run_shadow(ctx, &request).await {
                Ok(report) => report,
                // Keep sibling isolation: a failed match yields its own
                // error report instead of aborting the batch.
                Err(e) => error_fallback_report(ctx, &request, &e).await,
            }
        })
        .buffered(parallelism)
        .collect()
        .await;

    Ok(reports)
}

/// Last-resort error report for batch isolation, bypassing strict
/// schema failure (which would otherwise re-raise).
async fn error_fallback_report(
    ctx: &PipelineContext,
    request: &ShadowRunRequest,
    error: &PipelineError,
) -> PipelineReport {
    let run_id = Uuid::new_v4().to_string();
    build_report(
        ctx,
        &run_id,
        request,
        &ctx.policy.markets,
        unresolved_section(ResolverStatus::NotFound),
        empty_analysis(ctx),
        Default::default(),
        Stability::default(),
        None,
        Some((error.code().to_string(), error.to_string())),
        empty_kpis(),
    )
}

// ---------------------------------------------------------------------------
// Report assembly
// ---------------------------------------------------------------------------

fn unresolved_section(status: ResolverStatus) -> ResolverSection {
    ResolverSection {
        status,
        match_id: None,
        candidates: Vec::new(),
        notes: Vec::new(),
    }
}

fn empty_analysis(ctx: &PipelineContext) -> AnalysisRun {
    AnalysisRun {
        logic_version: ctx.analyzer.logic_version().to_string(),
        status: "NO_PREDICTION".to_string(),
        counts: Default::default(),
        decisions: Vec::new(),
    }
}

fn empty_kpis() -> EvaluationRecord {
    EvaluationRecord {
        reference_date_utc: Utc::now(),
        period: Period::Day,
        total: 0,
        hits: 0,
        misses: 0,
        hit_rate: 0.0,
        miss_rate: 0.0,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    ctx: &PipelineContext,
    run_id: &str,
    request: &ShadowRunRequest,
    markets: &[Market],
    resolver: ResolverSection,
    analysis: AnalysisRun,
    outcomes: std::collections::BTreeMap<Market, crate::types::MarketOutcome>,
    stability: Stability,
    canonical_match_id: Option<String>,
    error: Option<(String, String)>,
    kpis: EvaluationRecord,
) -> PipelineReport {
    let checksums = compute_checksums(&analysis.decisions, &outcomes, &kpis);
    let (error, detail) = match error {
        Some((code, detail)) => (Some(code), Some(detail)),
        None => (None, None),
    };
    PipelineReport {
        schema_version: REPORT_SCHEMA_VERSION.to_string(),
        canonical_flow: CANONICAL_FLOW_SHADOW_RUN.to_string(),
        generated_at: Utc::now(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        run_id: run_id.to_string(),
        match_id: canonical_match_id,
        resolver,
        analysis,
        evaluation: EvaluationSection {
            checksums,
            kpis,
            market_outcomes: outcomes,
        },
        stability,
        audit: AuditSection {
            connector: request.connector_name.clone(),
            matches_count: 1,
            markets: markets.to_vec(),
            policy: ctx.policy.clone(),
        },
        error,
        detail,
    }
}

/// Stamp, validate, and persist the final report. In strict mode a
/// schema failure fails the run; otherwise it logs and proceeds.
#[allow(clippy::too_many_arguments)]
async fn assemble(
    ctx: &PipelineContext,
    run_id: &str,
    request: &ShadowRunRequest,
    markets: &[Market],
    resolver: ResolverSection,
    analysis: AnalysisRun,
    outcomes: std::collections::BTreeMap<Market, crate::types::MarketOutcome>,
    stability: Stability,
    canonical_match_id: Option<String>,
    error: Option<(String, String)>,
) -> Result<PipelineReport, PipelineError> {
    let kpis = evaluation::aggregate_kpis(&ctx.pool, Period::Day, Utc::now()).await?;
    let report = build_report(
        ctx,
        run_id,
        request,
        markets,
        resolver,
        analysis,
        outcomes,
        stability,
        canonical_match_id,
        error,
        kpis,
    );

    let value = serde_json::to_value(&report)
        .map_err(|e| PipelineError::Ingestion(format!("report serialization failed: {e}")))?;
    let (passed, errors) = validate_report_schema(&value);
    if !passed {
        if ctx.policy.schema_validate_strict {
            return Err(PipelineError::SchemaValidation { errors });
        }
        warn!(run_id, ?errors, "Report schema validation failed (lax mode)");
    }

    persist_artifacts(ctx, &report);
    Ok(report)
}

/// Best-effort persistence of the report JSON. Failures are logged,
/// never fatal: the report returned to the caller is the source of
/// truth.
fn persist_artifacts(ctx: &PipelineContext, report: &PipelineReport) {
    let dir = &ctx.config.reports.dir;
    if let Err(e) = write_report_atomic(dir, report) {
        warn!(error = %e, dir, "Failed to persist report artifact");
    }
}

/// Write the report under `dir`, via temp-file rename so a partial
/// report is never observable.
fn write_report_atomic(dir: &str, report: &PipelineReport) -> anyhow::Result<()> {
    use anyhow::Context;
    std::fs::create_dir_all(dir).with_context(|| format!("create report dir {dir}"))?;
    let path = std::path::Path::new(dir).join(format!("report_{}.json", report.run_id));
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_display_order() {
        let states = [
            RunState::Ingesting,
            RunState::Resolving,
            RunState::Analyzing,
            RunState::Evaluating,
            RunState::Auditing,
            RunState::Done,
        ];
        let rendered: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "INGESTING",
                "RESOLVING",
                "ANALYZING",
                "EVALUATING",
                "AUDITING",
                "DONE"
            ]
        );
        assert_eq!(RunState::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_gate_kill_switch() {
        let policy = RunPolicy {
            kill_switch: true,
            ..RunPolicy::default()
        };
        let result = check_activation_gate(&policy, 1, &[Market::OneXTwo]);
        match result {
            Err(PipelineError::ActivationGateRejected { reason }) => {
                assert!(reason.contains("KILL_SWITCH"))
            }
            other => panic!("expected gate rejection, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_gate_match_cap() {
        let policy = RunPolicy {
            max_matches: 3,
            ..RunPolicy::default()
        };
        assert!(check_activation_gate(&policy, 3, &[Market::OneXTwo]).is_ok());
        assert!(matches!(
            check_activation_gate(&policy, 4, &[Market::OneXTwo]),
            Err(PipelineError::ActivationGateRejected { .. })
        ));
    }

    #[test]
    fn test_gate_compiled_ceiling_survives_hand_built_policy() {
        let policy = RunPolicy {
            max_matches: 1000, // bypasses from_env clamping on purpose
            ..RunPolicy::default()
        };
        assert!(matches!(
            check_activation_gate(&policy, ACTIVATION_MAX_MATCHES_HARD_CAP + 1, &[Market::OneXTwo]),
            Err(PipelineError::ActivationGateRejected { .. })
        ));
        assert!(
            check_activation_gate(&policy, ACTIVATION_MAX_MATCHES_HARD_CAP, &[Market::OneXTwo])
                .is_ok()
        );
    }

    #[test]
    fn test_gate_zero_cap_refuses() {
        let policy = RunPolicy {
            max_matches: 0,
            ..RunPolicy::default()
        };
        assert!(matches!(
            check_activation_gate(&policy, 1, &[Market::OneXTwo]),
            Err(PipelineError::ActivationGateRejected { .. })
        ));
    }

    #[test]
    fn test_gate_market_whitelist() {
        let policy = RunPolicy::default(); // 1X2 only
        assert!(matches!(
            check_activation_gate(&policy, 1, &[Market::OneXTwo, Market::GgNg]),
            Err(PipelineError::ActivationGateRejected { .. })
        ));
        let markets = check_activation_gate(&policy, 1, &[Market::OneXTwo]).unwrap();
        assert_eq!(markets, vec![Market::OneXTwo]);
    }

    #[test]
    fn test_gate_restores_canonical_market_order() {
        let policy = RunPolicy {
            markets: Market::CANONICAL_ORDER.to_vec(),
            ..RunPolicy::default()
        };
        let markets = check_activation_gate(
            &policy,
            1,
            &[Market::GgNg, Market::OneXTwo, Market::OverUnder25],
        )
        .unwrap();
        assert_eq!(markets, Market::CANONICAL_ORDER.to_vec());
    }
}
