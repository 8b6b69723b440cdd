//! Report schema versioning and validation for pipeline outputs.
//!
//! Exactly one report is produced per run, stamped with the schema
//! version and canonical flow, and never mutated after emission. The
//! validator checks required keys and the allowed schema-version set;
//! in strict mode a failure fails the run, otherwise it only warns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::evaluation::{Checksums, EvaluationRecord, Stability};
use crate::policy::RunPolicy;
use crate::resolver::MatchCandidate;
use crate::types::{AnalysisRun, Market, MarketOutcome, ResolverStatus};

pub const REPORT_SCHEMA_VERSION: &str = "report.v1";
pub const CANONICAL_FLOW_SHADOW_RUN: &str = "/pipeline/shadow/run";
pub const ALLOWED_SCHEMA_VERSIONS: &[&str] = &[REPORT_SCHEMA_VERSION];
pub const REQUIRED_TOP_LEVEL_KEYS: &[&str] = &[
    "schema_version",
    "canonical_flow",
    "generated_at",
    "app_version",
    "run_id",
    "resolver",
    "analysis",
    "evaluation",
    "stability",
    "audit",
];

// ---------------------------------------------------------------------------
// Report sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ResolverSection {
    pub status: ResolverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub candidates: Vec<MatchCandidate>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSection {
    pub checksums: Checksums,
    pub kpis: EvaluationRecord,
    pub market_outcomes: BTreeMap<Market, MarketOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSection {
    pub connector: String,
    pub matches_count: u32,
    pub markets: Vec<Market>,
    pub policy: RunPolicy,
}

/// The versioned, auditable output of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub schema_version: String,
    pub canonical_flow: String,
    pub generated_at: DateTime<Utc>,
    pub app_version: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub resolver: ResolverSection,
    pub analysis: AnalysisRun,
    pub evaluation: EvaluationSection,
    pub stability: Stability,
    pub audit: AuditSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate report payload shape: required keys must exist,
/// schema_version must be in the allowed set, canonical_flow must match.
/// Returns (passed, error messages).
pub fn validate_report_schema(report: &serde_json::Value) -> (bool, Vec<String>) {
    let mut errors: Vec<String> = Vec::new();

    let Some(map) = report.as_object() else {
        return (false, vec!["report must be a JSON object".to_string()]);
    };

    for key in REQUIRED_TOP_LEVEL_KEYS {
        if !map.contains_key(*key) {
            errors.push(format!("missing required key: {key:?}"));
        }
    }

    match map.get("schema_version").and_then(|v| v.as_str()) {
        Some(version) if !ALLOWED_SCHEMA_VERSIONS.contains(&version) => {
            errors.push(format!(
                "schema_version {version:?} not in allowed set: {ALLOWED_SCHEMA_VERSIONS:?}"
            ));
        }
        Some(_) => {}
        None if map.contains_key("schema_version") => {
            errors.push("schema_version must be a string".to_string());
        }
        None => {}
    }

    if let Some(flow) = map.get("canonical_flow").and_then(|v| v.as_str()) {
        if flow != CANONICAL_FLOW_SHADOW_RUN {
            errors.push(format!(
                "canonical_flow must be {CANONICAL_FLOW_SHADOW_RUN:?}, got {flow:?}"
            ));
        }
    }

    (errors.is_empty(), errors)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
