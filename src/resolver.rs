//! Match resolver.
//!
//! Maps a loosely specified match reference (team texts plus a kickoff
//! window) to a canonical match identity in the reference store, or
//! reports ambiguity/absence. Pure read: no side effects. Ambiguity and
//! absence are first-class outcomes, never errors — `resolve` only fails
//! on storage faults.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::ingest::MatchRef;
use crate::store;
use crate::types::ResolverStatus;

/// Bounded window applied when no kickoff hint is supplied.
const NO_HINT_WINDOW_HOURS: i64 = 72;

// ---------------------------------------------------------------------------
// Contract types
// ---------------------------------------------------------------------------

/// Input to resolution.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub home_text: String,
    pub away_text: String,
    pub kickoff_hint_utc: Option<DateTime<Utc>>,
    pub window_hours: u32,
}

impl From<&MatchRef> for MatchQuery {
    fn from(r: &MatchRef) -> Self {
        Self {
            home_text: r.home_text.clone(),
            away_text: r.away_text.clone(),
            kickoff_hint_utc: r.kickoff_hint_utc,
            window_hours: r.window_hours,
        }
    }
}

/// A candidate canonical match surfaced on ambiguity.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub match_id: String,
    pub competition_id: String,
    pub kickoff_utc: DateTime<Utc>,
}

/// Output of resolution. Exactly one of RESOLVED | AMBIGUOUS | NOT_FOUND.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub status: ResolverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub candidates: Vec<MatchCandidate>,
    pub notes: Vec<String>,
}

impl Resolution {
    fn not_found(notes: Vec<String>) -> Self {
        Self {
            status: ResolverStatus::NotFound,
            match_id: None,
            candidates: Vec::new(),
            notes,
        }
    }

    fn ambiguous(candidates: Vec<MatchCandidate>, notes: Vec<String>) -> Self {
        Self {
            status: ResolverStatus::Ambiguous,
            match_id: None,
            candidates,
            notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

enum TeamLookup {
    Found(String),
    Ambiguous(usize),
    Missing(&'static str),
}

/// Resolve one team text to a canonical team id: exact normalized name
/// first, then the alias table.
async fn resolve_team(pool: &SqlitePool, text: &str) -> Result<TeamLookup, sqlx::Error> {
    let normalized = store::normalize_alias(text);
    if normalized.is_empty() {
        return Ok(TeamLookup::Missing("TEAM_TEXT_EMPTY"));
    }

    let exact = store::find_team_by_norm(pool, &normalized).await?;
    match exact.len() {
        1 => return Ok(TeamLookup::Found(exact.into_iter().next().unwrap_or_default())),
        n if n > 1 => return Ok(TeamLookup::Ambiguous(n)),
        _ => {}
    }

    match store::find_team_by_alias(pool, &normalized).await? {
        Some(team_id) => Ok(TeamLookup::Found(team_id)),
        None => Ok(TeamLookup::Missing("TEAM_NOT_FOUND")),
    }
}

/// Resolve a match reference to a canonical match identity.
pub async fn resolve(pool: &SqlitePool, query: &MatchQuery) -> Result<Resolution, sqlx::Error> {
    let mut notes: Vec<String> = Vec::new();

    let home = resolve_team(pool, &query.home_text).await?;
    let away = resolve_team(pool, &query.away_text).await?;

    let mut ambiguous_team = false;
    let home_id = match home {
        TeamLookup::Found(id) => Some(id),
        TeamLookup::Ambiguous(n) => {
            notes.push(format!("HOME_TEAM_AMBIGUOUS_EXACT_MATCH ({n} teams)"));
            ambiguous_team = true;
            None
        }
        TeamLookup::Missing(code) => {
            notes.push(format!("HOME_{code}"));
            None
        }
    };
    let away_id = match away {
        TeamLookup::Found(id) => Some(id),
        TeamLookup::Ambiguous(n) => {
            notes.push(format!("AWAY_TEAM_AMBIGUOUS_EXACT_MATCH ({n} teams)"));
            ambiguous_team = true;
            None
        }
        TeamLookup::Missing(code) => {
            notes.push(format!("AWAY_{code}"));
            None
        }
    };

    if ambiguous_team {
        return Ok(Resolution::ambiguous(Vec::new(), notes));
    }
    let (home_id, away_id) = match (home_id, away_id) {
        (Some(h), Some(a)) => (h, a),
        _ => return Ok(Resolution::not_found(notes)),
    };

    let (from, to) = match query.kickoff_hint_utc {
        Some(hint) => {
            let delta = Duration::hours(i64::from(query.window_hours));
            (hint - delta, hint + delta)
        }
        None => {
            notes.push("NO_KICKOFF_HINT_USING_BOUNDED_WINDOW".to_string());
            let now = Utc::now();
            let delta = Duration::hours(NO_HINT_WINDOW_HOURS);
            (now - delta, now + delta)
        }
    };

    let matches =
        store::find_matches_by_teams_and_kickoff(pool, &home_id, &away_id, &from, &to).await?;
    debug!(
        home = %home_id,
        away = %away_id,
        candidates = matches.len(),
        "Resolver window query complete"
    );

    match matches.len() {
        0 => {
            notes.push("NO_MATCH_IN_WINDOW".to_string());
            Ok(Resolution::not_found(notes))
        }
        1 => {
            let only = &matches[0];
            Ok(Resolution {
                status: ResolverStatus::Resolved,
                match_id: Some(only.id.clone()),
                candidates: Vec::new(),
                notes,
            })
        }
        n => {
            notes.push(format!("MULTIPLE_MATCHES_IN_WINDOW ({n} matches)"));
            let candidates: Vec<MatchCandidate> = matches
                .iter()
                .map(|m| MatchCandidate {
                    match_id: m.id.clone(),
                    competition_id: m.competition_id.clone(),
                    kickoff_utc: m.kickoff_utc,
                })
                .collect();
            for c in &candidates {
                notes.push(format!(
                    "CANDIDATE {} kickoff={} competition={}",
                    c.match_id,
                    store::format_utc(&c.kickoff_utc),
                    c.competition_id,
                ));
            }
            Ok(Resolution::ambiguous(candidates, notes))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
