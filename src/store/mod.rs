//! Canonical reference store.
//!
//! SQLite-backed, read-only from the pipeline's perspective during a run:
//! competitions, teams, team aliases, matches, and realized prediction
//! outcomes. Writes happen only via migration/seeding (the administration
//! path) and outcome recording after evaluation.
//!
//! Kickoff timestamps are stored as RFC3339 UTC strings with a fixed
//! format, so lexicographic comparison equals chronological comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::types::{Market, MarketOutcome, Selection};

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize raw team text for alias matching: lowercase, fold common
/// diacritics, strip punctuation, collapse whitespace.
///
/// This is a pure function; the same normalization is applied at seed
/// time (alias rows) and at resolve time (query text), so the two sides
/// can never drift apart.
pub fn normalize_alias(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => folded.push('a'),
            'é' | 'è' | 'ê' | 'ë' => folded.push('e'),
            'í' | 'ì' | 'î' | 'ï' => folded.push('i'),
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' => folded.push('o'),
            'ú' | 'ù' | 'û' | 'ü' => folded.push('u'),
            'ý' | 'ÿ' => folded.push('y'),
            'ç' | 'ć' | 'č' => folded.push('c'),
            'ñ' | 'ń' => folded.push('n'),
            'š' | 'ś' => folded.push('s'),
            'ž' | 'ź' | 'ż' => folded.push('z'),
            'đ' => folded.push('d'),
            'ł' => folded.push('l'),
            'ß' => folded.push_str("ss"),
            'æ' => folded.push_str("ae"),
            'œ' => folded.push_str("oe"),
            _ => folded.push(c),
        }
    }
    folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a UTC timestamp in the store's canonical RFC3339 format.
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp in the store's canonical format.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    /// Raw alias texts; normalized on insert.
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRow {
    pub id: String,
    pub competition_id: String,
    pub home_team_id: String,
    pub away_team_id: String,
    pub kickoff_utc: DateTime<Utc>,
}

/// One realized, evaluated prediction outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub match_id: String,
    pub market: Market,
    pub pick: Option<Selection>,
    pub outcome: MarketOutcome,
    pub evaluated_at_utc: DateTime<Utc>,
}

/// Reference data consumed by the seed process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    pub competitions: Vec<Competition>,
    pub teams: Vec<Team>,
    pub matches: Vec<MatchRow>,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Open a pool for the given database URL.
///
/// In-memory databases are pinned to a single connection: every pooled
/// connection to `sqlite::memory:` would otherwise open its own empty
/// database.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    use sqlx::sqlite::SqlitePoolOptions;
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS competitions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        name_norm TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS team_aliases (
        team_id TEXT NOT NULL,
        alias_norm TEXT NOT NULL,
        PRIMARY KEY (team_id, alias_norm)
    )",
    "CREATE TABLE IF NOT EXISTS matches (
        id TEXT PRIMARY KEY,
        competition_id TEXT NOT NULL,
        home_team_id TEXT NOT NULL,
        away_team_id TEXT NOT NULL,
        kickoff_utc TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS prediction_outcomes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id TEXT NOT NULL,
        market TEXT NOT NULL,
        pick TEXT,
        outcome TEXT NOT NULL,
        evaluated_at_utc TEXT NOT NULL
    )",
];

/// Create all tables if absent. Safe to call repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Upsert reference data keyed by natural identity. Running the seed
/// twice inserts zero additional rows the second time. Returns the
/// number of newly inserted rows.
pub async fn seed(pool: &SqlitePool, data: &SeedData) -> Result<u64, sqlx::Error> {
    let mut inserted: u64 = 0;

    for comp in &data.competitions {
        let res = sqlx::query("INSERT OR IGNORE INTO competitions (id, name) VALUES (?, ?)")
            .bind(&comp.id)
            .bind(&comp.name)
            .execute(pool)
            .await?;
        inserted += res.rows_affected();
    }

    for team in &data.teams {
        let res = sqlx::query("INSERT OR IGNORE INTO teams (id, name, name_norm) VALUES (?, ?, ?)")
            .bind(&team.id)
            .bind(&team.name)
            .bind(normalize_alias(&team.name))
            .execute(pool)
            .await?;
        inserted += res.rows_affected();

        for alias in &team.aliases {
            let res = sqlx::query(
                "INSERT OR IGNORE INTO team_aliases (team_id, alias_norm) VALUES (?, ?)",
            )
            .bind(&team.id)
            .bind(normalize_alias(alias))
            .execute(pool)
            .await?;
            inserted += res.rows_affected();
        }
    }

    for m in &data.matches {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO matches
             (id, competition_id, home_team_id, away_team_id, kickoff_utc)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&m.id)
        .bind(&m.competition_id)
        .bind(&m.home_team_id)
        .bind(&m.away_team_id)
        .bind(format_utc(&m.kickoff_utc))
        .execute(pool)
        .await?;
        inserted += res.rows_affected();
    }

    info!(rows = inserted, "Reference data seeded");
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Lookups (pure reads)
// ---------------------------------------------------------------------------

/// Find a team id by normalized canonical name.
pub async fn find_team_by_norm(
    pool: &SqlitePool,
    name_norm: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT id FROM teams WHERE name_norm = ? ORDER BY id")
        .bind(name_norm)
        .fetch_all(pool)
        .await?;
    rows.iter().map(|r| r.try_get::<String, _>("id")).collect()
}

/// Find a team id by normalized alias.
pub async fn find_team_by_alias(
    pool: &SqlitePool,
    alias_norm: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT team_id FROM team_aliases WHERE alias_norm = ? ORDER BY team_id LIMIT 1")
        .bind(alias_norm)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.try_get::<String, _>("team_id")).transpose()
}

/// Candidate matches for an order-insensitive team pair within a kickoff
/// window. Sorted by kickoff then id so the result order is stable.
pub async fn find_matches_by_teams_and_kickoff(
    pool: &SqlitePool,
    team_a: &str,
    team_b: &str,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> Result<Vec<MatchRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, competition_id, home_team_id, away_team_id, kickoff_utc
         FROM matches
         WHERE ((home_team_id = ?1 AND away_team_id = ?2)
             OR (home_team_id = ?2 AND away_team_id = ?1))
           AND kickoff_utc >= ?3 AND kickoff_utc <= ?4
         ORDER BY kickoff_utc, id",
    )
    .bind(team_a)
    .bind(team_b)
    .bind(format_utc(from))
    .bind(format_utc(to))
    .fetch_all(pool)
    .await?;

    let mut matches = Vec::with_capacity(rows.len());
    for row in rows {
        let kickoff_raw: String = row.try_get("kickoff_utc")?;
        let kickoff_utc = parse_utc(&kickoff_raw)
            .ok_or_else(|| sqlx::Error::Decode(format!("bad kickoff_utc: {kickoff_raw}").into()))?;
        matches.push(MatchRow {
            id: row.try_get("id")?,
            competition_id: row.try_get("competition_id")?,
            home_team_id: row.try_get("home_team_id")?,
            away_team_id: row.try_get("away_team_id")?,
            kickoff_utc,
        });
    }
    debug!(count = matches.len(), "Match window query complete");
    Ok(matches)
}

/// Fetch a match by id.
pub async fn find_match_by_id(
    pool: &SqlitePool,
    match_id: &str,
) -> Result<Option<MatchRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, competition_id, home_team_id, away_team_id, kickoff_utc
         FROM matches WHERE id = ?",
    )
    .bind(match_id)
    .fetch_optional(pool)
    .await?;

    match row {
        None => Ok(None),
        Some(row) => {
            let kickoff_raw: String = row.try_get("kickoff_utc")?;
            let kickoff_utc = parse_utc(&kickoff_raw).ok_or_else(|| {
                sqlx::Error::Decode(format!("bad kickoff_utc: {kickoff_raw}").into())
            })?;
            Ok(Some(MatchRow {
                id: row.try_get("id")?,
                competition_id: row.try_get("competition_id")?,
                home_team_id: row.try_get("home_team_id")?,
                away_team_id: row.try_get("away_team_id")?,
                kickoff_utc,
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome records
// ---------------------------------------------------------------------------

/// Append one evaluated outcome. Audit output is append-only; rows are
/// never updated in place.
pub async fn insert_outcome(pool: &SqlitePool, row: &OutcomeRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO prediction_outcomes (match_id, market, pick, outcome, evaluated_at_utc)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&row.match_id)
    .bind(row.market.to_string())
    .bind(row.pick.map(|p| p.to_string()))
    .bind(row.outcome.to_string())
    .bind(format_utc(&row.evaluated_at_utc))
    .execute(pool)
    .await?;
    Ok(())
}

/// All outcomes evaluated within [from, to). Pure read.
pub async fn list_outcomes_between(
    pool: &SqlitePool,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> Result<Vec<OutcomeRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT match_id, market, pick, outcome, evaluated_at_utc
         FROM prediction_outcomes
         WHERE evaluated_at_utc >= ? AND evaluated_at_utc < ?
         ORDER BY evaluated_at_utc, id",
    )
    .bind(format_utc(from))
    .bind(format_utc(to))
    .fetch_all(pool)
    .await?;

    let mut outcomes = Vec::with_capacity(rows.len());
    for row in rows {
        let market_raw: String = row.try_get("market")?;
        let market = market_raw
            .parse::<Market>()
            .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;
        let pick_raw: Option<String> = row.try_get("pick")?;
        let pick = match pick_raw.as_deref() {
            None => None,
            Some("HOME") => Some(Selection::Home),
            Some("DRAW") => Some(Selection::Draw),
            Some("AWAY") => Some(Selection::Away),
            Some("OVER") => Some(Selection::Over),
            Some("UNDER") => Some(Selection::Under),
            Some("GG") => Some(Selection::Gg),
            Some("NG") => Some(Selection::Ng),
            Some(other) => {
                return Err(sqlx::Error::Decode(format!("bad pick: {other}").into()));
            }
        };
        let outcome_raw: String = row.try_get("outcome")?;
        let outcome = match outcome_raw.as_str() {
            "SUCCESS" => MarketOutcome::Success,
            "FAILURE" => MarketOutcome::Failure,
            "NEUTRAL" => MarketOutcome::Neutral,
            other => {
                return Err(sqlx::Error::Decode(format!("bad outcome: {other}").into()));
            }
        };
        let evaluated_raw: String = row.try_get("evaluated_at_utc")?;
        let evaluated_at_utc = parse_utc(&evaluated_raw).ok_or_else(|| {
            sqlx::Error::Decode(format!("bad evaluated_at_utc: {evaluated_raw}").into())
        })?;
        outcomes.push(OutcomeRow {
            match_id: row.try_get("match_id")?,
            market,
            pick,
            outcome,
            evaluated_at_utc,
        });
    }
    Ok(outcomes)
}

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

impl SeedData {
    /// Small, self-consistent reference set used by tests and the demo
    /// recorded fixture file. Contains one team pair that plays twice
    /// within 48 hours (league + cup) to exercise ambiguity handling.
    pub fn sample() -> Self {
        use chrono::TimeZone;
        let kickoff = |y, mo, d, h| Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap();
        SeedData {
            competitions: vec![
                Competition {
                    id: "comp-league".into(),
                    name: "Example League".into(),
                },
                Competition {
                    id: "comp-cup".into(),
                    name: "Example Cup".into(),
                },
            ],
            teams: vec![
                Team {
                    id: "team-ath".into(),
                    name: "Athletic Norte".into(),
                    aliases: vec!["Ath. Norte".into(), "Athlétic Norte".into()],
                },
                Team {
                    id: "team-riv".into(),
                    name: "River Sur".into(),
                    aliases: vec!["River S.".into()],
                },
                Team {
                    id: "team-uni".into(),
                    name: "Unión Central".into(),
                    aliases: vec!["Union Central".into(), "U. Central".into()],
                },
                Team {
                    id: "team-dep".into(),
                    name: "Deportivo Este".into(),
                    aliases: vec!["Dep. Este".into()],
                },
            ],
            matches: vec![
                MatchRow {
                    id: "match-1001".into(),
                    competition_id: "comp-league".into(),
                    home_team_id: "team-ath".into(),
                    away_team_id: "team-riv".into(),
                    kickoff_utc: kickoff(2026, 8, 8, 18),
                },
                MatchRow {
                    id: "match-1002".into(),
                    competition_id: "comp-cup".into(),
                    home_team_id: "team-riv".into(),
                    away_team_id: "team-ath".into(),
                    kickoff_utc: kickoff(2026, 8, 9, 20),
                },
                MatchRow {
                    id: "match-2001".into(),
                    competition_id: "comp-league".into(),
                    home_team_id: "team-uni".into(),
                    away_team_id: "team-dep".into(),
                    kickoff_utc: kickoff(2026, 8, 9, 16),
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
