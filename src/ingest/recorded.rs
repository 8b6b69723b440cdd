//! Recorded-fixture connector.
//!
//! Reads a bundled fixture set from disk at construction time and serves
//! snapshots from memory. The fixture set is validated once on load
//! (duplicate match ids rejected) and never mutated afterwards.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{validate_fixture_set, RawSnapshot, SnapshotSource};

/// Connector name used in requests and report audit fields.
pub const RECORDED_CONNECTOR: &str = "recorded";

pub struct RecordedConnector {
    fixtures: Vec<RawSnapshot>,
}

impl RecordedConnector {
    /// Load a fixture set from a JSON file (array of raw snapshots).
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture set: {path}"))?;
        let fixtures: Vec<RawSnapshot> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fixture set: {path}"))?;
        validate_fixture_set(&fixtures)
            .with_context(|| format!("Invalid fixture set: {path}"))?;
        debug!(path, count = fixtures.len(), "Recorded fixture set loaded");
        Ok(Self { fixtures })
    }

    /// Build directly from raw snapshots (tests and embedded sets).
    pub fn from_snapshots(fixtures: Vec<RawSnapshot>) -> Result<Self> {
        validate_fixture_set(&fixtures).context("Invalid fixture set")?;
        Ok(Self { fixtures })
    }
}

#[async_trait]
impl SnapshotSource for RecordedConnector {
    async fn fetch(&self, match_id: &str) -> Result<Option<RawSnapshot>> {
        Ok(self
            .fixtures
            .iter()
            .find(|f| f.match_id.as_deref() == Some(match_id))
            .cloned())
    }

    fn name(&self) -> &str {
        RECORDED_CONNECTOR
    }

    fn is_live(&self) -> bool {
        false
    }
}
