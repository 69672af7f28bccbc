//! Checkpoint record types.

use super::CheckpointError;
use crate::person::PersonId;
use crate::MatchRecord;
use serde::{Deserialize, Serialize};

/// Current checkpoint schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Durable record of one person's traversal progress.
///
/// Invariant: every index in `[0, last_completed_index]` has been queried
/// exactly once across the lifetime of all runs, and every match at or below
/// that index is present in `matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    schema_version: String,
    person_id: PersonId,
    config_hash: String,
    last_completed_index: Option<u64>,
    queries_completed: u64,
    matches: Vec<MatchRecord>,
    created_at: i64,
    updated_at: i64,
}

impl CheckpointRecord {
    /// Fresh record with no completed work.
    pub fn new(person_id: PersonId, config_hash: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            person_id,
            config_hash,
            last_completed_index: None,
            queries_completed: 0,
            matches: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The person this record tracks.
    pub fn person_id(&self) -> PersonId {
        self.person_id
    }

    /// Hash of the space configuration that produced this record.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Highest gapless completed index, if any work has completed.
    pub fn last_completed_index(&self) -> Option<u64> {
        self.last_completed_index
    }

    /// Total unique combinations resolved across all runs.
    pub fn queries_completed(&self) -> u64 {
        self.queries_completed
    }

    /// Matches found so far, ordered by combination index.
    pub fn matches(&self) -> &[MatchRecord] {
        &self.matches
    }

    /// Record creation time, epoch milliseconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last mutation time, epoch milliseconds.
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Index the next run should start from.
    pub fn resume_index(&self) -> u64 {
        self.last_completed_index.map(|i| i + 1).unwrap_or(0)
    }

    /// Whether the traversal has covered the whole space.
    pub fn is_complete(&self, space_len: u64) -> bool {
        space_len > 0 && self.resume_index() >= space_len
    }

    /// Move the completion watermark forward. Never regresses: a lower or
    /// equal index is ignored.
    pub fn advance(&mut self, last_completed_index: u64, queries_completed: u64) {
        let moved = self
            .last_completed_index
            .map_or(true, |current| last_completed_index > current);
        if moved {
            self.last_completed_index = Some(last_completed_index);
        }
        if queries_completed > self.queries_completed {
            self.queries_completed = queries_completed;
        }
        if moved || queries_completed > 0 {
            self.updated_at = chrono::Utc::now().timestamp_millis();
        }
    }

    /// Add a match, keeping the list ordered by index and discarding
    /// duplicates. Returns whether the match was new.
    pub fn add_match(&mut self, record: MatchRecord) -> bool {
        match self.matches.binary_search_by_key(&record.index, |m| m.index) {
            Ok(_) => false,
            Err(pos) => {
                self.matches.insert(pos, record);
                self.updated_at = chrono::Utc::now().timestamp_millis();
                true
            }
        }
    }

    /// Check the record was written by a compatible version.
    pub fn validate_schema(&self) -> Result<(), CheckpointError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Check the record belongs to the active space configuration.
    pub fn validate_config(&self, expected_hash: &str) -> Result<(), CheckpointError> {
        if self.config_hash != expected_hash {
            return Err(CheckpointError::ConfigMismatch {
                expected: expected_hash.to_string(),
                found: self.config_hash.clone(),
            });
        }
        Ok(())
    }
}
