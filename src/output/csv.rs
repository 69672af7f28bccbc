//! CSV match sink implementation.

use super::{MatchSink, OutputError, OutputResult};
use crate::person::PersonId;
use crate::space::state_name;
use crate::{MatchRecord, ResultBatch};
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// CSV row for one match.
#[derive(Debug, Serialize)]
struct MatchRow {
    person_id: PersonId,
    combination_index: u64,
    curp: String,
    day: u8,
    month: u8,
    year: u16,
    state_code: u8,
    state: String,
    worker_id: usize,
    found_at: i64,
    raw_fields: String,
}

impl MatchRow {
    fn from_record(record: &MatchRecord) -> OutputResult<Self> {
        let raw_fields = serde_json::to_string(&record.raw_fields)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        Ok(Self {
            person_id: record.person_id,
            combination_index: record.index,
            curp: record.curp.clone(),
            day: record.day,
            month: record.month,
            year: record.year,
            state_code: record.state_code,
            state: state_name(record.state_code).unwrap_or("?").to_string(),
            worker_id: record.worker_id,
            found_at: record.found_at,
            raw_fields,
        })
    }
}

/// Minimal row shape used to seed the dedup set from an existing file.
#[derive(Debug, Deserialize)]
struct SeedRow {
    person_id: PersonId,
    combination_index: u64,
}

/// Appending CSV writer for matches, deduplicated by (person, index).
///
/// Opening an existing file seeds the dedup set from the rows already
/// present, so matches re-derived after a restart land exactly once.
pub struct CsvMatchSink {
    writer: Writer<BufWriter<File>>,
    /// Second handle on the same file, kept for fsync after each batch.
    file: File,
    seen: HashSet<(PersonId, u64)>,
    rows_written: u64,
    duplicates_skipped: u64,
    path: PathBuf,
}

impl CsvMatchSink {
    /// Open (or create) the output file for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OutputError::IoError(format!("failed to create directory: {e}"))
                })?;
            }
        }

        let seen = read_existing_keys(path)?;
        if !seen.is_empty() {
            info!(
                path = %path.display(),
                existing_rows = seen.len(),
                "seeded match dedup set from existing output"
            );
        }

        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("failed to open file: {e}")))?;
        let need_headers = file
            .metadata()
            .map_err(|e| OutputError::IoError(e.to_string()))?
            .len()
            == 0;
        let sync_handle = file
            .try_clone()
            .map_err(|e| OutputError::IoError(e.to_string()))?;

        let writer = csv::WriterBuilder::new()
            .has_headers(need_headers)
            .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));

        debug!(path = %path.display(), need_headers, "CSV match sink opened");
        Ok(Self {
            writer,
            file: sync_handle,
            seen,
            rows_written: 0,
            duplicates_skipped: 0,
            path: path.to_path_buf(),
        })
    }

    /// Rows written by this sink instance.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Duplicate matches discarded instead of written.
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MatchSink for CsvMatchSink {
    fn persist(&mut self, batch: &ResultBatch) -> OutputResult<u64> {
        let mut written = 0u64;
        for record in &batch.matches {
            if !self.seen.insert((record.person_id, record.index)) {
                self.duplicates_skipped += 1;
                debug!(
                    person_id = record.person_id,
                    index = record.index,
                    "duplicate match skipped by sink"
                );
                continue;
            }
            let row = MatchRow::from_record(record)?;
            self.writer
                .serialize(row)
                .map_err(|e| OutputError::CsvError(e.to_string()))?;
            written += 1;
        }
        self.rows_written += written;
        // Batches gate checkpoint advances, so they must hit the disk before
        // persist() returns.
        self.flush()?;
        self.file
            .sync_all()
            .map_err(|e| OutputError::FlushError(e.to_string()))?;
        Ok(written)
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(e.to_string()))
    }

    fn close(&mut self) -> OutputResult<()> {
        self.flush()?;
        self.file
            .sync_all()
            .map_err(|e| OutputError::FlushError(e.to_string()))?;
        info!(
            path = %self.path.display(),
            rows_written = self.rows_written,
            duplicates_skipped = self.duplicates_skipped,
            "CSV match sink closed"
        );
        Ok(())
    }
}

/// Read the (person, index) keys already present in an output file.
fn read_existing_keys(path: &Path) -> OutputResult<HashSet<(PersonId, u64)>> {
    let mut keys = HashSet::new();
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(keys),
    };
    if metadata.len() == 0 {
        return Ok(keys);
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| OutputError::CsvError(format!("failed to read existing output: {e}")))?;
    for row in reader.deserialize::<SeedRow>() {
        let row = row.map_err(|e| OutputError::CsvError(e.to_string()))?;
        keys.insert((row.person_id, row.combination_index));
    }
    Ok(keys)
}
