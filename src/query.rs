//! External query capability.
//!
//! The registry endpoint is an external collaborator: the core only needs
//! "perform one query, get one classified outcome". Queries go through a
//! per-worker [`QuerySession`] so implementations can hold whatever
//! connection or browser state they need without sharing it across workers.
//! A query is expensive (tens of seconds) but logically idempotent: asking
//! the same combination again yields the same classification.

use crate::person::PersonFields;
use crate::space::Combination;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Classified result of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The registry returned a CURP for this combination.
    Match {
        /// The 18-character CURP.
        curp: String,
        /// Any additional fields the endpoint returned alongside it.
        raw_fields: BTreeMap<String, String>,
    },
    /// The registry answered and no person matched.
    NoMatch,
    /// A retryable failure: network hiccup, timeout, temporary block.
    Transient(String),
    /// The capability is permanently unavailable for this run.
    Fatal(String),
}

impl Outcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Match { .. } => "match",
            Outcome::NoMatch => "no_match",
            Outcome::Transient(_) => "transient",
            Outcome::Fatal(_) => "fatal",
        }
    }
}

/// Errors opening a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session could not be opened.
    #[error("failed to open session: {0}")]
    Open(String),
}

/// One worker's handle on the external capability.
///
/// A session lives for the worker's lifetime and is never shared. `query`
/// classifies its own failures into [`Outcome`] variants rather than
/// returning an error; the caller decides retry/skip/abort from the variant.
#[async_trait]
pub trait QuerySession: Send {
    /// Perform one query for one combination.
    async fn query(&mut self, person: &PersonFields, combination: &Combination) -> Outcome;

    /// Release any resources held by the session.
    async fn close(&mut self) {}
}

/// Opens sessions for workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session scoped to one worker.
    async fn open(&self, worker_id: usize) -> Result<Box<dyn QuerySession>, SessionError>;
}

static CURP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]{4}\d{6}[HM][A-Z]{5}[0-9A-Z]\d$").expect("static pattern")
});

/// Validate the 18-character CURP format.
pub fn is_valid_curp(curp: &str) -> bool {
    let curp = curp.trim().to_uppercase();
    curp.len() == 18 && CURP_PATTERN.is_match(&curp)
}

/// Extract the (year, month, day) birth date encoded in positions 5-10 of a
/// CURP. Two-digit years at or below 30 are read as 2000s.
pub fn birth_date_from_curp(curp: &str) -> Option<(u16, u8, u8)> {
    if !is_valid_curp(curp) {
        return None;
    }
    let curp = curp.trim().to_uppercase();
    let year2: u16 = curp.get(4..6)?.parse().ok()?;
    let month: u8 = curp.get(6..8)?.parse().ok()?;
    let day: u8 = curp.get(8..10)?.parse().ok()?;
    let year = if year2 <= 30 { 2000 + year2 } else { 1900 + year2 };
    chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
    Some((year, month, day))
}

/// Session factory that answers every query with [`Outcome::NoMatch`] after a
/// short configurable latency.
///
/// Exercises the full pipeline (distribution, throttling, checkpointing,
/// draining) without contacting a live endpoint; wired to the CLI's
/// `--simulate` flag.
#[derive(Debug, Clone)]
pub struct SimulatedSessionFactory {
    latency: Duration,
}

impl SimulatedSessionFactory {
    /// Factory with an explicit per-query latency.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedSessionFactory {
    fn default() -> Self {
        Self::with_latency(Duration::from_millis(20))
    }
}

#[async_trait]
impl SessionFactory for SimulatedSessionFactory {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn QuerySession>, SessionError> {
        debug!(worker_id, "opening simulated session");
        Ok(Box::new(SimulatedSession {
            latency: self.latency,
        }))
    }
}

struct SimulatedSession {
    latency: Duration,
}

#[async_trait]
impl QuerySession for SimulatedSession {
    async fn query(&mut self, _person: &PersonFields, _combination: &Combination) -> Outcome {
        tokio::time::sleep(self.latency).await;
        Outcome::NoMatch
    }
}

/// Session factory that bridges to an external driver program.
///
/// The driver (typically the browser automation that actually fills the
/// registry form) is invoked once per query with a JSON request on stdin:
///
/// ```json
/// {"person": {...}, "combination": {"day": 1, "month": 2, "year": 1990,
///  "state_code": 14, "state": "Jalisco"}}
/// ```
///
/// and must print a JSON response on stdout:
///
/// ```json
/// {"status": "match|no_match|transient|fatal", "curp": "...",
///  "raw_fields": {...}, "reason": "..."}
/// ```
///
/// A spawn failure is fatal (the driver binary is missing or unrunnable);
/// a non-zero exit or unparseable response is transient.
#[derive(Debug, Clone)]
pub struct CommandSessionFactory {
    program: String,
    args: Vec<String>,
}

impl CommandSessionFactory {
    /// Build a factory from a command line (program followed by arguments).
    pub fn new(command: Vec<String>) -> Result<Self, SessionError> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| SessionError::Open("empty driver command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl SessionFactory for CommandSessionFactory {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn QuerySession>, SessionError> {
        debug!(worker_id, program = %self.program, "opening driver session");
        Ok(Box::new(CommandSession {
            program: self.program.clone(),
            args: self.args.clone(),
            worker_id,
        }))
    }
}

/// Shape of the driver's stdout response.
#[derive(Debug, Deserialize)]
struct DriverResponse {
    status: String,
    #[serde(default)]
    curp: Option<String>,
    #[serde(default)]
    raw_fields: BTreeMap<String, String>,
    #[serde(default)]
    reason: Option<String>,
}

struct CommandSession {
    program: String,
    args: Vec<String>,
    worker_id: usize,
}

impl CommandSession {
    async fn run_driver(&self, request: &serde_json::Value) -> Outcome {
        let mut child = match tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(format!("--worker-id={}", self.worker_id))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return Outcome::Fatal(format!("failed to spawn driver: {e}")),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.to_string().as_bytes()).await {
                return Outcome::Transient(format!("failed to write driver request: {e}"));
            }
            // Dropping stdin closes the pipe so the driver sees EOF.
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => return Outcome::Transient(format!("driver wait failed: {e}")),
        };
        if !output.status.success() {
            return Outcome::Transient(format!("driver exited with {}", output.status));
        }

        let response: DriverResponse = match serde_json::from_slice(&output.stdout) {
            Ok(r) => r,
            Err(e) => return Outcome::Transient(format!("unparseable driver response: {e}")),
        };
        match response.status.as_str() {
            "match" => match response.curp {
                Some(curp) => Outcome::Match {
                    curp,
                    raw_fields: response.raw_fields,
                },
                None => Outcome::Transient("driver reported a match without a curp".to_string()),
            },
            "no_match" => Outcome::NoMatch,
            "transient" => Outcome::Transient(
                response.reason.unwrap_or_else(|| "driver transient error".to_string()),
            ),
            "fatal" => Outcome::Fatal(
                response.reason.unwrap_or_else(|| "driver fatal error".to_string()),
            ),
            other => Outcome::Transient(format!("unrecognized driver status: {other}")),
        }
    }
}

#[async_trait]
impl QuerySession for CommandSession {
    async fn query(&mut self, person: &PersonFields, combination: &Combination) -> Outcome {
        let request = serde_json::json!({
            "person": person,
            "combination": {
                "day": combination.day,
                "month": combination.month,
                "year": combination.year,
                "state_code": combination.state,
                "state": crate::space::state_name(combination.state),
            },
        });
        self.run_driver(&request).await
    }
}
