//! Run command implementation

use super::CliError;
use crate::checkpoint::CheckpointStore;
use crate::output::CsvMatchSink;
use crate::person::{load_people, PersonFields, PersonId};
use crate::progress::ProgressObserver;
use crate::query::{CommandSessionFactory, SessionFactory, SimulatedSessionFactory};
use crate::search::config::{DEFAULT_BATCH_SIZE, DEFAULT_POOL_SIZE, MAX_POOL_SIZE, MAX_QUERY_RETRIES};
use crate::search::{RunConfig, RunController, RunSummary, ThrottleConfig};
use crate::shutdown::SharedSignals;
use crate::space::SpaceConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "curp-search",
    about = "Checkpointed parallel search over birth date/state combinations",
    version
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Address for the Prometheus metrics exporter (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a search run
    Run(RunArgs),
    /// Inspect stored checkpoints
    Status(super::StatusCommand),
}

/// Resume modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResumeMode {
    /// Resume from checkpoints if available
    On,
    /// Discard checkpoints for the input people and start fresh
    Off,
    /// Delete the entire checkpoint directory and start fresh
    Reset,
    /// Verify checkpoint integrity, then resume
    Verify,
}

/// Parse and validate the worker pool size.
fn parse_pool_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("worker count must be at least 1".to_string());
    }
    if value > MAX_POOL_SIZE {
        return Err(format!("worker count {value} exceeds maximum of {MAX_POOL_SIZE}"));
    }
    Ok(value)
}

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// CSV file with the people to search
    /// (person_id,first_name,last_name_1,last_name_2,gender)
    #[arg(long)]
    pub input: PathBuf,

    /// Start of the birth-year range, YYYY or YYYY-MM
    #[arg(long)]
    pub year_start: String,

    /// End of the birth-year range (inclusive), YYYY or YYYY-MM
    #[arg(long)]
    pub year_end: String,

    /// Number of concurrent workers
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, value_parser = parse_pool_size)]
    pub workers: usize,

    /// Output CSV for matches
    #[arg(long, default_value = "./matches.csv")]
    pub output: PathBuf,

    /// Directory for checkpoint records
    #[arg(long, default_value = "./checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Resume behavior
    #[arg(long, value_enum, default_value = "on")]
    pub resume: ResumeMode,

    /// Matches buffered before a flush
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds between time-based flushes
    #[arg(long, default_value_t = 300)]
    pub flush_interval_secs: u64,

    /// Minimum delay between queries per worker, milliseconds
    #[arg(long, default_value_t = 300)]
    pub min_delay_ms: u64,

    /// Maximum delay between queries per worker, milliseconds
    #[arg(long, default_value_t = 600)]
    pub max_delay_ms: u64,

    /// Take a longer pause every N queries per worker (0 disables)
    #[arg(long, default_value_t = 500)]
    pub cooldown_every: u64,

    /// Cooldown pause duration, seconds
    #[arg(long, default_value_t = 5)]
    pub cooldown_secs: u64,

    /// Consecutive transient errors before backoff escalates
    #[arg(long, default_value_t = 3)]
    pub burst_threshold: u32,

    /// Retries per combination on transient errors
    #[arg(long, default_value_t = MAX_QUERY_RETRIES)]
    pub max_retries: u32,

    /// Per-query timeout, seconds
    #[arg(long, default_value_t = 75)]
    pub query_timeout_secs: u64,

    /// External driver command performing one query per invocation
    /// (JSON request on stdin, JSON outcome on stdout)
    #[arg(long, num_args = 1.., value_name = "CMD")]
    pub driver: Option<Vec<String>>,

    /// Exercise the pipeline without a live endpoint
    /// (every query answers no-match)
    #[arg(long, conflicts_with = "driver")]
    pub simulate: bool,

    /// Disable the terminal progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

impl RunArgs {
    /// Execute the run.
    pub async fn execute(&self, signals: SharedSignals) -> Result<RunSummary, CliError> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(CliError::InvalidArgument(format!(
                "min delay {}ms exceeds max delay {}ms",
                self.min_delay_ms, self.max_delay_ms
            )));
        }

        let people = load_people(&self.input)?;
        let space = SpaceConfig::parse(&self.year_start, &self.year_end)?;

        let factory: Arc<dyn SessionFactory> = if let Some(command) = &self.driver {
            Arc::new(CommandSessionFactory::new(command.clone())?)
        } else if self.simulate {
            Arc::new(SimulatedSessionFactory::default())
        } else {
            return Err(CliError::ConfigurationError(
                "a query capability is required: pass --driver <cmd> or --simulate".to_string(),
            ));
        };

        let store = CheckpointStore::new(&self.checkpoint_dir);
        self.apply_resume_mode(&store, &people)?;

        let sink = CsvMatchSink::open(&self.output)?;

        let mut config = RunConfig::new(space);
        config.pool_size = self.workers;
        config.throttle = ThrottleConfig {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            cooldown_every: self.cooldown_every,
            cooldown_duration: Duration::from_secs(self.cooldown_secs),
            burst_threshold: self.burst_threshold,
            ..ThrottleConfig::default()
        };
        config.worker.max_retries = self.max_retries;
        config.worker.query_timeout = Duration::from_secs(self.query_timeout_secs);
        config.aggregator.batch_size = self.batch_size;
        config.aggregator.flush_interval = Duration::from_secs(self.flush_interval_secs);

        let mut controller =
            RunController::new(config, store, factory, Box::new(sink), signals)?;
        if !self.no_progress_bar && std::io::stderr().is_terminal() {
            controller = controller.with_observer(Arc::new(TerminalProgress::default()));
        }

        let summary = controller.run(&people).await?;

        println!();
        println!("Run finished{}", if summary.interrupted { " (interrupted - resume to continue)" } else { "" });
        println!("  people completed: {}", summary.people_processed);
        println!("  people skipped:   {}", summary.people_skipped);
        println!("  combinations:     {}", summary.queries_completed);
        println!("  matches found:    {}", summary.matches_found);
        println!("  output:           {}", self.output.display());
        Ok(summary)
    }

    fn apply_resume_mode(
        &self,
        store: &CheckpointStore,
        people: &[PersonFields],
    ) -> Result<(), CliError> {
        match self.resume {
            ResumeMode::On => Ok(()),
            ResumeMode::Off => {
                for person in people {
                    store.clear(person.person_id);
                }
                info!("resume off: cleared checkpoints for input people");
                Ok(())
            }
            ResumeMode::Reset => {
                if self.checkpoint_dir.exists() {
                    info!(
                        dir = %self.checkpoint_dir.display(),
                        "reset mode: deleting checkpoint directory"
                    );
                    std::fs::remove_dir_all(&self.checkpoint_dir).map_err(|e| {
                        CliError::InvalidArgument(format!(
                            "failed to delete checkpoint directory {}: {e}",
                            self.checkpoint_dir.display()
                        ))
                    })?;
                }
                Ok(())
            }
            ResumeMode::Verify => {
                verify_checkpoints(store)?;
                Ok(())
            }
        }
    }
}

/// Verify every stored record loads cleanly before the run starts.
fn verify_checkpoints(store: &CheckpointStore) -> Result<(), CliError> {
    let ids = store.list_person_ids()?;
    if ids.is_empty() {
        info!("verify mode: no checkpoint records to verify");
        return Ok(());
    }
    let mut valid = 0usize;
    for person_id in &ids {
        match store.inspect(*person_id) {
            Ok(Some(_)) => valid += 1,
            Ok(None) => {}
            Err(e) => {
                return Err(CliError::ConfigurationError(format!(
                    "checkpoint for person {person_id} failed verification: {e}"
                )));
            }
        }
    }
    info!(valid, total = ids.len(), "checkpoint verification passed");
    Ok(())
}

/// Terminal progress bar for the person currently being traversed.
#[derive(Default)]
struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver for TerminalProgress {
    fn person_started(&self, person: &PersonFields, total: u64, resumed_from: u64) {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix} [{bar:40}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix(format!("person {}", person.person_id));
        bar.set_position(resumed_from);
        let mut slot = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(bar);
    }

    fn progress(&self, completed: u64, _total: u64, matches: u64) {
        let slot = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = slot.as_ref() {
            bar.set_position(completed);
            bar.set_message(format!("{matches} match(es)"));
        }
    }

    fn person_finished(&self, _person_id: PersonId, matches: u64) {
        let mut slot = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = slot.take() {
            bar.finish_with_message(format!("done - {matches} match(es)"));
        }
    }
}
