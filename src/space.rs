//! Combination space enumeration.
//!
//! The search space is the Cartesian product of (day, month, state, year)
//! under a fixed total order, so every combination has a stable integer index
//! and an interrupted traversal can resume exactly where it stopped. Decoding
//! and encoding are pure inverse functions; nothing here touches the clock,
//! the filesystem, or a random number generator.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Version tag for the enumeration order. An index is only meaningful under
/// the order that produced it, so this participates in the config hash and
/// bumping it invalidates every existing checkpoint.
const ORDERING_VERSION: u32 = 1;

/// Days tried per (year, month) pair. Calendar validity is not checked here;
/// the registry itself answers impossible dates with a deterministic no-match.
pub const DAYS_PER_MONTH: u64 = 31;

/// Registry birth-state options, 1-based codes: the 31 states plus Ciudad de
/// México plus the foreign-born option.
pub const STATES: [&str; 33] = [
    "Aguascalientes",
    "Baja California",
    "Baja California Sur",
    "Campeche",
    "Chiapas",
    "Chihuahua",
    "Coahuila",
    "Colima",
    "Durango",
    "Estado de México",
    "Guanajuato",
    "Guerrero",
    "Hidalgo",
    "Jalisco",
    "Michoacán",
    "Morelos",
    "Nayarit",
    "Nuevo León",
    "Oaxaca",
    "Puebla",
    "Querétaro",
    "Quintana Roo",
    "San Luis Potosí",
    "Sinaloa",
    "Sonora",
    "Tabasco",
    "Tamaulipas",
    "Tlaxcala",
    "Veracruz",
    "Yucatán",
    "Zacatecas",
    "Ciudad de México",
    "Nacido en el extranjero",
];

/// Number of birth-state options.
pub const STATE_COUNT: u64 = STATES.len() as u64;

/// Resolve a 1-based state code to its display name.
pub fn state_name(code: u8) -> Option<&'static str> {
    if code == 0 {
        return None;
    }
    STATES.get(code as usize - 1).copied()
}

/// One (day, month, state, year) tuple queried against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    /// Day of month, 1-31. Not validated against the month; the registry is
    /// the source of truth for calendar validity.
    pub day: u8,
    /// Month, 1-12.
    pub month: u8,
    /// Birth-state code, 1-based index into [`STATES`].
    pub state: u8,
    /// Four-digit birth year.
    pub year: u16,
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}/{:02}/{} {}",
            self.day,
            self.month,
            self.year,
            state_name(self.state).unwrap_or("?")
        )
    }
}

/// Errors from combination space operations.
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    /// Index outside [0, N).
    #[error("combination index {index} out of range for space of {len} combinations")]
    IndexOutOfRange {
        /// The offending index.
        index: u64,
        /// Total number of combinations in the space.
        len: u64,
    },

    /// A combination that does not belong to the configured space.
    #[error("combination {0} is not part of the configured space")]
    CombinationOutOfRange(Combination),

    /// Invalid year/month bounds.
    #[error("invalid space bounds: {0}")]
    InvalidBounds(String),
}

/// Year range, optionally bounded to a month on either end, that defines the
/// combination space for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    start_year: u16,
    start_month: Option<u8>,
    end_year: u16,
    end_month: Option<u8>,
}

impl SpaceConfig {
    /// Full-year range: January of `start_year` through December of `end_year`.
    pub fn years(start_year: u16, end_year: u16) -> Self {
        Self {
            start_year,
            start_month: None,
            end_year,
            end_month: None,
        }
    }

    /// Range with explicit month bounds on either end. A `None` month means
    /// the whole year on that end.
    pub fn new(
        start_year: u16,
        start_month: Option<u8>,
        end_year: u16,
        end_month: Option<u8>,
    ) -> Self {
        Self {
            start_year,
            start_month,
            end_year,
            end_month,
        }
    }

    /// Parse a pair of `YYYY` or `YYYY-MM` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, SpaceError> {
        let (start_year, start_month) = parse_bound(start)?;
        let (end_year, end_month) = parse_bound(end)?;
        Ok(Self {
            start_year,
            start_month,
            end_year,
            end_month,
        })
    }

    /// Starting year of the range.
    pub fn start_year(&self) -> u16 {
        self.start_year
    }

    /// Ending year of the range (inclusive).
    pub fn end_year(&self) -> u16 {
        self.end_year
    }

    fn validate(&self) -> Result<(), SpaceError> {
        for month in [self.start_month, self.end_month].into_iter().flatten() {
            if !(1..=12).contains(&month) {
                return Err(SpaceError::InvalidBounds(format!(
                    "month {month} outside 1-12"
                )));
            }
        }
        let start = (self.start_year, self.start_month.unwrap_or(1));
        let end = (self.end_year, self.end_month.unwrap_or(12));
        if start > end {
            return Err(SpaceError::InvalidBounds(format!(
                "start {}-{:02} is after end {}-{:02}",
                start.0, start.1, end.0, end.1
            )));
        }
        Ok(())
    }
}

/// Parse a single `YYYY` or `YYYY-MM` bound.
fn parse_bound(value: &str) -> Result<(u16, Option<u8>), SpaceError> {
    let value = value.trim();
    let (year_str, month) = match value.split_once('-') {
        Some((y, m)) => {
            let month: u8 = m
                .parse()
                .map_err(|_| SpaceError::InvalidBounds(format!("invalid month in {value:?}")))?;
            (y, Some(month))
        }
        None => (value, None),
    };
    let year: u16 = year_str
        .parse()
        .map_err(|_| SpaceError::InvalidBounds(format!("invalid year in {value:?}")))?;
    Ok((year, month))
}

/// Deterministic, resumable enumerator over the full combination space.
///
/// Ordering is lexicographic over (year, month, day, state): the state code
/// varies fastest, then the day, then the (year, month) pair. The order is
/// stable across restarts for a fixed configuration.
#[derive(Debug, Clone)]
pub struct CombinationSpace {
    config: SpaceConfig,
    /// (year, month) pairs in ascending order.
    months: Vec<(u16, u8)>,
}

impl CombinationSpace {
    /// Build the space for a configuration.
    pub fn new(config: SpaceConfig) -> Result<Self, SpaceError> {
        config.validate()?;
        let mut months = Vec::new();
        for year in config.start_year..=config.end_year {
            let first = if year == config.start_year {
                config.start_month.unwrap_or(1)
            } else {
                1
            };
            let last = if year == config.end_year {
                config.end_month.unwrap_or(12)
            } else {
                12
            };
            for month in first..=last {
                months.push((year, month));
            }
        }
        Ok(Self { config, months })
    }

    /// Total number of combinations, `31 × 33 × (year, month) pairs`.
    pub fn len(&self) -> u64 {
        self.months.len() as u64 * DAYS_PER_MONTH * STATE_COUNT
    }

    /// Whether the space contains no combinations.
    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// The configuration this space was built from.
    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Map an index in [0, N) to its combination.
    pub fn decode(&self, index: u64) -> Result<Combination, SpaceError> {
        if index >= self.len() {
            return Err(SpaceError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let state = (index % STATE_COUNT) as u8 + 1;
        let rest = index / STATE_COUNT;
        let day = (rest % DAYS_PER_MONTH) as u8 + 1;
        let (year, month) = self.months[(rest / DAYS_PER_MONTH) as usize];
        Ok(Combination {
            day,
            month,
            state,
            year,
        })
    }

    /// Map a combination back to its index. Inverse of [`decode`](Self::decode).
    pub fn encode(&self, combination: &Combination) -> Result<u64, SpaceError> {
        let day_ok = (1..=DAYS_PER_MONTH as u8).contains(&combination.day);
        let state_ok = (1..=STATE_COUNT as u8).contains(&combination.state);
        if !day_ok || !state_ok {
            return Err(SpaceError::CombinationOutOfRange(*combination));
        }
        let ym = self
            .months
            .binary_search(&(combination.year, combination.month))
            .map_err(|_| SpaceError::CombinationOutOfRange(*combination))?;
        let index = (ym as u64 * DAYS_PER_MONTH + (combination.day as u64 - 1)) * STATE_COUNT
            + (combination.state as u64 - 1);
        Ok(index)
    }

    /// Lazy, restartable cursor over the space beginning at `start`. Two
    /// cursors built from the same start index yield identical sequences.
    pub fn cursor(&self, start: u64) -> impl Iterator<Item = (u64, Combination)> + '_ {
        (start..self.len()).filter_map(move |index| self.decode(index).ok().map(|c| (index, c)))
    }

    /// SHA-256 over the canonical configuration, hex-encoded.
    ///
    /// Binds a checkpoint to the exact space that produced it; a resumed run
    /// whose hash differs would silently skip or duplicate work, so the
    /// checkpoint store refuses such records.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "order=v{ORDERING_VERSION};days={DAYS_PER_MONTH};states={};",
            STATES.join(",")
        ));
        hasher.update(format!(
            "start={}-{:02};end={}-{:02};",
            self.config.start_year,
            self.config.start_month.unwrap_or(1),
            self.config.end_year,
            self.config.end_month.unwrap_or(12),
        ));
        format!("{:x}", hasher.finalize())
    }
}
