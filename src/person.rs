//! Person input records.
//!
//! The search core only needs an identifier and the four name/gender fields
//! the registry form asks for. People are read from a CSV file with the
//! columns `person_id,first_name,last_name_1,last_name_2,gender`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Stable identifier for a person across runs.
pub type PersonId = u32;

/// Gender code as the registry form expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    /// Male ("H" on the form).
    #[serde(rename = "H")]
    Hombre,
    /// Female ("M" on the form).
    #[serde(rename = "M")]
    Mujer,
}

impl Gender {
    /// Single-letter form code.
    pub fn code(&self) -> char {
        match self {
            Gender::Hombre => 'H',
            Gender::Mujer => 'M',
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "H" => Ok(Gender::Hombre),
            "M" => Ok(Gender::Mujer),
            other => Err(format!("invalid gender code: {other} (expected H or M)")),
        }
    }
}

/// One person to search for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonFields {
    /// Stable identifier, unique within one input file.
    pub person_id: PersonId,
    /// Given name(s).
    pub first_name: String,
    /// Paternal surname.
    pub last_name_1: String,
    /// Maternal surname; may be empty.
    pub last_name_2: String,
    /// Gender code.
    pub gender: Gender,
}

impl PersonFields {
    /// Full display name.
    pub fn full_name(&self) -> String {
        let mut name = format!("{} {}", self.first_name, self.last_name_1);
        if !self.last_name_2.is_empty() {
            name.push(' ');
            name.push_str(&self.last_name_2);
        }
        name
    }

    /// Check required fields are present.
    pub fn validate(&self) -> Result<(), PersonError> {
        if self.first_name.trim().is_empty() {
            return Err(PersonError::Invalid(format!(
                "person {} has an empty first name",
                self.person_id
            )));
        }
        if self.last_name_1.trim().is_empty() {
            return Err(PersonError::Invalid(format!(
                "person {} has an empty paternal surname",
                self.person_id
            )));
        }
        Ok(())
    }
}

/// Errors reading person input.
#[derive(Debug, thiserror::Error)]
pub enum PersonError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// CSV parse error
    #[error("CSV error: {0}")]
    Csv(String),

    /// A record with missing or malformed fields
    #[error("invalid person record: {0}")]
    Invalid(String),

    /// Two records share a person id
    #[error("duplicate person id {0}")]
    DuplicateId(PersonId),

    /// The input file has no data rows
    #[error("input file contains no people")]
    Empty,
}

/// Load the ordered person list from a CSV file.
pub fn load_people<P: AsRef<Path>>(path: P) -> Result<Vec<PersonFields>, PersonError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PersonError::Io(format!("failed to open {}: {e}", path.display())))?;

    let mut people: Vec<PersonFields> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for record in reader.deserialize() {
        let person: PersonFields = record.map_err(|e| PersonError::Csv(e.to_string()))?;
        person.validate()?;
        if !seen.insert(person.person_id) {
            return Err(PersonError::DuplicateId(person.person_id));
        }
        people.push(person);
    }
    if people.is_empty() {
        return Err(PersonError::Empty);
    }

    info!(
        path = %path.display(),
        people = people.len(),
        "loaded person input"
    );
    Ok(people)
}
