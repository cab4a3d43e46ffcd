//! Issue keys: `<lccn>/<YYYYMMDDee>`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueKeyError {
    #[error("issue key {0:?} must have the form <lccn>/<YYYYMMDDee>")]
    Format(String),
    #[error("issue key {key:?} has an invalid date: {reason}")]
    Date { key: String, reason: String },
    #[error("issue key {0:?} has an invalid edition")]
    Edition(String),
}

/// The composite identity of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueKey {
    pub lccn: String,
    pub date: NaiveDate,
    pub edition: u32,
}

impl IssueKey {
    pub fn new(lccn: impl Into<String>, date: NaiveDate, edition: u32) -> Self {
        Self {
            lccn: lccn.into(),
            date,
            edition,
        }
    }

    /// `YYYYMMDDee`: the condensed date plus the two-digit edition.
    pub fn date_edition(&self) -> String {
        date_edition(self.date, self.edition)
    }
}

/// Formats a date and edition the way issue directories and keys expect.
pub fn date_edition(date: NaiveDate, edition: u32) -> String {
    format!("{}{:02}", date.format("%Y%m%d"), edition)
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lccn, self.date_edition())
    }
}

impl FromStr for IssueKey {
    type Err = IssueKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lccn, dte) = s
            .split_once('/')
            .ok_or_else(|| IssueKeyError::Format(s.to_string()))?;
        if lccn.is_empty() || dte.contains('/') || dte.len() != 10 || !dte.is_ascii() {
            return Err(IssueKeyError::Format(s.to_string()));
        }

        let date = NaiveDate::parse_from_str(&dte[..8], "%Y%m%d").map_err(|e| {
            IssueKeyError::Date {
                key: s.to_string(),
                reason: e.to_string(),
            }
        })?;
        let edition: u32 = dte[8..]
            .parse()
            .map_err(|_| IssueKeyError::Edition(s.to_string()))?;
        if edition == 0 {
            return Err(IssueKeyError::Edition(s.to_string()));
        }

        Ok(Self::new(lccn, date, edition))
    }
}
