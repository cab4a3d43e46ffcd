//! Reference data consulted by handlers but never mutated by the pipeline.

use std::sync::LazyLock;

use chrono::{Months, NaiveDate, TimeDelta};
use regex::Regex;

static RE_PERIOD_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)([a-z]+)").unwrap());

/// A publication, keyed by LCCN.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Title {
    pub id: i64,
    pub lccn: String,
    pub name: String,
    pub place_of_publication: String,
    pub marc_org_code: String,
    /// Three-letter language code used for ALTO generation.
    pub lang_code3: String,
    /// Human-style period such as `"2 weeks"` or `"1y6m"`; empty means none.
    pub embargo_period: String,
    pub valid_lccn: bool,
    pub sftp_user: String,
}

/// MARC organization code.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Moc {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// A user and their role tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub roles: Vec<String>,
    pub deactivated: bool,
}

/// Privileges granted by role tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    ViewMetadataWorkflow,
    EnterIssueMetadata,
    ReviewIssueMetadata,
    ReviewOwnMetadata,
    ManageIssues,
    ViewBatchStatus,
    ApproveQcReadyBatch,
    LoadAndPurgeBatches,
    ModifyTitles,
    ListUsers,
}

const ROLE_PRIVILEGES: &[(&str, &[Privilege])] = &[
    (
        "issue curator",
        &[Privilege::ViewMetadataWorkflow, Privilege::EnterIssueMetadata],
    ),
    (
        "issue reviewer",
        &[Privilege::ViewMetadataWorkflow, Privilege::ReviewIssueMetadata],
    ),
    (
        "issue manager",
        &[
            Privilege::ViewMetadataWorkflow,
            Privilege::EnterIssueMetadata,
            Privilege::ReviewIssueMetadata,
            Privilege::ReviewOwnMetadata,
            Privilege::ManageIssues,
        ],
    ),
    (
        "batch reviewer",
        &[Privilege::ViewBatchStatus, Privilege::ApproveQcReadyBatch],
    ),
    (
        "batch loader",
        &[Privilege::ViewBatchStatus, Privilege::LoadAndPurgeBatches],
    ),
    ("title manager", &[Privilege::ModifyTitles]),
    ("user manager", &[Privilege::ListUsers]),
];

impl User {
    /// Role tags are stored comma separated.
    pub fn parse_roles(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn roles_csv(&self) -> String {
        self.roles.join(",")
    }

    /// Admins have every privilege; deactivated users have none.
    pub fn can(&self, privilege: Privilege) -> bool {
        if self.deactivated {
            return false;
        }
        self.roles.iter().any(|role| {
            role == "admin"
                || ROLE_PRIVILEGES
                    .iter()
                    .any(|(name, privs)| name == role && privs.contains(&privilege))
        })
    }
}

/// A calendar period: years, months, weeks, days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Period {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("invalid time period {0:?}")]
    Invalid(String),
    #[error("{unit} specified more than once in {input:?}")]
    Repeated { unit: &'static str, input: String },
    #[error("invalid unit name {0:?}")]
    Unit(String),
}

impl Period {
    pub fn is_zero(&self) -> bool {
        *self == Period::default()
    }

    pub fn from_days(days: u32) -> Self {
        Period {
            days,
            ..Period::default()
        }
    }

    /// Parses strings like `"2w"`, `"1 year 6 months"`, `"30days"`. Empty
    /// and `"0"` mean no period.
    pub fn parse(input: &str) -> Result<Self, PeriodError> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let mut period = Period::default();
        if compact.is_empty() || compact == "0" {
            return Ok(period);
        }

        let mut matched_len = 0;
        for caps in RE_PERIOD_PART.captures_iter(&compact) {
            matched_len += caps[0].len();
            let num: u32 = caps[1]
                .parse()
                .map_err(|_| PeriodError::Invalid(input.to_string()))?;
            let (slot, unit) = match &caps[2] {
                "d" | "day" | "days" => (&mut period.days, "days"),
                "w" | "week" | "weeks" => (&mut period.weeks, "weeks"),
                "m" | "month" | "months" => (&mut period.months, "months"),
                "y" | "year" | "years" => (&mut period.years, "years"),
                other => return Err(PeriodError::Unit(other.to_string())),
            };
            if *slot > 0 {
                return Err(PeriodError::Repeated {
                    unit,
                    input: input.to_string(),
                });
            }
            *slot = num;
        }
        if matched_len != compact.len() {
            return Err(PeriodError::Invalid(input.to_string()));
        }

        Ok(period)
    }

    /// Adds this period to a date; `None` on calendar overflow.
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_add_months(Months::new(self.years * 12 + self.months))?
            .checked_add_signed(TimeDelta::try_days(i64::from(self.weeks * 7 + self.days))?)
    }
}

impl Title {
    /// The date an embargo lifts for an issue published on `issue_date`.
    /// Titles without their own period fall back to `default_days`; a zero
    /// period means the issue was never embargoed.
    pub fn embargo_lift_date(
        &self,
        issue_date: NaiveDate,
        default_days: u32,
    ) -> Result<Option<NaiveDate>, PeriodError> {
        let period = if self.embargo_period.trim().is_empty() {
            Period::from_days(default_days)
        } else {
            Period::parse(&self.embargo_period)?
        };
        if period.is_zero() {
            return Ok(None);
        }
        period
            .add_to(issue_date)
            .map(Some)
            .ok_or_else(|| PeriodError::Invalid(self.embargo_period.clone()))
    }
}
