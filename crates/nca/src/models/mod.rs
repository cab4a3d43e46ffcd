//! Domain records: jobs, issues, batches, actions, and reference data.
//!
//! Each persisted enum round-trips through the exact strings stored in the
//! database, and parsing rejects anything outside the allowed set.

/// Error returned when a stored string is not a member of an enum's
/// allowed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} value {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum persisted as fixed strings, with `as_str`,
/// `ALL`, `Display`, and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($kind:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    _ => Err($crate::models::UnknownValue {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod action;
pub mod batch;
pub mod batch_name;
pub mod issue;
pub mod issue_key;
pub mod job;
pub mod pipeline;
pub mod reference;

pub use action::{Action, ActionType};
pub use batch::{Batch, BatchStatus};
pub use issue::{Issue, WorkflowStep};
pub use issue_key::IssueKey;
pub use job::{Args, Job, JobLog, JobLogLevel, JobStatus, JobType, ObjectType};
pub use pipeline::Pipeline;
pub use reference::{Moc, Title, User};
