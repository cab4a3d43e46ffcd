//! Pipelines group the jobs of one business operation for reporting.
//! Execution order lives in each job's `queue_job_id`, not here.

use chrono::{DateTime, Utc};

use super::ObjectType;

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// `None` for pipelines that are not about an issue or batch.
    pub object_type: Option<ObjectType>,
    pub object_id: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(name: &str, description: String, object_type: Option<ObjectType>, object_id: i64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            description,
            object_type,
            object_id,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
