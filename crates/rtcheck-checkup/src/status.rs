//! Run status and results of a checkup.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Measurements gathered by a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results {
    /// Node the target actually ran on.
    pub node: String,
    pub oslat_max_latency: Duration,
}

impl Results {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything reported about one checkup run.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub start_timestamp: Option<DateTime<Utc>>,
    /// Unset until the run finished; a status without it is the start marker.
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub failure_reason: Vec<String>,
    pub results: Results,
}

impl Status {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            start_timestamp: Some(at),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure_reason.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.completion_timestamp.is_some()
    }
}
