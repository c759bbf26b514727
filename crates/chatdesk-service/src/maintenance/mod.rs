//! Versioned maintenance jobs.
//!
//! Each job repairs stored data through the repository traits and can be
//! re-run at any time: a second run over a repaired store finds nothing to
//! fix. Per-row failures are counted and skipped; a job returns `Err` only
//! when the store itself cannot be read.

mod caption_repair;
mod username_backfill;

pub use caption_repair::CaptionRepair;
pub use username_backfill::{derive_username, UsernameBackfill};

use crate::errors::ChatError;
use crate::repositories::ChatStore;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Counts reported by a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub job: &'static str,
    pub version: u32,
    /// Rows examined.
    pub scanned: u64,
    /// Rows changed by this run.
    pub fixed: u64,
    /// Rows whose update failed.
    pub failed: u64,
    /// Rows still needing work after this run.
    pub remaining: u64,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}: scanned={} fixed={} failed={} remaining={}",
            self.job, self.version, self.scanned, self.fixed, self.failed, self.remaining
        )
    }
}

#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> u32;

    async fn run(&self, store: Arc<dyn ChatStore>) -> Result<JobReport, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = JobReport {
            job: "caption-repair",
            version: 1,
            scanned: 10,
            fixed: 3,
            failed: 1,
            remaining: 1,
        };
        assert_eq!(
            report.to_string(),
            "caption-repair v1: scanned=10 fixed=3 failed=1 remaining=1"
        );
    }
}
