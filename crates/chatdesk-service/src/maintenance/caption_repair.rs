//! `caption-repair`: clear media captions that are only a placeholder word.

use super::{JobReport, MaintenanceJob};
use crate::errors::ChatError;
use crate::observability::metrics;
use crate::repositories::ChatStore;
use crate::services::{MediaValidator, MessageStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct CaptionRepair {
    validator: Arc<MediaValidator>,
    batch_size: u32,
}

impl CaptionRepair {
    pub fn new(validator: Arc<MediaValidator>, batch_size: u32) -> Self {
        Self {
            validator,
            batch_size,
        }
    }
}

#[async_trait]
impl MaintenanceJob for CaptionRepair {
    fn name(&self) -> &'static str {
        "caption-repair"
    }

    fn version(&self) -> u32 {
        1
    }

    #[instrument(skip_all, name = "chatdesk.maintenance.caption_repair")]
    async fn run(&self, store: Arc<dyn ChatStore>) -> Result<JobReport, ChatError> {
        let messages = MessageStore::new(store, self.validator.clone());
        let repair = messages.repair_existing(self.batch_size).await?;

        metrics::record_maintenance_job(self.name(), repair.scanned, repair.fixed, repair.failed);

        let report = JobReport {
            job: self.name(),
            version: self.version(),
            scanned: repair.scanned,
            fixed: repair.fixed,
            failed: repair.failed,
            // Rows whose update failed still hold their placeholder.
            remaining: repair.failed,
        };
        info!(target: "chatdesk.maintenance", report = %report, "Job finished");
        Ok(report)
    }
}
