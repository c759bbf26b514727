//! `username-backfill`: give every identity without a username a
//! deterministic one.
//!
//! The base name is the slugged display name joined to the identity id
//! (`maria.silva.7`), or `user7` when the display name has no usable
//! characters. If that name is taken in the tenant, `-2`, `-3`, ... are
//! appended until one is free.

use super::{JobReport, MaintenanceJob};
use crate::errors::ChatError;
use crate::models::Identity;
use crate::observability::metrics;
use crate::repositories::ChatStore;
use crate::services::media_validator::fold_accent;
use async_trait::async_trait;
use common::types::IdentityKey;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Longest slug kept from a display name.
const MAX_SLUG_LENGTH: usize = 40;

/// Collision suffixes tried before giving up on a row.
const MAX_SUFFIX: u32 = 50;

pub struct UsernameBackfill {
    batch_size: u32,
}

impl UsernameBackfill {
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

/// Base username for an identity. Pure; the same inputs always give the
/// same name.
pub fn derive_username(display_name: &str, identity_id: i64) -> String {
    let slug = slug(display_name);
    if slug.is_empty() {
        format!("user{identity_id}")
    } else {
        format!("{slug}.{identity_id}")
    }
}

fn slug(display_name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for c in display_name.chars().flat_map(char::to_lowercase).map(fold_accent) {
        if c.is_ascii_alphanumeric() {
            current.push(c);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut slug = words.join(".");
    if slug.len() > MAX_SLUG_LENGTH {
        slug.truncate(MAX_SLUG_LENGTH);
        // Never end on a separator.
        while slug.ends_with('.') {
            slug.pop();
        }
    }
    slug
}

enum RowOutcome {
    Assigned,
    AlreadySet,
    Failed,
}

impl UsernameBackfill {
    async fn backfill_row(&self, store: &dyn ChatStore, identity: &Identity) -> RowOutcome {
        let base = derive_username(&identity.display_name, identity.identity_id.0);

        for attempt in 1..=MAX_SUFFIX {
            let candidate = if attempt == 1 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };

            match store
                .assign_username(identity.tenant_id, identity.identity_id, &candidate)
                .await
            {
                Ok(true) => {
                    debug!(
                        target: "chatdesk.maintenance",
                        identity = %identity.key(),
                        username = %candidate,
                        "Username assigned"
                    );
                    return RowOutcome::Assigned;
                }
                Ok(false) => return RowOutcome::AlreadySet,
                Err(ChatError::Conflict(_)) => continue,
                Err(e) => {
                    warn!(
                        target: "chatdesk.maintenance",
                        identity = %identity.key(),
                        error = %e,
                        "Username assignment failed for row"
                    );
                    return RowOutcome::Failed;
                }
            }
        }

        warn!(
            target: "chatdesk.maintenance",
            identity = %identity.key(),
            "No free username after {MAX_SUFFIX} attempts"
        );
        RowOutcome::Failed
    }
}

#[async_trait]
impl MaintenanceJob for UsernameBackfill {
    fn name(&self) -> &'static str {
        "username-backfill"
    }

    fn version(&self) -> u32 {
        1
    }

    #[instrument(skip_all, name = "chatdesk.maintenance.username_backfill")]
    async fn run(&self, store: Arc<dyn ChatStore>) -> Result<JobReport, ChatError> {
        let mut report = JobReport {
            job: self.name(),
            version: self.version(),
            ..JobReport::default()
        };
        let mut cursor: Option<IdentityKey> = None;

        loop {
            let batch = store
                .list_identities_without_username(cursor, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.key());
            let exhausted = batch.len() < self.batch_size as usize;

            for identity in &batch {
                report.scanned += 1;
                match self.backfill_row(store.as_ref(), identity).await {
                    RowOutcome::Assigned => report.fixed += 1,
                    RowOutcome::AlreadySet => {}
                    RowOutcome::Failed => report.failed += 1,
                }
            }

            if exhausted {
                break;
            }
        }

        report.remaining = store.count_identities_without_username().await?;
        metrics::record_maintenance_job(self.name(), report.scanned, report.fixed, report.failed);
        info!(target: "chatdesk.maintenance", report = %report, "Job finished");
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{IdentityAttributes, IdentityKind, Role};
    use crate::repositories::{IdentityRepository, InMemoryChatStore, TenantRepository};
    use common::types::{IdentityId, TenantId};

    fn contact(display_name: &str) -> IdentityAttributes {
        IdentityAttributes {
            display_name: display_name.to_string(),
            role: Role::Contact,
            kind: IdentityKind::ExternalContact,
            credential_hash: None,
        }
    }

    async fn store_with_tenant() -> Arc<InMemoryChatStore> {
        let store = Arc::new(InMemoryChatStore::new());
        store
            .insert_tenant("Empresa Padrão", &serde_json::json!({}))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_derive_username_folds_accents_and_joins_words() {
        assert_eq!(derive_username("Maria  da Conceição", 7), "maria.da.conceicao.7");
        assert_eq!(derive_username("José O'Brien", 12), "jose.o.brien.12");
    }

    #[test]
    fn test_derive_username_falls_back_for_blank_names() {
        assert_eq!(derive_username("", 3), "user3");
        assert_eq!(derive_username("  ☎️ ", 4), "user4");
    }

    #[test]
    fn test_derive_username_truncates_long_names() {
        let name = "a".repeat(30) + " " + &"b".repeat(30);
        let username = derive_username(&name, 1);
        assert!(username.len() <= MAX_SLUG_LENGTH + 2);
        assert!(!username.contains(".."));
    }

    #[tokio::test]
    async fn test_backfill_assigns_and_is_idempotent() {
        let store = store_with_tenant().await;
        store
            .insert_identity(TenantId(1), None, &contact("Ana Souza"))
            .await
            .unwrap();
        store
            .insert_identity(TenantId(1), None, &contact(""))
            .await
            .unwrap();
        store
            .insert_identity(TenantId(1), Some("agent"), &contact("Agent"))
            .await
            .unwrap();

        let job = UsernameBackfill::new(1);
        let first = job.run(store.clone()).await.unwrap();
        assert_eq!(first.scanned, 2);
        assert_eq!(first.fixed, 2);
        assert_eq!(first.remaining, 0);

        let ana = store.get_identity(TenantId(1), IdentityId(1)).await.unwrap().unwrap();
        assert_eq!(ana.username.as_deref(), Some("ana.souza.1"));
        let blank = store.get_identity(TenantId(1), IdentityId(2)).await.unwrap().unwrap();
        assert_eq!(blank.username.as_deref(), Some("user2"));

        let second = job.run(store).await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.fixed, 0);
    }

    #[tokio::test]
    async fn test_backfill_appends_suffix_on_collision() {
        let store = store_with_tenant().await;
        store
            .insert_identity(TenantId(1), Some("ana.souza.2"), &contact("Someone"))
            .await
            .unwrap();
        store
            .insert_identity(TenantId(1), None, &contact("Ana Souza"))
            .await
            .unwrap();

        let report = UsernameBackfill::new(10).run(store.clone()).await.unwrap();
        assert_eq!(report.fixed, 1);

        let ana = store.get_identity(TenantId(1), IdentityId(2)).await.unwrap().unwrap();
        assert_eq!(ana.username.as_deref(), Some("ana.souza.2-2"));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_an_error() {
        let store = store_with_tenant().await;
        store.set_unavailable(true);

        let result = UsernameBackfill::new(10).run(store).await;
        assert!(matches!(result, Err(ChatError::Database(_))));
    }
}
