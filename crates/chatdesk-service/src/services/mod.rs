//! Service layer.
//!
//! Leaf-first: tenants, identities, the media validator and message store,
//! then live delivery and the append-then-publish pipeline on top.

pub mod delivery;
pub mod identity_store;
pub mod media_validator;
pub mod message_store;
pub mod pipeline;
pub mod tenant_registry;

pub use delivery::{
    DeliveryOutcome, DeliveryRouter, RecipientResolver, Session, Subscription, TenantStaffResolver,
};
pub use identity_store::IdentityStore;
pub use media_validator::{MediaValidator, SanitizedContent};
pub use message_store::{MessageStore, RepairReport};
pub use pipeline::{MessagePipeline, SendOutcome};
pub use tenant_registry::TenantRegistry;
