//! HTTP request handlers for the Chatdesk service.

pub mod admin;
pub mod auth;
pub mod events;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod presence;

pub use admin::{delete_identity, provision_identity};
pub use auth::login;
pub use events::events;
pub use health::{health_check, readiness_check};
pub use messages::{list_messages, send_message};
pub use metrics::metrics_handler;
pub use presence::get_presence;
