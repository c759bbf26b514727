//! # Chatdesk Test Utilities
//!
//! This crate provides:
//! - Server test harness (`TestChatServer`, in-memory store, random port)
//! - Server-Sent Events reader (`EventReader`) for live-session assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chatdesk_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestChatServer::spawn().await?;
//!     let token = server.admin_token().await?;
//!
//!     let response = server
//!         .client()
//!         .get(format!("{}/v1/presence/1", server.url()))
//!         .bearer_auth(&token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod sse;

// Re-export commonly used items
pub use server_harness::*;
pub use sse::*;
