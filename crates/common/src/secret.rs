//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so every Chatdesk crate wraps credentials the same
//! way. `SecretString` redacts itself in `Debug`, so a struct that derives
//! `Debug` around one is safe to pass to `tracing`.
//!
//! Wrap in `SecretString`:
//! - the storage connection string
//! - the credential signing secret
//! - plaintext passwords on their way to the hasher (login, seed)
//! - issued bearer tokens
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let signing = SecretString::from("0123456789abcdef0123456789abcdef");
//! assert!(!format!("{signing:?}").contains("0123"));
//! assert_eq!(signing.expose_secret().len(), 32);
//! ```

pub use secrecy::{ExposeSecret, SecretString};
