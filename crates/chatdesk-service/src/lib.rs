//! Chatdesk Service Library
//!
//! Backend core of a multi-tenant business chat platform: tenant and
//! identity provisioning, presence, message persistence with caption
//! sanitation, and real-time fan-out to live sessions.
//!
//! # Modules
//!
//! - `actors` - Presence registry actor
//! - `auth` - Credential hashing, bearer tokens, login
//! - `bootstrap` - Default tenant and administrator
//! - `config` - Service configuration
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `maintenance` - Versioned repair and backfill jobs
//! - `middleware` - Authentication and HTTP metrics middleware
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `repositories` - Storage traits and implementations
//! - `routes` - Router and application state
//! - `services` - Business logic layer
//! - `tasks` - Background tasks

pub mod actors;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod maintenance;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
