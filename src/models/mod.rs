//! Core data models for the QR image stage.
//!
//! Events and image configuration come in as JSON via `serde`; objects and
//! batch status rows map to SQLite tables via `sqlx::FromRow`.

pub mod event;
pub mod image_config;
pub mod object;
pub mod status;
