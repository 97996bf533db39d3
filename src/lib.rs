//! QR image stage: turns batch-publish events into QR images, bundles them
//! into a zip per batch, uploads the archive and records the batch status.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
