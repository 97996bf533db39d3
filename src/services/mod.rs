//! Pipeline components. Each collaborator sits behind a trait so the
//! orchestrator in [`pipeline`] can be driven with substitutes.

pub mod archiver;
pub mod downloader;
pub mod pipeline;
pub mod renderer;
pub mod status_recorder;
pub mod storage_service;
