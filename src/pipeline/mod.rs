// Daily pipeline: ingestion, processing, loading and reporting stages plus the orchestrator

pub mod ingestion;
pub mod loading;
pub mod orchestrator;
pub mod processing;
pub mod reporting;

pub use orchestrator::{DateFailure, Pipeline, PipelineRunResult, PipelineStatus, RangeRunResult};
