//! Core pipeline library: document analysis, outline planning, cached slide
//! rendering, and run coordination for presentation generation.

pub mod analyzer;
pub mod anchor;
pub mod assembly;
pub mod cache;
pub mod config;
pub mod error;
pub mod failure;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod renderer;
pub mod template;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{ArtifactClass, CacheStats, CacheStore, EvictOutcome};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use failure::{FailureCategory, FailureLog, FailureRecord, OperationKind, RetryPolicy};
pub use pipeline::{Pipeline, RunOutput};
pub use template::TemplateRegistry;
