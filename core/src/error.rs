use std::path::PathBuf;

use thiserror::Error;

use crate::failure::FailureRecord;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("analysis error: {0}")]
    Analysis(#[from] crate::analyzer::AnalysisError),

    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("fatal provider failure: {record}")]
    Provider {
        record: FailureRecord,
        chain: Vec<FailureRecord>,
    },

    #[error("run exceeded time ceiling of {ceiling_secs}s")]
    RunTimeout { ceiling_secs: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("deck assembly error at {path}: {source}")]
    Assembly {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
