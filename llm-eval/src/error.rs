use std::path::PathBuf;
use thiserror::Error;

/// 任务准备过程中的错误
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("document of {len} tokens plus eos exceeds context width {n_ctx}")]
    Overflow { len: usize, n_ctx: usize },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("cache {} is corrupt: {source}", .path.display())]
    CacheCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

impl TaskError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn source(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }
}

#[test]
fn test_display() {
    let err = TaskError::Overflow { len: 9, n_ctx: 8 };
    assert_eq!(
        err.to_string(),
        "document of 9 tokens plus eos exceeds context width 8"
    );

    let err = TaskError::config("n_ctx must be positive");
    assert!(err.to_string().contains("n_ctx must be positive"));

    let source = serde_json::from_str::<Vec<u32>>("[1,").unwrap_err();
    let err = TaskError::CacheCorruption {
        path: "lambada_00.json".into(),
        source,
    };
    assert!(err.to_string().starts_with("cache lambada_00.json is corrupt"));
}
