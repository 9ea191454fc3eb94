use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Locator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ChapterNonexistent,
    WebViewInaccessible,
    CommandExecutionFailed,
    InvalidProgress,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChapterNonexistent => "chapter_nonexistent",
            Self::WebViewInaccessible => "web_view_inaccessible",
            Self::CommandExecutionFailed => "command_execution_failed",
            Self::InvalidProgress => "invalid_progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum ReaderError {
    #[error("chapter does not exist: {message}")]
    ChapterNonexistent { locator: Locator, message: String },
    #[error("rendering surface is inaccessible: {0}")]
    WebViewInaccessible(String),
    #[error("command execution failed: {0}")]
    CommandExecutionFailed(String),
    #[error("progress {0} must be in the range [0, 1]")]
    InvalidProgress(f64),
}

impl ReaderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ChapterNonexistent { .. } => ErrorCode::ChapterNonexistent,
            Self::WebViewInaccessible(_) => ErrorCode::WebViewInaccessible,
            Self::CommandExecutionFailed(_) => ErrorCode::CommandExecutionFailed,
            Self::InvalidProgress(_) => ErrorCode::InvalidProgress,
        }
    }

    pub fn execution_failed(cause: impl std::fmt::Display) -> Self {
        Self::CommandExecutionFailed(cause.to_string())
    }
}
