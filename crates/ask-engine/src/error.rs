//! Caller-facing error taxonomy

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const FORBIDDEN_MESSAGE: &str = "You do not have permission to use the database query feature";
pub const GENERATION_MESSAGE: &str = "Could not turn your question into a query, please try to rephrase your question";
pub const EXECUTION_MESSAGE: &str = "Database query failed, please try to rephrase your question";
pub const INTERNAL_MESSAGE: &str = "Query processing failed, please try again later";
pub const TIMEOUT_MESSAGE: &str = "Query timeout, please try to simplify your question";

/// Terminal outcome of a request that did not produce an answer.
///
/// `Display` carries internal detail and is meant for logs. Callers should
/// only ever see [`AskError::public_message`].
#[derive(Debug, Error)]
pub enum AskError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("query generation failed: {0}")]
    Generation(String),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The four error kinds a caller can distinguish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Forbidden,
    GenerationError,
    ExecutionError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::GenerationError => "GenerationError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::InternalError => "InternalError",
        }
    }

    /// Label used for the request outcome metric
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::GenerationError => "generation_error",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl AskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AskError::Forbidden(_) => ErrorKind::Forbidden,
            AskError::Generation(_) => ErrorKind::GenerationError,
            AskError::Execution(_) => ErrorKind::ExecutionError,
            AskError::Timeout(_) | AskError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            AskError::Forbidden(_) => FORBIDDEN_MESSAGE,
            AskError::Generation(_) => GENERATION_MESSAGE,
            AskError::Execution(_) => EXECUTION_MESSAGE,
            AskError::Timeout(_) => TIMEOUT_MESSAGE,
            AskError::Internal(_) => INTERNAL_MESSAGE,
        }
    }
}

pub type AskResult<T> = Result<T, AskError>;
