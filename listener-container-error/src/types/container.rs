use std::any::Any;

use thiserror::Error;

use crate::{ConnectionError, ErrorExt, StatusCode};

/// Ошибки жизненного цикла контейнера.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    #[error("Container is already running")]
    AlreadyRunning,

    #[error("Container is not running")]
    NotRunning,

    /// Слушатели не завершились за отведённое время.
    #[error("Listeners did not drain within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ErrorExt for ContainerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRunning => StatusCode::AlreadyRunning,
            Self::NotRunning => StatusCode::NotRunning,
            Self::Timeout { .. } => StatusCode::ShutdownTimeout,
            Self::Connection(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Connection(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}
