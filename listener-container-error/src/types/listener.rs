use std::{any::Any, fmt::Display};

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибка, которую вернул (или вызвал паникой) зарегистрированный слушатель.
///
/// Никогда не доходит до цикла диспетчеризации: перехватывается и
/// передаётся наблюдателю ошибок.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("Listener failed: {reason}")]
    Failed { reason: String },

    #[error("Listener panicked: {reason}")]
    Panicked { reason: String },
}

impl ListenerError {
    pub fn failed(reason: impl Display) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }
}

impl ErrorExt for ListenerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed { .. } => StatusCode::ListenerFailed,
            Self::Panicked { .. } => StatusCode::ListenerPanicked,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
