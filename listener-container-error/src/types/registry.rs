use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки реестра подписок. Возвращаются вызывающей стороне синхронно.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Подписка с таким идентификатором не зарегистрирована.
    #[error("Subscription {id} not found")]
    NotFound { id: u64 },

    /// Невалидный glob-шаблон.
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ErrorExt for RegistryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::InvalidPattern { .. } => StatusCode::InvalidPattern,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "registry".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::InvalidPattern { pattern, .. } = self {
            tags.push(("pattern", pattern.clone()));
        }
        tags
    }
}
