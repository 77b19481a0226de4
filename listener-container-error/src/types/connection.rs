use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспортного уровня (соединение с backend'ом).
///
/// Восстанавливаются внутри контейнера через переподключение с backoff;
/// наружу попадает только [`ConnectionError::RetriesExhausted`] или ошибка
/// старта.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Не удалось установить соединение.
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Соединение закрыто (backend или сеть).
    #[error("Connection closed")]
    Closed,

    /// Backend прислал что-то, что мы не понимаем.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Ошибка подписки/отписки на backend'е.
    #[error("Failed to (un)subscribe '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    /// Менеджер уже выдал активное соединение.
    #[error("Connection already acquired")]
    AlreadyAcquired,

    /// Исчерпан лимит повторных попыток.
    #[error("Gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Имеет ли смысл повторять операцию после этой ошибки.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }
}

impl ErrorExt for ConnectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectFailed { .. } => StatusCode::ConnectionFailed,
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::Subscribe { .. } => StatusCode::SubscribeFailed,
            Self::AlreadyAcquired => StatusCode::ConnectionBusy,
            Self::RetriesExhausted { .. } => StatusCode::RetriesExhausted,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ConnectFailed { endpoint, .. } => format!("Backend unavailable: {endpoint}"),
            Self::Closed => "Connection closed".to_string(),
            Self::Protocol { .. } => "Backend protocol error".to_string(),
            Self::Subscribe { topic, .. } => format!("Subscription failed: {topic}"),
            Self::AlreadyAcquired => "Connection busy".to_string(),
            Self::RetriesExhausted { attempts, .. } => {
                format!("Backend unavailable after {attempts} attempts")
            }
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "connection".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::ConnectFailed { endpoint, .. } => tags.push(("endpoint", endpoint.clone())),
            Self::Subscribe { topic, .. } => tags.push(("topic", topic.clone())),
            Self::RetriesExhausted { attempts, .. } => {
                tags.push(("attempts", attempts.to_string()))
            }
            _ => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_codes() {
        let err = ConnectionError::ConnectFailed {
            endpoint: "memory://test".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ConnectionFailed);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("memory://test"));

        assert!(!ConnectionError::AlreadyAcquired.is_retryable());
        assert!(ConnectionError::Closed.is_retryable());
    }

    /// Тест проверяет, что исчерпание попыток не считается retryable и
    /// сохраняет последнюю ошибку.
    #[test]
    fn test_retries_exhausted() {
        let err = ConnectionError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ConnectionError::Closed),
        };
        assert!(!err.is_retryable());
        assert!(err.status_code().is_critical());
        assert!(err.to_string().ends_with("Connection closed"));
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "attempts" && v == "3"));
    }
}
