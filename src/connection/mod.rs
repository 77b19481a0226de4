//! Connection Manager и транспортный шов.
//!
//! - [`ConnectionFactory`]: явно передаваемая фабрика соединений;
//! - [`Connection`]: подписочное соединение с backend'ом;
//! - [`RetryPolicy`]: экспоненциальный backoff с джиттером;
//! - [`ConnectionManager`]: выдаёт не более одного активного соединения и
//!   переподключается по политике.

pub mod backoff;
pub mod manager;

pub use backoff::RetryPolicy;
pub use manager::{ConnectionManager, ConnectionStats, Lease};

use async_trait::async_trait;
use bytes::Bytes;
use listener_container_error::ConnectionError;

use crate::pubsub::{Message, Topic};

pub type BoxConnection = Box<dyn Connection>;

/// Сколько копий одной публикации присылает соединение.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Копия на каждую совпавшую подписку соединения, шаблонные копии
    /// помечены `pattern` (Redis `message`/`pmessage`).
    PerSubscription,
    /// Одна копия на соединение без `pattern`.
    PerPublication,
}

/// Фабрика подписочных соединений.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Одна попытка подключения. Повторами занимается [`ConnectionManager`].
    async fn connect(&self) -> Result<BoxConnection, ConnectionError>;

    /// Адрес backend'а для логов и ошибок.
    fn endpoint(&self) -> String;
}

/// Подписочное соединение с backend'ом.
///
/// Используется только циклом диспетчеризации.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn subscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError>;

    async fn unsubscribe(
        &mut self,
        topic: &Topic,
    ) -> Result<(), ConnectionError>;

    /// Ждёт следующее сообщение. Должен быть cancel-safe: отменённый вызов
    /// не теряет сообщений. Ошибка означает потерю соединения.
    async fn receive(&mut self) -> Result<Message, ConnectionError>;

    /// Публикует сообщение, возвращает число получателей.
    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, ConnectionError>;

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn delivery(&self) -> Delivery {
        Delivery::PerSubscription
    }
}
