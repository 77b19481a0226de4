use std::sync::Arc;

use listener_container_error::{ConnectionError, ErrorExt, ListenerError};
use tracing::error;

use crate::{pubsub::Topic, registry::SubscriptionId};

/// Сбой одного вызова слушателя.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub subscription: SubscriptionId,
    pub topic: Topic,
    pub channel: Arc<str>,
    pub error: ListenerError,
}

/// Хук наблюдения за ошибками контейнера.
///
/// Вызывается из контекста диспетчеризации, поэтому не должен блокировать.
/// Реализации по умолчанию пишут в `tracing`.
pub trait ErrorObserver: Send + Sync + 'static {
    fn on_listener_error(
        &self,
        failure: &ListenerFailure,
    ) {
        error!(
            subscription = %failure.subscription,
            topic = %failure.topic,
            channel = %failure.channel,
            status = %failure.error.status_code(),
            error = %failure.error,
            "Listener failed"
        );
    }

    /// Контейнер остановлен из-за неустранимой ошибки соединения.
    fn on_fatal(
        &self,
        error: &ConnectionError,
    ) {
        error!(
            status = %error.status_code(),
            error = %error,
            "Listener container stopped after fatal connection error"
        );
    }
}

/// Наблюдатель, который только логирует.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ErrorObserver for LoggingObserver {}

/// Событие для замыкания-наблюдателя.
#[derive(Debug, Clone, Copy)]
pub enum ContainerEvent<'a> {
    ListenerFailed(&'a ListenerFailure),
    Fatal(&'a ConnectionError),
}

/// Адаптер замыкания к [`ErrorObserver`].
pub struct FnObserver<F> {
    f: F,
}

/// Оборачивает `Fn(ContainerEvent)` в наблюдателя.
pub fn observer_fn<F>(f: F) -> FnObserver<F>
where
    F: Fn(ContainerEvent<'_>) + Send + Sync + 'static,
{
    FnObserver { f }
}

impl<F> ErrorObserver for FnObserver<F>
where
    F: Fn(ContainerEvent<'_>) + Send + Sync + 'static,
{
    fn on_listener_error(
        &self,
        failure: &ListenerFailure,
    ) {
        (self.f)(ContainerEvent::ListenerFailed(failure))
    }

    fn on_fatal(
        &self,
        error: &ConnectionError,
    ) {
        (self.f)(ContainerEvent::Fatal(error))
    }
}
