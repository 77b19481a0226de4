use std::{future::Future, marker::PhantomData};

use async_trait::async_trait;
use listener_container_error::ListenerError;

use super::Message;

/// Слушатель сообщений.
///
/// Вызывается из контекста диспетчеризации для каждого подходящего
/// сообщения. Ошибка (или паника) перехватывается контейнером и уходит
/// наблюдателю ошибок, доставка остальным слушателям не прерывается.
#[async_trait]
pub trait MessageListener: Send + Sync + 'static {
    async fn on_message(
        &self,
        message: &Message,
    ) -> Result<(), ListenerError>;
}

/// Адаптер синхронного замыкания к [`MessageListener`].
pub struct FnListener<F> {
    f: F,
}

/// Оборачивает синхронное замыкание `Fn(&Message) -> Result<(), ListenerError>`.
pub fn listener_fn<F>(f: F) -> FnListener<F>
where
    F: Fn(&Message) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    FnListener { f }
}

#[async_trait]
impl<F> MessageListener for FnListener<F>
where
    F: Fn(&Message) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    async fn on_message(
        &self,
        message: &Message,
    ) -> Result<(), ListenerError> {
        (self.f)(message)
    }
}

/// Адаптер асинхронного замыкания: `Fn(Message) -> impl Future`.
pub struct AsyncFnListener<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Оборачивает асинхронное замыкание. Сообщение передаётся по значению
/// (клонирование дешёвое: `Arc<str>` + `Bytes`).
pub fn listener_async<F, Fut>(f: F) -> AsyncFnListener<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    AsyncFnListener {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> MessageListener for AsyncFnListener<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    async fn on_message(
        &self,
        message: &Message,
    ) -> Result<(), ListenerError> {
        (self.f)(message.clone()).await
    }
}
