//! Общие помощники интеграционных тестов.
#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use listener_container::{
    backend::memory::{MemoryBroker, MemoryConnectionFactory},
    listener_fn, ContainerConfig, ErrorObserver, ListenerContainer, Message, MessageListener,
    RetryPolicy,
};
use parking_lot::Mutex;

/// Таймаут ожидания условий в тестах.
pub const WAIT: Duration = Duration::from_secs(5);

/// Слушатель, запоминающий всё, что ему доставили.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Message>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl MessageListener {
        let seen = self.seen.clone();
        listener_fn(move |msg: &Message| {
            seen.lock().push(msg.clone());
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.seen.lock().iter().map(|m| m.channel.to_string()).collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.seen.lock().clone()
    }
}

/// Быстрая политика повторов без джиттера.
pub fn fast_retry(max_retries: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 5,
        max_delay_ms: 50,
        jitter: 0.0,
        max_retries,
    }
}

pub fn memory_container(config: ContainerConfig) -> (Arc<MemoryBroker>, ListenerContainer) {
    let broker = Arc::new(MemoryBroker::new());
    let factory = Arc::new(MemoryConnectionFactory::new(broker.clone()));
    (broker, ListenerContainer::new(factory, config))
}

pub fn memory_container_observed(
    config: ContainerConfig,
    observer: Arc<dyn ErrorObserver>,
) -> (Arc<MemoryBroker>, ListenerContainer) {
    let broker = Arc::new(MemoryBroker::new());
    let factory = Arc::new(MemoryConnectionFactory::new(broker.clone()));
    (
        broker,
        ListenerContainer::with_observer(factory, config, observer),
    )
}

/// Опрашивает условие, пока оно не станет истинным или не выйдет `timeout`.
pub async fn wait_until(
    timeout: Duration,
    cond: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
