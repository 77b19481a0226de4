//! Dispatch Loop и жизненный цикл контейнера слушателей.
//!
//! [`ListenerContainer`] собирается композицией из трёх частей:
//! [`ConnectionManager`], [`SubscriptionRegistry`] и фоновой задачи
//! диспетчеризации, которая запускается в [`ListenerContainer::start`] и
//! останавливается в [`ListenerContainer::stop`].

mod dispatch;
mod executor;
pub mod global;
mod metrics;
mod observer;
mod state;

pub use metrics::{ContainerMetrics, ContainerStats};
pub use observer::{
    observer_fn, ContainerEvent, ErrorObserver, FnObserver, ListenerFailure, LoggingObserver,
};
pub use state::ContainerState;

use std::{fmt, sync::Arc, time::Duration};

use listener_container_error::{ContainerError, RegistryError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use self::{dispatch::DispatchTask, state::ResetOnDrop};
use crate::{
    connection::{
        backoff::as_millis_saturating, ConnectionFactory, ConnectionManager, RetryPolicy,
    },
    pubsub::{MessageListener, Topic},
    registry::{SubscriptionId, SubscriptionRegistry},
};

/// Настройки контейнера.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// `0`: слушатели вызываются прямо в цикле диспетчеризации (полный
    /// порядок), иначе число воркеров с шардированием по каналу.
    pub dispatch_workers: usize,
    /// Ёмкость очереди каждого воркера.
    pub worker_queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Таймаут для [`ListenerContainer::shutdown`], мс.
    pub shutdown_timeout_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: 4,
            worker_queue_capacity: 1024,
            retry: RetryPolicy::default(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ContainerConfig {
    /// Конфигурация с вызовом слушателей в цикле диспетчеризации.
    pub fn inline() -> Self {
        Self {
            dispatch_workers: 0,
            ..Default::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Состояние, разделяемое контейнером и задачей диспетчеризации.
pub(crate) struct Shared {
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) observer: Arc<dyn ErrorObserver>,
    pub(crate) metrics: Arc<ContainerMetrics>,
    pub(crate) state: watch::Sender<ContainerState>,
    /// Последнее поколение реестра, применённое к backend'у.
    pub(crate) synced: watch::Sender<u64>,
    pub(crate) config: ContainerConfig,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Контейнер слушателей Pub/Sub.
pub struct ListenerContainer {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ListenerContainer {
    /// Создаёт остановленный контейнер с логирующим наблюдателем ошибок.
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: ContainerConfig,
    ) -> Self {
        Self::with_observer(factory, config, Arc::new(LoggingObserver))
    }

    pub fn with_observer(
        factory: Arc<dyn ConnectionFactory>,
        config: ContainerConfig,
        observer: Arc<dyn ErrorObserver>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(factory, config.retry.clone()));
        let shared = Shared {
            registry: Arc::new(SubscriptionRegistry::new()),
            manager,
            observer,
            metrics: Arc::new(ContainerMetrics::default()),
            state: watch::Sender::new(ContainerState::Stopped),
            synced: watch::Sender::new(0),
            config,
        };
        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    /// Регистрирует слушателя. Можно вызывать в любом состоянии; работающий
    /// контейнер подпишет backend на новую тему в фоне.
    pub fn subscribe<L: MessageListener>(
        &self,
        topic: Topic,
        listener: L,
    ) -> SubscriptionId {
        self.shared.registry.subscribe(topic, listener)
    }

    pub fn subscribe_str<L: MessageListener>(
        &self,
        topic: &str,
        listener: L,
    ) -> Result<SubscriptionId, RegistryError> {
        self.shared.registry.subscribe_str(topic, listener)
    }

    /// Удаляет подписку. Сообщения, опубликованные после возврата, этому
    /// слушателю не доставляются.
    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> Result<(), RegistryError> {
        self.shared.registry.unsubscribe(id)
    }

    /// Запускает контейнер: Stopped → Starting → Running.
    ///
    /// Получает соединение (с повторами по политике), подписывает его на все
    /// зарегистрированные темы и запускает задачу диспетчеризации.
    ///
    /// # Ошибки
    /// - `AlreadyRunning`: контейнер не в состоянии `Stopped`;
    /// - `Connection`: соединение не получено или подписка не удалась;
    ///   состояние возвращается в `Stopped`.
    pub async fn start(&self) -> Result<(), ContainerError> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ContainerState::Stopped {
                *state = ContainerState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ContainerError::AlreadyRunning);
        }
        let mut reset = ResetOnDrop::new(&self.shared.state);

        let lease = self.shared.manager.acquire().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut task = DispatchTask::new(self.shared.clone(), lease, shutdown_rx);
        task.sync_topics().await?;

        let mut running = self.running.lock();
        self.shared.state.send_replace(ContainerState::Running);
        let handle = tokio::spawn(task.run());
        *running = Some(Running {
            handle,
            shutdown: shutdown_tx,
        });
        reset.disarm();

        info!(
            endpoint = %self.shared.manager.endpoint(),
            topics = self.shared.registry.topics().len(),
            workers = self.shared.config.dispatch_workers,
            "Listener container started"
        );
        Ok(())
    }

    /// Останавливает контейнер: → Stopping → Stopped.
    ///
    /// Прекращает приём сообщений и ждёт до `timeout` завершения
    /// выполняющихся и поставленных в очередь вызовов. По истечении срока
    /// оставшиеся вызовы прерываются, состояние всё равно становится
    /// `Stopped`, а вызывающий получает `Timeout`.
    pub async fn stop(
        &self,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let running = {
            let mut slot = self.running.lock();
            if *self.shared.state.borrow() == ContainerState::Stopped {
                slot.take();
                return Err(ContainerError::NotRunning);
            }
            slot.take()
        };
        let Some(Running {
            mut handle,
            shutdown,
        }) = running
        else {
            return Err(ContainerError::NotRunning);
        };

        let _reset = ResetOnDrop::new(&self.shared.state);
        self.shared.state.send_replace(ContainerState::Stopping);
        let _ = shutdown.send(true);

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    error!(error = %e, "Dispatch task failed");
                }
                info!("Listener container stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_ms = as_millis_saturating(timeout),
                    "Listeners did not drain in time, abandoning in-flight calls"
                );
                handle.abort();
                let _ = handle.await;
                Err(ContainerError::Timeout {
                    timeout_ms: as_millis_saturating(timeout),
                })
            }
        }
    }

    /// `stop` с таймаутом из конфигурации.
    pub async fn shutdown(&self) -> Result<(), ContainerError> {
        self.stop(self.shared.config.shutdown_timeout()).await
    }

    pub fn state(&self) -> ContainerState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ContainerState> {
        self.shared.state.subscribe()
    }

    /// Ждёт, пока цикл диспетчеризации применит к backend'у все изменения
    /// реестра, сделанные до вызова.
    ///
    /// # Ошибки
    /// - `NotRunning`: контейнер не работает (или остановился во время
    ///   ожидания);
    /// - `Timeout`: не успели за `timeout`.
    pub async fn sync_subscriptions(
        &self,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let target = self.shared.registry.generation();
        let mut synced = self.shared.synced.subscribe();
        let mut state = self.shared.state.subscribe();

        let wait = async move {
            loop {
                if *state.borrow_and_update() != ContainerState::Running {
                    return Err(ContainerError::NotRunning);
                }
                if *synced.borrow_and_update() >= target {
                    return Ok(());
                }
                tokio::select! {
                    _ = synced.changed() => {}
                    _ = state.changed() => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(ContainerError::Timeout {
                timeout_ms: as_millis_saturating(timeout),
            }))
    }

    pub fn stats(&self) -> ContainerStats {
        self.shared.metrics.snapshot()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.shared.manager
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.shared.config
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация типажей
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for ListenerContainer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ListenerContainer")
            .field("state", &self.state())
            .field("subscriptions", &self.shared.registry.len())
            .field("manager", &self.shared.manager)
            .finish()
    }
}

impl Drop for ListenerContainer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
