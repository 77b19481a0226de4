use std::{collections::BTreeSet, sync::Arc};

use listener_container_error::ConnectionError;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::{
    executor::{Executor, Invoker},
    state::ContainerState,
    Shared,
};
use crate::{
    connection::{Delivery, Lease},
    pubsub::{Message, Topic},
    registry::MatchedListener,
};

/// Причина завершения цикла диспетчеризации.
enum Exit {
    /// Запрошена остановка.
    Shutdown,
    /// Соединение не восстановить.
    Fatal(ConnectionError),
}

/// Фоновая задача: принимает сообщения, синхронизирует подписки backend'а
/// с реестром и передаёт сообщения исполнителю.
pub(crate) struct DispatchTask {
    shared: Arc<Shared>,
    lease: Option<Lease>,
    /// Темы, на которые подписано текущее соединение.
    subscribed: BTreeSet<Topic>,
    executor: Executor,
    shutdown: watch::Receiver<bool>,
    changes: watch::Receiver<u64>,
}

impl DispatchTask {
    pub(crate) fn new(
        shared: Arc<Shared>,
        lease: Lease,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let invoker = Invoker::new(shared.observer.clone(), shared.metrics.clone());
        let executor = Executor::new(
            shared.config.dispatch_workers,
            shared.config.worker_queue_capacity,
            invoker,
        );
        let changes = shared.registry.changes();
        Self {
            shared,
            lease: Some(lease),
            subscribed: BTreeSet::new(),
            executor,
            shutdown,
            changes,
        }
    }

    /// Приводит подписки соединения к набору тем реестра и публикует
    /// применённое поколение.
    pub(crate) async fn sync_topics(&mut self) -> Result<(), ConnectionError> {
        let generation = *self.changes.borrow_and_update();
        let desired = self.shared.registry.topics();
        let Some(lease) = self.lease.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let stale: Vec<Topic> = self.subscribed.difference(&desired).cloned().collect();
        for topic in stale {
            lease.unsubscribe(&topic).await?;
            self.subscribed.remove(&topic);
            debug!(topic = %topic, "Backend subscription removed");
        }

        let missing: Vec<Topic> = desired.difference(&self.subscribed).cloned().collect();
        for topic in missing {
            lease.subscribe(&topic).await?;
            debug!(topic = %topic, "Backend subscription added");
            self.subscribed.insert(topic);
        }

        self.shared.synced.send_replace(generation);
        trace!(generation, topics = self.subscribed.len(), "Subscriptions in sync");
        Ok(())
    }

    pub(crate) async fn run(mut self) {
        match self.run_loop().await {
            Exit::Shutdown => {
                self.executor.drain().await;
                if let Some(lease) = self.lease.take() {
                    self.shared.manager.release(lease).await;
                }
                info!("Dispatch loop stopped");
            }
            Exit::Fatal(err) => {
                self.shared.state.send_replace(ContainerState::Stopping);
                error!(error = %err, "Dispatch loop cannot reconnect, stopping container");
                self.shared.observer.on_fatal(&err);
                self.executor.drain().await;
                self.shared.state.send_replace(ContainerState::Stopped);
            }
        }
    }

    async fn run_loop(&mut self) -> Exit {
        loop {
            tokio::select! {
                biased;

                _ = wait_shutdown(&mut self.shutdown) => return Exit::Shutdown,

                changed = self.changes.changed() => {
                    if changed.is_err() {
                        return Exit::Shutdown;
                    }
                    if let Err(err) = self.sync_topics().await {
                        if let Some(exit) = self.recover(err).await {
                            return exit;
                        }
                    }
                }

                received = receive(&mut self.lease) => match received {
                    Ok(message) => self.dispatch(message).await,
                    Err(err) => {
                        if let Some(exit) = self.recover(err).await {
                            return exit;
                        }
                    }
                },
            }
        }
    }

    async fn dispatch(
        &mut self,
        message: Message,
    ) {
        self.shared.metrics.record_received();

        let state = *self.shared.state.borrow();
        if state != ContainerState::Running {
            trace!(state = %state, channel = %message.channel, "Message ignored, container not running");
            return;
        }

        let listeners = self.select(&message);
        if listeners.is_empty() {
            self.shared.metrics.record_unrouted();
            trace!(channel = %message.channel, "No listeners for message");
            return;
        }

        self.executor.submit(message, listeners).await;
    }

    /// Слушатели для полученной копии сообщения, в порядке регистрации.
    ///
    /// Если соединение присылает одну копию на публикацию, выбираются все
    /// совпавшие подписки. Иначе каждая копия несёт свой источник, и
    /// выбираются только подписки этого источника, чтобы слушатель не
    /// вызывался дважды; порядок тогда соблюдается внутри одной копии.
    fn select(
        &self,
        message: &Message,
    ) -> Vec<MatchedListener> {
        let delivery = self
            .lease
            .as_ref()
            .map_or(Delivery::PerSubscription, |lease| lease.delivery());
        match delivery {
            Delivery::PerPublication => self.shared.registry.matches(&message.channel),
            Delivery::PerSubscription => self.shared.registry.route(message),
        }
    }

    /// Переподключается после потери соединения.
    ///
    /// Возвращает `Some(exit)`, если цикл должен завершиться.
    async fn recover(
        &mut self,
        mut err: ConnectionError,
    ) -> Option<Exit> {
        let policy = self.shared.manager.policy().clone();
        let mut failed_syncs: u32 = 0;

        loop {
            self.shared.manager.report_disconnect(&err);
            self.lease = None;
            self.subscribed.clear();

            let acquired = tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => return Some(Exit::Shutdown),
                acquired = self.shared.manager.acquire() => acquired,
            };
            match acquired {
                Ok(lease) => self.lease = Some(lease),
                Err(fatal) => return Some(Exit::Fatal(fatal)),
            }

            match self.sync_topics().await {
                Ok(()) => {
                    self.shared.metrics.record_reconnect();
                    info!(topics = self.subscribed.len(), "Reconnected and resubscribed");
                    return None;
                }
                Err(sync_err) => {
                    warn!(error = %sync_err, "Resubscribe after reconnect failed");
                    if !policy.allows_retry(failed_syncs) {
                        return Some(Exit::Fatal(ConnectionError::RetriesExhausted {
                            attempts: failed_syncs.saturating_add(1),
                            last: Box::new(sync_err),
                        }));
                    }
                    let delay = policy.delay_for(failed_syncs);
                    failed_syncs += 1;
                    err = sync_err;
                    tokio::select! {
                        biased;
                        _ = wait_shutdown(&mut self.shutdown) => return Some(Exit::Shutdown),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Завершается, когда запрошена остановка или отправитель удалён.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn receive(lease: &mut Option<Lease>) -> Result<Message, ConnectionError> {
    match lease {
        Some(lease) => lease.receive().await,
        None => std::future::pending().await,
    }
}
