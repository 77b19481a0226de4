use std::{
    any::Any,
    hash::{Hash, Hasher},
    sync::Arc,
};

use listener_container_error::ListenerError;
use rustc_hash::FxHasher;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, error, trace};

use super::{
    metrics::ContainerMetrics,
    observer::{ErrorObserver, ListenerFailure},
};
use crate::{pubsub::Message, registry::MatchedListener};

/// Вызывает слушателей одной доставки с изоляцией ошибок и паник.
pub(crate) struct Invoker {
    observer: Arc<dyn ErrorObserver>,
    metrics: Arc<ContainerMetrics>,
}

impl Invoker {
    pub(crate) fn new(
        observer: Arc<dyn ErrorObserver>,
        metrics: Arc<ContainerMetrics>,
    ) -> Self {
        Self { observer, metrics }
    }

    /// Вызывает слушателей по очереди, в порядке регистрации.
    ///
    /// Каждый вызов выполняется в отдельной задаче `JoinSet`: паника
    /// перехватывается, а drop этого future прерывает незавершённый вызов.
    pub(crate) async fn deliver(
        &self,
        message: Message,
        listeners: Vec<MatchedListener>,
    ) {
        let mut calls = JoinSet::new();

        for matched in listeners {
            let listener = matched.listener.clone();
            let msg = message.for_topic(&matched.topic);
            calls.spawn(async move { listener.on_message(&msg).await });

            self.metrics.record_invocation();
            let error = match calls.join_next().await {
                Some(Ok(Ok(()))) | None => continue,
                Some(Ok(Err(error))) => error,
                Some(Err(join_err)) if join_err.is_panic() => ListenerError::Panicked {
                    reason: panic_reason(join_err.into_panic()),
                },
                Some(Err(_)) => {
                    debug!(subscription = %matched.id, "Listener call cancelled");
                    return;
                }
            };

            self.metrics.record_failure();
            self.observer.on_listener_error(&ListenerFailure {
                subscription: matched.id,
                topic: matched.topic,
                channel: message.channel.clone(),
                error,
            });
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Задание для воркера: одно сообщение и его слушатели.
struct Job {
    message: Message,
    listeners: Vec<MatchedListener>,
}

/// Режим выполнения слушателей.
pub(crate) enum Executor {
    /// Все вызовы на задаче диспетчеризации, полный порядок доставок.
    Inline(Invoker),
    /// Пул воркеров с шардированием по каналу.
    Sharded(Sharded),
}

pub(crate) struct Sharded {
    queues: Vec<mpsc::Sender<Job>>,
    workers: JoinSet<()>,
}

impl Executor {
    /// `workers == 0` означает inline, иначе пул из `workers` воркеров с очередями
    /// ёмкостью `queue_capacity`.
    pub(crate) fn new(
        workers: usize,
        queue_capacity: usize,
        invoker: Invoker,
    ) -> Self {
        if workers == 0 {
            return Executor::Inline(invoker);
        }

        let invoker = Arc::new(invoker);
        let mut queues = Vec::with_capacity(workers);
        let mut set = JoinSet::new();
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            queues.push(tx);
            set.spawn(run_worker(worker, rx, invoker.clone()));
        }
        debug!(workers, queue_capacity, "Dispatch worker pool started");

        Executor::Sharded(Sharded {
            queues,
            workers: set,
        })
    }

    /// Передаёт доставку на выполнение. В режиме пула ждёт места в очереди
    /// шарда.
    pub(crate) async fn submit(
        &mut self,
        message: Message,
        listeners: Vec<MatchedListener>,
    ) {
        match self {
            Executor::Inline(invoker) => invoker.deliver(message, listeners).await,
            Executor::Sharded(pool) => {
                let shard = shard_for(&message.channel, pool.queues.len());
                let job = Job { message, listeners };
                if pool.queues[shard].send(job).await.is_err() {
                    error!(shard, "Dispatch worker is gone, message dropped");
                }
            }
        }
    }

    /// Дожидается выполнения всех уже принятых доставок.
    pub(crate) async fn drain(self) {
        let Executor::Sharded(Sharded { queues, mut workers }) = self else {
            return;
        };
        drop(queues);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch worker failed");
            }
        }
        debug!("Dispatch worker pool drained");
    }
}

async fn run_worker(
    worker: usize,
    mut queue: mpsc::Receiver<Job>,
    invoker: Arc<Invoker>,
) {
    while let Some(job) = queue.recv().await {
        trace!(worker, channel = %job.message.channel, "Worker picked up message");
        invoker.deliver(job.message, job.listeners).await;
    }
}

/// Номер шарда для канала: сообщения одного канала всегда попадают к одному
/// воркеру.
pub(crate) fn shard_for(
    channel: &str,
    shards: usize,
) -> usize {
    let mut hasher = FxHasher::default();
    channel.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        container::observer::{observer_fn, ContainerEvent},
        pubsub::{listener_async, listener_fn, MessageListener, Topic},
        registry::SubscriptionId,
    };

    fn matched(listener: impl MessageListener) -> MatchedListener {
        MatchedListener {
            id: SubscriptionId::next(),
            topic: Topic::channel("c"),
            listener: Arc::new(listener),
        }
    }

    fn collecting_observer() -> (Arc<dyn ErrorObserver>, Arc<Mutex<Vec<ListenerError>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let observer = observer_fn(move |event| {
            if let ContainerEvent::ListenerFailed(failure) = event {
                sink.lock().push(failure.error.clone());
            }
        });
        (Arc::new(observer), errors)
    }

    /// Тест проверяет, что ошибка и паника одного слушателя не мешают
    /// остальным и доходят до наблюдателя.
    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (observer, errors) = collecting_observer();
        let metrics = Arc::new(ContainerMetrics::default());
        let invoker = Invoker::new(observer, metrics.clone());

        let hits = Arc::new(Mutex::new(Vec::new()));
        let h1 = hits.clone();
        let h2 = hits.clone();
        let listeners = vec![
            matched(listener_fn(|_| Err(ListenerError::failed("bad")))),
            matched(listener_fn(move |_| {
                h1.lock().push("second");
                Ok(())
            })),
            matched(listener_fn(|_| panic!("listener exploded"))),
            matched(listener_fn(move |_| {
                h2.lock().push("fourth");
                Ok(())
            })),
        ];

        invoker.deliver(Message::new("c", "x"), listeners).await;

        assert_eq!(*hits.lock(), vec!["second", "fourth"]);
        assert_eq!(
            *errors.lock(),
            vec![
                ListenerError::failed("bad"),
                ListenerError::Panicked {
                    reason: "listener exploded".to_string()
                },
            ]
        );
        assert_eq!(metrics.invocations.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.failures.load(Ordering::Relaxed), 2);
    }

    /// Тест проверяет, что в режиме пула сообщения одного канала приходят
    /// слушателю в порядке отправки.
    #[tokio::test]
    async fn test_sharded_preserves_channel_order() {
        let (observer, _) = collecting_observer();
        let invoker = Invoker::new(observer, Arc::new(ContainerMetrics::default()));
        let mut executor = Executor::new(4, 2, invoker);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = matched(listener_async(move |msg: Message| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                sink.lock().push(msg.payload_str().unwrap_or_default().to_string());
                Ok(())
            }
        }));

        for i in 0..20 {
            executor
                .submit(Message::new("ordered", i.to_string()), vec![listener.clone()])
                .await;
        }
        executor.drain().await;

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[test]
    fn test_shard_is_stable() {
        let a = shard_for("orders.created", 4);
        assert_eq!(a, shard_for("orders.created", 4));
        assert!(a < 4);
        assert_eq!(shard_for("anything", 1), 0);
    }
}
