use std::{
    fmt,
    ops::{Deref, DerefMut},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use listener_container_error::ConnectionError;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{
    backoff::as_millis_saturating, BoxConnection, Connection, ConnectionFactory, RetryPolicy,
};

/// Колбэк, вызываемый при потере соединения.
pub type DisconnectCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

/// Владеет фабрикой соединений и политикой переподключения.
///
/// Гарантирует, что одновременно существует не более одного активного
/// соединения: слот занимается в [`ConnectionManager::acquire`] и
/// освобождается при drop'е [`Lease`].
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    policy: RetryPolicy,
    busy: Arc<AtomicBool>,
    callbacks: RwLock<Vec<DisconnectCallback>>,
    stats: StatsInner,
}

#[derive(Default)]
struct StatsInner {
    attempts: AtomicU64,
    connects: AtomicU64,
    failures: AtomicU64,
    disconnects: AtomicU64,
}

/// Снимок счётчиков менеджера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Все попытки `connect`, включая неудачные.
    pub attempts: u64,
    /// Успешные подключения.
    pub connects: u64,
    /// Неудачные попытки.
    pub failures: u64,
    /// Зарегистрированные потери соединения.
    pub disconnects: u64,
}

/// Занятый слот активного соединения. Освобождается при drop'е.
struct Slot(Arc<AtomicBool>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Активное соединение, выданное менеджером.
///
/// Пока `Lease` жив, повторный `acquire` возвращает
/// [`ConnectionError::AlreadyAcquired`].
pub struct Lease {
    conn: BoxConnection,
    _slot: Slot,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            factory,
            policy,
            busy: Arc::new(AtomicBool::new(false)),
            callbacks: RwLock::new(Vec::new()),
            stats: StatsInner::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn endpoint(&self) -> String {
        self.factory.endpoint()
    }

    /// Выдано ли сейчас активное соединение.
    pub fn is_acquired(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Устанавливает соединение, повторяя retryable-ошибки по политике.
    ///
    /// # Ошибки
    /// - `AlreadyAcquired`: предыдущий `Lease` ещё жив;
    /// - неretryable-ошибка фабрики возвращается сразу;
    /// - `RetriesExhausted`: лимит повторов исчерпан.
    ///
    /// Отмена future освобождает слот.
    pub async fn acquire(&self) -> Result<Lease, ConnectionError> {
        let slot = self.claim_slot()?;
        let endpoint = self.factory.endpoint();
        let mut retries: u32 = 0;

        loop {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let err = match self.factory.connect().await {
                Ok(conn) => {
                    self.stats.connects.fetch_add(1, Ordering::Relaxed);
                    info!(endpoint = %endpoint, retries, "Connected to backend");
                    return Ok(Lease { conn, _slot: slot });
                }
                Err(err) => err,
            };
            self.stats.failures.fetch_add(1, Ordering::Relaxed);

            if !err.is_retryable() {
                error!(endpoint = %endpoint, error = %err, "Connection attempt failed permanently");
                return Err(err);
            }

            if !self.policy.allows_retry(retries) {
                let attempts = retries.saturating_add(1);
                error!(endpoint = %endpoint, attempts, error = %err, "Giving up on backend");
                return Err(ConnectionError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(retries);
            warn!(
                endpoint = %endpoint,
                retry = retries + 1,
                delay_ms = as_millis_saturating(delay),
                error = %err,
                "Connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    /// Закрывает соединение и освобождает слот. Ошибка закрытия только
    /// логируется.
    pub async fn release(
        &self,
        lease: Lease,
    ) {
        let Lease { mut conn, _slot } = lease;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error while closing connection");
        }
        debug!(endpoint = %self.factory.endpoint(), "Connection released");
    }

    /// Регистрирует колбэк на потерю соединения.
    pub fn on_disconnect<F>(
        &self,
        callback: F,
    ) where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Сообщает о потере соединения: увеличивает счётчик и вызывает колбэки.
    /// Паника в колбэке логируется и не распространяется.
    pub fn report_disconnect(
        &self,
        err: &ConnectionError,
    ) {
        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        warn!(endpoint = %self.factory.endpoint(), error = %err, "Connection lost");

        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
                error!("Disconnect callback panicked");
            }
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            connects: self.stats.connects.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            disconnects: self.stats.disconnects.load(Ordering::Relaxed),
        }
    }

    fn claim_slot(&self) -> Result<Slot, ConnectionError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Slot(self.busy.clone()))
            .map_err(|_| ConnectionError::AlreadyAcquired)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация типажей
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for ConnectionManager {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.factory.endpoint())
            .field("policy", &self.policy)
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

impl Deref for Lease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl fmt::Debug for Lease {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, AtomicUsize},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::backend::memory::{MemoryBroker, MemoryConnectionFactory};

    /// Фабрика, которая первые `failures` раз возвращает `error`.
    struct FlakyFactory {
        broker: Arc<MemoryBroker>,
        failures: AtomicU32,
        error: ConnectionError,
    }

    #[async_trait]
    impl ConnectionFactory for FlakyFactory {
        async fn connect(&self) -> Result<BoxConnection, ConnectionError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            let conn = self.broker.connect()?;
            Ok(Box::new(conn))
        }

        fn endpoint(&self) -> String {
            "flaky://test".to_string()
        }
    }

    fn flaky(
        failures: u32,
        error: ConnectionError,
    ) -> Arc<FlakyFactory> {
        Arc::new(FlakyFactory {
            broker: Arc::new(MemoryBroker::new()),
            failures: AtomicU32::new(failures),
            error,
        })
    }

    fn refused() -> ConnectionError {
        ConnectionError::ConnectFailed {
            endpoint: "flaky://test".to_string(),
            reason: "refused".to_string(),
        }
    }

    fn no_jitter(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            max_retries,
            ..Default::default()
        }
    }

    /// Тест проверяет, что одновременно выдаётся не более одного соединения,
    /// а drop `Lease` освобождает слот.
    #[tokio::test]
    async fn test_single_active_connection() {
        let broker = Arc::new(MemoryBroker::new());
        let manager = ConnectionManager::new(
            Arc::new(MemoryConnectionFactory::new(broker)),
            RetryPolicy::default(),
        );

        let lease = manager.acquire().await.unwrap();
        assert!(manager.is_acquired());
        assert_eq!(
            manager.acquire().await.unwrap_err(),
            ConnectionError::AlreadyAcquired
        );

        drop(lease);
        assert!(!manager.is_acquired());
        let lease = manager.acquire().await.unwrap();
        manager.release(lease).await;
        assert!(!manager.is_acquired());
        assert_eq!(manager.stats().connects, 2);
    }

    /// Тест проверяет паузы между попытками: 200 + 400 + 800 мс.
    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let manager = ConnectionManager::new(flaky(3, refused()), no_jitter(Some(5)));

        let started = tokio::time::Instant::now();
        let _lease = manager.acquire().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(1400), "elapsed={elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "elapsed={elapsed:?}");

        let stats = manager.stats();
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.connects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let manager = ConnectionManager::new(flaky(u32::MAX, refused()), no_jitter(Some(2)));

        let err = manager.acquire().await.unwrap_err();
        match err {
            ConnectionError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(*last, refused());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!manager.is_acquired());
        assert_eq!(manager.stats().attempts, 3);
    }

    /// Тест проверяет, что неretryable-ошибка не повторяется.
    #[tokio::test]
    async fn test_non_retryable_error_returned_immediately() {
        let protocol = ConnectionError::Protocol {
            reason: "bad handshake".to_string(),
        };
        let manager = ConnectionManager::new(flaky(1, protocol.clone()), RetryPolicy::default());

        assert_eq!(manager.acquire().await.unwrap_err(), protocol);
        assert_eq!(manager.stats().attempts, 1);
        assert!(!manager.is_acquired());
    }

    /// Тест проверяет, что отменённый `acquire` освобождает слот.
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_frees_slot() {
        let manager = ConnectionManager::new(flaky(1, refused()), no_jitter(None));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), manager.acquire()).await;
        assert!(cancelled.is_err());
        assert!(!manager.is_acquired());

        assert!(manager.acquire().await.is_ok());
    }

    #[test]
    fn test_disconnect_callbacks() {
        let manager = ConnectionManager::new(flaky(0, refused()), RetryPolicy::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        manager.on_disconnect(move |err| {
            assert_eq!(err, &ConnectionError::Closed);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.on_disconnect(|_| panic!("callback failure"));
        let counter = hits.clone();
        manager.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.report_disconnect(&ConnectionError::Closed);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().disconnects, 1);
    }
}
