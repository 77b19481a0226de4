use std::sync::atomic::{AtomicU64, Ordering};

/// Счётчики контейнера.
#[derive(Debug, Default)]
pub struct ContainerMetrics {
    /// Сообщения, полученные от backend'а
    pub received: AtomicU64,
    /// Сообщения без подходящих слушателей
    pub unrouted: AtomicU64,
    /// Вызовы слушателей
    pub invocations: AtomicU64,
    /// Вызовы, завершившиеся ошибкой или паникой
    pub failures: AtomicU64,
    /// Успешные переподключения
    pub reconnects: AtomicU64,
}

/// Снимок счётчиков контейнера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub received: u64,
    pub unrouted: u64,
    pub invocations: u64,
    pub failures: u64,
    pub reconnects: u64,
}

impl ContainerMetrics {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ContainerStats {
        ContainerStats {
            received: self.received.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = ContainerMetrics::default();
        metrics.record_received();
        metrics.record_received();
        metrics.record_invocation();
        metrics.record_failure();
        metrics.record_reconnect();

        assert_eq!(
            metrics.snapshot(),
            ContainerStats {
                received: 2,
                unrouted: 0,
                invocations: 1,
                failures: 1,
                reconnects: 1,
            }
        );
    }
}
