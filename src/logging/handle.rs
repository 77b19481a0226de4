use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Метрики для LoggingHandle.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    /// Флаг активного shutdown
    pub shutdown_in_progress: AtomicBool,
    /// Кол-во flush операций
    pub flush_count: AtomicU64,
}

/// Статистика логирования.
#[derive(Debug, Clone, Copy)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
    pub file_sink_active: bool,
}

/// Handle для управления lifecycle логирования.
///
/// Держит guard файлового writer'а: пока handle жив, фоновый поток пишет
/// логи в файл.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
    /// Порог, после которого медленный shutdown сообщается в stderr
    flush_timeout: Duration,
}

impl LoggingMetrics {
    pub fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }

    fn start_shutdown(&self) {
        self.shutdown_in_progress.store(true, Ordering::Release);
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Отмечает запрос flush. Фактический сброс делает `WorkerGuard` при
    /// drop'е.
    pub fn flush(&self) {
        self.metrics.record_flush();
        tracing::debug!(flush_count = self.metrics.flush_count(), "Logging flush requested");
    }

    /// Останавливает фоновый writer, дожидаясь записи накопленных логов.
    pub fn shutdown(mut self) {
        self.metrics.start_shutdown();
        tracing::info!(
            flushes = self.metrics.flush_count(),
            file_sink = self.file_guard.is_some(),
            "Logging shutdown"
        );

        let started = Instant::now();
        drop(self.file_guard.take());
        let elapsed = started.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.metrics.flush_count(),
            shutdown_in_progress: self.metrics.is_shutdown_in_progress(),
            file_sink_active: self.file_guard.is_some(),
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.metrics.is_shutdown_in_progress() && self.file_guard.is_some() {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Some logs may be lost."
            );
        }
    }
}
