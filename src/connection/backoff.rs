use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Политика переподключения: экспоненциальный backoff с джиттером.
///
/// Задержка перед повтором `n` (с нуля): `min(base * 2^n, max)`, умноженная
/// на случайный множитель из `[1 - jitter, 1 + jitter]` и снова ограниченная
/// `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Базовая задержка, мс.
    pub base_delay_ms: u64,
    /// Верхняя граница задержки, мс.
    pub max_delay_ms: u64,
    /// Доля джиттера, `0.0..=1.0`.
    pub jitter: f64,
    /// Сколько повторов после первой попытки. `None` означает без ограничения.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            jitter: 0.2,
            max_retries: Some(10),
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Разрешён ли ещё один повтор после `retries_done` повторов.
    pub fn allows_retry(
        &self,
        retries_done: u32,
    ) -> bool {
        self.max_retries.map_or(true, |max| retries_done < max)
    }

    /// Задержка без джиттера.
    pub fn nominal_delay(
        &self,
        retry: u32,
    ) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay()
            .saturating_mul(factor)
            .min(self.max_delay())
    }

    /// Задержка перед повтором `retry` с джиттером из `thread_rng`.
    pub fn delay_for(
        &self,
        retry: u32,
    ) -> Duration {
        self.delay_with_rng(retry, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        retry: u32,
        rng: &mut R,
    ) -> Duration {
        let nominal = self.nominal_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let factor = 1.0 + rng.gen_range(-jitter..=jitter);
        nominal.mul_f64(factor).min(self.max_delay())
    }
}

/// Длительность в миллисекундах с насыщением на `u64::MAX`.
pub(crate) fn as_millis_saturating(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
