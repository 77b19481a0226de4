use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок контейнера.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Реестр подписок
/// - 3xxx: Жизненный цикл контейнера
/// - 4xxx: Слушатели (listener callbacks)
/// - 6xxx: Соединение / транспорт
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1001,
    Internal = 1002,
    InvalidArgs = 1003,

    // === 2xxx: Реестр подписок ===
    NotFound = 2000,
    InvalidPattern = 2001,

    // === 3xxx: Жизненный цикл ===
    AlreadyRunning = 3000,
    NotRunning = 3001,
    ShutdownTimeout = 3002,

    // === 4xxx: Слушатели ===
    ListenerFailed = 4000,
    ListenerPanicked = 4001,

    // === 6xxx: Соединение ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    ConnectionBusy = 6005,
    SubscribeFailed = 6006,
    RetriesExhausted = 6007,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить
    /// (переподключение, повторная подписка).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionClosed
                | Self::ConnectionFailed
                | Self::SubscribeFailed
                | Self::Io
        )
    }

    /// Ошибка вызвана неправильным использованием API (диапазоны 2xxx..3xxx
    /// и `InvalidArgs`).
    pub fn is_usage_error(&self) -> bool {
        let c = self.code();
        if (2000..=3999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Ошибка транспорта (диапазон 6xxx).
    pub fn is_transport_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::RetriesExhausted)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound => LogLevel::Debug,
            Self::InvalidArgs | Self::InvalidPattern | Self::AlreadyRunning | Self::NotRunning => {
                LogLevel::Info
            }
            Self::Timeout | Self::ConnectionClosed | Self::ShutdownTimeout => LogLevel::Warn,
            Self::Internal
            | Self::RetriesExhausted
            | Self::ListenerFailed
            | Self::ListenerPanicked => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
