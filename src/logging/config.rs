use std::{env, fmt, fs, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Переменная окружения, переопределяющая уровень логирования.
pub const LOG_LEVEL_ENV: &str = "LISTENER_LOG_LEVEL";
/// Переменная окружения, переопределяющая формат логов.
pub const LOG_FORMAT_ENV: &str = "LISTENER_LOG_FORMAT";

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Формат вывода логов.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Ошибки конфигурации логирования.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingConfigError {
    #[error("Unknown log level '{0}'")]
    InvalidLevel(String),

    #[error("Unknown log format '{0}'")]
    InvalidFormat(String),

    #[error("File logging is enabled but file name is empty")]
    EmptyFileName,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub file_enabled: bool,
    /// Каталог для файлов логов (ежедневная ротация)
    pub log_dir: PathBuf,
    pub file_name: String,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            console_enabled: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "listener-container.log".to_string(),
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl LoggingConfig {
    /// Применяет `LISTENER_LOG_LEVEL` и `LISTENER_LOG_FORMAT`, если заданы.
    /// Некорректный формат игнорируется.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            self.level = level.trim().to_ascii_lowercase();
        }
        if let Ok(raw) = env::var(LOG_FORMAT_ENV) {
            if let Ok(format) = raw.parse() {
                self.format = format;
            }
        }
    }

    /// Уровень входит в список известных.
    pub fn has_known_level(&self) -> bool {
        LEVELS.contains(&self.level.as_str())
    }

    pub fn validate(&self) -> Result<(), LoggingConfigError> {
        if !self.has_known_level() {
            return Err(LoggingConfigError::InvalidLevel(self.level.clone()));
        }
        if self.file_enabled && self.file_name.trim().is_empty() {
            return Err(LoggingConfigError::EmptyFileName);
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён вывод в файл.
    pub fn ensure_log_dir(&self) -> io::Result<()> {
        if self.file_enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`. Шумные зависимости ограничены `warn`.
    pub fn build_filter_directive(&self) -> String {
        format!("{},redis=warn,globset=warn", self.level)
    }

    /// Полный путь к текущему файлу логов (без суффикса ротации).
    pub fn file_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
}

impl FromStr for LogFormat {
    type Err = LoggingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingConfigError::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}
