use std::path::Path;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use listener_container_error::{ensure, StackResult, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{container::ContainerConfig, logging::LoggingConfig};

/// Префикс переменных окружения.
pub const ENV_PREFIX: &str = "LISTENER";

const MAX_DISPATCH_WORKERS: usize = 1024;

/// Выбор backend'а.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSettings {
    /// Брокер в памяти процесса.
    #[default]
    Memory,
    /// Redis Pub/Sub; требует feature `redis-backend`.
    Redis { url: String },
}

/// Настройки приложения.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub container: ContainerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл (если указан),
    /// затем переменные окружения вида `LISTENER_CONTAINER__DISPATCH_WORKERS`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder.add_source(Self::environment()).build()?.try_deserialize()
    }

    /// Разбирает настройки из строки TOML поверх значений по умолчанию, без
    /// учёта окружения.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Проверяет значения, которые десериализуются, но не имеют смысла.
    pub fn validate(&self) -> StackResult<()> {
        let container = &self.container;
        let retry = &container.retry;
        ensure!(
            container.dispatch_workers <= MAX_DISPATCH_WORKERS,
            StatusCode::InvalidArgs,
            "container.dispatch_workers must be at most {}, got {}",
            MAX_DISPATCH_WORKERS,
            container.dispatch_workers
        );
        ensure!(
            container.dispatch_workers == 0 || container.worker_queue_capacity > 0,
            StatusCode::InvalidArgs,
            "container.worker_queue_capacity must be positive"
        );
        ensure!(
            (0.0..=1.0).contains(&retry.jitter),
            StatusCode::InvalidArgs,
            "container.retry.jitter must be within 0.0..=1.0, got {}",
            retry.jitter
        );
        ensure!(
            retry.base_delay_ms <= retry.max_delay_ms,
            StatusCode::InvalidArgs,
            "container.retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
            retry.base_delay_ms,
            retry.max_delay_ms
        );
        if let BackendSettings::Redis { url } = &self.backend {
            ensure!(
                !url.is_empty(),
                StatusCode::InvalidArgs,
                "backend.url must not be empty"
            );
        }
        Ok(())
    }

    fn defaults() -> Result<::config::ConfigBuilder<::config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("backend.kind", "memory")?
            .set_default("container.dispatch_workers", 4)?
            .set_default("logging.level", "info")
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }
}
