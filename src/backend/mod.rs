//! Реализации [`ConnectionFactory`] для конкретных backend'ов.
//!
//! - [`memory`]: брокер в памяти процесса (тесты, демо, встраивание);
//! - `redis`: Redis Pub/Sub (feature `redis-backend`).

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

use std::sync::Arc;

use listener_container_error::ConnectionError;
use tracing::info;

use self::memory::{MemoryBroker, MemoryConnectionFactory};
use crate::{config::BackendSettings, connection::ConnectionFactory};

/// Backend, собранный из настроек.
pub enum Backend {
    Memory(MemoryConnectionFactory),
    #[cfg(feature = "redis-backend")]
    Redis(self::redis::RedisConnectionFactory),
}

impl Backend {
    pub fn from_settings(settings: &BackendSettings) -> Result<Self, ConnectionError> {
        let backend = match settings {
            BackendSettings::Memory => {
                Backend::Memory(MemoryConnectionFactory::new(Arc::new(MemoryBroker::new())))
            }
            #[cfg(feature = "redis-backend")]
            BackendSettings::Redis { url } => {
                Backend::Redis(self::redis::RedisConnectionFactory::new(url)?)
            }
            #[cfg(not(feature = "redis-backend"))]
            BackendSettings::Redis { url } => {
                return Err(ConnectionError::ConnectFailed {
                    endpoint: url.clone(),
                    reason: "built without the redis-backend feature".to_string(),
                });
            }
        };
        info!(endpoint = %backend.factory().endpoint(), "Backend configured");
        Ok(backend)
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        match self {
            Backend::Memory(factory) => Arc::new(factory.clone()),
            #[cfg(feature = "redis-backend")]
            Backend::Redis(factory) => Arc::new(factory.clone()),
        }
    }

    /// Брокер в памяти, если backend это `memory`.
    pub fn memory_broker(&self) -> Option<&Arc<MemoryBroker>> {
        match self {
            Backend::Memory(factory) => Some(factory.broker()),
            #[cfg(feature = "redis-backend")]
            Backend::Redis(_) => None,
        }
    }
}
