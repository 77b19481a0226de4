//! Процессный контейнер с явными точками инициализации и остановки.
//!
//! ```no_run
//! # use std::{sync::Arc, time::Duration};
//! # use listener_container::{backend::memory::*, container::{global, *}};
//! # async fn run() -> Result<(), listener_container::ContainerError> {
//! let broker = Arc::new(MemoryBroker::new());
//! let factory = Arc::new(MemoryConnectionFactory::new(broker));
//! global::install(ListenerContainer::new(factory, ContainerConfig::default())).await?;
//! // ...
//! global::teardown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use listener_container_error::ContainerError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use super::ListenerContainer;

static GLOBAL: Lazy<RwLock<Option<Arc<ListenerContainer>>>> = Lazy::new(|| RwLock::new(None));

/// Устанавливает и запускает процессный контейнер.
///
/// Возвращает `AlreadyRunning`, если контейнер уже установлен. При ошибке
/// запуска контейнер снимается.
pub async fn install(container: ListenerContainer) -> Result<Arc<ListenerContainer>, ContainerError> {
    let container = Arc::new(container);
    {
        let mut slot = GLOBAL.write();
        if slot.is_some() {
            return Err(ContainerError::AlreadyRunning);
        }
        *slot = Some(container.clone());
    }

    if let Err(e) = container.start().await {
        let mut slot = GLOBAL.write();
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, &container)) {
            slot.take();
        }
        return Err(e);
    }

    info!("Global listener container installed");
    Ok(container)
}

/// Текущий процессный контейнер.
pub fn global() -> Option<Arc<ListenerContainer>> {
    GLOBAL.read().clone()
}

/// Снимает и останавливает процессный контейнер.
///
/// `NotRunning`, если контейнер не установлен. Контейнер, уже
/// остановленный после фатальной ошибки, снимается без ошибки.
pub async fn teardown(timeout: Duration) -> Result<(), ContainerError> {
    let container = GLOBAL.write().take().ok_or(ContainerError::NotRunning)?;
    let result = match container.stop(timeout).await {
        Err(ContainerError::NotRunning) => Ok(()),
        other => other,
    };
    info!("Global listener container removed");
    result
}
