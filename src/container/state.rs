use std::fmt;

use tokio::sync::watch;

/// Состояние контейнера.
///
/// Меняется только кодом жизненного цикла контейнера и циклом
/// диспетчеризации, остальные наблюдают через `watch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ContainerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerState::Stopped => "stopped",
            ContainerState::Starting => "starting",
            ContainerState::Running => "running",
            ContainerState::Stopping => "stopping",
        }
    }

    pub fn is_running(self) -> bool {
        self == ContainerState::Running
    }
}

impl fmt::Display for ContainerState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Возвращает состояние в `Stopped` при drop'е, если не разоружён.
///
/// Покрывает ошибку и отмену future в `start()`/`stop()`.
pub(crate) struct ResetOnDrop<'a> {
    state: &'a watch::Sender<ContainerState>,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    pub(crate) fn new(state: &'a watch::Sender<ContainerState>) -> Self {
        Self { state, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(ContainerState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ContainerState::default(), ContainerState::Stopped);
        assert_eq!(ContainerState::Stopping.to_string(), "stopping");
        assert!(ContainerState::Running.is_running());
        assert!(!ContainerState::Starting.is_running());
    }

    #[test]
    fn test_reset_on_drop() {
        let state = watch::Sender::new(ContainerState::Starting);
        drop(ResetOnDrop::new(&state));
        assert_eq!(*state.borrow(), ContainerState::Stopped);

        state.send_replace(ContainerState::Running);
        let mut guard = ResetOnDrop::new(&state);
        guard.disarm();
        drop(guard);
        assert_eq!(*state.borrow(), ContainerState::Running);
    }
}
