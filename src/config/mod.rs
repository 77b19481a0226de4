mod settings;

pub use settings::{BackendSettings, Settings, ENV_PREFIX};
