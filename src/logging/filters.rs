use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

const FALLBACK_LEVEL: &str = "info";

/// Фильтр: `RUST_LOG`, если задан, иначе директива из конфигурации.
/// Неизвестный уровень заменяется на `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    // EnvFilter принимает произвольный текст как target, поэтому уровень
    // проверяется до разбора директивы
    if !config.has_known_level() {
        eprintln!(
            "Unknown log level '{}', falling back to '{FALLBACK_LEVEL}'",
            config.level
        );
        return EnvFilter::new(FALLBACK_LEVEL);
    }
    EnvFilter::new(config.build_filter_directive())
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    // Мини-буферный writer для тестов
    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriterGuard(self.0.clone())
        }
    }

    struct VecWriterGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriterGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что уровень из конфигурации отсекает info при `warn`.
    #[test]
    #[serial]
    fn test_filter_from_config_levels() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "warn".to_string(),
            ..Default::default()
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_ansi(false)
            .with_filter(build_filter_from_config(&cfg));
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("info message that should be filtered out");
            tracing::warn!("warn message that should pass");
        });

        let out = buffer.lock().unwrap();
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("warn message that should pass"));
        assert!(!s.contains("info message that should be filtered out"));
    }

    /// Тест проверяет откат на `info`, когда уровень не распознан, даже
    /// если текст разбирается как target-директива.
    #[test]
    #[serial]
    fn test_unknown_level_falls_back() {
        env::remove_var("RUST_LOG");
        for level in ["not a level!!", "verbose", "orders"] {
            let cfg = LoggingConfig {
                level: level.to_string(),
                ..Default::default()
            };
            assert!(!cfg.has_known_level());
            let filter = build_filter_from_config(&cfg);
            assert_eq!(filter.to_string(), "info");
        }
    }

    /// Тест проверяет, что известный уровень попадает в фильтр вместе с
    /// ограничениями для зависимостей.
    #[test]
    #[serial]
    fn test_known_level_builds_directive() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        let rendered = build_filter_from_config(&cfg).to_string();
        assert!(rendered.contains("debug"));
        assert!(rendered.contains("redis=warn"));
        assert!(rendered.contains("globset=warn"));
    }

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        env::set_var("RUST_LOG", "debug");
        let filter = build_filter_from_config(&LoggingConfig::default());
        env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "debug");
    }
}
