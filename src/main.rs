use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use listener_container::{
    backend::{memory::MemoryBroker, Backend},
    config::Settings,
    logging::init_logging,
    ListenerContainer, Message, Topic,
};
use listener_container_error::{LogLevel, ResultExt, StackResult};
use tracing::{error, info, warn};

/// Контейнер слушателей Pub/Sub: подписывается на темы и логирует
/// полученные сообщения.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Файл настроек (TOML)
    #[arg(short, long, env = "LISTENER_CONFIG")]
    config: Option<PathBuf>,

    /// Тема подписки: канал или glob-шаблон. Можно указывать несколько раз.
    #[arg(short, long = "topic", default_value = "*")]
    topics: Vec<String>,

    /// Периодически публиковать тестовые сообщения (только memory backend)
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;
    let logging = init_logging(settings.logging.clone())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let result = run(cli, settings).await;
    if let Err(err) = &result {
        match err.log_level() {
            LogLevel::Error => error!(status = %err.status_code(), "{err}"),
            _ => warn!(status = %err.status_code(), "{err}"),
        }
    }

    logging.shutdown();
    result.map_err(Into::into)
}

async fn run(
    cli: Cli,
    settings: Settings,
) -> StackResult<()> {
    settings.validate().context("invalid settings")?;

    let backend = Backend::from_settings(&settings.backend).context("backend setup")?;
    let container = ListenerContainer::new(backend.factory(), settings.container.clone());

    for raw in &cli.topics {
        let topic = Topic::parse(raw).with_context(|| format!("topic '{raw}'"))?;
        container.subscribe(topic.clone(), listener_container::listener_fn(log_message));
        info!(topic = %topic, "Subscribed");
    }

    container.start().await.context("container start")?;

    let demo = match (cli.demo, backend.memory_broker()) {
        (true, Some(broker)) => Some(tokio::spawn(publish_heartbeats(broker.clone()))),
        (true, None) => {
            warn!("--demo is only supported with the memory backend");
            None
        }
        _ => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
    }
    info!("Shutdown requested");

    if let Some(demo) = demo {
        demo.abort();
    }
    let result = container.shutdown().await;
    let stats = container.stats();
    info!(
        received = stats.received,
        invocations = stats.invocations,
        failures = stats.failures,
        reconnects = stats.reconnects,
        "Final statistics"
    );

    result.context("container shutdown")
}

fn log_message(message: &Message) -> Result<(), listener_container::ListenerError> {
    info!(
        channel = %message.channel,
        pattern = message.pattern.as_deref().unwrap_or("-"),
        bytes = message.payload.len(),
        payload = message.payload_str().unwrap_or("<binary>"),
        "Message received"
    );
    Ok(())
}

async fn publish_heartbeats(broker: Arc<MemoryBroker>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut n: u64 = 0;
    loop {
        tick.tick().await;
        n += 1;
        let delivered = broker.publish("demo.heartbeat", format!("tick {n}"));
        info!(n, delivered, "Heartbeat published");
    }
}
