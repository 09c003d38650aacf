use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tune_daemon::catalog::{catalog_channel, lister_from_config, spawn_fetch};
use tune_daemon::core::{SessionCore, SessionHandle};
use tune_daemon::mpv::MpvBackend;
use tune_daemon::{socket, SessionMessage};
use tune_proto::config::Config;
use tune_proto::state::StateManager;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<SessionMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<SessionMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR go to clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(SessionMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<SessionMessage>(256);

    let data_dir = tune_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tune_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Catalog: one fetch per session, published through the single writer
    let (catalog_writer, catalog_reader) = catalog_channel();
    match lister_from_config(&config.catalog) {
        Ok(lister) => {
            spawn_fetch(lister, catalog_writer);
        }
        Err(e) => {
            warn!("Catalog unavailable: {}", e);
            catalog_writer.publish(Err(e));
        }
    }

    let backend = Arc::new(MpvBackend::new(
        config.playback.volume,
        Duration::from_secs(config.playback.load_timeout_secs),
    ));

    let state_manager = Arc::new(StateManager::new());
    let core = SessionCore::new(
        backend,
        catalog_reader,
        state_manager,
        broadcast_tx,
        Duration::from_millis(config.playback.poll_interval_ms),
    );
    let (handle, event_rx) = SessionHandle::channel();

    let _socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.port,
        core.view(),
        handle.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            handle.shutdown().await;
        }
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
