use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use zense_bridge::bridge::{spawn_idle_poller, SchedulerHandle, StatePublisher};
use zense_bridge::config::BridgeConfig;
use zense_bridge::mqtt::{MqttHandler, MsgManager, TopicScheme};
use zense_bridge::zense::SessionClient;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = BridgeConfig::load()
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    setup_logging_env(if config.debug_mqtt {
        Level::DEBUG
    } else {
        Level::INFO
    });

    info!(
        "Starting zense-bridge: controller {}:{}, broker {}:{}",
        config.controller.host, config.controller.port, config.mqtt.host, config.mqtt.port
    );

    let shutdown = CancellationToken::new();
    let topics = TopicScheme::new(config.topics.clone());

    let session = Arc::new(SessionClient::new(config.session_settings()?));
    let mqtt_handler = MqttHandler::new(&config.mqtt, topics.clone());

    let scheduler = SchedulerHandle::spawn(
        session,
        StatePublisher::new(Box::new(mqtt_handler.state_sink())),
        config.scheduler_settings()?,
        shutdown.clone(),
    );

    let poller = spawn_idle_poller(
        scheduler.sender(),
        scheduler.known_devices(),
        config.poll_period(),
        shutdown.clone(),
    );

    let msg_manager = MsgManager::new(
        topics,
        config.level_on_window()?,
        scheduler.sender(),
        config.debug_mqtt,
    );
    let mqtt_task = tokio::spawn(mqtt_handler.run(msg_manager, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = mqtt_task.await {
        error!("MQTT task panicked: {}", e);
    }
    if let Err(e) = poller.await {
        error!("Poller task panicked: {}", e);
    }
    scheduler.join().await;

    info!("zense-bridge stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
