use broker::MqttConnectionHandler;
use log::*;
use relay::{ContextStore, SessionManager, SseMessageRelay};
use service::config::Config;
use service::logging::Logger;
use service::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let mut config = Config::new();
    Logger::init_logger(&config);

    info!(
        "Starting MQTT gateway in {} mode",
        config.runtime_env()
    );

    let gateway_client_id = config.resolve_mqtt_client_id();
    let settings = config.broker_settings();
    info!(
        "Connecting to MQTT broker at {}:{} as client {gateway_client_id}",
        settings.host, settings.port
    );

    let (broker_client, event_loop) = broker::connect(&settings);
    let broker_handler = Arc::new(MqttConnectionHandler::new(Arc::new(broker_client)));
    broker::spawn_event_loop(event_loop, broker_handler.clone());

    let context_store = Arc::new(ContextStore::new());
    let session_manager = Arc::new(SessionManager::new(
        gateway_client_id,
        broker_handler.clone(),
        context_store.clone(),
    ));
    let sse_manager = Arc::new(sse::Manager::new());

    // Wire broker-delivered messages into the SSE fan-out before any
    // connection can join a session.
    let message_relay = Arc::new(SseMessageRelay::new(
        session_manager.clone(),
        context_store.clone(),
        sse_manager.clone(),
    ));
    broker_handler.set_dispatcher(message_relay);

    let app_state = AppState::new(
        config,
        broker_handler,
        context_store,
        session_manager,
        sse_manager,
    );

    web::init_server(app_state).await
}
