use broker::MqttConnectionHandler;
use config::Config;
use relay::{ContextStore, SessionManager};
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state containing the gateway's shared components. These are
// constructed exactly once at startup and passed by handle to every layer
// that needs them; nothing here is ambient global state.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broker_handler: Arc<MqttConnectionHandler>,
    pub context_store: Arc<ContextStore>,
    pub session_manager: Arc<SessionManager>,
    pub sse_manager: Arc<sse::Manager>,
}

impl AppState {
    pub fn new(
        config: Config,
        broker_handler: Arc<MqttConnectionHandler>,
        context_store: Arc<ContextStore>,
        session_manager: Arc<SessionManager>,
        sse_manager: Arc<sse::Manager>,
    ) -> Self {
        Self {
            config,
            broker_handler,
            context_store,
            session_manager,
            sse_manager,
        }
    }
}
