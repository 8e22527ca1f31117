//! HTTP surface of the gateway: the publish endpoint, the SSE events
//! endpoint and the health check, plus the OpenAPI description served
//! through RapiDoc.

use log::*;

pub(crate) mod controller;
pub(crate) mod error;
pub(crate) mod params;
pub mod router;
pub(crate) mod sse;

pub use error::{Error, Result};
pub use service::AppState;

/// Bind the configured interface/port and serve the gateway's routes until
/// the process is stopped.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let interface = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = app_state.config.port;
    let listen_addr = format!("{interface}:{port}");

    info!("Server starting... listening for connections on http://{listen_addr}");

    let router = router::define_routes(app_state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, router).await
}
