use crate::Error;
use ::sse::connection::ConnectionId;
use ::sse::message::Event as SseEvent;
use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use events::Id;
use futures::Stream;
use log::*;
use relay::{SessionContext, SessionManager};
use serde::Deserialize;
use service::AppState;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub(crate) struct EventsParams {
    session_id: String,
}

/// Leaves the session and unregisters the connection when the response
/// stream goes away. Axum drops the stream mid-`recv` on a client
/// disconnect, so the cleanup must hang off `Drop` rather than sit after
/// the receive loop; the async work is handed to a task since `Drop`
/// cannot await.
struct ConnectionCleanup {
    session_id: Id,
    connection_id: ConnectionId,
    session_manager: Arc<SessionManager>,
    sse_manager: Arc<::sse::Manager>,
}

impl Drop for ConnectionCleanup {
    fn drop(&mut self) {
        let session_id = self.session_id;
        let connection_id = self.connection_id.clone();
        let session_manager = self.session_manager.clone();
        let sse_manager = self.sse_manager.clone();

        tokio::spawn(async move {
            debug!("SSE connection closed for session {session_id}, cleaning up");
            let cancel = CancellationToken::new();
            if let Err(e) = session_manager
                .leave(session_id, &connection_id, &cancel)
                .await
            {
                warn!("Failed to leave session {session_id} during cleanup: {e}");
            }
            sse_manager.unregister_connection(&connection_id);
        });
    }
}

/// SSE handler that establishes a long-lived connection joined to one
/// session. The connection is registered, joined to the session's relay
/// group, then receives a `context_set` replay followed by live
/// `message_received` events until the client disconnects.
pub(crate) async fn events_handler(
    Query(params): Query<EventsParams>,
    State(app_state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let session_id: Id = match params.session_id.parse() {
        Ok(id) => id,
        Err(_) => {
            warn!(
                "Rejecting SSE connection with malformed session id: {}",
                params.session_id
            );
            return Err((StatusCode::BAD_REQUEST, "BAD REQUEST").into_response());
        }
    };

    debug!("Establishing SSE connection for session {session_id}");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection_id = app_state.sse_manager.register_connection(tx);

    // Join before any event flows; an unjoinable session must not leave a
    // dangling registration behind.
    let cancel = CancellationToken::new();
    if let Err(e) = app_state
        .session_manager
        .join(session_id, connection_id.clone(), &cancel)
        .await
    {
        error!("Failed to join session {session_id}: {e}");
        app_state.sse_manager.unregister_connection(&connection_id);
        return Err(Error::from(e).into_response());
    }

    // The replay runs concurrently with the stream below so the HTTP
    // response (and its keep-alives) start immediately.
    tokio::spawn(replay_context(
        app_state.clone(),
        session_id,
        connection_id.clone(),
    ));

    let cleanup = ConnectionCleanup {
        session_id,
        connection_id,
        session_manager: app_state.session_manager.clone(),
        sse_manager: app_state.sse_manager.clone(),
    };

    let stream = stream! {
        // Moved into the generator so dropping the stream runs the cleanup.
        let _cleanup = cleanup;
        while let Some(event) = rx.recv().await {
            yield event;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Wait (bounded) for the session's context to exist, then push it to the
/// connection as a single `context_set` event. When no context appears
/// before the timeout, an empty context is replayed so the client always
/// receives exactly one `context_set`.
async fn replay_context(app_state: AppState, session_id: Id, connection_id: ConnectionId) {
    let poll = Duration::from_millis(app_state.config.context_replay_poll_ms);
    let deadline = Instant::now() + Duration::from_millis(app_state.config.context_replay_timeout_ms);

    let context = loop {
        if let Some(context) = app_state.context_store.get_context(session_id) {
            break context;
        }
        if Instant::now() >= deadline {
            debug!("No context arrived for session {session_id} before the replay deadline; replaying an empty context");
            break SessionContext::empty();
        }
        tokio::time::sleep(poll).await;
    };

    let context = match serde_json::to_value(&context) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to serialize context for session {session_id}: {e}");
            return;
        }
    };

    if !app_state
        .sse_manager
        .send_to_connection(&connection_id, SseEvent::ContextSet { context })
    {
        // The client may have disconnected while we were waiting.
        debug!("Context replay for session {session_id} found its connection already gone");
    }
}
