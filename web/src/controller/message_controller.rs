use crate::params::message::NewMessage;
use crate::{AppState, Error};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio_util::sync::CancellationToken;

use log::*;

/// POST publish a message into a session's topic
#[utoipa::path(
    post,
    path = "/messages",
    request_body = NewMessage,
    responses(
        (status = 204, description = "Successfully published the message"),
        (status = 404, description = "No subscription exists for the session"),
        (status = 422, description = "Unprocessable Entity"),
        (status = 502, description = "The broker rejected the publish")
    )
)]
pub async fn create(
    State(app_state): State<AppState>,
    Json(params): Json<NewMessage>,
) -> Result<impl IntoResponse, Error> {
    debug!(
        "POST Publish a message to session {} (channel: {:?}, target: {:?})",
        params.session_id, params.channel, params.target_id
    );

    let cancel = CancellationToken::new();

    match params.target_id {
        Some(target_id) => {
            app_state
                .broker_handler
                .publish_direct_message(
                    params.session_id,
                    target_id,
                    params.message,
                    params.channel.as_deref(),
                    &cancel,
                )
                .await?
        }
        None => {
            app_state
                .broker_handler
                .publish_message(
                    params.session_id,
                    params.message,
                    params.channel.as_deref(),
                    &cancel,
                )
                .await?
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
