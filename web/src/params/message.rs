use events::Id;
use serde::Deserialize;
use utoipa::ToSchema;

/// Body of a publish request. `session_id` and `message` are required;
/// `channel` refines the topic path and `target_id` redirects the message
/// to a specific client instead of the session's own topic.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewMessage {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Id,
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub target_id: Option<Id>,
}
