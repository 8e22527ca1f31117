//! Topic naming scheme: `gateway/{client_id}/{session_id}[/{channel}]`.

use events::Id;

pub const BASE_TOPIC: &str = "gateway";

/// Build the topic a message for a session is published on, optionally
/// suffixed with a channel segment.
pub fn session_topic(client_id: Id, session_id: Id, channel: Option<&str>) -> String {
    let topic = format!("{BASE_TOPIC}/{client_id}/{session_id}");
    match channel {
        Some(channel) if !channel.trim().is_empty() => format!("{topic}/{channel}"),
        _ => topic,
    }
}

/// Build the subscription filter for a session. The `#` wildcard covers the
/// bare session topic as well as every channel published under it.
pub fn subscription_filter(client_id: Id, session_id: Id) -> String {
    format!("{}/#", session_topic(client_id, session_id, None))
}

/// A broker topic parsed back into its session components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub session_id: Id,
    pub channel: Option<String>,
}

/// Parse an inbound topic. Returns `None` for any topic outside the gateway
/// scheme: wrong base, fewer than two segments after the base, or a second
/// segment that is not a session UUID. The broker may legitimately deliver
/// such messages, so a miss is not an error.
pub fn parse(topic: &str) -> Option<ParsedTopic> {
    let remainder = topic.strip_prefix(BASE_TOPIC)?.strip_prefix('/')?;

    let segments: Vec<&str> = remainder.split('/').collect();
    if segments.len() < 2 {
        return None;
    }

    let session_id = segments[1].parse::<Id>().ok()?;
    let channel = if segments.len() >= 3 {
        segments.last().map(|s| (*s).to_string())
    } else {
        None
    };

    Some(ParsedTopic {
        session_id,
        channel,
    })
}
