//! Event normalization: raw websocket payloads -> [`InboundEvent`].
//!
//! Mattermost wraps the post inside a "posted" event as a JSON *string*
//! (`data.post`), so normalization parses in two steps. Anything that is
//! not a "posted" event (hello, typing, status frames) drops silently.

use serde::Deserialize;

/// A "posted" event is recognized but missing expected fields. Logged and
/// skipped by the caller; never breaks the stream loop.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed posted event: {0}")]
    Malformed(String),
}

/// Canonical inbound event, built once per websocket message and dropped
/// after dispatch.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_kind: String,
    pub sender_id: String,
    pub sender_name: String,
    pub channel_id: String,
    pub post_id: String,
    /// Root post id of the thread; empty when this post starts one.
    pub root_id: String,
    pub text: String,
    pub channel_display_name: String,
    pub create_at: i64,
}

#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<WsEventData>,
}

#[derive(Debug, Deserialize)]
struct WsEventData {
    /// The post, serialized again as a JSON string by the server.
    #[serde(default)]
    post: Option<String>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    channel_display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    user_id: String,
    channel_id: String,
    #[serde(default)]
    root_id: String,
    message: String,
    #[serde(default)]
    create_at: i64,
}

/// Parse a raw websocket frame. `Ok(None)` for anything that is not a
/// "posted" event; `Err` only when a "posted" event is missing fields.
pub fn normalize(raw: &str) -> Result<Option<InboundEvent>, EventError> {
    let parsed: WsEvent = match serde_json::from_str(raw) {
        Ok(e) => e,
        // ping/seq replies and other non-event frames
        Err(_) => return Ok(None),
    };
    if parsed.event.as_deref() != Some("posted") {
        return Ok(None);
    }
    let data = parsed
        .data
        .ok_or_else(|| EventError::Malformed("posted event without data".to_string()))?;
    let post_json = data
        .post
        .ok_or_else(|| EventError::Malformed("posted event without post".to_string()))?;
    let post: RawPost = serde_json::from_str(&post_json)
        .map_err(|e| EventError::Malformed(format!("post payload: {}", e)))?;
    Ok(Some(InboundEvent {
        event_kind: "posted".to_string(),
        sender_id: post.user_id,
        sender_name: data.sender_name.unwrap_or_default(),
        channel_id: post.channel_id,
        post_id: post.id,
        root_id: post.root_id,
        text: post.message,
        channel_display_name: data.channel_display_name.unwrap_or_default(),
        create_at: post.create_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posted_frame(post: &str) -> String {
        serde_json::json!({
            "event": "posted",
            "data": {
                "post": post,
                "sender_name": "@alice",
                "channel_display_name": "town-square"
            }
        })
        .to_string()
    }

    #[test]
    fn posted_event_is_normalized() {
        let post = serde_json::json!({
            "id": "p1",
            "user_id": "u1",
            "channel_id": "c1",
            "root_id": "r1",
            "message": "hello",
            "create_at": 1700000000000i64,
        })
        .to_string();
        let ev = normalize(&posted_frame(&post))
            .expect("no error")
            .expect("event");
        assert_eq!(ev.event_kind, "posted");
        assert_eq!(ev.sender_name, "@alice");
        assert_eq!(ev.channel_id, "c1");
        assert_eq!(ev.post_id, "p1");
        assert_eq!(ev.root_id, "r1");
        assert_eq!(ev.text, "hello");
        assert_eq!(ev.create_at, 1700000000000);
    }

    #[test]
    fn missing_root_id_defaults_to_empty() {
        let post = serde_json::json!({
            "id": "p1",
            "user_id": "u1",
            "channel_id": "c1",
            "message": "first post",
        })
        .to_string();
        let ev = normalize(&posted_frame(&post))
            .expect("no error")
            .expect("event");
        assert!(ev.root_id.is_empty());
    }

    #[test]
    fn non_posted_events_drop_silently() {
        let frame = r#"{"event":"typing","data":{"user_id":"u1"}}"#;
        assert!(normalize(frame).expect("no error").is_none());
        // auth reply frames have no "event" at all
        assert!(normalize(r#"{"status":"OK","seq_reply":1}"#)
            .expect("no error")
            .is_none());
        assert!(normalize("not json").expect("no error").is_none());
    }

    #[test]
    fn posted_event_without_post_is_malformed() {
        let frame = r#"{"event":"posted","data":{"sender_name":"@alice"}}"#;
        assert!(matches!(
            normalize(frame),
            Err(EventError::Malformed(_))
        ));
    }

    #[test]
    fn posted_event_with_bad_post_payload_is_malformed() {
        let frame = posted_frame(r#"{"id":"p1"}"#);
        assert!(matches!(normalize(&frame), Err(EventError::Malformed(_))));
    }
}
