//! Hash field encoding for presence, focus, and cursor records.
//!
//! These records live as hashes in the ephemeral store with one field per
//! attribute (the layout existing clusters expect); locks and typing
//! indicators are whole-record JSON strings. Decoding is tolerant: a
//! malformed record yields an error message the caller logs before skipping
//! the entry.

use std::collections::HashMap;

use arbor_core::{
    CanvasId, ConversationFocus, ConversationId, CursorPosition, UserId, UserInfo, UserPresence,
};
use chrono::{DateTime, Utc};

type Fields = Vec<(String, String)>;

fn time_field(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_time(map: &HashMap<String, String>, field: &str) -> Result<DateTime<Utc>, String> {
    let raw = map
        .get(field)
        .ok_or_else(|| format!("missing field {field}"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp in {field}: {e}"))
}

fn parse_user(map: &HashMap<String, String>) -> Result<UserInfo, String> {
    let raw = map.get("user").ok_or("missing field user")?;
    serde_json::from_str(raw).map_err(|e| format!("bad user object: {e}"))
}

fn require<'a>(map: &'a HashMap<String, String>, field: &str) -> Result<&'a String, String> {
    map.get(field).ok_or_else(|| format!("missing field {field}"))
}

pub(crate) fn presence_fields(presence: &UserPresence) -> Result<Fields, String> {
    let user = serde_json::to_string(&presence.user).map_err(|e| e.to_string())?;
    Ok(vec![
        ("canvasId".into(), presence.canvas_id.to_string()),
        ("userId".into(), presence.user_id.to_string()),
        ("user".into(), user),
        ("joinedAt".into(), time_field(presence.joined_at)),
        ("lastActivityAt".into(), time_field(presence.last_activity_at)),
        ("isActive".into(), presence.is_active.to_string()),
    ])
}

pub(crate) fn presence_from_hash(
    map: &HashMap<String, String>,
) -> Result<UserPresence, String> {
    Ok(UserPresence {
        canvas_id: CanvasId::new(require(map, "canvasId")?.clone()),
        user_id: UserId::new(require(map, "userId")?.clone()),
        user: parse_user(map)?,
        joined_at: parse_time(map, "joinedAt")?,
        last_activity_at: parse_time(map, "lastActivityAt")?,
        is_active: require(map, "isActive")? == "true",
    })
}

pub(crate) fn focus_fields(focus: &ConversationFocus) -> Result<Fields, String> {
    let user = serde_json::to_string(&focus.user).map_err(|e| e.to_string())?;
    Ok(vec![
        ("canvasId".into(), focus.canvas_id.to_string()),
        ("conversationId".into(), focus.conversation_id.to_string()),
        ("userId".into(), focus.user_id.to_string()),
        ("user".into(), user),
        ("focusedAt".into(), time_field(focus.focused_at)),
    ])
}

pub(crate) fn focus_from_hash(
    map: &HashMap<String, String>,
) -> Result<ConversationFocus, String> {
    Ok(ConversationFocus {
        canvas_id: CanvasId::new(require(map, "canvasId")?.clone()),
        conversation_id: ConversationId::new(require(map, "conversationId")?.clone()),
        user_id: UserId::new(require(map, "userId")?.clone()),
        user: parse_user(map)?,
        focused_at: parse_time(map, "focusedAt")?,
    })
}

pub(crate) fn cursor_fields(cursor: &CursorPosition) -> Result<Fields, String> {
    let user = serde_json::to_string(&cursor.user).map_err(|e| e.to_string())?;
    Ok(vec![
        ("canvasId".into(), cursor.canvas_id.to_string()),
        ("userId".into(), cursor.user_id.to_string()),
        ("user".into(), user),
        ("x".into(), cursor.x.to_string()),
        ("y".into(), cursor.y.to_string()),
        ("updatedAt".into(), time_field(cursor.updated_at)),
    ])
}

pub(crate) fn cursor_from_hash(map: &HashMap<String, String>) -> Result<CursorPosition, String> {
    let x = require(map, "x")?
        .parse()
        .map_err(|e| format!("bad x coordinate: {e}"))?;
    let y = require(map, "y")?
        .parse()
        .map_err(|e| format!("bad y coordinate: {e}"))?;
    Ok(CursorPosition {
        canvas_id: CanvasId::new(require(map, "canvasId")?.clone()),
        user_id: UserId::new(require(map, "userId")?.clone()),
        user: parse_user(map)?,
        x,
        y,
        updated_at: parse_time(map, "updatedAt")?,
    })
}

/// Milliseconds since epoch, the heartbeat record format.
pub(crate) fn epoch_millis(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

pub(crate) fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_roundtrip() {
        let presence = UserPresence {
            canvas_id: CanvasId::new("c1"),
            user_id: UserId::new("u1"),
            user: UserInfo::new("u1", "Ada", "ada@example.com"),
            joined_at: Utc::now(),
            last_activity_at: Utc::now(),
            is_active: true,
        };
        let fields: HashMap<String, String> =
            presence_fields(&presence).unwrap().into_iter().collect();
        let decoded = presence_from_hash(&fields).unwrap();
        assert_eq!(decoded.user_id, presence.user_id);
        assert_eq!(decoded.user.name, "Ada");
        assert!(decoded.is_active);
    }

    #[test]
    fn test_malformed_presence_reports_field() {
        let mut fields = HashMap::new();
        fields.insert("canvasId".to_string(), "c1".to_string());
        let err = presence_from_hash(&fields).unwrap_err();
        assert!(err.contains("userId"));
    }

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = CursorPosition {
            canvas_id: CanvasId::new("c1"),
            user_id: UserId::new("u1"),
            user: UserInfo::new("u1", "Ada", "ada@example.com"),
            x: 128.5,
            y: -42.0,
            updated_at: Utc::now(),
        };
        let fields: HashMap<String, String> =
            cursor_fields(&cursor).unwrap().into_iter().collect();
        let decoded = cursor_from_hash(&fields).unwrap();
        assert!((decoded.x - 128.5).abs() < f64::EPSILON);
        assert!((decoded.y + 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_epoch_millis_roundtrip() {
        let now = Utc::now();
        let parsed = parse_epoch_millis(&epoch_millis(now)).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
        assert!(parse_epoch_millis("not-a-number").is_none());
    }
}
