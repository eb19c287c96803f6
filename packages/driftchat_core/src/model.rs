//! Core chat records shared between the stores and the wire.
//!
//! Field names follow the backend's JSON contract (`_id`, camelCase),
//! so these types serialize directly into REST payloads and channel
//! frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque server-assigned identifier for a user.
pub type UserId = String;

/// Display profile of a user, as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
}

/// The authenticated local user. Created on successful authentication,
/// destroyed on logout. Owns at most one live channel through its
/// [`ChatContext`](crate::context::ChatContext).
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserProfile,
}

impl Session {
    pub fn new(user: UserProfile) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Immutable chat message record.
///
/// Ordering in the message store is insertion order (arrival/send
/// order); `created_at` is informational and never used to reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True if this message belongs to the conversation with `peer_id`,
    /// i.e. was sent by or addressed to that peer.
    pub fn involves(&self, peer_id: &str) -> bool {
        self.sender_id == peer_id || self.receiver_id == peer_id
    }
}

/// Outbound message content. At least one of text/image is required;
/// the store rejects empty payloads before any network call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SendPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// A payload carries nothing when both fields are missing or blank.
    pub fn is_empty(&self) -> bool {
        let no_text = self.text.as_deref().is_none_or(|t| t.trim().is_empty());
        let no_image = self.image.as_deref().is_none_or(|i| i.is_empty());
        no_text && no_image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, receiver: &str) -> Message {
        Message {
            id: "m1".to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: Some("hi".to_string()),
            image: None,
            created_at: Utc::now(),
        }
    }

    // -- wire field names --

    #[test]
    fn message_uses_backend_field_names() {
        let json = serde_json::to_value(message("u1", "u2")).unwrap();
        assert!(json.get("_id").is_some());
        assert!(json.get("senderId").is_some());
        assert!(json.get("receiverId").is_some());
        assert!(json.get("createdAt").is_some());
        // image is None and must be omitted entirely
        assert!(json.get("image").is_none());
    }

    #[test]
    fn message_deserializes_from_backend_shape() {
        let m: Message = serde_json::from_str(
            r#"{"_id":"abc","senderId":"u1","receiverId":"u2","text":"yo","createdAt":"2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(m.id, "abc");
        assert_eq!(m.text.as_deref(), Some("yo"));
        assert!(m.image.is_none());
    }

    #[test]
    fn profile_deserializes_without_optional_fields() {
        let p: UserProfile =
            serde_json::from_str(r#"{"_id":"u1","fullName":"Ada Lovelace"}"#).unwrap();
        assert_eq!(p.id, "u1");
        assert_eq!(p.full_name, "Ada Lovelace");
        assert!(p.email.is_none());
    }

    // -- involves --

    #[test]
    fn involves_matches_sender_or_receiver() {
        let m = message("u1", "u2");
        assert!(m.involves("u1"));
        assert!(m.involves("u2"));
        assert!(!m.involves("u3"));
    }

    // -- payload emptiness --

    #[test]
    fn payload_with_text_is_not_empty() {
        assert!(!SendPayload::text("hello").is_empty());
    }

    #[test]
    fn blank_text_counts_as_empty() {
        assert!(SendPayload::text("   ").is_empty());
        assert!(SendPayload::default().is_empty());
    }

    #[test]
    fn image_alone_is_enough() {
        let p = SendPayload {
            text: None,
            image: Some("data:image/png;base64,AAAA".to_string()),
        };
        assert!(!p.is_empty());
    }
}
