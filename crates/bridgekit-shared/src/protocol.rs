use serde::{Deserialize, Serialize};

use crate::types::{EventId, RoomId, UserId};

/// Kind of a room message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    #[serde(rename = "m.text")]
    Text,
    #[serde(rename = "m.notice")]
    Notice,
    #[serde(rename = "m.emote")]
    Emote,
    #[serde(rename = "m.image")]
    Image,
}

/// How a message relates to an earlier event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Relation {
    /// In reply to the given event
    Reply(EventId),
    /// Replaces (edits) the given event
    Replace(EventId),
}

/// Payload of a room message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub msgtype: MessageType,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<Relation>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: MessageType::Text,
            body: body.into(),
            formatted_body: None,
            relates_to: None,
        }
    }

    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: MessageType::Notice,
            ..Self::text(body)
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.formatted_body = Some(html.into());
        self
    }

    pub fn set_reply(&mut self, to: EventId) {
        self.relates_to = Some(Relation::Reply(to));
    }

    pub fn set_edit(&mut self, of: EventId) {
        self.relates_to = Some(Relation::Replace(of));
    }
}

/// A historical message waiting to be imported into a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillMessage {
    pub sender: UserId,
    /// Recipient, used for read-marking only.
    pub recipient: Option<UserId>,
    pub room_id: RoomId,
    pub content: MessageContent,
    /// Origin timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_keeps_body() {
        let content = MessageContent::notice("hello");
        assert_eq!(content.msgtype, MessageType::Notice);
        assert_eq!(content.body, "hello");
    }

    #[test]
    fn content_json_shape() {
        let mut content = MessageContent::text("hi").with_html("<b>hi</b>");
        content.set_reply(EventId("$abc".into()));

        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["msgtype"], "m.text");
        assert_eq!(json["formatted_body"], "<b>hi</b>");
        assert_eq!(json["relates_to"]["Reply"], "$abc");
    }
}
