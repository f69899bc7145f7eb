use crate::models::CanonicalId;
use serde::{Deserialize, Serialize};

/// Bot API `Update` as delivered to the webhook.
///
/// Only the parts the bot reacts to are modeled; everything else is ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// `message`, falling back to `edited_message`.
    pub fn any_message(&self) -> Option<&Message> {
        self.message.as_ref().or(self.edited_message.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Chat {
    pub fn canonical_id(&self) -> CanonicalId {
        CanonicalId::from(self.id)
    }
}

/// Inline keyboard button press.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Webhook reply body. Telegram only looks at the status code.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<uuid::Uuid>,
}

impl WebhookAck {
    pub fn ok() -> Self {
        Self {
            ok: true,
            job_id: None,
        }
    }

    pub fn queued(job_id: uuid::Uuid) -> Self {
        Self {
            ok: true,
            job_id: Some(job_id),
        }
    }
}

// ============ Outgoing markup ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Self {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

/// `reply_markup` for `sendMessage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_message_update() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "is_bot": false, "first_name": "Ana"},
                "chat": {"id": -100123, "type": "group"},
                "date": 1700000000,
                "text": "/semana"
            }
        }))
        .unwrap();
        let msg = update.any_message().unwrap();
        assert_eq!(msg.chat.canonical_id(), CanonicalId::from("-100123"));
        assert_eq!(msg.text.as_deref(), Some("/semana"));
    }

    #[test]
    fn test_parse_edited_and_callback() {
        let edited: Update = serde_json::from_value(json!({
            "update_id": 11,
            "edited_message": {"message_id": 2, "chat": {"id": 7}, "text": "/mes"}
        }))
        .unwrap();
        assert_eq!(edited.any_message().unwrap().chat.id, 7);

        let callback: Update = serde_json::from_value(json!({
            "update_id": 12,
            "callback_query": {
                "id": "abc",
                "data": "cmd:/ano",
                "message": {"message_id": 3, "chat": {"id": 7}}
            }
        }))
        .unwrap();
        assert!(callback.any_message().is_none());
        assert_eq!(
            callback.callback_query.unwrap().data.as_deref(),
            Some("cmd:/ano")
        );
    }

    #[test]
    fn test_ack_serialization() {
        assert_eq!(serde_json::to_value(WebhookAck::ok()).unwrap(), json!({"ok": true}));
    }
}
