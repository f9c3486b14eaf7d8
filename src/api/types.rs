//! JSON bodies exchanged with the game backend.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::session::{Message, Role, RunStatus};

/// `POST /api/v1/init/` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    pub run_id: String,
    pub run_status: RunStatus,
    pub thread_id: String,
}

/// `POST /api/v1/action/` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub message: String,
    pub thread_id: String,
}

/// `POST /api/v1/action/` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub run_id: String,
    pub run_status: RunStatus,
}

/// `GET /api/v1/threads/{thread_id}/runs/{run_id}` response.
///
/// The backend returns the whole run object; only `status` is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub status: RunStatus,
}

/// `GET /api/v1/messages/{thread_id}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Newest first.
    pub messages: Vec<WireMessage>,
    /// Suggested next moves for the latest assistant message.
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextValue {
    pub value: String,
}

impl WireMessage {
    /// A user or assistant message with one text part.
    pub fn text(role: &str, value: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ContentPart {
                kind: Some("text".to_string()),
                text: Some(TextValue {
                    value: value.into(),
                }),
            }],
        }
    }

    /// Convert to a [`Message`], joining text parts with line breaks.
    pub fn into_message(self) -> Result<Message, ApiError> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(ApiError::InvalidResponse {
                    reason: format!("unexpected message role '{}'", other),
                });
            }
        };

        let text = self
            .content
            .into_iter()
            .filter_map(|part| part.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Message { role, text })
    }
}

/// Conversation log as the client keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    /// Oldest first.
    pub messages: Vec<Message>,
    pub suggestions: Vec<String>,
}

impl TryFrom<MessagesResponse> for MessageLog {
    type Error = ApiError;

    fn try_from(resp: MessagesResponse) -> Result<Self, Self::Error> {
        let mut messages = resp
            .messages
            .into_iter()
            .map(WireMessage::into_message)
            .collect::<Result<Vec<_>, _>>()?;
        // Wire order is newest first.
        messages.reverse();

        Ok(Self {
            messages,
            suggestions: resp.actions,
        })
    }
}
