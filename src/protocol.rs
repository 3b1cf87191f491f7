use crate::error::ConnectionError;
use crate::types::Roster;
use serde::{Deserialize, Deserializer, Serialize};

/// Frames sent by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request to enter the room under a display name.
    /// A non-string nickname decodes as `None` and is rejected at login.
    Login {
        #[serde(default, deserialize_with = "text_or_none")]
        nickname: Option<String>,
    },
    /// Chat text from a logged-in participant
    Message {
        #[serde(default, deserialize_with = "text_or_none")]
        text: Option<String>,
    },
    /// Any other `type` value; ignored by the dispatcher
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LoginError { message: String },
    System { message: String },
    Chat { nickname: String, message: String },
    Userlist { users: Vec<String> },
    Error { message: String },
}

impl ServerMessage {
    pub fn welcome(nickname: &str) -> Self {
        Self::System {
            message: format!("您已成功進入聊天室，暱稱為 \"{}\"", nickname),
        }
    }

    pub fn joined(nickname: &str) -> Self {
        Self::System {
            message: format!("歡迎 \"{}\" 加入聊天室！", nickname),
        }
    }

    pub fn left(nickname: &str) -> Self {
        Self::System {
            message: format!("\"{}\" 離開了聊天室。", nickname),
        }
    }

    pub fn malformed() -> Self {
        Self::Error {
            message: "無效的訊息格式".to_string(),
        }
    }
}

impl From<Roster> for ServerMessage {
    fn from(roster: Roster) -> Self {
        Self::Userlist {
            users: roster.users,
        }
    }
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<ClientMessage, ConnectionError> {
    Ok(serde_json::from_str(text)?)
}

fn text_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}
