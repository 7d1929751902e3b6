//! Message and turn types shared by the scheduler, dispatcher and provider.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable per-user identifier. Owns every piece of per-user state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey(String);

impl UserKey {
    /// Key for a one-to-one chat.
    pub fn private(user_id: i64) -> Self {
        Self(user_id.to_string())
    }

    /// Key for a member of a group chat. Members of one group never share state.
    pub fn group_member(chat_id: i64, user_id: i64) -> Self {
        Self(format!("{chat_id}:{user_id}"))
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One exchange unit in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An inbound message after transport normalization.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user: UserKey,
    pub display_name: String,
    pub text: String,
    pub is_group: bool,
}
