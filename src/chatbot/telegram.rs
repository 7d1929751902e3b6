//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tracing::warn;

/// Telegram's hard limit on message length, in UTF-16 code units. Counting
/// chars keeps us under it for everything outside the astral planes.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send plain text, split into several messages if needed. Only the first
    /// part replies to `reply_to_message_id`.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i32>,
    ) -> Result<(), String> {
        let chat_id = ChatId(chat_id);
        for (i, part) in split_message(text, MAX_MESSAGE_CHARS).into_iter().enumerate() {
            let mut request = self.bot.send_message(chat_id, part);
            if let (0, Some(msg_id)) = (i, reply_to_message_id) {
                request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id)));
            }

            request.await.map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }
        Ok(())
    }
}

fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
