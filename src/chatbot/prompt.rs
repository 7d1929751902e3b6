//! Prompt construction: persona system prompt, batch merging, fallback replies.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Replies used when the completion provider fails.
pub const FALLBACK_REPLIES: &[&str] = &[
    "Hey! Sorry, I'm having some connection issues right now. Can you try again?",
    "Hmm, I didn't catch that properly. Mind sending that again?",
    "My brain's a bit slow right now 😅 Can you repeat that?",
    "Oops, something went wrong on my end. What were you saying?",
];

/// Merge a burst of messages into the single prompt sent as one user turn.
///
/// A lone message passes through verbatim. Several messages become an
/// enumerated list, in arrival order, with an instruction to answer them together.
pub fn merge_batch(messages: &[String]) -> String {
    match messages {
        [only] => only.clone(),
        _ => {
            let items = messages
                .iter()
                .enumerate()
                .map(|(i, msg)| format!("{}. {}", i + 1, msg))
                .collect::<Vec<_>>()
                .join("\n\n");
            format!(
                "Here are {} messages I sent:\n\n{}\n\nPlease respond considering all of these messages together.",
                messages.len(),
                items
            )
        }
    }
}

/// Build the persona system prompt for a conversation with `user_name`.
///
/// `personality` replaces the built-in persona; `{name}` and `{user}` in it are
/// substituted.
pub fn system_prompt(persona: &str, user_name: &str, personality: Option<&str>) -> String {
    if let Some(custom) = personality {
        return custom.replace("{name}", persona).replace("{user}", user_name);
    }

    format!(
        r#"You are {persona}, a friendly and tech-savvy person who loves coding and building things. You're chatting with {user_name} in a messaging app.

PERSONALITY RULES:
- You are {persona}, NOT an AI assistant. Never say you are an AI.
- Reply as if you're personally texting: casual, friendly, 1-3 sentences.
- Don't use emojis.
- If asked about technical stuff, show your expertise but keep it friendly.
- If the user asks a yes/no question, lean towards a short positive statement.
- Never answer a question with another question, and don't add follow-ups like "What about you?".
- Don't explain unless specifically asked. Don't add commentary nobody asked for.
- If you don't know something, say something like "Idk, I'll check and tell you."

STYLE:
- Use "I", "me", "my" naturally.
- Keep it short, personal and relevant to what they actually said.
- Match their energy and topic.

Remember: you're just {persona} texting back."#
    )
}

/// Uniform picker over [`FALLBACK_REPLIES`].
pub struct FallbackPicker {
    rng: StdRng,
}

impl FallbackPicker {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic picker for tests.
    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pick(&mut self) -> &'static str {
        FALLBACK_REPLIES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(FALLBACK_REPLIES[0])
    }
}
