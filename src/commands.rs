//! Command vocabulary and the thin handlers behind it.
//!
//! Commands always win over AI handling: anything matching here never reaches
//! the scheduler.

use crate::chatbot::SchedulerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    ClearAi,
    AiStats,
    Admin,
    /// A bare hello. Only answered in private chats.
    Greeting,
    /// `!`-prefixed text that is not a known command.
    Unknown,
}

const VOCABULARY: &[(Command, &[&str])] = &[
    (Command::Help, &["help", "!help"]),
    (Command::Ping, &["ping", "!ping", "pong", "!pong"]),
    (Command::ClearAi, &["!clearai"]),
    (Command::AiStats, &["!aistats"]),
    (Command::Admin, &["!admin"]),
];

/// Matched against the whole message only.
const GREETINGS: &[&str] = &["hi", "hii", "hiii", "hey", "hello", "whatsup", "ado"];

/// Case-insensitive match: the whole text, or the token followed by arguments.
fn matches_token(lower: &str, token: &str) -> bool {
    lower == token
        || lower
            .strip_prefix(token)
            .is_some_and(|rest| rest.starts_with(' '))
}

impl Command {
    pub fn parse(text: &str) -> Option<Command> {
        let lower = text.trim().to_lowercase();
        for (command, tokens) in VOCABULARY {
            if tokens.iter().any(|t| matches_token(&lower, t)) {
                return Some(*command);
            }
        }
        if GREETINGS.contains(&lower.as_str()) {
            return Some(Command::Greeting);
        }
        if lower.starts_with('!') {
            return Some(Command::Unknown);
        }
        None
    }
}

pub fn greeting_text(persona: &str) -> String {
    format!("HI, I'm {persona}'s Chat bot. If you need more help, type 'help'")
}

pub fn admin_text(is_owner: bool) -> &'static str {
    if is_owner {
        "Hey boss, what's up?"
    } else {
        "Nice try! You almost got me, haha. You're not an admin."
    }
}

pub fn help_text(persona: &str) -> String {
    format!(
        "{persona}'s bot commands\n\
        \n\
        • help - show this message\n\
        • ping - check that I'm alive\n\
        • !clearai - forget our conversation and start fresh\n\
        • !aistats - conversation statistics\n\
        • !admin - admin check\n\
        \n\
        Just chat normally and I'll reply as {persona}.\n\
        In groups, mention \"{lower}\" or \"bot\" to get my attention.",
        lower = persona.to_lowercase()
    )
}

pub fn format_stats(stats: &SchedulerStats) -> String {
    format!(
        "📊 AI stats\n\
        Conversations: {}\n\
        Remembered turns: {}\n\
        Collecting: {}\n\
        Replying: {}\n\
        Cooling down: {}",
        stats.active_conversations,
        stats.total_turns,
        stats.collecting,
        stats.processing,
        stats.cooling_down
    )
}
