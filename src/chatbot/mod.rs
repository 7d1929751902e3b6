//! Chatbot module - batches user messages into AI replies.

pub mod debounce;
pub mod dispatcher;
pub mod history;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod scheduler;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use dispatcher::{Dispatcher, EligibilityPolicy};
pub use message::{InboundMessage, UserKey};
pub use scheduler::{deliver_with, BatchScheduler, EnqueueOutcome, SchedulerConfig, SchedulerStats};
pub use telegram::TelegramClient;
