//! Decides which inbound messages get an AI reply and feeds them to the scheduler.

use tracing::debug;

use crate::chatbot::message::InboundMessage;
use crate::chatbot::provider::CompletionProvider;
use crate::chatbot::scheduler::{BatchScheduler, Deliver, EnqueueOutcome};
use crate::commands::Command;

/// Eligibility rules for AI handling.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    /// One-to-one messages shorter than this (in UTF-16 code units) are ignored.
    pub min_length: usize,
    /// In groups, one of these must appear (case-insensitive) to get a reply.
    pub attention_keywords: Vec<String>,
}

impl EligibilityPolicy {
    pub fn new(min_length: usize, attention_keywords: Vec<String>) -> Self {
        Self {
            min_length,
            attention_keywords: attention_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    pub fn is_eligible(&self, text: &str, is_group: bool) -> bool {
        if Command::parse(text).is_some() {
            return false;
        }

        if is_group {
            let lower = text.to_lowercase();
            return self
                .attention_keywords
                .iter()
                .any(|keyword| lower.contains(keyword.as_str()));
        }

        text.encode_utf16().count() >= self.min_length
    }
}

/// Routes eligible messages into the scheduler.
pub struct Dispatcher<P> {
    policy: EligibilityPolicy,
    scheduler: BatchScheduler<P>,
}

impl<P: CompletionProvider> Dispatcher<P> {
    pub fn new(policy: EligibilityPolicy, scheduler: BatchScheduler<P>) -> Self {
        Self { policy, scheduler }
    }

    pub fn scheduler(&self) -> &BatchScheduler<P> {
        &self.scheduler
    }

    /// Enqueue the message if it is eligible. `None` means it was not.
    pub async fn dispatch(&self, msg: InboundMessage, deliver: Deliver) -> Option<EnqueueOutcome> {
        if !self.policy.is_eligible(&msg.text, msg.is_group) {
            debug!("Not eligible for AI: {:?}", msg.text.chars().take(50).collect::<String>());
            return None;
        }
        let outcome = self
            .scheduler
            .enqueue(msg.user, msg.text, msg.display_name, deliver)
            .await;
        Some(outcome)
    }
}
