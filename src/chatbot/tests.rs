//! Behaviour tests for the batching scheduler and dispatcher.
//!
//! All timing runs on tokio's paused clock, so sleeps advance virtual time
//! deterministically.
//!
//! Run with: cargo test chatbot

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

use super::message::Turn;
use super::prompt::{FallbackPicker, FALLBACK_REPLIES};
use super::provider::{CompletionProvider, ProviderError};
use super::scheduler::{Deliver, UserPhase};
use super::*;

const BATCH_MS: u64 = 1000;
const COOLDOWN_MS: u64 = 500;

struct Call {
    system_prompt: String,
    history: Vec<Turn>,
}

#[derive(Clone, Default)]
struct MockProvider {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: bool,
    /// When set, every call waits for a notification before returning.
    gate: Option<Arc<Notify>>,
}

impl MockProvider {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn gated(gate: &Arc<Notify>) -> Self {
        Self {
            gate: Some(gate.clone()),
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_prompt(&self) -> String {
        let calls = self.calls.lock().unwrap();
        let call = calls.last().expect("no provider calls");
        call.history.last().expect("empty history").content.clone()
    }
}

impl CompletionProvider for MockProvider {
    async fn generate(&self, system_prompt: &str, history: &[Turn]) -> Result<String, ProviderError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                system_prompt: system_prompt.to_string(),
                history: history.to_vec(),
            });
            calls.len()
        };
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(ProviderError::Timeout);
        }
        Ok(format!("reply {n}"))
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        batch_delay: Duration::from_millis(BATCH_MS),
        cooldown_delay: Duration::from_millis(COOLDOWN_MS),
        max_history_length: 4,
        persona_name: "Alex".to_string(),
        personality: None,
    }
}

fn scheduler(provider: &MockProvider) -> BatchScheduler<MockProvider> {
    BatchScheduler::with_fallback(test_config(), provider.clone(), FallbackPicker::seeded(7))
}

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(log: &Log) -> Deliver {
    let log = log.clone();
    deliver_with(move |reply| async move {
        log.lock().unwrap().push(reply);
    })
}

fn delivered(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

async fn send(s: &BatchScheduler<MockProvider>, user: &str, text: &str, log: &Log) -> EnqueueOutcome {
    s.enqueue(UserKey::from(user), text.to_string(), "Dana".to_string(), recorder(log))
        .await
}

/// Past the debounce deadline of a message sent now.
async fn past_flush() {
    sleep(Duration::from_millis(BATCH_MS + 100)).await;
}

/// Past the end of a cooldown started by a flush that `past_flush` just covered.
async fn past_cooldown() {
    sleep(Duration::from_millis(COOLDOWN_MS)).await;
}

// =============================================================================
// DEBOUNCE TESTS
// =============================================================================

mod debounce_batching {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_call() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        assert_eq!(send(&s, "u1", "a", &log).await, EnqueueOutcome::Queued { pending: 1 });
        sleep(Duration::from_millis(300)).await;
        assert_eq!(send(&s, "u1", "b", &log).await, EnqueueOutcome::Queued { pending: 2 });
        sleep(Duration::from_millis(300)).await;
        assert_eq!(send(&s, "u1", "c", &log).await, EnqueueOutcome::Queued { pending: 3 });

        // Deadline is measured from the last message, not the first
        sleep(Duration::from_millis(900)).await;
        assert_eq!(provider.call_count(), 0);
        assert_eq!(s.phase(&UserKey::from("u1")).await, UserPhase::Collecting);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            provider.last_prompt(),
            "Here are 3 messages I sent:\n\n1. a\n\n2. b\n\n3. c\n\nPlease respond considering all of these messages together."
        );
        assert_eq!(delivered(&log), vec!["reply 1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_message_verbatim_after_delay() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        send(&s, "u1", "hello there", &log).await;

        sleep(Duration::from_millis(BATCH_MS - 1)).await;
        assert_eq!(provider.call_count(), 0);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_prompt(), "hello there");
        assert_eq!(delivered(&log), vec!["reply 1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_prompt_uses_display_name() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        send(&s, "u1", "hey", &log).await;
        past_flush().await;

        let calls = provider.calls.lock().unwrap();
        assert!(calls[0].system_prompt.contains("You are Alex"));
        assert!(calls[0].system_prompt.contains("chatting with Dana"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_deliver_wins() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let first = Log::default();
        let second = Log::default();

        send(&s, "u1", "one", &first).await;
        send(&s, "u1", "two", &second).await;
        past_flush().await;

        assert!(delivered(&first).is_empty());
        assert_eq!(delivered(&second), vec!["reply 1"]);
    }
}

// =============================================================================
// COOLDOWN TESTS
// =============================================================================

mod cooldown {
    use super::*;

    async fn failing_send(_reply: String) {
        panic!("send failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_dropped_during_cooldown() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        send(&s, "u1", "first", &log).await;
        past_flush().await;
        assert_eq!(s.phase(&UserKey::from("u1")).await, UserPhase::Cooldown);

        assert_eq!(send(&s, "u1", "ignored", &log).await, EnqueueOutcome::CoolingDown);

        sleep(Duration::from_millis(5 * BATCH_MS)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(delivered(&log).len(), 1);
        assert_eq!(s.phase(&UserKey::from("u1")).await, UserPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_after_cooldown_starts_fresh_batch() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        send(&s, "u1", "first", &log).await;
        past_flush().await;
        past_cooldown().await;
        assert_eq!(s.phase(&UserKey::from("u1")).await, UserPhase::Idle);

        assert_eq!(send(&s, "u1", "second", &log).await, EnqueueOutcome::Queued { pending: 1 });
        past_flush().await;

        assert_eq!(provider.call_count(), 2);
        let calls = provider.calls.lock().unwrap();
        assert_eq!(
            calls[1].history,
            vec![Turn::user("first"), Turn::assistant("reply 1"), Turn::user("second")]
        );
        drop(calls);
        assert_eq!(delivered(&log), vec!["reply 1", "reply 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_uses_fallback_and_still_cools_down() {
        let provider = MockProvider::failing();
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        send(&s, "u1", "hello", &log).await;
        past_flush().await;

        let replies = delivered(&log);
        assert_eq!(replies.len(), 1);
        assert!(FALLBACK_REPLIES.contains(&replies[0].as_str()));
        assert_eq!(s.phase(&user).await, UserPhase::Cooldown);
        assert!(s.history(&user).await.is_empty());

        assert_eq!(send(&s, "u1", "retry", &log).await, EnqueueOutcome::CoolingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_delivery_does_not_strand_user() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let user = UserKey::from("u1");

        s.enqueue(
            user.clone(),
            "hi".to_string(),
            "Dana".to_string(),
            deliver_with(failing_send),
        )
        .await;
        past_flush().await;

        assert_eq!(s.phase(&user).await, UserPhase::Cooldown);
        past_cooldown().await;
        assert_eq!(s.phase(&user).await, UserPhase::Idle);
    }
}

// =============================================================================
// IN-FLIGHT (PROCESSING) TESTS
// =============================================================================

mod processing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_messages_during_provider_call_are_rejected() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::gated(&gate);
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        send(&s, "u1", "first", &log).await;
        past_flush().await;
        assert_eq!(s.phase(&user).await, UserPhase::Processing);

        assert_eq!(send(&s, "u1", "late", &log).await, EnqueueOutcome::Busy);

        gate.notify_one();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(delivered(&log), vec!["reply 1"]);
        assert_eq!(s.phase(&user).await, UserPhase::Cooldown);

        // The late message never turns into a batch of its own
        sleep(Duration::from_millis(5 * BATCH_MS)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            s.history(&user).await,
            vec![Turn::user("first"), Turn::assistant("reply 1")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_provider_call() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::gated(&gate);
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        send(&s, "u1", "first", &log).await;
        past_flush().await;
        s.clear_user(&user).await;

        gate.notify_one();
        sleep(Duration::from_millis(10)).await;

        // Reply still delivered exactly once, but nothing is remembered
        assert_eq!(delivered(&log), vec!["reply 1"]);
        assert!(s.history(&user).await.is_empty());
        assert_eq!(s.phase(&user).await, UserPhase::Idle);
        assert_eq!(send(&s, "u1", "again", &log).await, EnqueueOutcome::Queued { pending: 1 });
    }
}

// =============================================================================
// HISTORY, ISOLATION, CLEAR, STATS
// =============================================================================

mod state {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_history_bounded_to_most_recent() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        for i in 1..=3 {
            send(&s, "u1", &format!("m{i}"), &log).await;
            past_flush().await;
            past_cooldown().await;
        }

        assert_eq!(
            s.history(&user).await,
            vec![
                Turn::user("m2"),
                Turn::assistant("reply 2"),
                Turn::user("m3"),
                Turn::assistant("reply 3"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_are_isolated() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log_a = Log::default();
        let log_b = Log::default();

        send(&s, "a", "a1", &log_a).await;
        sleep(Duration::from_millis(100)).await;
        send(&s, "b", "b1", &log_b).await;
        sleep(Duration::from_millis(100)).await;
        send(&s, "a", "a2", &log_a).await;
        sleep(Duration::from_millis(100)).await;
        send(&s, "b", "b2", &log_b).await;
        past_flush().await;

        assert_eq!(provider.call_count(), 2);
        let history_a = s.history(&UserKey::from("a")).await;
        let history_b = s.history(&UserKey::from("b")).await;
        assert!(history_a[0].content.contains("1. a1\n\n2. a2"));
        assert!(!history_a[0].content.contains("b1"));
        assert!(history_b[0].content.contains("1. b1\n\n2. b2"));
        assert!(!history_b[0].content.contains("a2"));
        assert_eq!(delivered(&log_a).len(), 1);
        assert_eq!(delivered(&log_b).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_collecting_cancels_flush() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        // Build some history first
        send(&s, "u1", "first", &log).await;
        past_flush().await;
        past_cooldown().await;
        assert_eq!(s.history(&user).await.len(), 2);

        send(&s, "u1", "doomed", &log).await;
        sleep(Duration::from_millis(BATCH_MS / 2)).await;
        s.clear_user(&user).await;

        sleep(Duration::from_millis(5 * BATCH_MS)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(delivered(&log).len(), 1);
        assert!(s.history(&user).await.is_empty());
        assert_eq!(s.phase(&user).await, UserPhase::Idle);
        assert_eq!(s.stats().await, SchedulerStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_cooldown_allows_new_batch() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();
        let user = UserKey::from("u1");

        send(&s, "u1", "first", &log).await;
        past_flush().await;
        assert_eq!(s.phase(&user).await, UserPhase::Cooldown);

        s.clear_user(&user).await;
        assert_eq!(s.phase(&user).await, UserPhase::Idle);
        assert_eq!(send(&s, "u1", "fresh", &log).await, EnqueueOutcome::Queued { pending: 1 });

        past_flush().await;
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.calls.lock().unwrap()[1].history, vec![Turn::user("fresh")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_unknown_user_is_noop() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        s.clear_user(&UserKey::from("nobody")).await;
        assert_eq!(s.stats().await, SchedulerStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_snapshot() {
        let provider = MockProvider::default();
        let s = scheduler(&provider);
        let log = Log::default();

        send(&s, "b", "hello", &log).await;
        past_flush().await;
        send(&s, "a", "hi", &log).await;

        assert_eq!(
            s.stats().await,
            SchedulerStats {
                active_conversations: 1,
                total_turns: 2,
                collecting: 1,
                processing: 0,
                cooling_down: 1,
            }
        );
    }
}

// =============================================================================
// DISPATCHER TESTS
// =============================================================================

mod dispatch {
    use super::*;

    fn dispatcher(provider: &MockProvider) -> Dispatcher<MockProvider> {
        let policy = EligibilityPolicy::new(2, vec!["alex".into(), "bot".into(), "@".into()]);
        Dispatcher::new(policy, scheduler(provider))
    }

    fn inbound(user: &str, text: &str, is_group: bool) -> InboundMessage {
        InboundMessage {
            user: UserKey::from(user),
            display_name: "Dana".to_string(),
            text: text.to_string(),
            is_group,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ineligible_messages_never_reach_scheduler() {
        let provider = MockProvider::default();
        let d = dispatcher(&provider);
        let log = Log::default();

        assert_eq!(d.dispatch(inbound("u1", "!clearai", false), recorder(&log)).await, None);
        assert_eq!(d.dispatch(inbound("u1", "k", false), recorder(&log)).await, None);
        assert_eq!(d.dispatch(inbound("g:u1", "lunch anyone?", true), recorder(&log)).await, None);
        assert_eq!(d.dispatch(inbound("u1", "Hello", false), recorder(&log)).await, None);

        past_flush().await;
        assert_eq!(provider.call_count(), 0);
        assert_eq!(d.scheduler().stats().await, SchedulerStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_emoji_is_enqueued() {
        let provider = MockProvider::default();
        let d = dispatcher(&provider);
        let log = Log::default();

        assert_eq!(
            d.dispatch(inbound("u1", "👍", false), recorder(&log)).await,
            Some(EnqueueOutcome::Queued { pending: 1 })
        );
        past_flush().await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_prompt(), "👍");
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_mention_is_enqueued() {
        let provider = MockProvider::default();
        let d = dispatcher(&provider);
        let log = Log::default();

        let outcome = d
            .dispatch(inbound("g:u1", "hey Alex, you around?", true), recorder(&log))
            .await;
        assert_eq!(outcome, Some(EnqueueOutcome::Queued { pending: 1 }));

        past_flush().await;
        assert_eq!(provider.last_prompt(), "hey Alex, you around?");
        assert_eq!(delivered(&log), vec!["reply 1"]);
    }
}
