//! Per-user batching and cooldown scheduler.
//!
//! Every user moves through `Idle -> Collecting -> Processing -> Cooldown -> Idle`.
//! Idle users have no entry at all. Each user has exactly one entry in the
//! state map, so the phases are mutually exclusive by construction.
//!
//! Messages that arrive while a user is Processing or in Cooldown are dropped.
//! Every armed timer and every Processing entry carries an epoch; a timer fire
//! or a provider result whose epoch no longer matches the user's entry (because
//! the user was cleared or re-armed meanwhile) changes nothing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chatbot::debounce::ScheduledTask;
use crate::chatbot::history::ConversationStore;
use crate::chatbot::message::{Turn, UserKey};
use crate::chatbot::prompt::{merge_batch, system_prompt, FallbackPicker};
use crate::chatbot::provider::CompletionProvider;

/// Callback that sends a reply back to wherever the user's last message came from.
pub type Deliver = Box<dyn FnOnce(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Wrap an async closure as a [`Deliver`].
pub fn deliver_with<F, Fut>(f: F) -> Deliver
where
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |reply| Box::pin(f(reply)))
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Debounce window after the last message of a burst.
    pub batch_delay: Duration,
    /// Quiet period after a reply.
    pub cooldown_delay: Duration,
    pub max_history_length: usize,
    pub persona_name: String,
    pub personality: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_secs(15),
            cooldown_delay: Duration::from_secs(10),
            max_history_length: 10,
            persona_name: "Alex".to_string(),
            personality: None,
        }
    }
}

/// What happened to an enqueued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added to the user's batch, which now holds `pending` messages.
    Queued { pending: usize },
    /// Dropped: a reply for this user is being generated.
    Busy,
    /// Dropped: the user is in the post-reply quiet period.
    CoolingDown,
}

/// Observable phase of a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPhase {
    Idle,
    Collecting,
    Processing,
    Cooldown,
}

/// Snapshot of scheduler counters, taken under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub active_conversations: usize,
    pub total_turns: usize,
    pub collecting: usize,
    pub processing: usize,
    pub cooling_down: usize,
}

struct PendingBatch {
    messages: Vec<String>,
    user_name: String,
    deliver: Deliver,
}

enum UserState {
    Collecting {
        batch: PendingBatch,
        timer: ScheduledTask,
        epoch: u64,
    },
    Processing {
        epoch: u64,
    },
    Cooldown {
        timer: ScheduledTask,
        epoch: u64,
    },
}

impl UserState {
    fn phase(&self) -> UserPhase {
        match self {
            UserState::Collecting { .. } => UserPhase::Collecting,
            UserState::Processing { .. } => UserPhase::Processing,
            UserState::Cooldown { .. } => UserPhase::Cooldown,
        }
    }
}

struct SchedulerState {
    users: HashMap<UserKey, UserState>,
    history: ConversationStore,
    fallback: FallbackPicker,
    next_epoch: u64,
}

impl SchedulerState {
    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch = self.next_epoch.wrapping_add(1);
        self.next_epoch
    }

    fn is_processing(&self, user: &UserKey, epoch: u64) -> bool {
        matches!(
            self.users.get(user),
            Some(UserState::Processing { epoch: e }) if *e == epoch
        )
    }
}

struct Inner<P> {
    config: SchedulerConfig,
    provider: P,
    state: Mutex<SchedulerState>,
}

/// Debounces bursts of messages per user into one reply, then enforces a cooldown.
///
/// Cloning is cheap and shares the same registry.
pub struct BatchScheduler<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for BatchScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: CompletionProvider> BatchScheduler<P> {
    pub fn new(config: SchedulerConfig, provider: P) -> Self {
        Self::with_fallback(config, provider, FallbackPicker::from_entropy())
    }

    pub fn with_fallback(config: SchedulerConfig, provider: P, fallback: FallbackPicker) -> Self {
        let history = ConversationStore::new(config.max_history_length);
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                state: Mutex::new(SchedulerState {
                    users: HashMap::new(),
                    history,
                    fallback,
                    next_epoch: 0,
                }),
            }),
        }
    }

    /// Add a message to the user's pending batch and push the flush deadline out.
    ///
    /// The most recent `deliver` replaces any earlier one. Dropped silently while
    /// the user is Processing or in Cooldown.
    pub async fn enqueue(
        &self,
        user: UserKey,
        text: String,
        user_name: String,
        deliver: Deliver,
    ) -> EnqueueOutcome {
        let mut state = self.inner.state.lock().await;

        match state.users.get(&user) {
            Some(UserState::Cooldown { .. }) => {
                info!("⏸️ {} ({}) is in cooldown, ignoring message", user_name, user);
                return EnqueueOutcome::CoolingDown;
            }
            Some(UserState::Processing { .. }) => {
                info!("⏸️ {} ({}) has a reply in flight, ignoring message", user_name, user);
                return EnqueueOutcome::Busy;
            }
            _ => {}
        }

        let epoch = state.bump_epoch();
        let batch = match state.users.remove(&user) {
            Some(UserState::Collecting {
                mut batch, timer, ..
            }) => {
                timer.cancel();
                batch.messages.push(text);
                batch.deliver = deliver;
                batch
            }
            _ => PendingBatch {
                messages: vec![text],
                user_name,
                deliver,
            },
        };

        let pending = batch.messages.len();
        info!(
            "📦 Added message to batch for {} ({}) (total: {})",
            batch.user_name, user, pending
        );

        let timer = self.arm_debounce(user.clone(), epoch);
        state.users.insert(user, UserState::Collecting { batch, timer, epoch });

        EnqueueOutcome::Queued { pending }
    }

    /// Drop every trace of a user: timers, pending batch and history.
    ///
    /// A reply already in flight is still delivered, but is neither remembered
    /// nor followed by a cooldown.
    pub async fn clear_user(&self, user: &UserKey) {
        let mut state = self.inner.state.lock().await;
        match state.users.remove(user) {
            Some(UserState::Collecting { batch, timer, .. }) => {
                timer.cancel();
                info!("🧹 Discarded {} pending message(s) for {}", batch.messages.len(), user);
            }
            Some(UserState::Cooldown { timer, .. }) => {
                timer.cancel();
            }
            Some(UserState::Processing { .. }) => {
                info!("🧹 Cleared {} while a reply is in flight", user);
            }
            None => {}
        }
        state.history.clear(user);
        info!("🧹 Cleared conversation state for {}", user);
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock().await;
        let mut stats = SchedulerStats {
            active_conversations: state.history.conversation_count(),
            total_turns: state.history.turn_count(),
            ..SchedulerStats::default()
        };
        for user_state in state.users.values() {
            match user_state.phase() {
                UserPhase::Collecting => stats.collecting += 1,
                UserPhase::Processing => stats.processing += 1,
                UserPhase::Cooldown => stats.cooling_down += 1,
                UserPhase::Idle => {}
            }
        }
        stats
    }

    #[cfg(test)]
    pub async fn phase(&self, user: &UserKey) -> UserPhase {
        let state = self.inner.state.lock().await;
        state
            .users
            .get(user)
            .map(UserState::phase)
            .unwrap_or(UserPhase::Idle)
    }

    #[cfg(test)]
    pub async fn history(&self, user: &UserKey) -> Vec<Turn> {
        self.inner.state.lock().await.history.get(user)
    }

    fn arm_debounce(&self, user: UserKey, epoch: u64) -> ScheduledTask {
        let scheduler = self.clone();
        ScheduledTask::after(self.inner.config.batch_delay, move || async move {
            scheduler.flush(user, epoch).await;
        })
    }

    fn arm_cooldown(&self, user: UserKey, epoch: u64) -> ScheduledTask {
        let scheduler = self.clone();
        ScheduledTask::after(self.inner.config.cooldown_delay, move || async move {
            scheduler.expire_cooldown(user, epoch).await;
        })
    }

    /// Debounce expiry: merge the batch, ask the provider, deliver, cool down.
    async fn flush(&self, user: UserKey, epoch: u64) {
        let (batch, prompt, history) = {
            let mut state = self.inner.state.lock().await;
            let current = matches!(
                state.users.get(&user),
                Some(UserState::Collecting { epoch: e, .. }) if *e == epoch
            );
            if !current {
                return;
            }
            let Some(UserState::Collecting { batch, timer, .. }) = state.users.remove(&user) else {
                return;
            };
            // This task is the timer; dropping its handle would abort the flush.
            timer.disarm();
            state.users.insert(user.clone(), UserState::Processing { epoch });

            let prompt = merge_batch(&batch.messages);
            let mut history = state.history.get(&user);
            history.push(Turn::user(prompt.clone()));
            (batch, prompt, history)
        };

        info!(
            "🚀 Processing batch for {} ({}) with {} message(s)",
            batch.user_name,
            user,
            batch.messages.len()
        );

        let system = system_prompt(
            &self.inner.config.persona_name,
            &batch.user_name,
            self.inner.config.personality.as_deref(),
        );
        let result = self.inner.provider.generate(&system, &history).await;

        let reply = {
            let mut state = self.inner.state.lock().await;
            match result {
                Ok(reply) => {
                    if state.is_processing(&user, epoch) {
                        state.history.append(&user, Turn::user(prompt));
                        state.history.append(&user, Turn::assistant(reply.clone()));
                    }
                    reply
                }
                Err(e) => {
                    error!("❌ Completion failed for {} ({}): {}", batch.user_name, user, e);
                    state.fallback.pick().to_string()
                }
            }
        };

        // Run the delivery on its own task so a panicking sender cannot strand
        // the user in Processing.
        if let Err(e) = tokio::spawn((batch.deliver)(reply)).await {
            warn!("Delivery to {} failed: {}", user, e);
        }

        let mut state = self.inner.state.lock().await;
        if !state.is_processing(&user, epoch) {
            return;
        }
        let cooldown_epoch = state.bump_epoch();
        let timer = self.arm_cooldown(user.clone(), cooldown_epoch);
        info!(
            "❄️ Starting cooldown for {} ({}s)",
            user,
            self.inner.config.cooldown_delay.as_secs_f32()
        );
        state.users.insert(
            user,
            UserState::Cooldown {
                timer,
                epoch: cooldown_epoch,
            },
        );
    }

    async fn expire_cooldown(&self, user: UserKey, epoch: u64) {
        let mut state = self.inner.state.lock().await;
        let current = matches!(
            state.users.get(&user),
            Some(UserState::Cooldown { epoch: e, .. }) if *e == epoch
        );
        if !current {
            return;
        }
        if let Some(UserState::Cooldown { timer, .. }) = state.users.remove(&user) {
            timer.disarm();
        }
        info!("✅ Cooldown ended for {}", user);
    }
}
