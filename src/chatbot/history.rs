//! Per-user conversation memory.
//!
//! Each user gets a bounded, ordered log of prior turns. When the log grows
//! past its cap the oldest entries are dropped by position, regardless of role.

use std::collections::{HashMap, VecDeque};

use crate::chatbot::message::{Turn, UserKey};

/// Bounded conversation logs, keyed by user.
pub struct ConversationStore {
    max_len: usize,
    conversations: HashMap<UserKey, VecDeque<Turn>>,
}

impl ConversationStore {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            conversations: HashMap::new(),
        }
    }

    /// Add a turn, evicting the oldest turns while over the cap.
    pub fn append(&mut self, user: &UserKey, turn: Turn) {
        let log = self.conversations.entry(user.clone()).or_default();
        log.push_back(turn);
        while log.len() > self.max_len {
            log.pop_front();
        }
    }

    /// Ordered history for a user, oldest first. Empty if none.
    pub fn get(&self, user: &UserKey) -> Vec<Turn> {
        self.conversations
            .get(user)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self, user: &UserKey) {
        self.conversations.remove(user);
    }

    /// Number of users with a live history.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Total turns across every history.
    pub fn turn_count(&self) -> usize {
        self.conversations.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> UserKey {
        UserKey::from(id)
    }

    #[test]
    fn test_empty_history() {
        let store = ConversationStore::new(4);
        assert!(store.get(&key("1")).is_empty());
        assert_eq!(store.conversation_count(), 0);
    }

    #[test]
    fn test_append_and_get_in_order() {
        let mut store = ConversationStore::new(4);
        store.append(&key("1"), Turn::user("hi"));
        store.append(&key("1"), Turn::assistant("hey"));

        let history = store.get(&key("1"));
        assert_eq!(history, vec![Turn::user("hi"), Turn::assistant("hey")]);
    }

    #[test]
    fn test_evicts_oldest_by_position() {
        let mut store = ConversationStore::new(3);
        for i in 0..7 {
            store.append(&key("1"), Turn::user(format!("m{i}")));
        }

        let history = store.get(&key("1"));
        assert_eq!(history.len(), 3);
        assert_eq!(
            history,
            vec![Turn::user("m4"), Turn::user("m5"), Turn::user("m6")]
        );
    }

    #[test]
    fn test_odd_cap_splits_pairs() {
        // Trimming ignores role pairing: a cap of 3 leaves an assistant turn first.
        let mut store = ConversationStore::new(3);
        store.append(&key("1"), Turn::user("q1"));
        store.append(&key("1"), Turn::assistant("a1"));
        store.append(&key("1"), Turn::user("q2"));
        store.append(&key("1"), Turn::assistant("a2"));

        let history = store.get(&key("1"));
        assert_eq!(history[0], Turn::assistant("a1"));
    }

    #[test]
    fn test_clear_is_idempotent_and_isolated() {
        let mut store = ConversationStore::new(4);
        store.append(&key("a"), Turn::user("x"));
        store.append(&key("b"), Turn::user("y"));

        store.clear(&key("a"));
        store.clear(&key("a"));

        assert!(store.get(&key("a")).is_empty());
        assert_eq!(store.get(&key("b")), vec![Turn::user("y")]);
        assert_eq!(store.conversation_count(), 1);
        assert_eq!(store.turn_count(), 1);
    }
}
