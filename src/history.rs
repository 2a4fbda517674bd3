//! Bounded conversation history

use crate::types::Message;
use std::collections::VecDeque;

/// FIFO of raw messages with a fixed capacity
///
/// Pushing past capacity evicts the oldest entry; the length never exceeds
/// the capacity.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl ConversationHistory {
    /// Create an empty history holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest when over capacity
    pub fn push(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(message);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Messages oldest-first
    pub fn to_vec(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent message
    pub fn last(&self) -> Option<&Message> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message;
    use serde_json::json;

    fn msg(id: usize) -> Message {
        message(json!({ "id": id }))
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = ConversationHistory::new(2);
        history.push(message(json!({"m": "A"})));
        history.push(message(json!({"m": "B"})));
        history.push(message(json!({"m": "C"})));

        let entries = history.to_vec();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["m"], "B");
        assert_eq!(entries[1]["m"], "C");
    }

    #[test]
    fn test_length_is_min_of_count_and_capacity() {
        for capacity in [1usize, 3, 7, 100] {
            for count in [0usize, 1, 5, 150] {
                let mut history = ConversationHistory::new(capacity);
                for i in 0..count {
                    history.push(msg(i));
                }
                assert_eq!(history.len(), count.min(capacity));

                let expected: Vec<Message> = (count.saturating_sub(capacity)..count).map(msg).collect();
                assert_eq!(history.to_vec(), expected);
            }
        }
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = ConversationHistory::new(0);
        history.push(msg(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_clear_and_last() {
        let mut history = ConversationHistory::new(5);
        history.push(msg(1));
        history.push(msg(2));
        assert_eq!(history.last().unwrap()["id"], 2);
        history.clear();
        assert!(history.last().is_none());
        assert_eq!(history.capacity(), 5);
    }
}
