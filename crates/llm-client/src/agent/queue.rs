//! The turn-boundary message queue: callers can enqueue a message pair mid-turn
//! (e.g. a user reply typed while the assistant is still streaming) without
//! racing the in-flight turn; it is drained only at a turn boundary.

use std::collections::VecDeque;

use crate::message::Message;

/// A queued message pair: `original` is what the caller intended (kept for UI
/// display or persistence); `llm` is what actually gets appended to history and
/// sent to the model — the two may differ, e.g. when `original` carries
/// attachments that get flattened to text in `llm`.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub original: Message,
    pub llm: Message,
}

/// How many queued messages are drained per turn boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Dequeue a single message per boundary.
    OneAtATime,
    /// Dequeue every currently-queued message per boundary.
    #[default]
    All,
}

#[derive(Debug, Default)]
pub(super) struct MessageQueue {
    items: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub(super) fn push(&mut self, item: QueuedMessage) {
        self.items.push_back(item);
    }

    pub(super) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain according to `mode`, returning the `llm` message of each drained item
    /// in enqueue (FIFO) order, regardless of mode.
    pub(super) fn drain(&mut self, mode: QueueMode) -> Vec<QueuedMessage> {
        match mode {
            QueueMode::OneAtATime => self.items.pop_front().into_iter().collect(),
            QueueMode::All => self.items.drain(..).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn user(id: &str) -> Message {
        Message::User { id: id.to_string(), content: Vec::new(), timestamp: None }
    }

    fn item(id: &str) -> QueuedMessage {
        QueuedMessage { original: user(id), llm: user(id) }
    }

    #[test]
    fn one_at_a_time_drains_fifo() {
        let mut queue = MessageQueue::default();
        queue.push(item("a"));
        queue.push(item("b"));

        let first = queue.drain(QueueMode::OneAtATime);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].llm.id(), "a");
        assert!(!queue.is_empty());

        let second = queue.drain(QueueMode::OneAtATime);
        assert_eq!(second[0].llm.id(), "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn all_drains_everything_in_enqueue_order() {
        let mut queue = MessageQueue::default();
        queue.push(item("a"));
        queue.push(item("b"));
        queue.push(item("c"));

        let drained = queue.drain(QueueMode::All);
        let ids: Vec<&str> = drained.iter().map(|m| m.llm.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }
}
