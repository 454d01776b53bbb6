//! Bounded conversation history.
//!
//! Append-only within a turn; truncated to the configured limit at turn
//! boundaries. A leading system message is pinned and never evicted.

use crate::message::{Message, Role};

#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit,
        }
    }

    /// Create a history pre-seeded with a system prompt.
    pub fn with_system_prompt(limit: usize, prompt: impl Into<String>) -> Self {
        let mut h = Self::new(limit);
        h.messages.push(Message::system(prompt));
        h
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the current messages, for building an LLM request.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Replace the entire history (playbook history strategies).
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// The leading system message, if any.
    pub fn system_prompt(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// Enforce the limit, dropping oldest entries first. Called at turn
    /// boundaries, never mid-turn. A leading system message does not count
    /// toward the limit and is never dropped.
    pub fn truncate(&mut self) {
        let pinned = usize::from(self.system_prompt().is_some());
        let body = self.messages.len() - pinned;
        if body <= self.limit {
            return;
        }
        let drop_count = body - self.limit;
        self.messages.drain(pinned..pinned + drop_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_drops_oldest_first() {
        let mut h = History::new(2);
        h.push(Message::user("one"));
        h.push(Message::assistant("two"));
        h.push(Message::user("three"));
        h.truncate();
        assert_eq!(h.len(), 2);
        assert_eq!(h.messages()[0].content, "two");
        assert_eq!(h.messages()[1].content, "three");
    }

    #[test]
    fn system_prompt_is_never_evicted() {
        let mut h = History::with_system_prompt(2, "be brief");
        for i in 0..5 {
            h.push(Message::user(format!("msg {i}")));
        }
        h.truncate();
        assert_eq!(h.len(), 3); // system + 2
        assert_eq!(h.messages()[0].role, Role::System);
        assert_eq!(h.messages()[1].content, "msg 3");
        assert_eq!(h.messages()[2].content, "msg 4");
    }

    #[test]
    fn truncate_under_limit_is_noop() {
        let mut h = History::with_system_prompt(8, "sys");
        h.push(Message::user("hello"));
        h.truncate();
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn replace_swaps_contents() {
        let mut h = History::with_system_prompt(8, "sys");
        h.push(Message::user("a"));
        h.replace(vec![Message::system("new sys")]);
        assert_eq!(h.len(), 1);
        assert_eq!(h.messages()[0].content, "new sys");
    }
}
