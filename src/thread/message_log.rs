use std::collections::HashSet;

use crate::models::ThreadMessage;

/// Messages of one thread as the user should see them.
///
/// The same message can arrive twice: from the REST response to our own
/// send and again as a socket echo, or from the history fetch and from a
/// live event around mount. Entries are keyed by message id and kept in
/// server timestamp order. Ties keep arrival order and messages without a
/// timestamp are appended where they arrive.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<ThreadMessage>,
    seen: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `message` unless its id is already present. Returns whether it
    /// was added.
    pub fn merge(&mut self, message: ThreadMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }

        let position = match message.created_at {
            Some(at) => self
                .messages
                .iter()
                .rposition(|m| m.created_at.is_some_and(|existing| existing <= at))
                .map_or(0, |i| i + 1),
            None => self.messages.len(),
        };
        self.messages.insert(position, message);
        true
    }

    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = ThreadMessage>) -> usize {
        messages
            .into_iter()
            .map(|m| usize::from(self.merge(m)))
            .sum()
    }

    pub fn messages(&self) -> &[ThreadMessage] {
        &self.messages
    }
}
