use relaybot_common::models::{ConversationTurn, Role};
use tracing::debug;

/// Sliding window of conversation turns sent to the completion API.
///
/// Position 0 always holds the persona turn; the rest alternate user and
/// assistant. At most `max_pairs` exchanges are retained, the oldest pair
/// being dropped first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    max_pairs: usize,
}

impl ConversationHistory {
    pub fn new(persona: impl Into<String>, max_pairs: usize) -> Self {
        let mut turns = Vec::with_capacity(2 * max_pairs + 3);
        turns.push(ConversationTurn::system(persona));
        Self { turns, max_pairs }
    }

    /// Ordered copy for use as model input, persona first.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    /// Model input for a new user turn: the snapshot followed by `user_text`.
    pub fn prompt_with(&self, user_text: &str) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.extend(self.turns.iter().cloned());
        messages.push(ConversationTurn::user(user_text));
        messages
    }

    /// Records a completed exchange, evicting the oldest pairs over the cap.
    pub fn append(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.turns.push(ConversationTurn::user(user_text));
        self.turns.push(ConversationTurn::assistant(assistant_text));

        while self.turns.len() > self.capacity() {
            debug!("History over {} pairs, dropping oldest exchange", self.max_pairs);
            self.turns.drain(1..3);
        }
    }

    /// Drops every exchange, keeping only the persona.
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }

    pub fn system(&self) -> &ConversationTurn {
        &self.turns[0]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.len() <= 1
    }

    pub fn pairs(&self) -> usize {
        (self.turns.len() - 1) / 2
    }

    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    fn capacity(&self) -> usize {
        2 * self.max_pairs + 1
    }
}

/// Role of each retained turn, useful when logging the window shape.
pub fn roles(turns: &[ConversationTurn]) -> Vec<Role> {
    turns.iter().map(|t| t.role()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_pair_is_evicted() {
        let mut history = ConversationHistory::new("P", 1);
        history.append("u1", "a1");
        history.append("u2", "a2");

        assert_eq!(
            history.snapshot(),
            vec![
                ConversationTurn::system("P"),
                ConversationTurn::user("u2"),
                ConversationTurn::assistant("a2"),
            ]
        );
    }

    #[test]
    fn test_length_bound_and_system_first() {
        let mut history = ConversationHistory::new("persona", 3);
        for i in 0..20 {
            history.append(format!("u{i}"), format!("a{i}"));
            let snap = history.snapshot();
            assert!(snap.len() <= 2 * 3 + 1);
            assert_eq!(snap[0], ConversationTurn::system("persona"));
        }
        assert_eq!(history.pairs(), 3);
        assert_eq!(
            roles(&history.snapshot()),
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(history.snapshot()[1].content(), "u17");
    }

    #[test]
    fn test_reset_keeps_persona() {
        let mut history = ConversationHistory::new("persona", 2);
        history.append("u", "a");
        history.reset();
        assert_eq!(history.len(), 1);
        assert!(history.is_empty());
        assert_eq!(history.system().content(), "persona");
    }

    #[test]
    fn test_zero_pairs_keeps_only_persona() {
        let mut history = ConversationHistory::new("persona", 0);
        history.append("u", "a");
        assert_eq!(history.snapshot(), vec![ConversationTurn::system("persona")]);
    }

    #[test]
    fn test_prompt_with_appends_user_turn() {
        let mut history = ConversationHistory::new("persona", 2);
        history.append("u1", "a1");
        let prompt = history.prompt_with("u2");
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[3], ConversationTurn::user("u2"));
        // the history itself is untouched
        assert_eq!(history.len(), 3);
    }
}
