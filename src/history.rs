//! Bounded conversation history feeding the generative provider.

use serde::Serialize;

/// How many user/assistant turns are retained after the system turn.
pub const DEFAULT_TRAILING_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered turn sequence with a pinned system turn.
///
/// After any append the history holds the system turn plus at most `limit`
/// trailing turns; the oldest user/assistant turns are evicted first and the
/// system turn is never evicted.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self::with_limit(system_prompt, DEFAULT_TRAILING_TURNS)
    }

    pub fn with_limit(system_prompt: impl Into<String>, limit: usize) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::System,
                content: system_prompt.into(),
            }],
            limit,
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
        if self.turns.len() > 1 + self.limit {
            let overflow = self.turns.len() - 1 - self.limit;
            self.turns.drain(1..1 + overflow);
        }
    }

    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_turn_is_always_the_system_turn() {
        let mut history = ConversationHistory::new("be helpful");
        for i in 0..25 {
            history.push(Role::User, format!("question {i}"));
            history.push(Role::Assistant, format!("answer {i}"));
        }
        assert_eq!(history.snapshot()[0].role, Role::System);
        assert_eq!(history.snapshot()[0].content, "be helpful");
    }

    #[test]
    fn bound_holds_after_overflow() {
        let mut history = ConversationHistory::new("sys");
        for i in 0..30 {
            history.push(Role::User, format!("m{i}"));
        }
        assert_eq!(history.len(), 1 + DEFAULT_TRAILING_TURNS);
        // The trailing turns are the most recent ten, in order.
        let tail: Vec<&str> = history.snapshot()[1..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        let expected: Vec<String> = (20..30).map(|i| format!("m{i}")).collect();
        assert_eq!(tail, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn no_eviction_below_the_bound() {
        let mut history = ConversationHistory::with_limit("sys", 4);
        history.push(Role::User, "a");
        history.push(Role::Assistant, "b");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn turns_serialize_with_lowercase_roles() {
        let turn = Turn {
            role: Role::Assistant,
            content: "hi".into(),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
