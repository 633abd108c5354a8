use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the classroom conversation.
///
/// Turns are immutable once created; they serialize directly into the
/// `{ "role": ..., "content": ... }` shape the chat-completion endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// The ordered turns of one classroom session.
///
/// The system turn is set at construction and is always the first and only
/// system turn; later turns can only be user or assistant turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::assistant(content));
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Turns shown to the user: everything except the system persona.
    pub fn visible(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().filter(|t| t.role != Role::System)
    }

    /// The turns to send with a reply request.
    ///
    /// With a window of `n`, only the system turn and the `n` most recent
    /// other turns are sent. `None` sends the whole conversation.
    pub fn request_turns(&self, window: Option<usize>) -> Vec<ConversationTurn> {
        let Some(window) = window else {
            return self.turns.clone();
        };
        let (system, rest) = self.turns.split_at(1);
        let skip = rest.len().saturating_sub(window);
        system.iter().chain(rest.iter().skip(skip)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        let mut conversation = Conversation::new("persona");
        conversation.push_assistant("intro");
        conversation.push_user("q1");
        conversation.push_assistant("a1");
        conversation.push_user("q2");
        conversation
    }

    #[test]
    fn turns_serialize_as_chat_messages() {
        let json = serde_json::to_value(ConversationTurn::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }

    #[test]
    fn visible_turns_hide_the_persona() {
        let conversation = sample();
        let visible: Vec<_> = conversation.visible().map(|t| t.content()).collect();
        assert_eq!(visible, vec!["intro", "q1", "a1", "q2"]);
    }

    #[test]
    fn request_window_keeps_the_system_turn_first() {
        let conversation = sample();
        let turns = conversation.request_turns(Some(2));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role(), Role::System);
        assert_eq!(turns[1].content(), "a1");
        assert_eq!(turns[2].content(), "q2");
    }

    #[test]
    fn request_window_larger_than_history_sends_everything() {
        let conversation = sample();
        assert_eq!(conversation.request_turns(Some(50)), conversation.turns());
        assert_eq!(conversation.request_turns(None), conversation.turns());
    }

    #[test]
    fn zero_window_sends_only_the_persona() {
        let turns = sample().request_turns(Some(0));
        assert_eq!(turns, vec![ConversationTurn::system("persona")]);
    }
}
