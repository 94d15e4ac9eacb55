//! Conversation history.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{Message, Role};

/// Ordered turns of one conversation.
///
/// Turns are only ever appended whole; replay order is append order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one turn.
    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Text of the most recent assistant turn that has any.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.last_assistant_text_since(0)
    }

    /// Like [`Self::last_assistant_text`], looking only at turns from
    /// index `start` on.
    pub fn last_assistant_text_since(&self, start: usize) -> Option<String> {
        self.turns
            .get(start..)
            .unwrap_or_default()
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(Message::text)
            .find(|text| !text.trim().is_empty())
    }

    /// The most recent turns, at most `window` of them.
    ///
    /// The cut always lands on a `user` turn so tool results stay with the
    /// assistant turn that requested them. If no such cut fits, the suffix
    /// starting at the last `user` turn is returned even if it is longer.
    pub fn recent(&self, window: usize) -> &[Message] {
        if self.turns.len() <= window {
            return &self.turns;
        }
        let earliest = self.turns.len() - window;
        let start = (earliest..self.turns.len())
            .find(|&i| self.turns[i].role == Role::User)
            .or_else(|| self.turns.iter().rposition(|m| m.role == Role::User))
            .unwrap_or(0);
        &self.turns[start..]
    }

    fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(turns: Vec<Message>) -> Self {
        Self { turns }
    }
}

/// Turns appended through a `Staged` are kept only if [`Staged::commit`] is
/// called; dropping it early (error or cancellation) rolls them back.
pub(crate) struct Staged<'a> {
    conversation: &'a mut Conversation,
    mark: usize,
    committed: bool,
}

impl<'a> Staged<'a> {
    pub(crate) fn new(conversation: &'a mut Conversation) -> Self {
        let mark = conversation.len();
        Self {
            conversation,
            mark,
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for Staged<'_> {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        &*self.conversation
    }
}

impl DerefMut for Staged<'_> {
    fn deref_mut(&mut self) -> &mut Conversation {
        &mut *self.conversation
    }
}

impl Drop for Staged<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.conversation.truncate(self.mark);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Part, ToolCall, ToolResult};
    use serde_json::json;

    fn tool_round() -> Vec<Message> {
        let call = ToolCall {
            id: "c1".into(),
            name: "search".into(),
            input: json!({}),
        };
        vec![
            Message {
                role: Role::Assistant,
                parts: vec![Part::ToolCall(call.clone())],
            },
            Message::tool_result(ToolResult::success(&call, json!("ok"))),
        ]
    }

    #[test]
    fn staged_rolls_back_unless_committed() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));

        {
            let mut staged = Staged::new(&mut conversation);
            staged.push(Message::assistant("partial"));
            assert_eq!(staged.len(), 2);
        }
        assert_eq!(conversation.len(), 1);

        let mut staged = Staged::new(&mut conversation);
        staged.push(Message::assistant("kept"));
        staged.commit();
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn last_assistant_text_skips_empty_turns() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("q"));
        conversation.push(Message::assistant("thinking"));
        for turn in tool_round() {
            conversation.push(turn);
        }
        assert_eq!(conversation.last_assistant_text().as_deref(), Some("thinking"));
        assert_eq!(conversation.last_assistant_text_since(2), None);
        assert_eq!(Conversation::new().last_assistant_text(), None);
    }

    #[test]
    fn recent_cuts_at_user_turn() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("first"));
        conversation.push(Message::assistant("a"));
        conversation.push(Message::user("second"));
        for turn in tool_round() {
            conversation.push(turn);
        }

        // Window 2 would start at the tool-call turn; with no user turn
        // ahead the cut falls back to the last one.
        let recent = conversation.recent(2);
        assert_eq!(recent[0].text(), "second");
        assert_eq!(recent.len(), 3);

        let recent = conversation.recent(4);
        assert_eq!(recent[0].text(), "second");

        assert_eq!(conversation.recent(10).len(), 5);
    }
}
