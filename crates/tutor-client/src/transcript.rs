use tutor_protocol::{ChatTurn, Role};

/// Index handle to an assistant turn reserved for an in-progress answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(usize);

impl Slot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered chat turns. Turns are only ever appended or rewritten in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::user(content));
    }

    /// Append an empty assistant turn and return its slot.
    pub fn reserve_assistant(&mut self) -> Slot {
        self.turns.push(ChatTurn::assistant(String::new()));
        Slot(self.turns.len() - 1)
    }

    /// Replace the content of the assistant turn at `slot`.
    ///
    /// Returns false (and writes nothing) if the slot no longer points at an
    /// assistant turn.
    pub fn write(&mut self, slot: Slot, text: impl Into<String>) -> bool {
        match self.turns.get_mut(slot.0) {
            Some(turn) if turn.role == Role::Assistant => {
                turn.content = text.into();
                true
            }
            _ => false,
        }
    }

    pub fn content(&self, slot: Slot) -> Option<&str> {
        self.turns.get(slot.0).map(|turn| turn.content.as_str())
    }

    /// Turns worth sending as context: everything except empty assistant
    /// placeholders.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.turns
            .iter()
            .filter(|turn| !(turn.role == Role::Assistant && turn.content.is_empty()))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
