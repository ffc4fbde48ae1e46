use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation, containing a role and text content.
///
/// This is the primitive the [`model::Model`](crate::model::Model) trait
/// speaks; see [`TranscriptEntry`] for the richer, persisted form used by
/// an inner session's transcript.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// One entry in an inner session's transcript.
///
/// A superset of [`Message`]: adds the timestamp and, for user-role
/// entries, the turn number the entry belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set only for `role == Message::USER`; the count of user-role entries
    /// up to and including this one.
    pub turn_number: Option<u32>,
}

impl TranscriptEntry {
    pub fn message(&self) -> Message {
        Message {
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// An ordered transcript. Bundled as a newtype so `current_turn` and
/// append operations live next to the data they operate on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript(pub Vec<TranscriptEntry>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an entry, computing `turn_number` the way
    /// `InternalSession.add_message` does: the running count of prior
    /// user-role entries, plus this one if it is itself user-role.
    pub fn push(&mut self, role: &str, content: &str) {
        let turn_number = if role == Message::USER {
            Some(self.user_message_count() as u32 + 1)
        } else {
            None
        };
        self.0.push(TranscriptEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            turn_number,
        });
    }

    pub fn user_message_count(&self) -> usize {
        self.0.iter().filter(|e| e.role == Message::USER).count()
    }

    /// The current turn number: the count of user-role entries in the
    /// transcript, computed directly over structured entries rather than by
    /// counting a substring in a stringified history.
    pub fn current_turn(&self) -> u32 {
        self.user_message_count() as u32
    }

    pub fn as_messages(&self) -> Vec<Message> {
        self.0.iter().map(TranscriptEntry::message).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Verifies that a Message struct can be constructed and its fields are set correctly.
    fn test_message_construction() {
        let msg = Message {
            role: "user".to_string(),
            content: "hello".to_string(),
        };
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    /// Checks that cloning a Message produces an identical copy, and modifying the clone does not affect the original.
    fn test_message_cloning() {
        let msg1 = Message {
            role: "system".to_string(),
            content: "foo".to_string(),
        };
        let mut msg2 = msg1.clone();
        assert_eq!(msg1, msg2);
        msg2.content = "bar".to_string();
        assert_ne!(msg1, msg2);
    }

    #[test]
    /// Tests convenience constructors for common message types.
    fn test_convenience_constructors() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, Message::USER);
        let custom_msg = Message::new("function", "Result: 42");
        assert_eq!(custom_msg.role, "function");
    }

    #[test]
    /// Tests role checking methods.
    fn test_role_checking() {
        let user_msg = Message::user("Hello");
        assert!(user_msg.has_role(Message::USER));
        assert!(!user_msg.has_role(Message::ASSISTANT));
    }

    #[test]
    /// Tests serialization and deserialization.
    fn test_serialization() {
        let original = Message::user("Test message");
        let json = serde_json::to_string(&original).expect("Serialization failed");
        let deserialized: Message = serde_json::from_str(&json).expect("Deserialization failed");
        assert_eq!(original, deserialized);
    }

    #[test]
    /// Turn numbers advance only on user-role entries, matching the original's add_message rule.
    fn test_transcript_turn_numbers() {
        let mut t = Transcript::new();
        t.push(Message::USER, "hi");
        t.push(Message::ASSISTANT, "hello");
        t.push(Message::USER, "again");

        assert_eq!(t.0[0].turn_number, Some(1));
        assert_eq!(t.0[1].turn_number, None);
        assert_eq!(t.0[2].turn_number, Some(2));
        assert_eq!(t.current_turn(), 2);
    }

    #[test]
    /// An empty transcript reports turn 0 and no messages.
    fn test_transcript_empty() {
        let t = Transcript::new();
        assert_eq!(t.current_turn(), 0);
        assert!(t.is_empty());
    }
}
