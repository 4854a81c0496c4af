//! Message types for conversation history.

use crate::Role;
use serde::{Deserialize, Serialize};

/// A single role-tagged message.
///
/// # Examples
///
/// ```
/// use quill_core::{Message, Role};
///
/// let message = Message::user("Write chapter one.");
/// assert_eq!(message.role, Role::User);
/// assert_eq!(message.content, "Write chapter one.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Message {
    /// Creates a message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}
