//! Role types for conversation participants.

use serde::{Deserialize, Serialize};

/// Author of a message sent to the generation capability.
///
/// # Examples
///
/// ```
/// use quill_core::Role;
///
/// assert_eq!(format!("{}", Role::System), "system");
/// assert_ne!(Role::User, Role::Assistant);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and contracts
    #[display("system")]
    System,
    /// The prompt body (the "human" turn)
    #[display("user")]
    User,
    /// Prior model output replayed as context
    #[display("assistant")]
    Assistant,
}
