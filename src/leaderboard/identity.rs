//! Display identity shown next to a score.

use serde::{Serialize, Deserialize};

/// Name and avatar for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Name shown on the board.
    pub display_name: String,
    /// Avatar image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Identity with just a name.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into(), avatar_url: None }
    }
}

/// Identity derived from the id alone, used whenever no profile is known.
///
/// - `guest_*` ids show as `Guest`
/// - long ids (wallet addresses) are truncated to `0x1234...abcd`
/// - anything else is shown verbatim
pub fn fallback_identity(user_id: &str) -> Identity {
    if user_id.starts_with("guest_") {
        return Identity::named("Guest");
    }

    let chars: Vec<char> = user_id.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        Identity::named(format!("{}...{}", head, tail))
    } else {
        Identity::named(user_id)
    }
}
