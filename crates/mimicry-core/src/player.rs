use serde::{Deserialize, Serialize};

use crate::game_trait::ConnectionId;

/// Maximum display name length in characters, unless a game overrides it.
pub const DEFAULT_MAX_NAME_LEN: usize = 16;

/// Side a participant plays for. Fixed once a round starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Unassigned,
    Evader,
    Pursuer,
}

/// A participant connected to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection: ConnectionId,
    pub display_name: String,
    pub role: Role,
    pub is_bot: bool,
}

/// Why a display name was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    Empty,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "display name is empty"),
        }
    }
}

impl std::error::Error for NameError {}

/// Normalize a requested display name: strip control characters, trim
/// whitespace, truncate to `max_len` characters. Empty results are refused.
pub fn sanitize_display_name(raw: &str, max_len: usize) -> Result<String, NameError> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let truncated: String = cleaned.trim().chars().take(max_len).collect();
    let name = truncated.trim_end().to_string();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    Ok(name)
}
