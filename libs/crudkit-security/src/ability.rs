use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::PermError;

/// Per-field ability.
///
/// Deletion is not a field ability; it is tracked per entity
/// (see [`crate::TablePerm::allow_delete`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    /// Usable in a filter condition.
    Query,
    Create,
    Read,
    Update,
}

impl Ability {
    pub const ALL: [Ability; 4] = [Self::Query, Self::Create, Self::Read, Self::Update];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
        }
    }
}

impl FromStr for Ability {
    type Err = PermError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| PermError::UnknownAbility(s.to_owned()))
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
