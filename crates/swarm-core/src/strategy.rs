//! Collective-communication strategy tags.
//!
//! The launcher never interprets a strategy; it only validates the name and
//! hands the tag to workers through their environment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Simple,
    Star,
    Ring,
    Clique,
    Tree,
    BinaryTree,
    #[default]
    BinaryTreeStar,
    Auto,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::Simple,
        Strategy::Star,
        Strategy::Ring,
        Strategy::Clique,
        Strategy::Tree,
        Strategy::BinaryTree,
        Strategy::BinaryTreeStar,
        Strategy::Auto,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Simple => "SIMPLE",
            Strategy::Star => "STAR",
            Strategy::Ring => "RING",
            Strategy::Clique => "CLIQUE",
            Strategy::Tree => "TREE",
            Strategy::BinaryTree => "BINARY_TREE",
            Strategy::BinaryTreeStar => "BINARY_TREE_STAR",
            Strategy::Auto => "AUTO",
        }
    }

    /// All valid names, for help text and error messages.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|st| st.name() == wanted)
            .ok_or_else(|| ParseError::UnknownStrategy {
                name: s.to_string(),
                options: Self::names().join(" | "),
            })
    }
}
