use serde::{Deserialize, Serialize};

use crate::catalog::CriminalTemplate;

/// The target of a bounty: a built-in NPC, a custom NPC, or a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criminal {
    pub name: String,
    pub faction: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub is_player: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub wiki: String,
    #[serde(default)]
    pub built_in: bool,
}

impl Criminal {
    #[must_use]
    pub fn new(name: impl Into<String>, faction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            faction: faction.into(),
            icon: String::new(),
            is_player: false,
            aliases: Vec::new(),
            wiki: String::new(),
            built_in: false,
        }
    }

    /// A player being hunted. Player bounties never respawn.
    #[must_use]
    pub fn player(name: impl Into<String>, faction: impl Into<String>) -> Self {
        Self {
            is_player: true,
            ..Self::new(name, faction)
        }
    }

    #[must_use]
    pub fn from_template(template: &CriminalTemplate) -> Self {
        Self {
            name: template.name.clone(),
            faction: template.faction.clone(),
            icon: template.icon.clone(),
            is_player: false,
            aliases: template.aliases.clone(),
            wiki: template.wiki.clone(),
            built_in: true,
        }
    }

    /// Whether `name` refers to this criminal, by name or alias.
    #[must_use]
    pub fn is_called(&self, name: &str) -> bool {
        let wanted = name.trim();
        self.name.eq_ignore_ascii_case(wanted)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(wanted))
    }
}
