//! Decider configuration, persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DecideError, DecideResult};

/// How a set of mutually indifferent candidates collapses to one winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSelect {
    /// The first candidate in candidate order.
    First,
    /// The last candidate in candidate order.
    Last,
    /// Delegate to the agent's [`IndifferenceResolver`](crate::semantics::IndifferenceResolver).
    Ask,
    /// Uniformly at random.
    #[default]
    Random,
}

impl std::fmt::Display for UserSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Last => write!(f, "last"),
            Self::Ask => write!(f, "ask"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Treatment of non-acceptable preferences on non-context slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePreferencesMode {
    /// Mode 0: full preference semantics on every slot.
    #[default]
    Handle,
    /// Mode 1: full semantics, but log a warning when one is used.
    Warn,
    /// Mode 2: non-context slots take every acceptable candidate.
    Ignore,
}

/// How far the demotion walk scans down the goal stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemotionWalk {
    /// Re-derive levels by walking every goal from the top.
    #[default]
    FullStack,
    /// Only walk goals between the highest level anything could fall from and
    /// the lowest level anything could fall to.
    BoundedRange,
}

/// Configuration for an [`AgentContext`](crate::agent::AgentContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeciderConfig {
    #[serde(default)]
    pub user_select: UserSelect,
    /// Seed for the `random` selection policy. `None` seeds from entropy.
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub attribute_preferences: AttributePreferencesMode,
    /// Goal dependency sets, non-context short-circuit, consistency checking.
    #[serde(default = "default_operand2_mode")]
    pub operand2_mode: bool,
    /// Suppress state no-change sub-goals ("wait").
    #[serde(default)]
    pub wait_snc: bool,
    #[serde(default)]
    pub demotion_walk: DemotionWalk,
    /// Maximum number of goals on the stack, top goal included.
    #[serde(default = "default_max_goal_depth")]
    pub max_goal_depth: usize,
}

fn default_operand2_mode() -> bool {
    true
}
fn default_max_goal_depth() -> usize {
    100
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            user_select: UserSelect::default(),
            random_seed: None,
            attribute_preferences: AttributePreferencesMode::default(),
            operand2_mode: default_operand2_mode(),
            wait_snc: false,
            demotion_walk: DemotionWalk::default(),
            max_goal_depth: default_max_goal_depth(),
        }
    }
}

impl DeciderConfig {
    /// A deterministic configuration: first-candidate selection, full
    /// semantics on every slot, no goal dependency tracking.
    pub fn deterministic() -> Self {
        Self {
            user_select: UserSelect::First,
            random_seed: Some(0),
            operand2_mode: false,
            ..Self::default()
        }
    }

    /// Whether non-context slots skip everything past acceptable filtering.
    pub fn short_circuits_non_context_slots(&self) -> bool {
        self.operand2_mode || self.attribute_preferences == AttributePreferencesMode::Ignore
    }

    pub fn validate(&self) -> DecideResult<()> {
        if self.max_goal_depth == 0 {
            return Err(DecideError::InvalidConfig {
                message: "max_goal_depth must be > 0 (the top goal needs a level)".into(),
            });
        }
        Ok(())
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> DecideResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DecideError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| DecideError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save this configuration as TOML.
    pub fn save(&self, path: &Path) -> DecideResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| DecideError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_toml(&self) -> DecideResult<String> {
        toml::to_string_pretty(self).map_err(|e| DecideError::InvalidConfig {
            message: format!("failed to serialize config: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operand2_architecture() {
        let config = DeciderConfig::default();
        assert!(config.operand2_mode);
        assert!(!config.wait_snc);
        assert_eq!(config.user_select, UserSelect::Random);
        assert!(config.short_circuits_non_context_slots());
    }

    #[test]
    fn ignore_mode_short_circuits_without_operand2() {
        let config = DeciderConfig {
            operand2_mode: false,
            attribute_preferences: AttributePreferencesMode::Ignore,
            ..Default::default()
        };
        assert!(config.short_circuits_non_context_slots());
        assert!(!DeciderConfig::deterministic().short_circuits_non_context_slots());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: DeciderConfig = toml::from_str("user_select = \"last\"").unwrap();
        assert_eq!(config.user_select, UserSelect::Last);
        assert!(config.operand2_mode);
        assert_eq!(config.max_goal_depth, 100);
        assert_eq!(config.demotion_walk, DemotionWalk::FullStack);
    }

    #[test]
    fn save_and_load_preserve_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("decider.toml");
        let config = DeciderConfig {
            user_select: UserSelect::Ask,
            random_seed: Some(7),
            wait_snc: true,
            demotion_walk: DemotionWalk::BoundedRange,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(DeciderConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn zero_goal_depth_rejected() {
        let config = DeciderConfig {
            max_goal_depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DecideError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "user_select = [").unwrap();
        assert!(matches!(
            DeciderConfig::load(&path),
            Err(DecideError::Parse { .. })
        ));
    }
}
