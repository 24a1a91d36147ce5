//! TOML scenarios for the `akh-decide` binary.
//!
//! A scenario deposits a set of preferences into one slot of a fresh top
//! goal, either its operator slot or `(S1 ^attribute)`:
//!
//! ```toml
//! [slot]
//! context = true
//!
//! [[preference]]
//! kind = "acceptable"
//! value = "A"
//!
//! [[preference]]
//! kind = "better"
//! value = "A"
//! referent = "B"
//! ```
//!
//! Values and referents are symbolic constants.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::AgentContext;
use crate::config::DeciderConfig;
use crate::error::{DecideError, DecideResult};
use crate::impasse::{ImpasseInfo, ImpasseType};
use crate::instantiation::{InstantiationSpec, PreferenceSpec};
use crate::preference::PreferenceType;
use crate::stats::DeciderStats;
use crate::symbol::SymbolId;

/// Which slot of the top goal a scenario targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSlot {
    /// The top goal's operator slot. Otherwise `(S1 ^attribute)`.
    #[serde(default = "default_context")]
    pub context: bool,
    #[serde(default)]
    pub attribute: Option<String>,
}

fn default_context() -> bool {
    true
}

impl Default for ScenarioSlot {
    fn default() -> Self {
        Self {
            context: default_context(),
            attribute: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioPreference {
    pub kind: PreferenceType,
    pub value: String,
    #[serde(default)]
    pub referent: Option<String>,
    #[serde(default)]
    pub o_supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Decider configuration; the deterministic configuration when absent.
    #[serde(default)]
    pub config: Option<DeciderConfig>,
    #[serde(default)]
    pub slot: ScenarioSlot,
    #[serde(default, rename = "preference")]
    pub preferences: Vec<ScenarioPreference>,
}

/// Result of resolving a scenario's slot once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub slot: String,
    pub impasse: ImpasseType,
    pub candidates: Vec<String>,
}

impl std::fmt::Display for ResolveReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} [{}]", self.slot, self.impasse, self.candidates.join(", "))
    }
}

/// One goal of the stack after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalReport {
    pub goal: String,
    pub operator: Option<String>,
    pub impasse: Option<ImpasseInfo>,
}

/// Goal stack and counters after running a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub goals: Vec<GoalReport>,
    pub working_memory: Vec<String>,
    pub stats: DeciderStats,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (depth, goal) in self.goals.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(f, "{indent}{}", goal.goal)?;
            if let Some(op) = &goal.operator {
                write!(f, " ^operator {op}")?;
            }
            writeln!(f)?;
            if let Some(impasse) = &goal.impasse {
                writeln!(
                    f,
                    "{indent}  -> {} {} impasse on ^{} [{}]",
                    impasse.id,
                    impasse.kind,
                    impasse.attribute.as_deref().unwrap_or("?"),
                    impasse.items.join(", ")
                )?;
            }
        }
        write!(f, "{}", self.stats)
    }
}

impl Scenario {
    pub fn load(path: &Path) -> DecideResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DecideError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| DecideError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_toml(content: &str) -> DecideResult<Self> {
        toml::from_str(content).map_err(|e| DecideError::Scenario {
            message: e.to_string(),
        })
    }

    fn agent(&self) -> DecideResult<AgentContext> {
        let config = self.config.clone().unwrap_or_else(DeciderConfig::deterministic);
        let mut agent = AgentContext::new(config)?;
        agent.create_top_goal()?;
        Ok(agent)
    }

    /// The `(id, attr)` pair this scenario targets on `goal`.
    fn target(&self, agent: &mut AgentContext, goal: SymbolId) -> DecideResult<SymbolId> {
        if self.slot.context {
            return Ok(agent.predefined().operator);
        }
        let Some(name) = self.slot.attribute.as_deref() else {
            return Err(DecideError::Scenario {
                message: "a non-context slot needs an `attribute`".into(),
            });
        };
        let attr = agent.make_constant(name);
        if attr == agent.predefined().operator {
            agent.release_symbol(attr);
            return Err(DecideError::Scenario {
                message: format!(
                    "`operator` on {} is the context slot; set `context = true`",
                    agent.symbol_name(goal)
                ),
            });
        }
        Ok(attr)
    }

    /// Deposit the scenario's preferences on `goal` as one instantiation.
    /// Returns the targeted attribute.
    pub fn install(&self, agent: &mut AgentContext, goal: SymbolId) -> DecideResult<SymbolId> {
        let attr = self.target(agent, goal)?;
        let mut spec = InstantiationSpec::new("scenario", goal);
        let mut owned = Vec::new();
        for pref in &self.preferences {
            let value = agent.make_constant(&pref.value);
            owned.push(value);
            let referent = match (&pref.referent, pref.kind.is_binary()) {
                (Some(name), _) => {
                    let referent = agent.make_constant(name);
                    owned.push(referent);
                    Some(referent)
                }
                (None, true) => {
                    for sym in owned {
                        agent.release_symbol(sym);
                    }
                    return Err(DecideError::Scenario {
                        message: format!("{} preference on {} needs a referent", pref.kind, pref.value),
                    });
                }
                (None, false) => None,
            };
            spec = spec.with_preference(PreferenceSpec {
                kind: pref.kind,
                id: goal,
                attr,
                value,
                referent,
                o_supported: pref.o_supported,
            });
        }
        let result = agent.add_instantiation(spec);
        for sym in owned {
            agent.release_symbol(sym);
        }
        result?;
        Ok(attr)
    }

    /// Resolve the scenario's slot once through the selection policy.
    pub fn resolve(&self) -> DecideResult<ResolveReport> {
        let mut agent = self.agent()?;
        let goal = agent.require_top_goal()?;
        let attr = self.install(&mut agent, goal)?;
        let resolution = agent.resolve_slot(goal, attr)?;
        let candidates = resolution
            .candidates
            .iter()
            .filter_map(|&p| agent.preference(p))
            .map(|p| agent.symbol_name(p.value))
            .collect();
        Ok(ResolveReport {
            slot: format!("({} ^{})", agent.symbol_name(goal), agent.symbol_name(attr)),
            impasse: resolution.impasse,
            candidates,
        })
    }

    /// Deposit the preferences and run `cycles` decision cycles.
    pub fn run(&self, cycles: u64) -> DecideResult<RunReport> {
        let mut agent = self.agent()?;
        let goal = agent.require_top_goal()?;
        self.install(&mut agent, goal)?;
        agent.run_cycles(cycles)?;
        Ok(report(&agent))
    }
}

fn report(agent: &AgentContext) -> RunReport {
    let goals = agent
        .goal_stack()
        .into_iter()
        .map(|goal| GoalReport {
            goal: agent.symbol_name(goal),
            operator: agent.operator_of(goal).map(|op| agent.symbol_name(op)),
            impasse: agent.impasse_below(goal),
        })
        .collect();
    RunReport {
        goals,
        working_memory: agent.working_memory().iter().map(|w| w.to_string()).collect(),
        stats: agent.stats().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BETTER: &str = r#"
[[preference]]
kind = "acceptable"
value = "A"

[[preference]]
kind = "acceptable"
value = "B"

[[preference]]
kind = "better"
value = "A"
referent = "B"
"#;

    #[test]
    fn better_preference_picks_a() {
        let report = Scenario::from_toml(BETTER).unwrap().resolve().unwrap();
        assert_eq!(report.impasse, ImpasseType::None);
        assert_eq!(report.candidates, vec!["A"]);
        assert_eq!(report.slot, "(S1 ^operator)");
    }

    #[test]
    fn requires_on_distinct_values_fail() {
        let scenario = Scenario::from_toml(
            r#"
[[preference]]
kind = "require"
value = "A"

[[preference]]
kind = "require"
value = "B"
"#,
        )
        .unwrap();
        let report = scenario.resolve().unwrap();
        assert_eq!(report.impasse, ImpasseType::ConstraintFailure);
        assert_eq!(report.candidates, vec!["A", "B"]);
    }

    #[test]
    fn non_context_slot_needs_an_attribute() {
        let scenario = Scenario::from_toml("[slot]\ncontext = false\n").unwrap();
        assert!(matches!(
            scenario.resolve(),
            Err(DecideError::Scenario { .. })
        ));
    }

    #[test]
    fn binary_preference_without_referent_is_rejected() {
        let scenario = Scenario::from_toml("[[preference]]\nkind = \"worse\"\nvalue = \"A\"\n").unwrap();
        assert!(matches!(
            scenario.resolve(),
            Err(DecideError::Scenario { .. })
        ));
    }

    #[test]
    fn run_installs_the_winner() {
        let report = Scenario::from_toml(BETTER).unwrap().run(1).unwrap();
        assert_eq!(report.goals.len(), 1);
        assert_eq!(report.goals[0].operator.as_deref(), Some("A"));
        assert_eq!(report.stats.decision_cycles, 1);
    }

    #[test]
    fn scenario_files_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tie.toml");
        std::fs::write(
            &path,
            "[[preference]]\nkind = \"acceptable\"\nvalue = \"A\"\n\n[[preference]]\nkind = \"acceptable\"\nvalue = \"B\"\n",
        )
        .unwrap();
        let report = Scenario::load(&path).unwrap().run(1).unwrap();
        assert_eq!(report.goals.len(), 2);
        let impasse = report.goals[0].impasse.as_ref().unwrap();
        assert_eq!(impasse.kind, ImpasseType::Tie);
        assert_eq!(impasse.items, vec!["A", "B"]);
    }
}
