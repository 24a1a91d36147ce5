//! Decider counters.

use serde::{Deserialize, Serialize};

use crate::impasse::ImpasseType;

/// Running counters, reset by [`AgentContext::reinitialize`](crate::agent::AgentContext::reinitialize).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeciderStats {
    pub decision_cycles: u64,
    pub working_memory_phases: u64,
    pub context_decisions: u64,
    pub non_context_decisions: u64,
    pub ties: u64,
    pub conflicts: u64,
    pub constraint_failures: u64,
    pub no_changes: u64,
    pub wmes_added: u64,
    pub wmes_removed: u64,
    pub promotions: u64,
    pub identifiers_collected: u64,
    pub gds_retractions: u64,
    pub wait_snc_events: u64,
    pub max_goal_depth: u32,
}

impl DeciderStats {
    pub(crate) fn record_impasse(&mut self, kind: ImpasseType) {
        match kind {
            ImpasseType::None => {}
            ImpasseType::Tie => self.ties += 1,
            ImpasseType::Conflict => self.conflicts += 1,
            ImpasseType::ConstraintFailure => self.constraint_failures += 1,
            ImpasseType::NoChange => self.no_changes += 1,
        }
    }

    pub(crate) fn note_goal_depth(&mut self, depth: u32) {
        self.max_goal_depth = self.max_goal_depth.max(depth);
    }

    /// Impasses of every kind created so far.
    pub fn impasses(&self) -> u64 {
        self.ties + self.conflicts + self.constraint_failures + self.no_changes
    }
}

impl std::fmt::Display for DeciderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "decision cycles:        {}", self.decision_cycles)?;
        writeln!(f, "working memory phases:  {}", self.working_memory_phases)?;
        writeln!(f, "context decisions:      {}", self.context_decisions)?;
        writeln!(f, "non-context decisions:  {}", self.non_context_decisions)?;
        writeln!(
            f,
            "impasses:               {} (tie {}, conflict {}, constraint-failure {}, no-change {})",
            self.impasses(),
            self.ties,
            self.conflicts,
            self.constraint_failures,
            self.no_changes
        )?;
        writeln!(f, "wmes added/removed:     {}/{}", self.wmes_added, self.wmes_removed)?;
        writeln!(f, "promotions:             {}", self.promotions)?;
        writeln!(f, "identifiers collected:  {}", self.identifiers_collected)?;
        writeln!(f, "gds retractions:        {}", self.gds_retractions)?;
        writeln!(f, "wait-snc events:        {}", self.wait_snc_events)?;
        write!(f, "max goal depth:         {}", self.max_goal_depth)
    }
}
