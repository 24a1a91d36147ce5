//! The decider: decisions for non-context and context slots, the goal stack,
//! and the buffered-change flush that applies ownership and working-memory
//! changes at the end of each phase.

use std::collections::{HashMap, HashSet};

use crate::agent::AgentContext;
use crate::error::{DecideError, DecideResult};
use crate::impasse::ImpasseType;
use crate::preference::{PreferenceId, PreferenceType};
use crate::slot::SlotId;
use crate::stats::DeciderStats;
use crate::symbol::{GoalData, GoalLevel, SymbolId, TOP_GOAL_LEVEL};
use crate::wme::{WmChanges, WmeId};

/// Goal stack pointers and the work lists filled between flushes.
#[derive(Debug, Default)]
pub struct DeciderState {
    pub(crate) top_goal: Option<SymbolId>,
    pub(crate) bottom_goal: Option<SymbolId>,
    pub(crate) highest_goal_whose_context_changed: Option<SymbolId>,
    pub(crate) changed_slots: Vec<SlotId>,
    pub(crate) context_slots_with_changed_acceptable_preferences: Vec<SlotId>,
    pub(crate) slots_for_possible_removal: Vec<SlotId>,
    pub(crate) wmes_to_add: Vec<WmeId>,
    pub(crate) wmes_to_remove: Vec<WmeId>,
    /// Goals whose dependency set was invalidated. Each holds a reference.
    pub(crate) pending_gds_retractions: Vec<SymbolId>,
    pub(crate) last_wm_changes: WmChanges,
}

impl AgentContext {
    // -----------------------------------------------------------------------
    // Buffered changes
    // -----------------------------------------------------------------------

    /// Apply everything buffered since the last flush, in order: goal
    /// retractions from invalid dependency sets, acceptable-preference WME
    /// sync, promotion, demotion (repeated until none of them has work left),
    /// then the working-memory changes themselves and slot garbage collection.
    pub fn flush_buffered_changes(&mut self) {
        loop {
            self.process_pending_gds_retractions();
            self.do_acceptable_preference_wme_changes();
            self.do_promotion();
            self.do_demotion();
            if self.decider.pending_gds_retractions.is_empty()
                && self
                    .decider
                    .context_slots_with_changed_acceptable_preferences
                    .is_empty()
                && self.ownership.is_idle()
            {
                break;
            }
        }
        self.do_buffered_wm_changes();
        self.remove_garbage_slots();
    }

    // -----------------------------------------------------------------------
    // Non-context slots
    // -----------------------------------------------------------------------

    /// Decide every slot marked changed since the last call. Slots re-marked
    /// while this runs wait for the next call.
    pub(crate) fn decide_non_context_slots(&mut self) {
        let changed = std::mem::take(&mut self.decider.changed_slots);
        for s in changed {
            let Some(slot) = self.slots.get_mut(s) else {
                continue;
            };
            slot.changed = false;
            self.decide_non_context_slot(s);
            self.stats.non_context_decisions += 1;
        }
    }

    fn decide_non_context_slot(&mut self, s: SlotId) {
        let resolution = self.run_semantics(s);

        if resolution.impasse != ImpasseType::None {
            let wmes = std::mem::take(&mut self.slots.slot_mut(s).wmes);
            self.remove_wme_list_from_wm(wmes);
            let slot = self.slots.slot(s);
            if slot.impasse_type != resolution.impasse || slot.impasse_id.is_none() {
                self.remove_existing_attribute_impasse_for_slot(s);
                self.create_new_attribute_impasse_for_slot(s, resolution.impasse);
            }
            if let Some(id) = self.slots.slot(s).impasse_id {
                self.update_impasse_items(id, &resolution.candidates);
            }
            return;
        }

        self.remove_existing_attribute_impasse_for_slot(s);

        let mut wanted: HashMap<SymbolId, PreferenceId> = HashMap::new();
        for &p in &resolution.candidates {
            wanted.entry(self.prefs.value_of(p)).or_insert(p);
        }

        let mut kept: HashSet<SymbolId> = HashSet::new();
        for w in self.slots.slot(s).wmes.clone() {
            let value = self.wmes.wme(w).value;
            match wanted.get(&value) {
                Some(&p) if kept.insert(value) => {
                    if self.repoint_wme_preference(w, p) && self.config.operand2_mode {
                        self.refresh_gds_of_kept_wme(w);
                    }
                }
                _ => {
                    self.slots.slot_mut(s).wmes.retain(|&x| x != w);
                    self.remove_wme_from_wm(w);
                }
            }
        }

        let (id, attr) = {
            let slot = self.slots.slot(s);
            (slot.id, slot.attr)
        };
        for &p in &resolution.candidates {
            let value = self.prefs.value_of(p);
            if !kept.insert(value) {
                continue;
            }
            let w = self.make_wme(id, attr, value, false);
            self.prefs.add_ref(p);
            self.wmes.wme_mut(w).preference = Some(p);
            self.slots.slot_mut(s).wmes.push(w);
            self.add_wme_to_wm(w);
            if self.config.operand2_mode && self.prefs.pref(p).o_supported {
                self.elaborate_gds(w);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Context slots
    // -----------------------------------------------------------------------

    fn operator_slot(&self, goal: SymbolId) -> SlotId {
        self.symbols.goal_data(goal).operator_slot
    }

    /// Empty and changed, or holding a value somebody asked to reconsider.
    fn context_slot_is_decidable(&self, s: SlotId) -> bool {
        let slot = self.slots.slot(s);
        match slot.wmes.first() {
            None => slot.changed,
            Some(&w) => {
                let installed = self.wmes.wme(w).value;
                slot.preferences(PreferenceType::Reconsider)
                    .iter()
                    .any(|&p| self.prefs.value_of(p) == installed)
            }
        }
    }

    /// Walk down from the highest goal whose context changed (or the bottom
    /// goal), deciding the first decidable slot found, or the bottom slot if
    /// none is. A decision that only refreshed an existing impasse's items
    /// lets the walk continue below it.
    pub(crate) fn decide_context_slots(&mut self) {
        let start = self
            .decider
            .highest_goal_whose_context_changed
            .filter(|&g| self.is_live_goal(g))
            .or(self.decider.bottom_goal);

        let mut next = start;
        while let Some(from) = next {
            let mut goal = from;
            loop {
                if self.context_slot_is_decidable(self.operator_slot(goal)) {
                    break;
                }
                match self.symbols.goal_data(goal).lower_goal {
                    Some(lower) => goal = lower,
                    None => break,
                }
            }
            let s = self.operator_slot(goal);
            if self.decide_context_slot(goal, s) {
                break;
            }
            next = self.symbols.goal_data(goal).lower_goal;
        }

        for goal in self.goal_stack() {
            let s = self.operator_slot(goal);
            self.slots.slot_mut(s).changed = false;
        }
        self.decider.highest_goal_whose_context_changed = None;
    }

    /// Decide `goal`'s operator slot. Returns `true` if the goal stack or the
    /// installed operator changed.
    fn decide_context_slot(&mut self, goal: SymbolId, s: SlotId) -> bool {
        self.stats.context_decisions += 1;
        let pre = self.predefined;

        let (impasse, candidates, attr) = if !self.context_slot_is_decidable(s) {
            // Only the bottom slot gets here: a no-change on whatever it holds.
            let attr = if self.slots.slot(s).wmes.is_empty() {
                pre.state
            } else {
                pre.operator
            };
            (ImpasseType::NoChange, Vec::new(), attr)
        } else {
            let wmes = std::mem::take(&mut self.slots.slot_mut(s).wmes);
            self.remove_wme_list_from_wm(wmes);
            let resolution = self.run_semantics(s);

            let first = resolution.candidates.first().copied();
            match (resolution.impasse, first) {
                (ImpasseType::None, Some(winner)) => {
                    self.install_operator(goal, s, winner);
                    return true;
                }
                (ImpasseType::None, None) => (ImpasseType::NoChange, Vec::new(), pre.state),
                (kind, _) => (kind, resolution.candidates, pre.operator),
            }
        };

        let lower = self.symbols.goal_data(goal).lower_goal;
        if let Some(lower) = lower {
            if self.type_of_existing_impasse(goal) == impasse
                && self.attribute_of_existing_impasse(goal) == Some(attr)
            {
                self.update_impasse_items(lower, &candidates);
                return false;
            }
            self.remove_existing_context_and_descendents(lower);
        }

        if self.config.wait_snc && impasse == ImpasseType::NoChange && attr == pre.state {
            self.stats.wait_snc_events += 1;
            tracing::debug!(goal = %self.symbols.display(goal), "waiting on state no-change");
            return lower.is_some();
        }
        let depth = self.symbols.id_data(goal).level as usize;
        if depth >= self.config.max_goal_depth {
            tracing::warn!(
                goal = %self.symbols.display(goal),
                max_goal_depth = self.config.max_goal_depth,
                "goal stack depth limit reached, impasse not created"
            );
            return lower.is_some();
        }

        let subgoal = self.create_new_context(Some(attr), impasse);
        self.update_impasse_items(subgoal, &candidates);
        tracing::debug!(
            goal = %self.symbols.display(goal),
            subgoal = %self.symbols.display(subgoal),
            impasse = %impasse,
            attribute = %self.symbols.display(attr),
            items = candidates.len(),
            "impasse sub-goal created"
        );
        true
    }

    fn install_operator(&mut self, goal: SymbolId, s: SlotId, winner: PreferenceId) {
        if let Some(lower) = self.symbols.goal_data(goal).lower_goal {
            self.remove_existing_context_and_descendents(lower);
        }
        let (id, attr) = {
            let slot = self.slots.slot(s);
            (slot.id, slot.attr)
        };
        let value = self.prefs.value_of(winner);
        let w = self.make_wme(id, attr, value, false);
        self.prefs.add_ref(winner);
        self.wmes.wme_mut(w).preference = Some(winner);
        self.slots.slot_mut(s).wmes.push(w);
        self.add_wme_to_wm(w);
        tracing::debug!(
            goal = %self.symbols.display(goal),
            operator = %self.symbols.display(value),
            "operator selected"
        );
    }

    // -----------------------------------------------------------------------
    // Goal stack
    // -----------------------------------------------------------------------

    /// Push a new goal below the bottom goal, or create the top goal when
    /// the stack is empty.
    fn create_new_context(&mut self, attr: Option<SymbolId>, impasse: ImpasseType) -> SymbolId {
        let pre = self.predefined;
        let higher = self.decider.bottom_goal;
        let goal = match higher {
            Some(bottom) => {
                let level = self.symbols.id_data(bottom).level + 1;
                let goal = self.create_new_impasse(true, bottom, attr, impasse, level);
                self.add_impasse_wme(goal, pre.quiescence, pre.t, None);
                goal
            }
            None => self.create_new_impasse(true, pre.nil, None, ImpasseType::None, TOP_GOAL_LEVEL),
        };

        self.symbols.id_data_mut(goal).isa_goal = true;
        let operator_slot = self.make_slot(goal, pre.operator);
        self.symbols.id_data_mut(goal).goal = Some(GoalData {
            higher_goal: higher,
            lower_goal: None,
            operator_slot,
            gds: None,
            preferences_from_goal: Vec::new(),
        });

        match higher {
            Some(bottom) => self.symbols.goal_data_mut(bottom).lower_goal = Some(goal),
            None => self.decider.top_goal = Some(goal),
        }
        self.decider.bottom_goal = Some(goal);

        let level = self.symbols.id_data(goal).level;
        self.stats.note_goal_depth(level);
        tracing::info!(goal = %self.symbols.display(goal), level, "goal created");
        goal
    }

    /// Remove `goal` and every goal below it, together with their impasse
    /// WMEs, installed operators and the preferences produced at them.
    pub(crate) fn remove_existing_context_and_descendents(&mut self, goal: SymbolId) {
        let mut doomed = Vec::new();
        let mut next = Some(goal);
        while let Some(g) = next {
            doomed.push(g);
            next = self.symbols.goal_data(g).lower_goal;
        }

        for g in doomed.into_iter().rev() {
            let higher = self.symbols.goal_data(g).higher_goal;
            match higher {
                Some(h) => self.symbols.goal_data_mut(h).lower_goal = None,
                None => self.decider.top_goal = None,
            }
            self.decider.bottom_goal = higher;
            if self.decider.highest_goal_whose_context_changed == Some(g) {
                self.decider.highest_goal_whose_context_changed = higher;
            }

            self.detach_gds_from_goal(g);

            let s = self.operator_slot(g);
            let wmes = std::mem::take(&mut self.slots.slot_mut(s).wmes);
            self.remove_wme_list_from_wm(wmes);

            let impasse_wmes = std::mem::take(&mut self.symbols.id_data_mut(g).impasse_wmes);
            self.remove_wme_list_from_wm(impasse_wmes);

            let produced =
                std::mem::take(&mut self.symbols.goal_data_mut(g).preferences_from_goal);
            for p in produced {
                if self.prefs.get(p).is_some_and(|pref| pref.in_tm) {
                    self.remove_preference_from_tm(p);
                }
            }
            self.retract_instantiations_of_goal(g);
            self.mark_slot_for_possible_removal(s);

            let data = self.symbols.id_data_mut(g);
            data.isa_goal = false;
            data.former_goal = true;
            data.goal = None;
            self.post_link_removal(None, g);
            tracing::info!(goal = %self.symbols.display(g), "goal removed");
            self.symbols.remove_ref(g);
        }
    }

    /// Create the top goal. Fails if one already exists.
    pub fn create_top_goal(&mut self) -> DecideResult<SymbolId> {
        if let Some(goal) = self.decider.top_goal {
            return Err(DecideError::TopGoalExists {
                goal: self.symbols.display(goal),
            });
        }
        let goal = self.create_new_context(None, ImpasseType::None);
        self.flush_buffered_changes();
        Ok(goal)
    }

    /// Tear down the whole goal stack.
    pub fn clear_goal_stack(&mut self) {
        let Some(top) = self.decider.top_goal else {
            return;
        };
        self.remove_existing_context_and_descendents(top);
        self.decider.highest_goal_whose_context_changed = None;
        self.flush_buffered_changes();
        tracing::info!(symbols = self.symbols.len(), "goal stack cleared");
    }

    /// Clear the goal stack, drop every preference and instantiation, reset
    /// identifier numbering and statistics, and create a fresh top goal.
    pub fn reinitialize(&mut self) -> DecideResult<SymbolId> {
        self.clear_goal_stack();

        let remaining: Vec<PreferenceId> = self
            .prefs
            .iter()
            .filter(|(_, p)| p.in_tm)
            .map(|(p, _)| p)
            .collect();
        for p in remaining {
            self.remove_preference_from_tm(p);
        }
        for inst in self.insts.handles() {
            if self.insts.contains(inst) {
                self.retract_instantiation(inst)?;
            }
        }
        self.flush_buffered_changes();

        self.symbols.reset_id_counters();
        self.stats = DeciderStats::default();
        self.decider.last_wm_changes = WmChanges::default();
        tracing::info!("decider reinitialized");
        self.create_top_goal()
    }

    // -----------------------------------------------------------------------
    // Consistency checking
    // -----------------------------------------------------------------------

    /// Re-check the current decision of every changed goal strictly below
    /// `level`, bottom up, and undo decisions preferences no longer support.
    pub(crate) fn check_context_slot_decisions(&mut self, level: GoalLevel) {
        let mut next = self.decider.bottom_goal;
        while let Some(goal) = next {
            if !self.is_live_goal(goal) || self.symbols.id_data(goal).level <= level {
                break;
            }
            let (s, higher, lower) = {
                let data = self.symbols.goal_data(goal);
                (data.operator_slot, data.higher_goal, data.lower_goal)
            };
            let slot = self.slots.slot(s);
            let decided = lower.is_some() || !slot.wmes.is_empty();
            if slot.changed && decided && !self.context_slot_is_consistent(goal, s) {
                self.remove_current_decision(goal, s);
            }
            next = higher;
        }
    }

    fn context_slot_is_consistent(&self, goal: SymbolId, s: SlotId) -> bool {
        let resolution = self.run_semantics_for_consistency_check(s);
        let lower = self.symbols.goal_data(goal).lower_goal;
        let pre = &self.predefined;

        match resolution.impasse {
            ImpasseType::None if resolution.candidates.is_empty() => {
                lower.is_some()
                    && self.type_of_existing_impasse(goal) == ImpasseType::NoChange
                    && self.attribute_of_existing_impasse(goal) == Some(pre.state)
            }
            ImpasseType::None => match self.slots.slot(s).wmes.first() {
                Some(&w) => {
                    let installed = self.wmes.wme(w).value;
                    resolution
                        .candidates
                        .iter()
                        .any(|&p| self.prefs.value_of(p) == installed)
                }
                None => false,
            },
            kind => {
                lower.is_some()
                    && self.type_of_existing_impasse(goal) == kind
                    && self.attribute_of_existing_impasse(goal) == Some(pre.operator)
            }
        }
    }

    fn remove_current_decision(&mut self, goal: SymbolId, s: SlotId) {
        tracing::debug!(goal = %self.symbols.display(goal), "decision no longer supported");
        let wmes = std::mem::take(&mut self.slots.slot_mut(s).wmes);
        self.remove_wme_list_from_wm(wmes);
        if let Some(lower) = self.symbols.goal_data(goal).lower_goal {
            self.remove_existing_context_and_descendents(lower);
        }
        self.mark_slot_as_changed(s);
        self.flush_buffered_changes();
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Working-memory phase: re-check context decisions (operand2 mode),
    /// decide changed non-context slots, flush.
    pub fn run_working_memory_phase(&mut self) -> DecideResult<()> {
        self.require_top_goal()?;
        if self.config.operand2_mode {
            self.check_context_slot_decisions(0);
        }
        self.decide_non_context_slots();
        self.flush_buffered_changes();
        self.stats.working_memory_phases += 1;
        Ok(())
    }

    /// Decision phase: decide context slots, flush, then settle the
    /// non-context slots the decision touched.
    pub fn run_decision_phase(&mut self) -> DecideResult<()> {
        self.require_top_goal()?;
        self.decide_context_slots();
        self.flush_buffered_changes();
        self.decide_non_context_slots();
        self.flush_buffered_changes();
        self.stats.decision_cycles += 1;
        tracing::trace!(
            cycle = self.stats.decision_cycles,
            depth = self.goal_stack().len(),
            "decision cycle complete"
        );
        Ok(())
    }

    /// Alternate working-memory and decision phases `cycles` times.
    pub fn run_cycles(&mut self, cycles: u64) -> DecideResult<()> {
        for _ in 0..cycles {
            self.run_working_memory_phase()?;
            self.run_decision_phase()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeciderConfig, UserSelect};
    use crate::instantiation::{InstantiationId, InstantiationSpec, PreferenceSpec};

    fn agent_with(config: DeciderConfig) -> (AgentContext, SymbolId) {
        let mut agent = AgentContext::new(config).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        (agent, s1)
    }

    fn deterministic() -> (AgentContext, SymbolId) {
        agent_with(DeciderConfig::deterministic())
    }

    fn propose(
        agent: &mut AgentContext,
        goal: SymbolId,
        names: &[&str],
    ) -> (InstantiationId, Vec<SymbolId>) {
        let operator = agent.predefined().operator;
        let mut spec = InstantiationSpec::new("propose", goal);
        let mut ops = Vec::new();
        for _ in names {
            let o = agent.make_identifier('O', 1);
            spec = spec.with_preference(PreferenceSpec::acceptable(goal, operator, o));
            ops.push(o);
        }
        (agent.add_instantiation(spec).unwrap(), ops)
    }

    #[test]
    fn single_proposal_is_selected() {
        let (mut agent, s1) = deterministic();
        let (_, ops) = propose(&mut agent, s1, &["a"]);
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.operator_of(s1), Some(ops[0]));
        assert_eq!(agent.goal_stack(), vec![s1]);
    }

    #[test]
    fn tie_creates_subgoal_and_better_resolves_it() {
        let (mut agent, s1) = deterministic();
        let (_, ops) = propose(&mut agent, s1, &["a", "b"]);
        agent.run_decision_phase().unwrap();

        let stack = agent.goal_stack();
        assert_eq!(stack.len(), 2);
        let info = agent.impasse_below(s1).unwrap();
        assert_eq!(info.kind, ImpasseType::Tie);
        assert_eq!(info.attribute.as_deref(), Some("operator"));
        assert_eq!(info.items.len(), 2);
        assert!(agent.operator_of(s1).is_none());

        let operator = agent.predefined().operator;
        agent
            .add_instantiation(InstantiationSpec::new("prefer-a", s1).with_preference(
                PreferenceSpec::binary(PreferenceType::Better, s1, operator, ops[0], ops[1]),
            ))
            .unwrap();
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.goal_stack(), vec![s1]);
        assert_eq!(agent.operator_of(s1), Some(ops[0]));
    }

    #[test]
    fn empty_goal_stacks_state_no_changes() {
        let (mut agent, s1) = deterministic();
        agent.run_decision_phase().unwrap();
        agent.run_decision_phase().unwrap();
        let stack = agent.goal_stack();
        assert_eq!(stack.len(), 3);
        let info = agent.impasse_below(s1).unwrap();
        assert_eq!(info.kind, ImpasseType::NoChange);
        assert_eq!(info.attribute.as_deref(), Some("state"));
        assert_eq!(agent.stats().no_changes, 2);
    }

    #[test]
    fn wait_snc_suppresses_state_no_change() {
        let (mut agent, s1) = agent_with(DeciderConfig {
            wait_snc: true,
            ..DeciderConfig::deterministic()
        });
        agent.run_decision_phase().unwrap();
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.goal_stack(), vec![s1]);
        assert_eq!(agent.stats().wait_snc_events, 2);
    }

    #[test]
    fn goal_depth_is_capped() {
        let (mut agent, _) = agent_with(DeciderConfig {
            max_goal_depth: 3,
            ..DeciderConfig::deterministic()
        });
        for _ in 0..6 {
            agent.run_decision_phase().unwrap();
        }
        assert_eq!(agent.goal_stack().len(), 3);
        assert_eq!(agent.stats().max_goal_depth, 3);
    }

    #[test]
    fn installed_operator_without_progress_gives_operator_no_change() {
        let (mut agent, s1) = deterministic();
        propose(&mut agent, s1, &["a"]);
        agent.run_decision_phase().unwrap();
        agent.run_decision_phase().unwrap();
        let info = agent.impasse_below(s1).unwrap();
        assert_eq!(info.kind, ImpasseType::NoChange);
        assert_eq!(info.attribute.as_deref(), Some("operator"));
        assert!(agent.operator_of(s1).is_some());
    }

    #[test]
    fn reconsider_reopens_the_decision() {
        let (mut agent, s1) = deterministic();
        let (_, ops) = propose(&mut agent, s1, &["a", "b"]);
        let operator = agent.predefined().operator;
        agent
            .add_instantiation(InstantiationSpec::new("prefer-a", s1).with_preference(
                PreferenceSpec::binary(PreferenceType::Better, s1, operator, ops[0], ops[1]),
            ))
            .unwrap();
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.operator_of(s1), Some(ops[0]));

        agent
            .add_instantiation(
                InstantiationSpec::new("done-with-a", s1)
                    .with_preference(PreferenceSpec::unary(
                        PreferenceType::Reconsider,
                        s1,
                        operator,
                        ops[0],
                    ))
                    .with_preference(PreferenceSpec::unary(
                        PreferenceType::Reject,
                        s1,
                        operator,
                        ops[0],
                    )),
            )
            .unwrap();
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.operator_of(s1), Some(ops[1]));
    }

    #[test]
    fn unsupported_operator_is_removed_by_consistency_check() {
        let (mut agent, s1) = agent_with(DeciderConfig {
            user_select: UserSelect::First,
            ..DeciderConfig::default()
        });
        let (_, ops) = propose(&mut agent, s1, &["a"]);
        agent.run_decision_phase().unwrap();
        assert_eq!(agent.operator_of(s1), Some(ops[0]));

        let operator = agent.predefined().operator;
        agent
            .add_instantiation(InstantiationSpec::new("reject-a", s1).with_preference(
                PreferenceSpec::unary(PreferenceType::Reject, s1, operator, ops[0]),
            ))
            .unwrap();
        agent.run_working_memory_phase().unwrap();
        assert!(agent.operator_of(s1).is_none());
    }

    #[test]
    fn non_context_tie_becomes_attribute_impasse() {
        let (mut agent, s1) = deterministic();
        let color = agent.make_constant("color");
        let red = agent.make_constant("red");
        let blue = agent.make_constant("blue");
        let keep = agent
            .add_instantiation(
                InstantiationSpec::new("red", s1)
                    .with_preference(PreferenceSpec::acceptable(s1, color, red)),
            )
            .unwrap();
        let drop = agent
            .add_instantiation(
                InstantiationSpec::new("blue", s1)
                    .with_preference(PreferenceSpec::acceptable(s1, color, blue)),
            )
            .unwrap();
        agent.run_working_memory_phase().unwrap();
        let info = agent.attribute_impasse(s1, color).unwrap();
        assert_eq!(info.kind, ImpasseType::Tie);
        assert!(agent.slot_values(s1, color).is_empty());

        agent.retract_instantiation(drop).unwrap();
        agent.run_working_memory_phase().unwrap();
        assert!(agent.attribute_impasse(s1, color).is_none());
        assert_eq!(agent.slot_values(s1, color), vec![red]);
        assert!(agent.instantiation(keep).is_some());
    }

    #[test]
    fn redeciding_an_unchanged_slot_changes_nothing() {
        let (mut agent, s1) = deterministic();
        let color = agent.make_constant("color");
        let red = agent.make_constant("red");
        agent
            .add_instantiation(
                InstantiationSpec::new("red", s1)
                    .with_preference(PreferenceSpec::acceptable(s1, color, red)),
            )
            .unwrap();
        agent.run_working_memory_phase().unwrap();
        let before = agent.working_memory();

        let s = agent.find_slot(s1, color).unwrap();
        agent.mark_slot_as_changed(s);
        agent.run_working_memory_phase().unwrap();
        assert!(agent.last_wm_changes().is_empty());
        assert_eq!(agent.working_memory(), before);
    }

    #[test]
    fn removing_a_dependency_retracts_the_subgoal() {
        let (mut agent, s1) = agent_with(DeciderConfig {
            user_select: UserSelect::First,
            ..DeciderConfig::default()
        });
        let color = agent.make_constant("color");
        let red = agent.make_constant("red");
        let sensed = agent.add_input_wme(s1, color, red).unwrap();
        propose(&mut agent, s1, &["a", "b"]);
        agent.run_decision_phase().unwrap();
        let s2 = agent.bottom_goal().unwrap();
        assert_ne!(s2, s1);

        let result = agent.make_constant("result");
        let done = agent.make_constant("done");
        agent
            .add_instantiation(
                InstantiationSpec::new("note-color", s2)
                    .with_condition(sensed)
                    .with_preference(PreferenceSpec::acceptable(s2, result, done).o_supported()),
            )
            .unwrap();
        agent.run_working_memory_phase().unwrap();
        assert_eq!(agent.slot_values(s2, result), vec![done]);
        assert_eq!(agent.gds_of(s2), vec![sensed]);

        agent.remove_input_wme(sensed).unwrap();
        agent.flush_buffered_changes();
        assert_eq!(agent.goal_stack(), vec![s1]);
        assert_eq!(agent.stats().gds_retractions, 1);
    }

    #[test]
    fn top_goal_cannot_be_created_twice() {
        let (mut agent, _) = deterministic();
        assert!(matches!(
            agent.create_top_goal(),
            Err(DecideError::TopGoalExists { .. })
        ));
    }

    #[test]
    fn reinitialize_restarts_numbering() {
        let (mut agent, top) = deterministic();
        propose(&mut agent, top, &["a", "b"]);
        agent.run_decision_phase().unwrap();
        let s1 = agent.reinitialize().unwrap();
        assert_eq!(agent.symbol_name(s1), "S1");
        assert_eq!(agent.goal_stack(), vec![s1]);
        assert_eq!(agent.instantiation_count(), 0);
        assert_eq!(agent.preference_count(), 0);
        assert_eq!(agent.stats().decision_cycles, 0);
    }
}
