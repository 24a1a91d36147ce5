//! Ownership tracking: goal-stack levels, link counts, promotion, and
//! demotion with garbage collection of disconnected identifiers.
//!
//! Every WME `(id ^attr value)` and every preference with an identifier value
//! or referent is a link from `id` to that identifier. Links from a higher
//! goal promote the target (and everything it reaches) to that level at the
//! next flush. Removing a link may leave an identifier at an unknown level;
//! the demotion pass collects identifiers nothing links to any more, then
//! marks what is left and walks the goal stack to re-derive true levels.
//! Whatever the walk cannot reach is garbage collected.
//!
//! Goal and impasse identifiers hold one special link of their own and are
//! exempt from ordinary link counting.

use serde::{Deserialize, Serialize};

use crate::agent::AgentContext;
use crate::config::DemotionWalk;
use crate::error::{InvariantViolation, fatal};
use crate::symbol::{GoalLevel, LOWEST_POSSIBLE_GOAL_LEVEL, LevelState, SymbolId};

/// How [`AgentContext::post_link_removal`] treats a decremented count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkUpdateMode {
    /// Queue the target for the mark-and-walk pass.
    #[default]
    UpdateNormally,
    /// A collection is running: targets that drop to zero go straight to the
    /// disconnected list.
    UpdateDisconnectedList,
    /// Final sweep: only keep the count accurate.
    JustUpdateCount,
}

/// Work lists and counters of the ownership tracker.
#[derive(Debug)]
pub struct OwnershipState {
    /// Identifiers whose transitive closure must be promoted. Each holds a reference.
    pub(crate) promoted_ids: Vec<SymbolId>,
    /// Identifiers whose level must be re-derived. Each holds a reference.
    pub(crate) ids_with_unknown_level: Vec<SymbolId>,
    /// Identifiers to garbage collect. Each holds a reference.
    pub(crate) disconnected_ids: Vec<SymbolId>,
    pub(crate) link_update_mode: LinkUpdateMode,
    tc_counter: u64,
    mark_tc_number: u64,
    highest_level_anything_could_fall_from: GoalLevel,
    lowest_level_anything_could_fall_to: GoalLevel,
}

impl Default for OwnershipState {
    fn default() -> Self {
        Self {
            promoted_ids: Vec::new(),
            ids_with_unknown_level: Vec::new(),
            disconnected_ids: Vec::new(),
            link_update_mode: LinkUpdateMode::default(),
            tc_counter: 0,
            mark_tc_number: 0,
            highest_level_anything_could_fall_from: LOWEST_POSSIBLE_GOAL_LEVEL,
            lowest_level_anything_could_fall_to: 0,
        }
    }
}

impl OwnershipState {
    fn new_tc_number(&mut self) -> u64 {
        self.tc_counter += 1;
        self.tc_counter
    }

    /// Nothing is queued for promotion or demotion.
    pub fn is_idle(&self) -> bool {
        self.promoted_ids.is_empty()
            && self.ids_with_unknown_level.is_empty()
            && self.disconnected_ids.is_empty()
    }
}

impl AgentContext {
    // -----------------------------------------------------------------------
    // Link changes
    // -----------------------------------------------------------------------

    /// Record a new link `from -> to`. `from == None` is the special link a
    /// goal or impasse holds on itself.
    pub(crate) fn post_link_addition(&mut self, from: Option<SymbolId>, to: SymbolId) {
        let from_level = from.map(|f| self.symbols.id_data(f).promotion_level);
        let Some(data) = self.symbols.ident_mut(to) else {
            return;
        };
        if (data.isa_goal || data.isa_impasse) && from.is_some() {
            return;
        }
        data.link_count += 1;
        let Some(from_level) = from_level else {
            return;
        };
        if from_level == data.promotion_level {
            return;
        }
        if from_level > data.promotion_level {
            data.could_be_a_link_from_below = true;
            return;
        }
        data.promotion_level = from_level;
        self.symbols.add_ref(to);
        self.ownership.promoted_ids.push(to);
    }

    /// Record the removal of link `from -> to`.
    pub(crate) fn post_link_removal(&mut self, from: Option<SymbolId>, to: SymbolId) {
        let from_level = from.map(|f| self.symbols.id_data(f).level);
        let mode = self.ownership.link_update_mode;
        let Some(data) = self.symbols.ident_mut(to) else {
            return;
        };
        if (data.isa_goal || data.isa_impasse) && from.is_some() {
            return;
        }
        match data.link_count.checked_sub(1) {
            Some(count) => data.link_count = count,
            // Links added while the target was a goal were never counted.
            None if data.former_goal => {}
            None => fatal(InvariantViolation::RefcountUnderflow {
                what: format!("link count of {}{}", data.letter, data.number),
            }),
        }

        match mode {
            LinkUpdateMode::JustUpdateCount => return,
            LinkUpdateMode::UpdateDisconnectedList if data.link_count == 0 => {
                match data.level_state {
                    LevelState::Unknown => {
                        data.level_state = LevelState::Disconnected;
                        self.ownership.ids_with_unknown_level.retain(|&x| x != to);
                        self.ownership.disconnected_ids.push(to);
                    }
                    LevelState::Known => {
                        data.level_state = LevelState::Disconnected;
                        self.symbols.add_ref(to);
                        self.ownership.disconnected_ids.push(to);
                    }
                    LevelState::Disconnected => {}
                }
                return;
            }
            _ => {}
        }

        // Another link at the target's own level must still exist.
        if from_level.is_some_and(|level| level != data.level) {
            return;
        }
        if data.level_state == LevelState::Known {
            data.level_state = LevelState::Unknown;
            self.symbols.add_ref(to);
            self.ownership.ids_with_unknown_level.push(to);
        }
    }

    /// Link addition for a value that may not be an identifier.
    pub(crate) fn post_link_addition_if_id(&mut self, from: SymbolId, to: SymbolId) {
        if self.symbols.is_identifier(to) {
            self.post_link_addition(Some(from), to);
        }
    }

    pub(crate) fn post_link_removal_if_id(&mut self, from: SymbolId, to: SymbolId) {
        if self.symbols.is_identifier(to) {
            self.post_link_removal(Some(from), to);
        }
    }

    // -----------------------------------------------------------------------
    // Promotion
    // -----------------------------------------------------------------------

    pub(crate) fn do_promotion(&mut self) {
        while let Some(id) = self.ownership.promoted_ids.pop() {
            let level = self.symbols.id_data(id).promotion_level;
            self.promote_id_and_tc(id, level);
            self.symbols.remove_ref(id);
        }
    }

    /// Raise `root` and everything it links to up to `new_level`.
    fn promote_id_and_tc(&mut self, root: SymbolId, new_level: GoalLevel) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.symbols.ident_mut(id) else {
                continue;
            };
            if data.level <= new_level || data.promotion_level < new_level {
                continue;
            }
            data.level = new_level;
            data.promotion_level = new_level;
            data.could_be_a_link_from_below = true;
            if data.isa_goal || data.isa_impasse {
                fatal(InvariantViolation::PromotedGoalOrImpasse {
                    id: self.symbols.display(id),
                });
            }
            self.stats.promotions += 1;
            tracing::debug!(id = %self.symbols.display(id), level = new_level, "identifier promoted");
            stack.extend(self.linked_identifiers(id, false));
        }
    }

    /// Identifiers `id` links to through its input WMEs, slot preferences
    /// (values and referents) and slot WMEs. With `with_impasses`, attribute
    /// impasses and impasse WME values are included too.
    fn linked_identifiers(&self, id: SymbolId, with_impasses: bool) -> Vec<SymbolId> {
        let data = self.symbols.id_data(id);
        let mut out = Vec::new();
        let mut push = |sym: SymbolId| {
            if self.symbols.is_identifier(sym) {
                out.push(sym);
            }
        };
        for &w in &data.input_wmes {
            push(self.wmes.wme(w).value);
        }
        for &s in &data.slots {
            let slot = self.slots.slot(s);
            for &p in slot.all_preferences() {
                let pref = self.prefs.pref(p);
                push(pref.value);
                if let Some(referent) = pref.referent {
                    push(referent);
                }
            }
            if let Some(impasse) = slot.impasse_id.filter(|_| with_impasses) {
                push(impasse);
            }
            for &w in &slot.wmes {
                push(self.wmes.wme(w).value);
            }
        }
        if with_impasses {
            for &w in &data.impasse_wmes {
                push(self.wmes.wme(w).value);
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Demotion and garbage collection
    // -----------------------------------------------------------------------

    pub(crate) fn do_demotion(&mut self) {
        // Unknown-level identifiers with no links left are disconnected.
        let unknown = std::mem::take(&mut self.ownership.ids_with_unknown_level);
        for id in unknown {
            let data = self.symbols.id_data_mut(id);
            if data.link_count == 0 {
                data.level_state = LevelState::Disconnected;
                self.ownership.disconnected_ids.push(id);
            } else {
                self.ownership.ids_with_unknown_level.push(id);
            }
        }

        self.collect_disconnected_ids();

        if self.ownership.ids_with_unknown_level.is_empty() {
            return;
        }

        // Mark.
        self.ownership.highest_level_anything_could_fall_from = LOWEST_POSSIBLE_GOAL_LEVEL;
        self.ownership.lowest_level_anything_could_fall_to = 0;
        self.ownership.mark_tc_number = self.ownership.new_tc_number();
        let roots = self.ownership.ids_with_unknown_level.clone();
        for root in roots {
            self.mark_id_and_tc_as_unknown_level(root);
        }

        // Walk.
        let highest = self.ownership.highest_level_anything_could_fall_from;
        let lowest = self.ownership.lowest_level_anything_could_fall_to;
        let bounded = self.config.demotion_walk == DemotionWalk::BoundedRange;
        let mut goal = self.decider.top_goal;
        while let Some(g) = goal {
            let level = self.symbols.id_data(g).level;
            if bounded && level > lowest {
                break;
            }
            if !bounded || level >= highest {
                self.walk_and_update_levels(g, level);
            }
            goal = self.symbols.goal_data(g).lower_goal;
        }

        // Whatever the walk did not reach is garbage.
        self.ownership.link_update_mode = LinkUpdateMode::JustUpdateCount;
        while let Some(id) = self.ownership.ids_with_unknown_level.pop() {
            self.symbols.id_data_mut(id).level_state = LevelState::Known;
            self.garbage_collect_id(id);
            self.symbols.remove_ref(id);
        }
        self.ownership.link_update_mode = LinkUpdateMode::UpdateNormally;
    }

    /// Collect disconnected identifiers until none remain. Collection can
    /// disconnect further identifiers, which join the list as it drains.
    fn collect_disconnected_ids(&mut self) {
        self.ownership.link_update_mode = LinkUpdateMode::UpdateDisconnectedList;
        while let Some(id) = self.ownership.disconnected_ids.pop() {
            self.symbols.id_data_mut(id).level_state = LevelState::Known;
            self.garbage_collect_id(id);
            self.symbols.remove_ref(id);
        }
        self.ownership.link_update_mode = LinkUpdateMode::UpdateNormally;
    }

    fn mark_id_and_tc_as_unknown_level(&mut self, root: SymbolId) {
        let start_level = self.symbols.id_data(root).level;
        let tc = self.ownership.mark_tc_number;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.symbols.ident_mut(id) else {
                continue;
            };
            // Goals and impasses live until their context is removed.
            if data.tc_num == tc || data.level < start_level || data.isa_goal || data.isa_impasse {
                continue;
            }
            data.tc_num = tc;
            let level = data.level;
            let from_below = data.could_be_a_link_from_below;
            let newly_unknown = data.level_state == LevelState::Known;
            if newly_unknown {
                data.level_state = LevelState::Unknown;
            }

            let own = &mut self.ownership;
            own.highest_level_anything_could_fall_from =
                own.highest_level_anything_could_fall_from.min(level);
            own.lowest_level_anything_could_fall_to = own.lowest_level_anything_could_fall_to.max(level);
            if from_below {
                own.lowest_level_anything_could_fall_to = LOWEST_POSSIBLE_GOAL_LEVEL;
            }
            if newly_unknown {
                self.symbols.add_ref(id);
                self.ownership.ids_with_unknown_level.push(id);
            }
            stack.extend(self.linked_identifiers(id, true));
        }
    }

    /// Everything reachable from goal `root` without passing through a
    /// known identifier above `walk_level` sits at `walk_level`.
    fn walk_and_update_levels(&mut self, root: SymbolId, walk_level: GoalLevel) {
        let tc = self.ownership.new_tc_number();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.symbols.ident_mut(id) else {
                continue;
            };
            if data.tc_num == tc {
                continue;
            }
            data.tc_num = tc;
            let unknown = data.level_state == LevelState::Unknown;
            if !unknown && data.level < walk_level {
                continue;
            }
            if unknown {
                data.level_state = LevelState::Known;
                data.level = walk_level;
                data.promotion_level = walk_level;
                self.ownership.ids_with_unknown_level.retain(|&x| x != id);
                stack.extend(self.linked_identifiers(id, true));
                self.symbols.remove_ref(id);
                continue;
            }
            stack.extend(self.linked_identifiers(id, true));
        }
    }

    /// Remove everything rooted at `id`: input WMEs, and for every slot the
    /// attribute impasse, WMEs, acceptable-preference WMEs and preferences.
    /// Impasse WMEs of goals and impasses are removed with their context.
    pub(crate) fn garbage_collect_id(&mut self, id: SymbolId) {
        self.stats.identifiers_collected += 1;
        tracing::debug!(id = %self.symbols.display(id), "garbage collecting identifier");

        let input = std::mem::take(&mut self.symbols.id_data_mut(id).input_wmes);
        self.remove_wme_list_from_wm(input);

        let slots = self.symbols.id_data(id).slots.clone();
        for s in slots {
            if self.slots.slot(s).impasse_id.is_some() {
                self.remove_existing_attribute_impasse_for_slot(s);
            }
            let slot = self.slots.slot_mut(s);
            let wmes = std::mem::take(&mut slot.wmes);
            let acceptable = std::mem::take(&mut slot.acceptable_preference_wmes);
            self.remove_wme_list_from_wm(wmes);
            self.remove_wme_list_from_wm(acceptable);
            let prefs = self.slots.slot(s).all_preferences().to_vec();
            for p in prefs {
                self.remove_preference_from_tm(p);
            }
            self.mark_slot_for_possible_removal(s);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Link count and level of a live identifier.
    pub fn ownership_of(&self, id: SymbolId) -> Option<IdentifierOwnership> {
        let data = self.symbols.ident(id)?;
        Some(IdentifierOwnership {
            id: self.symbols.display(id),
            level: data.level,
            promotion_level: data.promotion_level,
            link_count: data.link_count,
            isa_goal: data.isa_goal,
            isa_impasse: data.isa_impasse,
        })
    }
}

/// Ownership state of one identifier, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierOwnership {
    pub id: String,
    pub level: GoalLevel,
    pub promotion_level: GoalLevel,
    pub link_count: u32,
    pub isa_goal: bool,
    pub isa_impasse: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeciderConfig;
    use crate::wme::WmeId;

    fn agent() -> AgentContext {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        agent.create_top_goal().unwrap();
        agent
    }

    fn input(agent: &mut AgentContext, id: SymbolId, attr: &str, value: SymbolId) -> WmeId {
        let attr = agent.make_constant(attr);
        let w = agent.add_input_wme(id, attr, value).unwrap();
        agent.release_symbol(attr);
        w
    }

    #[test]
    fn special_link_counts_once() {
        let agent = agent();
        let s1 = agent.top_goal().unwrap();
        let own = agent.ownership_of(s1).unwrap();
        assert_eq!(own.link_count, 1);
        assert!(own.isa_goal);
        assert_eq!(own.level, 1);
    }

    #[test]
    fn links_from_a_higher_goal_promote_the_closure() {
        let mut agent = agent();
        let s1 = agent.top_goal().unwrap();
        let x = agent.make_identifier('X', 3);
        let y = agent.make_identifier('Y', 3);
        input(&mut agent, x, "next", y);
        input(&mut agent, s1, "thing", x);
        agent.release_symbol(x);
        agent.release_symbol(y);
        agent.flush_buffered_changes();
        assert_eq!(agent.ownership_of(x).unwrap().level, 1);
        assert_eq!(agent.ownership_of(y).unwrap().level, 1);
        assert!(agent.ownership.is_idle());
    }

    #[test]
    fn unlinking_collects_the_whole_structure() {
        let mut agent = agent();
        let s1 = agent.top_goal().unwrap();
        let x = agent.make_identifier('X', 1);
        let y = agent.make_identifier('Y', 1);
        let link = input(&mut agent, s1, "thing", x);
        input(&mut agent, x, "next", y);
        agent.release_symbol(x);
        agent.release_symbol(y);
        agent.flush_buffered_changes();
        assert!(agent.ownership_of(y).is_some());

        agent.remove_input_wme(link).unwrap();
        agent.flush_buffered_changes();
        assert!(agent.ownership_of(x).is_none());
        assert!(agent.ownership_of(y).is_none());
        assert!(agent.ownership.is_idle());
    }

    #[test]
    fn cycles_are_collected() {
        let mut agent = agent();
        let s1 = agent.top_goal().unwrap();
        let x = agent.make_identifier('X', 1);
        let y = agent.make_identifier('Y', 1);
        let link = input(&mut agent, s1, "thing", x);
        input(&mut agent, x, "next", y);
        input(&mut agent, y, "back", x);
        agent.release_symbol(x);
        agent.release_symbol(y);
        agent.flush_buffered_changes();

        agent.remove_input_wme(link).unwrap();
        agent.flush_buffered_changes();
        assert!(agent.ownership_of(x).is_none());
        assert!(agent.ownership_of(y).is_none());
    }

    #[test]
    fn second_link_keeps_the_target_alive() {
        let mut agent = agent();
        let s1 = agent.top_goal().unwrap();
        let x = agent.make_identifier('X', 1);
        let first = input(&mut agent, s1, "a", x);
        input(&mut agent, s1, "b", x);
        agent.release_symbol(x);
        agent.flush_buffered_changes();

        agent.remove_input_wme(first).unwrap();
        agent.flush_buffered_changes();
        let own = agent.ownership_of(x).unwrap();
        assert_eq!(own.link_count, 1);
        assert_eq!(own.level, 1);
    }

    #[test]
    fn bounded_walk_agrees_with_full_walk() {
        for walk in [DemotionWalk::FullStack, DemotionWalk::BoundedRange] {
            let config = DeciderConfig {
                demotion_walk: walk,
                ..DeciderConfig::deterministic()
            };
            let mut agent = AgentContext::new(config).unwrap();
            let s1 = agent.create_top_goal().unwrap();
            let x = agent.make_identifier('X', 1);
            let y = agent.make_identifier('Y', 1);
            let z = agent.make_identifier('Z', 1);
            let to_x = input(&mut agent, s1, "thing", x);
            input(&mut agent, s1, "other", z);
            input(&mut agent, x, "next", y);
            input(&mut agent, z, "next", y);
            for id in [x, y, z] {
                agent.release_symbol(id);
            }
            agent.flush_buffered_changes();

            agent.remove_input_wme(to_x).unwrap();
            agent.flush_buffered_changes();
            assert!(agent.ownership_of(x).is_none(), "{walk:?}");
            let own = agent.ownership_of(y).unwrap();
            assert_eq!(own.level, 1, "{walk:?}");
            assert_eq!(own.link_count, 1, "{walk:?}");
            assert!(agent.ownership.is_idle(), "{walk:?}");
        }
    }

    #[test]
    fn links_onto_a_removed_goal_are_released_quietly() {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        let op = agent.predefined().operator;
        let a = agent.make_constant("A");
        let b = agent.make_constant("B");
        agent
            .add_instantiation(
                crate::instantiation::InstantiationSpec::new("propose", s1)
                    .with_preference(crate::instantiation::PreferenceSpec::acceptable(s1, op, a))
                    .with_preference(crate::instantiation::PreferenceSpec::acceptable(s1, op, b)),
            )
            .unwrap();
        agent.run_decision_phase().unwrap();
        let s2 = agent.bottom_goal().unwrap();
        let pointer = input(&mut agent, s1, "sub", s2);
        agent.flush_buffered_changes();
        assert_eq!(agent.ownership_of(s2).unwrap().link_count, 1);

        agent.remove_existing_context_and_descendents(s2);
        agent.flush_buffered_changes();
        assert!(agent.symbols.id_data(s2).former_goal);
        agent.remove_input_wme(pointer).unwrap();
        agent.flush_buffered_changes();
        assert_eq!(agent.goal_stack(), vec![s1]);
        assert!(agent.ownership.is_idle());
    }

    #[test]
    #[should_panic(expected = "reference count underflow on link count of X")]
    fn unmatched_link_removal_is_fatal() {
        let mut agent = agent();
        let s1 = agent.top_goal().unwrap();
        let x = agent.make_identifier('X', 1);
        agent.post_link_removal(Some(s1), x);
    }
}
