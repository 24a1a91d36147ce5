//! Slots: `(id ^attr)` locations subject to preference resolution.

use std::collections::HashMap;

use crate::agent::AgentContext;
use crate::error::{InvariantViolation, fatal};
use crate::handle::{Arena, handle_type};
use crate::impasse::ImpasseType;
use crate::preference::{NUM_PREFERENCE_TYPES, PreferenceId, PreferenceType};
use crate::symbol::SymbolId;
use crate::wme::WmeId;

handle_type!(
    /// Handle of a slot.
    SlotId,
    "slot"
);

/// A slot and everything currently deposited in it.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: SymbolId,
    pub attr: SymbolId,
    pub isa_context_slot: bool,
    preferences: [Vec<PreferenceId>; NUM_PREFERENCE_TYPES],
    all_preferences: Vec<PreferenceId>,
    /// WMEs selected by the most recent decision for this slot.
    pub wmes: Vec<WmeId>,
    /// Context slots only: one `+` WME per acceptable/required value.
    pub acceptable_preference_wmes: Vec<WmeId>,
    pub impasse_type: ImpasseType,
    pub impasse_id: Option<SymbolId>,
    pub changed: bool,
    pub acceptable_preference_changed: bool,
    pub marked_for_possible_removal: bool,
}

impl Slot {
    pub fn new(id: SymbolId, attr: SymbolId) -> Self {
        Self {
            id,
            attr,
            isa_context_slot: false,
            preferences: Default::default(),
            all_preferences: Vec::new(),
            wmes: Vec::new(),
            acceptable_preference_wmes: Vec::new(),
            impasse_type: ImpasseType::None,
            impasse_id: None,
            changed: false,
            acceptable_preference_changed: false,
            marked_for_possible_removal: false,
        }
    }

    /// Preferences of one type, in deposit order.
    pub fn preferences(&self, kind: PreferenceType) -> &[PreferenceId] {
        &self.preferences[kind.index()]
    }

    pub fn has_preferences(&self, kind: PreferenceType) -> bool {
        !self.preferences[kind.index()].is_empty()
    }

    /// Every preference in the slot, in deposit order.
    pub fn all_preferences(&self) -> &[PreferenceId] {
        &self.all_preferences
    }

    pub fn insert_preference(&mut self, kind: PreferenceType, p: PreferenceId) {
        self.preferences[kind.index()].push(p);
        self.all_preferences.push(p);
    }

    /// Returns `false` if the preference was not in this slot.
    pub fn remove_preference(&mut self, kind: PreferenceType, p: PreferenceId) -> bool {
        let list = &mut self.preferences[kind.index()];
        let Some(pos) = list.iter().position(|&q| q == p) else {
            return false;
        };
        list.remove(pos);
        self.all_preferences.retain(|&q| q != p);
        true
    }

    /// Nothing left that would keep this slot alive.
    pub fn is_garbage(&self) -> bool {
        self.all_preferences.is_empty()
            && self.wmes.is_empty()
            && self.acceptable_preference_wmes.is_empty()
            && self.impasse_id.is_none()
    }
}

/// Owner of every slot, indexed by `(id, attr)`.
#[derive(Debug, Default)]
pub struct SlotTable {
    arena: Arena<SlotId, Slot>,
    index: HashMap<(SymbolId, SymbolId), SlotId>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: SymbolId, attr: SymbolId) -> Option<SlotId> {
        self.index.get(&(id, attr)).copied()
    }

    /// Create a slot. The caller must ensure none exists for `(id, attr)` and
    /// takes care of symbol references and the identifier's slot list.
    pub fn create(&mut self, id: SymbolId, attr: SymbolId) -> SlotId {
        let s = self.arena.insert(Slot::new(id, attr));
        self.index.insert((id, attr), s);
        s
    }

    pub fn remove(&mut self, s: SlotId) -> Option<Slot> {
        let slot = self.arena.remove(s)?;
        self.index.remove(&(slot.id, slot.attr));
        Some(slot)
    }

    pub fn get(&self, s: SlotId) -> Option<&Slot> {
        self.arena.get(s)
    }

    pub fn get_mut(&mut self, s: SlotId) -> Option<&mut Slot> {
        self.arena.get_mut(s)
    }

    pub(crate) fn slot(&self, s: SlotId) -> &Slot {
        self.arena.get(s).unwrap_or_else(|| {
            fatal(InvariantViolation::DanglingHandle {
                what: "slot",
                raw: s.get(),
            })
        })
    }

    pub(crate) fn slot_mut(&mut self, s: SlotId) -> &mut Slot {
        match self.arena.get_mut(s) {
            Some(slot) => slot,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "slot",
                raw: s.get(),
            }),
        }
    }

    pub fn contains(&self, s: SlotId) -> bool {
        self.arena.contains(s)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.arena.iter()
    }
}

impl AgentContext {
    /// Create the slot for `(id ^attr)`. It holds references on both symbols
    /// and is a context slot when `id` is a goal and `attr` is `operator`.
    pub(crate) fn make_slot(&mut self, id: SymbolId, attr: SymbolId) -> SlotId {
        if let Some(s) = self.slots.find(id, attr) {
            return s;
        }
        self.symbols.add_ref(id);
        self.symbols.add_ref(attr);
        let s = self.slots.create(id, attr);
        let data = self.symbols.id_data_mut(id);
        data.slots.push(s);
        let context = data.isa_goal && attr == self.predefined.operator;
        self.slots.slot_mut(s).isa_context_slot = context;
        s
    }

    /// Queue `s` for the next decision. Context slots only record the
    /// highest goal whose context may change.
    pub(crate) fn mark_slot_as_changed(&mut self, s: SlotId) {
        let slot = self.slots.slot_mut(s);
        if slot.isa_context_slot {
            slot.changed = true;
            let id = slot.id;
            let level = self.symbols.id_data(id).level;
            let replace = match self
                .decider
                .highest_goal_whose_context_changed
                .filter(|&h| self.is_live_goal(h))
            {
                Some(h) => level < self.symbols.id_data(h).level,
                None => true,
            };
            if replace {
                self.decider.highest_goal_whose_context_changed = Some(id);
            }
        } else if !slot.changed {
            slot.changed = true;
            self.decider.changed_slots.push(s);
        }
    }

    pub(crate) fn mark_context_slot_as_acceptable_preference_changed(&mut self, s: SlotId) {
        let slot = self.slots.slot_mut(s);
        if slot.acceptable_preference_changed {
            return;
        }
        slot.acceptable_preference_changed = true;
        self.decider
            .context_slots_with_changed_acceptable_preferences
            .push(s);
    }

    pub(crate) fn mark_slot_for_possible_removal(&mut self, s: SlotId) {
        let Some(slot) = self.slots.get_mut(s) else {
            return;
        };
        if slot.marked_for_possible_removal {
            return;
        }
        slot.marked_for_possible_removal = true;
        self.decider.slots_for_possible_removal.push(s);
    }

    /// Deallocate marked slots that hold nothing. An operator slot stays for
    /// as long as its identifier is a goal.
    pub(crate) fn remove_garbage_slots(&mut self) {
        let marked = std::mem::take(&mut self.decider.slots_for_possible_removal);
        for s in marked {
            let Some(slot) = self.slots.get_mut(s) else {
                continue;
            };
            slot.marked_for_possible_removal = false;
            if !slot.is_garbage() {
                continue;
            }
            let (id, context) = (slot.id, slot.isa_context_slot);
            if context && self.is_live_goal(id) {
                continue;
            }
            let Some(slot) = self.slots.remove(s) else {
                continue;
            };
            self.decider.changed_slots.retain(|&x| x != s);
            self.decider
                .context_slots_with_changed_acceptable_preferences
                .retain(|&x| x != s);
            if let Some(data) = self.symbols.ident_mut(slot.id) {
                data.slots.retain(|&x| x != s);
            }
            self.symbols.remove_ref(slot.id);
            self.symbols.remove_ref(slot.attr);
        }
    }

    /// Bring the `+` WMEs of every flagged context slot in line with its
    /// acceptable and require preferences. Returns `true` if any slot was
    /// flagged.
    pub(crate) fn do_acceptable_preference_wme_changes(&mut self) -> bool {
        let flagged = std::mem::take(
            &mut self.decider.context_slots_with_changed_acceptable_preferences,
        );
        if flagged.is_empty() {
            return false;
        }
        for s in flagged {
            let Some(slot) = self.slots.get_mut(s) else {
                continue;
            };
            slot.acceptable_preference_changed = false;
            let (id, attr) = (slot.id, slot.attr);

            let mut wanted: Vec<SymbolId> = Vec::new();
            for kind in [PreferenceType::Acceptable, PreferenceType::Require] {
                for &p in slot.preferences(kind) {
                    let value = self.prefs.value_of(p);
                    if !wanted.contains(&value) {
                        wanted.push(value);
                    }
                }
            }

            let existing = slot.acceptable_preference_wmes.clone();
            let mut present: Vec<SymbolId> = Vec::with_capacity(existing.len());
            for w in existing {
                let value = self.wmes.wme(w).value;
                if wanted.contains(&value) {
                    present.push(value);
                } else {
                    self.slots
                        .slot_mut(s)
                        .acceptable_preference_wmes
                        .retain(|&x| x != w);
                    self.remove_wme_from_wm(w);
                }
            }
            for value in wanted {
                if present.contains(&value) {
                    continue;
                }
                let w = self.make_wme(id, attr, value, true);
                self.slots.slot_mut(s).acceptable_preference_wmes.push(w);
                self.add_wme_to_wm(w);
            }
            self.mark_slot_for_possible_removal(s);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeciderConfig;
    use crate::instantiation::{InstantiationSpec, PreferenceSpec};

    fn sym(raw: u64) -> SymbolId {
        SymbolId::new(raw).unwrap()
    }

    fn pref(raw: u64) -> PreferenceId {
        PreferenceId::new(raw).unwrap()
    }

    #[test]
    fn preferences_are_bucketed_by_type() {
        let mut slot = Slot::new(sym(1), sym(2));
        slot.insert_preference(PreferenceType::Acceptable, pref(1));
        slot.insert_preference(PreferenceType::Better, pref(2));
        slot.insert_preference(PreferenceType::Acceptable, pref(3));
        assert_eq!(slot.preferences(PreferenceType::Acceptable), &[pref(1), pref(3)]);
        assert_eq!(slot.all_preferences(), &[pref(1), pref(2), pref(3)]);
        assert!(!slot.has_preferences(PreferenceType::Worse));
    }

    #[test]
    fn removal_updates_both_lists() {
        let mut slot = Slot::new(sym(1), sym(2));
        slot.insert_preference(PreferenceType::Reject, pref(7));
        assert!(!slot.remove_preference(PreferenceType::Acceptable, pref(7)));
        assert!(slot.remove_preference(PreferenceType::Reject, pref(7)));
        assert!(slot.all_preferences().is_empty());
        assert!(slot.is_garbage());
    }

    #[test]
    fn table_indexes_by_id_and_attr() {
        let mut table = SlotTable::new();
        let s = table.create(sym(1), sym(2));
        assert_eq!(table.find(sym(1), sym(2)), Some(s));
        assert_eq!(table.find(sym(2), sym(1)), None);
        table.remove(s);
        assert_eq!(table.find(sym(1), sym(2)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn operator_slot_of_a_goal_is_a_context_slot() {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        let operator = agent.predefined().operator;
        let s = agent.find_slot(s1, operator).unwrap();
        assert!(agent.slots.slot(s).isa_context_slot);

        let color = agent.make_constant("color");
        let other = agent.make_slot(s1, color);
        assert!(!agent.slots.slot(other).isa_context_slot);
    }

    #[test]
    fn acceptable_preferences_are_mirrored_on_context_slots() {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        let operator = agent.predefined().operator;
        let o1 = agent.make_identifier('O', 1);
        let spec = InstantiationSpec::new("propose", s1)
            .with_preference(PreferenceSpec::acceptable(s1, operator, o1))
            .with_preference(PreferenceSpec::unary(PreferenceType::Require, s1, operator, o1));
        let inst = agent.add_instantiation(spec).unwrap();
        agent.flush_buffered_changes();
        assert_eq!(agent.acceptable_preference_values(s1, operator), vec![o1]);

        agent.retract_instantiation(inst).unwrap();
        agent.flush_buffered_changes();
        assert!(agent.acceptable_preference_values(s1, operator).is_empty());
        assert!(agent.find_slot(s1, operator).is_some());
    }

    #[test]
    fn empty_non_context_slots_are_collected() {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        let color = agent.make_constant("color");
        let red = agent.make_constant("red");
        let inst = agent
            .add_instantiation(
                InstantiationSpec::new("paint", s1)
                    .with_preference(PreferenceSpec::acceptable(s1, color, red)),
            )
            .unwrap();
        assert!(agent.find_slot(s1, color).is_some());
        agent.retract_instantiation(inst).unwrap();
        agent.flush_buffered_changes();
        assert!(agent.find_slot(s1, color).is_none());
    }
}
