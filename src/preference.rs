//! Preferences: typed assertions about candidate values for a slot.

use serde::{Deserialize, Serialize};

use crate::agent::AgentContext;
use crate::config::AttributePreferencesMode;
use crate::error::{InvariantViolation, fatal};
use crate::handle::{Arena, handle_type};
use crate::instantiation::InstantiationId;
use crate::slot::SlotId;
use crate::symbol::SymbolId;

handle_type!(
    /// Handle of a preference in preference memory.
    PreferenceId,
    "p"
);

/// The thirteen preference types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceType {
    Acceptable,
    Require,
    Reject,
    Prohibit,
    Reconsider,
    UnaryIndifferent,
    UnaryParallel,
    Best,
    Worst,
    BinaryIndifferent,
    BinaryParallel,
    Better,
    Worse,
}

pub const NUM_PREFERENCE_TYPES: usize = 13;

impl PreferenceType {
    pub const ALL: [PreferenceType; NUM_PREFERENCE_TYPES] = [
        Self::Acceptable,
        Self::Require,
        Self::Reject,
        Self::Prohibit,
        Self::Reconsider,
        Self::UnaryIndifferent,
        Self::UnaryParallel,
        Self::Best,
        Self::Worst,
        Self::BinaryIndifferent,
        Self::BinaryParallel,
        Self::Better,
        Self::Worse,
    ];

    /// Position in per-slot preference lists.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Binary preferences relate a value to a referent.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::BinaryIndifferent | Self::BinaryParallel | Self::Better | Self::Worse
        )
    }

    /// Anything beyond acceptable/require/reject/prohibit is an attribute
    /// preference when used on a non-context slot.
    pub fn is_attribute_preference(self) -> bool {
        !matches!(
            self,
            Self::Acceptable | Self::Require | Self::Reject | Self::Prohibit
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Acceptable => "acceptable",
            Self::Require => "require",
            Self::Reject => "reject",
            Self::Prohibit => "prohibit",
            Self::Reconsider => "reconsider",
            Self::UnaryIndifferent => "unary indifferent",
            Self::UnaryParallel => "unary parallel",
            Self::Best => "best",
            Self::Worst => "worst",
            Self::BinaryIndifferent => "binary indifferent",
            Self::BinaryParallel => "binary parallel",
            Self::Better => "better",
            Self::Worse => "worse",
        }
    }

    /// The one-character notation used when printing preferences.
    pub fn notation(self) -> &'static str {
        match self {
            Self::Acceptable => "+",
            Self::Require => "!",
            Self::Reject => "-",
            Self::Prohibit => "~",
            Self::Reconsider => "@",
            Self::UnaryIndifferent | Self::BinaryIndifferent => "=",
            Self::UnaryParallel | Self::BinaryParallel => "&",
            Self::Best | Self::Better => ">",
            Self::Worst | Self::Worse => "<",
        }
    }
}

impl std::fmt::Display for PreferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A preference object.
#[derive(Debug, Clone)]
pub struct Preference {
    pub kind: PreferenceType,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    pub o_supported: bool,
    /// The instantiation that produced this preference.
    pub inst: Option<InstantiationId>,
    /// The slot this preference currently sits in, while in preference memory.
    pub slot: Option<SlotId>,
    pub in_tm: bool,
    reference_count: u32,
}

impl Preference {
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }
}

/// Owner of every allocated preference.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    arena: Arena<PreferenceId, Preference>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a preference with a zero reference count.
    pub fn make(
        &mut self,
        kind: PreferenceType,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        referent: Option<SymbolId>,
    ) -> PreferenceId {
        self.arena.insert(Preference {
            kind,
            id,
            attr,
            value,
            referent,
            o_supported: false,
            inst: None,
            slot: None,
            in_tm: false,
            reference_count: 0,
        })
    }

    pub fn get(&self, p: PreferenceId) -> Option<&Preference> {
        self.arena.get(p)
    }

    pub fn get_mut(&mut self, p: PreferenceId) -> Option<&mut Preference> {
        self.arena.get_mut(p)
    }

    /// Access a preference the decider itself holds. Aborts if dangling.
    pub(crate) fn pref(&self, p: PreferenceId) -> &Preference {
        self.arena.get(p).unwrap_or_else(|| {
            fatal(InvariantViolation::DanglingHandle {
                what: "preference",
                raw: p.get(),
            })
        })
    }

    pub(crate) fn pref_mut(&mut self, p: PreferenceId) -> &mut Preference {
        match self.arena.get_mut(p) {
            Some(pref) => pref,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "preference",
                raw: p.get(),
            }),
        }
    }

    /// Value of a preference the decider holds.
    pub fn value_of(&self, p: PreferenceId) -> SymbolId {
        self.pref(p).value
    }

    pub fn add_ref(&mut self, p: PreferenceId) {
        self.pref_mut(p).reference_count += 1;
    }

    /// Release one reference. Returns the preference if this was the last one;
    /// the caller must then release its symbol references.
    pub fn remove_ref(&mut self, p: PreferenceId) -> Option<Preference> {
        let pref = self.pref_mut(p);
        if pref.reference_count == 0 {
            fatal(InvariantViolation::RefcountUnderflow {
                what: format!("preference {}", p.get()),
            });
        }
        pref.reference_count -= 1;
        if pref.reference_count == 0 {
            self.arena.remove(p)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PreferenceId, &Preference)> {
        self.arena.iter()
    }
}

// ---------------------------------------------------------------------------
// Preference memory
// ---------------------------------------------------------------------------

impl AgentContext {
    /// Deposit `p` in its slot, creating the slot if needed. The slot holds
    /// one reference on `p` while it is in preference memory.
    pub(crate) fn add_preference_to_tm(&mut self, p: PreferenceId) {
        let (kind, id, attr, value, referent) = {
            let pref = self.prefs.pref(p);
            (pref.kind, pref.id, pref.attr, pref.value, pref.referent)
        };
        let s = match self.slots.find(id, attr) {
            Some(s) => s,
            None => self.make_slot(id, attr),
        };
        {
            let pref = self.prefs.pref_mut(p);
            pref.slot = Some(s);
            pref.in_tm = true;
        }
        self.prefs.add_ref(p);

        let slot = self.slots.slot_mut(s);
        slot.insert_preference(kind, p);
        slot.marked_for_possible_removal = false;
        let context = slot.isa_context_slot;

        self.post_link_addition_if_id(id, value);
        if let Some(referent) = referent {
            self.post_link_addition_if_id(id, referent);
        }

        if context {
            if matches!(kind, PreferenceType::Acceptable | PreferenceType::Require) {
                self.mark_context_slot_as_acceptable_preference_changed(s);
            }
        } else if kind.is_attribute_preference()
            && self.config.attribute_preferences == AttributePreferencesMode::Warn
        {
            tracing::warn!(
                kind = %kind,
                id = %self.symbols.display(id),
                attr = %self.symbols.display(attr),
                "attribute preference on a non-context slot"
            );
        }
        self.mark_slot_as_changed(s);
    }

    /// Take `p` out of its slot and drop the slot's reference on it.
    pub(crate) fn remove_preference_from_tm(&mut self, p: PreferenceId) {
        let (kind, id, value, referent, slot) = {
            let pref = self.prefs.pref_mut(p);
            if !pref.in_tm {
                return;
            }
            pref.in_tm = false;
            (pref.kind, pref.id, pref.value, pref.referent, pref.slot.take())
        };
        if let Some(s) = slot {
            let slot = self.slots.slot_mut(s);
            slot.remove_preference(kind, p);
            let context = slot.isa_context_slot;
            if context && matches!(kind, PreferenceType::Acceptable | PreferenceType::Require) {
                self.mark_context_slot_as_acceptable_preference_changed(s);
            }
            self.mark_slot_as_changed(s);
            self.mark_slot_for_possible_removal(s);
        }
        self.post_link_removal_if_id(id, value);
        if let Some(referent) = referent {
            self.post_link_removal_if_id(id, referent);
        }
        self.release_preference(p);
    }

    /// Release one reference on `p`, deallocating it with the last one.
    pub(crate) fn release_preference(&mut self, p: PreferenceId) {
        let Some(pref) = self.prefs.remove_ref(p) else {
            return;
        };
        self.symbols.remove_ref(pref.id);
        self.symbols.remove_ref(pref.attr);
        self.symbols.remove_ref(pref.value);
        if let Some(referent) = pref.referent {
            self.symbols.remove_ref(referent);
        }
        if let Some(inst) = pref.inst {
            let goal = self.insts.get(inst).map(|r| r.match_goal);
            if let Some(goal) = goal.filter(|&g| self.is_live_goal(g)) {
                self.symbols
                    .goal_data_mut(goal)
                    .preferences_from_goal
                    .retain(|&q| q != p);
            }
            self.instantiation_lost_preference(inst);
        }
    }
}
