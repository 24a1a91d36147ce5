//! Impasses: sub-goal and attribute-impasse identifiers with their
//! architectural WMEs (`^type`, `^superstate`/`^object`, `^attribute`,
//! `^impasse`, `^choices`, `^quiescence`, `^item`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentContext;
use crate::error::{InvariantViolation, fatal};
use crate::preference::PreferenceId;
use crate::slot::SlotId;
use crate::symbol::{ATTRIBUTE_IMPASSE_LEVEL, GoalLevel, PredefinedSymbols, SymbolId};
use crate::wme::WmeId;

/// Outcome classification of preference resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImpasseType {
    /// Resolved: no impasse.
    #[default]
    None,
    ConstraintFailure,
    Conflict,
    Tie,
    NoChange,
}

impl ImpasseType {
    /// The `^impasse` value naming this kind, if it is a real impasse.
    pub fn symbol(self, predefined: &PredefinedSymbols) -> Option<SymbolId> {
        match self {
            Self::None => None,
            Self::ConstraintFailure => Some(predefined.constraint_failure),
            Self::Conflict => Some(predefined.conflict),
            Self::Tie => Some(predefined.tie),
            Self::NoChange => Some(predefined.no_change),
        }
    }

    /// Inverse of [`ImpasseType::symbol`].
    pub fn from_symbol(value: SymbolId, predefined: &PredefinedSymbols) -> Option<Self> {
        [
            Self::ConstraintFailure,
            Self::Conflict,
            Self::Tie,
            Self::NoChange,
        ]
        .into_iter()
        .find(|kind| kind.symbol(predefined) == Some(value))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ConstraintFailure => "constraint-failure",
            Self::Conflict => "conflict",
            Self::Tie => "tie",
            Self::NoChange => "no-change",
        }
    }
}

impl std::fmt::Display for ImpasseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A printable view of an impasse for query callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpasseInfo {
    pub id: String,
    pub kind: ImpasseType,
    pub attribute: Option<String>,
    pub items: Vec<String>,
}

impl AgentContext {
    /// Create an impasse identifier at `level` together with its architectural
    /// WMEs. The caller owns the returned identifier's reference.
    pub(crate) fn create_new_impasse(
        &mut self,
        isa_goal: bool,
        object: SymbolId,
        attr: Option<SymbolId>,
        impasse_type: ImpasseType,
        level: GoalLevel,
    ) -> SymbolId {
        let pre = self.predefined;
        let id = self
            .symbols
            .make_identifier(if isa_goal { 'S' } else { 'I' }, level);
        // The special link keeps the identifier alive until its context goes away.
        self.post_link_addition(None, id);

        if isa_goal {
            self.add_impasse_wme(id, pre.type_, pre.state, None);
            self.add_impasse_wme(id, pre.superstate, object, None);
        } else {
            self.add_impasse_wme(id, pre.type_, pre.attribute, None);
            self.add_impasse_wme(id, pre.object, object, None);
        }
        if let Some(attr) = attr {
            self.add_impasse_wme(id, pre.attribute, attr, None);
        }
        if let Some(kind) = impasse_type.symbol(&pre) {
            self.add_impasse_wme(id, pre.impasse, kind, None);
            let choices = if impasse_type == ImpasseType::NoChange {
                pre.none
            } else {
                pre.multiple
            };
            self.add_impasse_wme(id, pre.choices, choices, None);
            self.stats.record_impasse(impasse_type);
        }
        id
    }

    /// Assert an architectural WME owned by impasse identifier `id`.
    pub(crate) fn add_impasse_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        pref: Option<PreferenceId>,
    ) -> WmeId {
        let w = self.make_wme(id, attr, value, false);
        if let Some(p) = pref {
            self.prefs.add_ref(p);
            self.wmes.wme_mut(w).preference = Some(p);
        }
        self.symbols.id_data_mut(id).impasse_wmes.push(w);
        self.add_wme_to_wm(w);
        w
    }

    /// Retype or create the attribute impasse on a non-context slot.
    pub(crate) fn create_new_attribute_impasse_for_slot(
        &mut self,
        s: SlotId,
        impasse_type: ImpasseType,
    ) {
        let (object, attr) = {
            let slot = self.slots.slot(s);
            (slot.id, slot.attr)
        };
        let id = self.create_new_impasse(
            false,
            object,
            Some(attr),
            impasse_type,
            ATTRIBUTE_IMPASSE_LEVEL,
        );
        self.symbols.id_data_mut(id).isa_impasse = true;
        let slot = self.slots.slot_mut(s);
        slot.impasse_type = impasse_type;
        slot.impasse_id = Some(id);
        tracing::debug!(
            impasse = %self.symbols.display(id),
            kind = %impasse_type,
            object = %self.symbols.display(object),
            attr = %self.symbols.display(attr),
            "attribute impasse created"
        );
    }

    pub(crate) fn remove_existing_attribute_impasse_for_slot(&mut self, s: SlotId) {
        let slot = self.slots.slot_mut(s);
        let Some(id) = slot.impasse_id.take() else {
            return;
        };
        slot.impasse_type = ImpasseType::None;
        let wmes = std::mem::take(&mut self.symbols.id_data_mut(id).impasse_wmes);
        self.remove_wme_list_from_wm(wmes);
        self.post_link_removal(None, id);
        self.symbols.remove_ref(id);
    }

    /// Make the `^item` WMEs of impasse `id` match `items` exactly. Existing
    /// items whose value is still wanted are kept and re-pointed at the new
    /// candidate preference.
    pub(crate) fn update_impasse_items(&mut self, id: SymbolId, items: &[PreferenceId]) {
        let item_attr = self.predefined.item;
        let mut wanted: HashMap<SymbolId, PreferenceId> = HashMap::with_capacity(items.len());
        for &p in items {
            wanted.entry(self.prefs.value_of(p)).or_insert(p);
        }

        let existing = self.symbols.id_data(id).impasse_wmes.clone();
        let mut kept: HashMap<SymbolId, WmeId> = HashMap::new();
        for w in existing {
            let (attr, value) = {
                let wme = self.wmes.wme(w);
                (wme.attr, wme.value)
            };
            if attr != item_attr {
                continue;
            }
            if wanted.contains_key(&value) && !kept.contains_key(&value) {
                kept.insert(value, w);
            } else {
                self.symbols.id_data_mut(id).impasse_wmes.retain(|&x| x != w);
                self.remove_wme_from_wm(w);
            }
        }

        for &p in items {
            let value = self.prefs.value_of(p);
            if wanted.get(&value) != Some(&p) {
                continue;
            }
            match kept.get(&value) {
                Some(&w) => {
                    self.repoint_wme_preference(w, p);
                }
                None => {
                    self.add_impasse_wme(id, item_attr, value, Some(p));
                }
            }
        }
    }

    /// Impasse kind of the sub-goal directly below `goal`.
    pub(crate) fn type_of_existing_impasse(&self, goal: SymbolId) -> ImpasseType {
        let Some(lower) = self.symbols.goal_data(goal).lower_goal else {
            return ImpasseType::None;
        };
        let pre = &self.predefined;
        for &w in &self.symbols.id_data(lower).impasse_wmes {
            let wme = self.wmes.wme(w);
            if wme.attr == pre.impasse {
                return ImpasseType::from_symbol(wme.value, pre).unwrap_or_else(|| {
                    fatal(InvariantViolation::BadImpasseValue {
                        goal: self.symbols.display(goal),
                        value: self.symbols.display(wme.value),
                    })
                });
            }
        }
        fatal(InvariantViolation::MalformedImpasse {
            goal: self.symbols.display(goal),
            attr: "impasse",
        })
    }

    /// `^attribute` of the sub-goal directly below `goal`.
    pub(crate) fn attribute_of_existing_impasse(&self, goal: SymbolId) -> Option<SymbolId> {
        let lower = self.symbols.goal_data(goal).lower_goal?;
        for &w in &self.symbols.id_data(lower).impasse_wmes {
            let wme = self.wmes.wme(w);
            if wme.attr == self.predefined.attribute {
                return Some(wme.value);
            }
        }
        fatal(InvariantViolation::MalformedImpasse {
            goal: self.symbols.display(goal),
            attr: "attribute",
        })
    }

    fn impasse_info(&self, id: SymbolId, kind: ImpasseType) -> ImpasseInfo {
        let pre = &self.predefined;
        let mut attribute = None;
        let mut items = Vec::new();
        for &w in &self.symbols.id_data(id).impasse_wmes {
            let wme = self.wmes.wme(w);
            if wme.attr == pre.attribute {
                attribute = Some(self.symbols.display(wme.value));
            } else if wme.attr == pre.item {
                items.push(self.symbols.display(wme.value));
            }
        }
        ImpasseInfo {
            id: self.symbols.display(id),
            kind,
            attribute,
            items,
        }
    }

    /// The impasse sub-goal directly below `goal`, if any.
    pub fn impasse_below(&self, goal: SymbolId) -> Option<ImpasseInfo> {
        let data = self.symbols.ident(goal)?.goal.as_ref()?;
        let lower = data.lower_goal?;
        Some(self.impasse_info(lower, self.type_of_existing_impasse(goal)))
    }

    /// The attribute impasse on `(id ^attr)`, if any.
    pub fn attribute_impasse(&self, id: SymbolId, attr: SymbolId) -> Option<ImpasseInfo> {
        let slot = self.slots.get(self.slots.find(id, attr)?)?;
        let impasse_id = slot.impasse_id?;
        Some(self.impasse_info(impasse_id, slot.impasse_type))
    }
}
