//! Instantiations: the upstream matcher's deposits into preference memory.
//!
//! The rule matcher itself is outside this crate. What the decider needs from
//! it is, per rule firing, the goal it matched at, the positive condition WMEs
//! (for goal dependency set backtracing) and the preferences it asserts.

use serde::{Deserialize, Serialize};

use crate::agent::AgentContext;
use crate::error::{DecideError, DecideResult};
use crate::handle::{Arena, handle_type};
use crate::preference::{PreferenceId, PreferenceType};
use crate::symbol::{GoalLevel, SymbolId};
use crate::wme::WmeId;

handle_type!(
    /// Handle of a rule instantiation.
    InstantiationId,
    "inst"
);

/// A positive condition and the WME it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionMatch {
    pub wme: WmeId,
    /// Level of the WME's identifier at match time.
    pub level: GoalLevel,
}

/// A rule firing.
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub rule: String,
    pub match_goal: SymbolId,
    pub match_goal_level: GoalLevel,
    pub conditions: Vec<ConditionMatch>,
    pub preferences: Vec<PreferenceId>,
    pub retracted: bool,
    pub(crate) live_preferences: usize,
}

/// One preference an instantiation asserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSpec {
    pub kind: PreferenceType,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    #[serde(default)]
    pub referent: Option<SymbolId>,
    #[serde(default)]
    pub o_supported: bool,
}

impl PreferenceSpec {
    pub fn unary(kind: PreferenceType, id: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        Self {
            kind,
            id,
            attr,
            value,
            referent: None,
            o_supported: false,
        }
    }

    pub fn binary(
        kind: PreferenceType,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        referent: SymbolId,
    ) -> Self {
        Self {
            referent: Some(referent),
            ..Self::unary(kind, id, attr, value)
        }
    }

    pub fn acceptable(id: SymbolId, attr: SymbolId, value: SymbolId) -> Self {
        Self::unary(PreferenceType::Acceptable, id, attr, value)
    }

    pub fn o_supported(mut self) -> Self {
        self.o_supported = true;
        self
    }
}

/// A rule firing as reported by the matcher.
#[derive(Debug, Clone)]
pub struct InstantiationSpec {
    pub rule: String,
    pub match_goal: SymbolId,
    pub conditions: Vec<WmeId>,
    pub preferences: Vec<PreferenceSpec>,
}

impl InstantiationSpec {
    pub fn new(rule: impl Into<String>, match_goal: SymbolId) -> Self {
        Self {
            rule: rule.into(),
            match_goal,
            conditions: Vec::new(),
            preferences: Vec::new(),
        }
    }

    pub fn with_condition(mut self, wme: WmeId) -> Self {
        self.conditions.push(wme);
        self
    }

    pub fn with_preference(mut self, pref: PreferenceSpec) -> Self {
        self.preferences.push(pref);
        self
    }
}

pub type InstantiationStore = Arena<InstantiationId, Instantiation>;

impl AgentContext {
    /// Deposit a rule firing: record its condition matches and add each of
    /// its preferences to preference memory.
    pub fn add_instantiation(&mut self, spec: InstantiationSpec) -> DecideResult<InstantiationId> {
        self.validate_instantiation(&spec)?;

        let match_goal_level = self.symbols.id_data(spec.match_goal).level;
        let mut conditions = Vec::with_capacity(spec.conditions.len());
        for &w in &spec.conditions {
            self.wmes.add_ref(w);
            let id = self.wmes.wme(w).id;
            conditions.push(ConditionMatch {
                wme: w,
                level: self.symbols.id_data(id).level,
            });
        }

        let inst = self.insts.insert(Instantiation {
            rule: spec.rule.clone(),
            match_goal: spec.match_goal,
            match_goal_level,
            conditions,
            preferences: Vec::new(),
            retracted: false,
            live_preferences: 0,
        });

        for pref_spec in &spec.preferences {
            let p = self.prefs.make(
                pref_spec.kind,
                pref_spec.id,
                pref_spec.attr,
                pref_spec.value,
                pref_spec.referent,
            );
            self.symbols.add_ref(pref_spec.id);
            self.symbols.add_ref(pref_spec.attr);
            self.symbols.add_ref(pref_spec.value);
            if let Some(referent) = pref_spec.referent {
                self.symbols.add_ref(referent);
            }
            {
                let pref = self.prefs.pref_mut(p);
                pref.o_supported = pref_spec.o_supported;
                pref.inst = Some(inst);
            }
            if let Some(record) = self.insts.get_mut(inst) {
                record.preferences.push(p);
                record.live_preferences += 1;
            }
            self.symbols
                .goal_data_mut(spec.match_goal)
                .preferences_from_goal
                .push(p);
            self.add_preference_to_tm(p);
        }

        tracing::trace!(
            rule = %spec.rule,
            goal = %self.symbols.display(spec.match_goal),
            preferences = spec.preferences.len(),
            "instantiation added"
        );
        Ok(inst)
    }

    fn validate_instantiation(&self, spec: &InstantiationSpec) -> DecideResult<()> {
        let goal = self.symbols.check_identifier(spec.match_goal)?;
        if !goal.isa_goal {
            return Err(DecideError::NotAGoal {
                symbol: self.symbols.display(spec.match_goal),
            });
        }
        for &w in &spec.conditions {
            match self.wmes.get(w) {
                Some(wme) if wme.in_wm => {}
                _ => return Err(DecideError::UnknownWme { timetag: w.get() }),
            }
        }
        for pref in &spec.preferences {
            self.symbols.check_identifier(pref.id)?;
            self.symbols.check(pref.attr)?;
            self.symbols.check(pref.value)?;
            match pref.referent {
                Some(referent) => {
                    self.symbols.check(referent)?;
                }
                None if pref.kind.is_binary() => {
                    return Err(DecideError::MissingReferent {
                        kind: pref.kind.to_string(),
                        id: self.symbols.display(pref.id),
                        attr: self.symbols.display(pref.attr),
                        value: self.symbols.display(pref.value),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Retract a rule firing: its i-supported preferences leave preference
    /// memory, o-supported ones persist until removed explicitly.
    pub fn retract_instantiation(&mut self, inst: InstantiationId) -> DecideResult<()> {
        let record = self
            .insts
            .get_mut(inst)
            .ok_or(DecideError::UnknownInstantiation {
                instantiation_id: inst.get(),
            })?;
        record.retracted = true;
        let prefs = record.preferences.clone();
        for p in prefs {
            let Some(pref) = self.prefs.get(p) else {
                continue;
            };
            if pref.in_tm && !pref.o_supported {
                self.remove_preference_from_tm(p);
            }
        }
        self.maybe_free_instantiation(inst);
        Ok(())
    }

    /// Remove one preference from preference memory, regardless of support.
    pub fn remove_preference(&mut self, p: PreferenceId) -> DecideResult<()> {
        let pref = self.prefs.get(p).ok_or(DecideError::UnknownPreference {
            preference_id: p.get(),
        })?;
        if pref.in_tm {
            self.remove_preference_from_tm(p);
        }
        Ok(())
    }

    /// Called when one of an instantiation's preferences is deallocated.
    pub(crate) fn instantiation_lost_preference(&mut self, inst: InstantiationId) {
        if let Some(record) = self.insts.get_mut(inst) {
            record.live_preferences = record.live_preferences.saturating_sub(1);
        }
        self.maybe_free_instantiation(inst);
    }

    /// Deallocate a retracted instantiation once none of its preferences remain.
    fn maybe_free_instantiation(&mut self, inst: InstantiationId) {
        let free = self
            .insts
            .get(inst)
            .is_some_and(|r| r.retracted && r.live_preferences == 0);
        if !free {
            return;
        }
        if let Some(record) = self.insts.remove(inst) {
            for cond in record.conditions {
                self.release_wme(cond.wme);
            }
        }
    }

    /// Instantiations matched at `goal` are retracted along with it.
    pub(crate) fn retract_instantiations_of_goal(&mut self, goal: SymbolId) {
        let matched: Vec<InstantiationId> = self
            .insts
            .iter()
            .filter(|(_, r)| r.match_goal == goal && !r.retracted)
            .map(|(h, _)| h)
            .collect();
        for inst in matched {
            if let Some(record) = self.insts.get_mut(inst) {
                record.retracted = true;
            }
            self.maybe_free_instantiation(inst);
        }
    }

    pub fn instantiation(&self, inst: InstantiationId) -> Option<&Instantiation> {
        self.insts.get(inst)
    }

    pub fn instantiation_count(&self) -> usize {
        self.insts.len()
    }
}
