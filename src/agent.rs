//! Agent context: top-level owner of every decider subsystem.
//!
//! An `AgentContext` owns the symbol table, working memory, preference
//! memory, slots, instantiations, goal dependency sets and the ownership
//! tracker of one agent. All decider operations are methods on it; there is
//! no ambient state. One context is used from one thread at a time.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::DeciderConfig;
use crate::decider::DeciderState;
use crate::error::{DecideError, DecideResult};
use crate::gds::GdsStore;
use crate::instantiation::InstantiationStore;
use crate::ownership::{IdentifierOwnership, OwnershipState};
use crate::preference::{Preference, PreferenceId, PreferenceStore};
use crate::semantics::{
    FirstChoice, IndifferenceResolver, PolicyChoice, Resolution, SemanticsOptions,
    run_preference_semantics, run_preference_semantics_for_consistency_check,
};
use crate::slot::{SlotId, SlotTable};
use crate::stats::DeciderStats;
use crate::symbol::{GoalLevel, PredefinedSymbols, SymbolId, SymbolTable};
use crate::wme::{WmeId, WmeStore, WmeTriple};

/// One agent's decider state.
pub struct AgentContext {
    pub(crate) config: DeciderConfig,
    pub(crate) symbols: SymbolTable,
    pub(crate) predefined: PredefinedSymbols,
    pub(crate) wmes: WmeStore,
    pub(crate) prefs: PreferenceStore,
    pub(crate) slots: SlotTable,
    pub(crate) insts: InstantiationStore,
    pub(crate) gds: GdsStore,
    pub(crate) ownership: OwnershipState,
    pub(crate) decider: DeciderState,
    pub(crate) stats: DeciderStats,
    pub(crate) rng: StdRng,
    pub(crate) resolver: Box<dyn IndifferenceResolver>,
}

impl AgentContext {
    /// Create an agent with an empty goal stack.
    ///
    /// `ask` selection falls back to [`FirstChoice`] until a resolver is
    /// installed with [`set_indifference_resolver`](Self::set_indifference_resolver).
    pub fn new(config: DeciderConfig) -> DecideResult<Self> {
        config.validate()?;
        tracing::info!(
            user_select = %config.user_select,
            operand2 = config.operand2_mode,
            wait_snc = config.wait_snc,
            "initializing decider"
        );

        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut symbols = SymbolTable::new();
        let predefined = PredefinedSymbols::intern(&mut symbols);

        Ok(Self {
            config,
            symbols,
            predefined,
            wmes: WmeStore::new(),
            prefs: PreferenceStore::new(),
            slots: SlotTable::new(),
            insts: InstantiationStore::new(),
            gds: GdsStore::new(),
            ownership: OwnershipState::default(),
            decider: DeciderState::default(),
            stats: DeciderStats::default(),
            rng,
            resolver: Box::new(FirstChoice),
        })
    }

    /// Install the callback consulted by `ask` selection.
    pub fn set_indifference_resolver(&mut self, resolver: Box<dyn IndifferenceResolver>) {
        self.resolver = resolver;
    }

    pub fn config(&self) -> &DeciderConfig {
        &self.config
    }

    pub fn stats(&self) -> &DeciderStats {
        &self.stats
    }

    pub fn predefined(&self) -> &PredefinedSymbols {
        &self.predefined
    }

    // -----------------------------------------------------------------------
    // Symbols
    // -----------------------------------------------------------------------

    /// Make (or re-reference) a symbolic constant. The caller owns one
    /// reference and releases it with [`release_symbol`](Self::release_symbol).
    pub fn make_constant(&mut self, name: &str) -> SymbolId {
        self.symbols.make_sym_constant(name)
    }

    pub fn make_int(&mut self, value: i64) -> SymbolId {
        self.symbols.make_int_constant(value)
    }

    pub fn make_float(&mut self, value: f64) -> SymbolId {
        self.symbols.make_float_constant(value)
    }

    /// Make a fresh identifier at `level`. The caller owns one reference.
    pub fn make_identifier(&mut self, letter: char, level: GoalLevel) -> SymbolId {
        self.symbols.make_identifier(letter, level)
    }

    /// Release a reference obtained from one of the `make_*` calls.
    pub fn release_symbol(&mut self, id: SymbolId) {
        self.symbols.remove_ref(id);
    }

    /// Printable name of a symbol (`S1`, `operator`, `42`).
    pub fn symbol_name(&self, id: SymbolId) -> String {
        self.symbols.display(id)
    }

    pub fn find_identifier(&self, name: &str) -> Option<SymbolId> {
        self.symbols.find_identifier(name)
    }

    pub fn find_constant(&self, name: &str) -> Option<SymbolId> {
        self.symbols.find_sym_constant(name)
    }

    pub fn is_live_symbol(&self, id: SymbolId) -> bool {
        self.symbols.contains(id)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Ownership state of every live identifier, in allocation order.
    pub fn live_identifiers(&self) -> Vec<IdentifierOwnership> {
        self.symbols
            .identifiers()
            .into_iter()
            .filter_map(|id| self.ownership_of(id))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Goal stack
    // -----------------------------------------------------------------------

    pub fn top_goal(&self) -> Option<SymbolId> {
        self.decider.top_goal
    }

    pub fn bottom_goal(&self) -> Option<SymbolId> {
        self.decider.bottom_goal
    }

    /// Goals from the top of the stack down.
    pub fn goal_stack(&self) -> Vec<SymbolId> {
        let mut stack = Vec::new();
        let mut goal = self.decider.top_goal;
        while let Some(g) = goal {
            stack.push(g);
            goal = self.symbols.goal_data(g).lower_goal;
        }
        stack
    }

    pub(crate) fn is_live_goal(&self, goal: SymbolId) -> bool {
        self.symbols.ident(goal).is_some_and(|d| d.isa_goal)
    }

    pub(crate) fn require_top_goal(&self) -> DecideResult<SymbolId> {
        self.decider.top_goal.ok_or(DecideError::NoTopGoal)
    }

    /// The operator installed on `goal`, if any.
    pub fn operator_of(&self, goal: SymbolId) -> Option<SymbolId> {
        let data = self.symbols.ident(goal)?.goal.as_ref()?;
        let slot = self.slots.get(data.operator_slot)?;
        slot.wmes.first().map(|&w| self.wmes.wme(w).value)
    }

    // -----------------------------------------------------------------------
    // Working memory and preference queries
    // -----------------------------------------------------------------------

    pub(crate) fn wme_triple(&self, w: WmeId) -> WmeTriple {
        let wme = self.wmes.wme(w);
        WmeTriple {
            timetag: w.get(),
            id: self.symbols.display(wme.id),
            attr: self.symbols.display(wme.attr),
            value: self.symbols.display(wme.value),
            acceptable: wme.acceptable,
        }
    }

    /// A WME in printable form, if it is still allocated.
    pub fn wme(&self, w: WmeId) -> Option<WmeTriple> {
        self.wmes.get(w).map(|_| self.wme_triple(w))
    }

    pub fn is_in_working_memory(&self, w: WmeId) -> bool {
        self.wmes.get(w).is_some_and(|wme| wme.in_wm)
    }

    /// Every WME currently in working memory, by timetag.
    pub fn working_memory(&self) -> Vec<WmeTriple> {
        self.wmes.in_wm().map(|(w, _)| self.wme_triple(w)).collect()
    }

    pub fn find_slot(&self, id: SymbolId, attr: SymbolId) -> Option<SlotId> {
        self.slots.find(id, attr)
    }

    /// Values installed in `(id ^attr)` by its most recent decision.
    pub fn slot_values(&self, id: SymbolId, attr: SymbolId) -> Vec<SymbolId> {
        self.slots
            .find(id, attr)
            .and_then(|s| self.slots.get(s))
            .map(|slot| slot.wmes.iter().map(|&w| self.wmes.wme(w).value).collect())
            .unwrap_or_default()
    }

    /// Acceptable-preference WMEs mirrored onto a context slot.
    pub fn acceptable_preference_values(&self, id: SymbolId, attr: SymbolId) -> Vec<SymbolId> {
        self.slots
            .find(id, attr)
            .and_then(|s| self.slots.get(s))
            .map(|slot| {
                slot.acceptable_preference_wmes
                    .iter()
                    .map(|&w| self.wmes.wme(w).value)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn preference(&self, p: PreferenceId) -> Option<&Preference> {
        self.prefs.get(p)
    }

    pub fn preference_count(&self) -> usize {
        self.prefs.len()
    }

    /// Resolve `(id ^attr)` without committing to anything: indifferent
    /// candidates are all returned and nothing in working memory changes.
    pub fn preview_slot(&self, id: SymbolId, attr: SymbolId) -> DecideResult<Resolution> {
        let s = self.slots.find(id, attr).ok_or_else(|| DecideError::NoSlot {
            id: self.symbols.display(id),
            attr: self.symbols.display(attr),
        })?;
        Ok(run_preference_semantics_for_consistency_check(
            self.slots.slot(s),
            &self.prefs,
            self.semantics_options(),
        ))
    }

    /// Resolve `(id ^attr)` through the configured selection policy, as a
    /// decision would, without installing the result.
    pub fn resolve_slot(&mut self, id: SymbolId, attr: SymbolId) -> DecideResult<Resolution> {
        let s = self.slots.find(id, attr).ok_or_else(|| DecideError::NoSlot {
            id: self.symbols.display(id),
            attr: self.symbols.display(attr),
        })?;
        Ok(self.run_semantics(s))
    }

    pub(crate) fn semantics_options(&self) -> SemanticsOptions {
        SemanticsOptions {
            short_circuit_non_context: self.config.short_circuits_non_context_slots(),
        }
    }

    /// Resolve slot `s`, committing through the configured selection policy.
    pub(crate) fn run_semantics(&mut self, s: SlotId) -> Resolution {
        let options = self.semantics_options();
        let mut chooser = PolicyChoice {
            policy: self.config.user_select,
            rng: &mut self.rng,
            ask: self.resolver.as_mut(),
        };
        run_preference_semantics(self.slots.slot(s), &self.prefs, options, &mut chooser)
    }

    pub(crate) fn run_semantics_for_consistency_check(&self, s: SlotId) -> Resolution {
        run_preference_semantics_for_consistency_check(
            self.slots.slot(s),
            &self.prefs,
            self.semantics_options(),
        )
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("config", &self.config)
            .field("symbols", &self.symbols.len())
            .field("wmes", &self.wmes.len())
            .field("preferences", &self.prefs.len())
            .field("slots", &self.slots.len())
            .field("top_goal", &self.decider.top_goal)
            .field("bottom_goal", &self.decider.bottom_goal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserSelect;

    #[test]
    fn new_agent_has_no_goals() {
        let agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        assert!(agent.top_goal().is_none());
        assert!(agent.goal_stack().is_empty());
        assert!(agent.working_memory().is_empty());
        assert_eq!(agent.symbol_name(agent.predefined().operator), "operator");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = DeciderConfig {
            max_goal_depth: 0,
            ..DeciderConfig::default()
        };
        assert!(matches!(
            AgentContext::new(config),
            Err(DecideError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn constants_are_shared_between_callers() {
        let mut agent = AgentContext::new(DeciderConfig::default()).unwrap();
        let a = agent.make_constant("blue");
        let b = agent.make_constant("blue");
        assert_eq!(a, b);
        agent.release_symbol(a);
        assert!(agent.is_live_symbol(b));
        agent.release_symbol(b);
        assert!(agent.find_constant("blue").is_none());
    }

    #[test]
    fn phases_need_a_top_goal() {
        let mut agent = AgentContext::new(DeciderConfig {
            user_select: UserSelect::First,
            ..DeciderConfig::default()
        })
        .unwrap();
        assert!(matches!(
            agent.run_decision_phase(),
            Err(DecideError::NoTopGoal)
        ));
        assert!(matches!(
            agent.run_working_memory_phase(),
            Err(DecideError::NoTopGoal)
        ));
    }

    #[test]
    fn preview_of_unknown_slot_is_an_error() {
        let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
        let s1 = agent.create_top_goal().unwrap();
        let color = agent.make_constant("color");
        assert!(matches!(
            agent.preview_slot(s1, color),
            Err(DecideError::NoSlot { .. })
        ));
    }
}
