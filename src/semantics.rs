//! Preference semantics: the pure resolution of one slot's preferences into
//! an impasse classification and an ordered candidate list.
//!
//! Resolution runs in strict priority order:
//!
//! 1. require (constraint failure on several distinct values or on a
//!    required-but-prohibited value)
//! 2. acceptable minus reject/prohibit
//! 3. the non-context short-circuit
//! 4. better/worse with bidirectional conflict detection
//! 5. best, then worst
//! 6. indifference (context slots tie here), then parallel
//!
//! Per-value scratch state lives in a map scoped to one invocation, never on
//! the symbols themselves.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::UserSelect;
use crate::impasse::ImpasseType;
use crate::preference::{PreferenceId, PreferenceStore, PreferenceType};
use crate::slot::Slot;
use crate::symbol::SymbolId;

/// Result of resolving one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub impasse: ImpasseType,
    /// One preference per candidate value, in deposit order.
    pub candidates: Vec<PreferenceId>,
}

impl Resolution {
    fn none(candidates: Vec<PreferenceId>) -> Self {
        Self {
            impasse: ImpasseType::None,
            candidates,
        }
    }

    fn impasse(impasse: ImpasseType, candidates: Vec<PreferenceId>) -> Self {
        Self {
            impasse,
            candidates,
        }
    }

    /// Candidate values, in order.
    pub fn values(&self, prefs: &PreferenceStore) -> Vec<SymbolId> {
        self.candidates.iter().map(|&p| prefs.value_of(p)).collect()
    }
}

/// Picks one of several mutually indifferent candidates.
///
/// Injected so interactive selection can be replaced by a deterministic
/// policy. An out-of-range answer falls back to the first candidate.
pub trait IndifferenceResolver {
    fn choose(&mut self, candidates: &[SymbolId]) -> usize;
}

/// Always the first candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstChoice;

impl IndifferenceResolver for FirstChoice {
    fn choose(&mut self, _candidates: &[SymbolId]) -> usize {
        0
    }
}

/// Always the last candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastChoice;

impl IndifferenceResolver for LastChoice {
    fn choose(&mut self, candidates: &[SymbolId]) -> usize {
        candidates.len().saturating_sub(1)
    }
}

/// Replays a fixed sequence of answers, then picks the first candidate.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChoice {
    answers: VecDeque<usize>,
    /// Every candidate list offered so far.
    pub offered: Vec<Vec<SymbolId>>,
}

impl ScriptedChoice {
    pub fn new(answers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            offered: Vec::new(),
        }
    }
}

impl IndifferenceResolver for ScriptedChoice {
    fn choose(&mut self, candidates: &[SymbolId]) -> usize {
        self.offered.push(candidates.to_vec());
        self.answers.pop_front().unwrap_or(0)
    }
}

/// Applies the configured [`UserSelect`] policy, deferring to an injected
/// resolver for `ask`.
pub struct PolicyChoice<'a> {
    pub policy: UserSelect,
    pub rng: &'a mut StdRng,
    pub ask: &'a mut dyn IndifferenceResolver,
}

impl IndifferenceResolver for PolicyChoice<'_> {
    fn choose(&mut self, candidates: &[SymbolId]) -> usize {
        match self.policy {
            UserSelect::First => 0,
            UserSelect::Last => candidates.len().saturating_sub(1),
            UserSelect::Ask => self.ask.choose(candidates),
            UserSelect::Random => self.rng.gen_range(0..candidates.len().max(1)),
        }
    }
}

/// Knobs that change resolution without changing the slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticsOptions {
    /// Return every acceptable candidate of a non-context slot unfiltered.
    pub short_circuit_non_context: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BetterWorseFlag {
    Candidate,
    Conflicted,
    FormerCandidate,
}

/// Resolve `slot`, committing to a single winner among indifferent
/// candidates through `chooser`.
pub fn run_preference_semantics(
    slot: &Slot,
    prefs: &PreferenceStore,
    options: SemanticsOptions,
    chooser: &mut dyn IndifferenceResolver,
) -> Resolution {
    resolve(slot, prefs, options, Some(chooser))
}

/// Resolve `slot` without committing: when every candidate is indifferent,
/// all of them are returned.
pub fn run_preference_semantics_for_consistency_check(
    slot: &Slot,
    prefs: &PreferenceStore,
    options: SemanticsOptions,
) -> Resolution {
    resolve(slot, prefs, options, None)
}

fn resolve(
    slot: &Slot,
    prefs: &PreferenceStore,
    options: SemanticsOptions,
    chooser: Option<&mut dyn IndifferenceResolver>,
) -> Resolution {
    if slot.all_preferences().is_empty() {
        return Resolution::none(Vec::new());
    }

    // Requires.
    let required = slot.preferences(PreferenceType::Require);
    if !required.is_empty() {
        let candidates = first_per_value(required, prefs);
        if candidates.len() > 1 {
            return Resolution::impasse(ImpasseType::ConstraintFailure, candidates);
        }
        let winner = prefs.value_of(candidates[0]);
        let prohibited = slot
            .preferences(PreferenceType::Prohibit)
            .iter()
            .any(|&p| prefs.value_of(p) == winner);
        if prohibited {
            return Resolution::impasse(ImpasseType::ConstraintFailure, candidates);
        }
        return Resolution::none(candidates);
    }

    // Acceptables minus prohibits and rejects.
    let excluded: HashSet<SymbolId> = slot
        .preferences(PreferenceType::Prohibit)
        .iter()
        .chain(slot.preferences(PreferenceType::Reject))
        .map(|&p| prefs.value_of(p))
        .collect();
    let mut candidates: Vec<PreferenceId> =
        first_per_value(slot.preferences(PreferenceType::Acceptable), prefs)
            .into_iter()
            .filter(|&p| !excluded.contains(&prefs.value_of(p)))
            .collect();

    if !slot.isa_context_slot && options.short_circuit_non_context {
        return Resolution::none(candidates);
    }
    if candidates.len() <= 1 {
        return Resolution::none(candidates);
    }

    // Better/worse.
    if slot.has_preferences(PreferenceType::Better) || slot.has_preferences(PreferenceType::Worse) {
        let flags = better_worse_flags(slot, prefs, &candidates);
        let conflicted: Vec<PreferenceId> = candidates
            .iter()
            .copied()
            .filter(|&p| flags.get(&prefs.value_of(p)) == Some(&BetterWorseFlag::Conflicted))
            .collect();
        if !conflicted.is_empty() {
            return Resolution::impasse(ImpasseType::Conflict, conflicted);
        }
        candidates.retain(|&p| flags.get(&prefs.value_of(p)) == Some(&BetterWorseFlag::Candidate));
    }

    // Bests: filter only when some candidate is best.
    let best = values_of(slot.preferences(PreferenceType::Best), prefs);
    if candidates.iter().any(|&p| best.contains(&prefs.value_of(p))) {
        candidates.retain(|&p| best.contains(&prefs.value_of(p)));
    }

    // Worsts: filter unless that would leave nothing.
    let worst = values_of(slot.preferences(PreferenceType::Worst), prefs);
    if candidates.iter().any(|&p| !worst.contains(&prefs.value_of(p))) {
        candidates.retain(|&p| !worst.contains(&prefs.value_of(p)));
    }

    if candidates.len() <= 1 {
        return Resolution::none(candidates);
    }

    // Indifferents.
    if mutually_related(
        slot,
        prefs,
        &candidates,
        PreferenceType::UnaryIndifferent,
        PreferenceType::BinaryIndifferent,
    ) {
        let Some(chooser) = chooser else {
            return Resolution::none(candidates);
        };
        let values: Vec<SymbolId> = candidates.iter().map(|&p| prefs.value_of(p)).collect();
        let mut index = chooser.choose(&values);
        if index >= candidates.len() {
            tracing::warn!(
                index,
                candidates = candidates.len(),
                "indifferent selection out of range, using the first candidate"
            );
            index = 0;
        }
        return Resolution::none(vec![candidates[index]]);
    }

    if slot.isa_context_slot {
        return Resolution::impasse(ImpasseType::Tie, candidates);
    }

    // Parallels.
    if mutually_related(
        slot,
        prefs,
        &candidates,
        PreferenceType::UnaryParallel,
        PreferenceType::BinaryParallel,
    ) {
        return Resolution::none(candidates);
    }
    Resolution::impasse(ImpasseType::Tie, candidates)
}

/// First preference per distinct value, preserving deposit order.
fn first_per_value(list: &[PreferenceId], prefs: &PreferenceStore) -> Vec<PreferenceId> {
    let mut seen = HashSet::with_capacity(list.len());
    list.iter()
        .copied()
        .filter(|&p| seen.insert(prefs.value_of(p)))
        .collect()
}

fn values_of(list: &[PreferenceId], prefs: &PreferenceStore) -> HashSet<SymbolId> {
    list.iter().map(|&p| prefs.value_of(p)).collect()
}

fn pairs(list: &[PreferenceId], prefs: &PreferenceStore) -> Vec<(SymbolId, SymbolId)> {
    list.iter()
        .filter_map(|&p| {
            let pref = prefs.pref(p);
            pref.referent.map(|r| (pref.value, r))
        })
        .collect()
}

/// Mark dominated candidates as former candidates, and mark both sides of
/// every contradictory better/worse pair as conflicted. A value absent from
/// the map was never a candidate.
fn better_worse_flags(
    slot: &Slot,
    prefs: &PreferenceStore,
    candidates: &[PreferenceId],
) -> HashMap<SymbolId, BetterWorseFlag> {
    use BetterWorseFlag::*;

    let better = pairs(slot.preferences(PreferenceType::Better), prefs);
    let worse = pairs(slot.preferences(PreferenceType::Worse), prefs);
    let mut flags: HashMap<SymbolId, BetterWorseFlag> = candidates
        .iter()
        .map(|&p| (prefs.value_of(p), Candidate))
        .collect();

    // j > k: k is dominated; (k > j) or (j < k) contradicts it.
    for &(j, k) in &better {
        if j == k || !flags.contains_key(&j) || !flags.contains_key(&k) {
            continue;
        }
        if flags[&k] != Conflicted {
            flags.insert(k, FormerCandidate);
        }
        if flags[&j] != Conflicted || flags[&k] != Conflicted {
            let contradicted = better.iter().any(|&(v, r)| v == k && r == j)
                || worse.iter().any(|&(v, r)| v == j && r == k);
            if contradicted {
                flags.insert(j, Conflicted);
                flags.insert(k, Conflicted);
            }
        }
    }

    // j < k: j is dominated; (j > k) or (k < j) contradicts it.
    for &(j, k) in &worse {
        if j == k || !flags.contains_key(&j) || !flags.contains_key(&k) {
            continue;
        }
        if flags[&j] != Conflicted {
            flags.insert(j, FormerCandidate);
        }
        if flags[&j] != Conflicted || flags[&k] != Conflicted {
            let contradicted = better.iter().any(|&(v, r)| v == j && r == k)
                || worse.iter().any(|&(v, r)| v == k && r == j);
            if contradicted {
                flags.insert(j, Conflicted);
                flags.insert(k, Conflicted);
            }
        }
    }
    flags
}

/// Every pair of candidates not covered by a unary preference of kind
/// `unary` must be linked, in either direction, by a `binary` preference.
fn mutually_related(
    slot: &Slot,
    prefs: &PreferenceStore,
    candidates: &[PreferenceId],
    unary: PreferenceType,
    binary: PreferenceType,
) -> bool {
    let unary_values = values_of(slot.preferences(unary), prefs);
    let links = pairs(slot.preferences(binary), prefs);
    let values: Vec<SymbolId> = candidates
        .iter()
        .map(|&p| prefs.value_of(p))
        .filter(|v| !unary_values.contains(v))
        .collect();
    values.iter().enumerate().all(|(i, &a)| {
        values[i + 1..]
            .iter()
            .all(|&b| links.iter().any(|&(v, r)| (v == a && r == b) || (v == b && r == a)))
    })
}
