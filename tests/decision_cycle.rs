//! End-to-end tests for preference resolution and the decision cycle.
//!
//! These drive the decider only through its public API: preferences are
//! deposited as instantiations, phases are run, and the goal stack, working
//! memory and impasses are inspected afterwards.

use akh_decide::agent::AgentContext;
use akh_decide::config::{DeciderConfig, UserSelect};
use akh_decide::impasse::ImpasseType;
use akh_decide::instantiation::{InstantiationId, InstantiationSpec, PreferenceSpec};
use akh_decide::preference::PreferenceType;
use akh_decide::semantics::ScriptedChoice;
use akh_decide::symbol::SymbolId;

fn agent(config: DeciderConfig) -> (AgentContext, SymbolId) {
    let mut agent = AgentContext::new(config).unwrap();
    let s1 = agent.create_top_goal().unwrap();
    (agent, s1)
}

fn deposit(
    agent: &mut AgentContext,
    goal: SymbolId,
    prefs: Vec<PreferenceSpec>,
) -> InstantiationId {
    let spec = prefs
        .into_iter()
        .fold(InstantiationSpec::new("test", goal), |spec, p| spec.with_preference(p));
    agent.add_instantiation(spec).unwrap()
}

fn values(agent: &AgentContext, goal: SymbolId, attr: SymbolId) -> (ImpasseType, Vec<SymbolId>) {
    let resolution = agent.preview_slot(goal, attr).unwrap();
    let values = resolution
        .candidates
        .iter()
        .map(|&p| agent.preference(p).unwrap().value)
        .collect();
    (resolution.impasse, values)
}

#[test]
fn better_preference_selects_the_dominant_value() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
            PreferenceSpec::binary(PreferenceType::Better, s1, op, a, b),
        ],
    );
    assert_eq!(values(&agent, s1, op), (ImpasseType::None, vec![a]));
}

#[test]
fn unrelated_acceptables_tie_on_both_slot_kinds() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let color = agent.make_constant("color");
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
            PreferenceSpec::acceptable(s1, color, a),
            PreferenceSpec::acceptable(s1, color, b),
        ],
    );
    assert_eq!(values(&agent, s1, op), (ImpasseType::Tie, vec![a, b]));
    assert_eq!(values(&agent, s1, color), (ImpasseType::Tie, vec![a, b]));
}

#[test]
fn distinct_requires_are_a_constraint_failure() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::unary(PreferenceType::Require, s1, op, a),
            PreferenceSpec::unary(PreferenceType::Require, s1, op, b),
        ],
    );
    assert_eq!(
        values(&agent, s1, op),
        (ImpasseType::ConstraintFailure, vec![a, b])
    );
}

#[test]
fn contradictory_better_preferences_conflict_without_bystanders() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    let c = agent.make_constant("C");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
            PreferenceSpec::acceptable(s1, op, c),
            PreferenceSpec::binary(PreferenceType::Better, s1, op, a, b),
            PreferenceSpec::binary(PreferenceType::Better, s1, op, b, a),
        ],
    );
    assert_eq!(values(&agent, s1, op), (ImpasseType::Conflict, vec![a, b]));

    agent.run_decision_phase().unwrap();
    let impasse = agent.impasse_below(s1).unwrap();
    assert_eq!(impasse.kind, ImpasseType::Conflict);
    assert_eq!(impasse.items, vec!["A", "B"]);
}

#[test]
fn ask_policy_consults_the_installed_resolver() {
    let (mut agent, s1) = agent(DeciderConfig {
        user_select: UserSelect::Ask,
        ..DeciderConfig::deterministic()
    });
    agent.set_indifference_resolver(Box::new(ScriptedChoice::new([1])));
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
            PreferenceSpec::unary(PreferenceType::UnaryIndifferent, s1, op, a),
            PreferenceSpec::unary(PreferenceType::UnaryIndifferent, s1, op, b),
        ],
    );
    assert_eq!(values(&agent, s1, op), (ImpasseType::None, vec![a, b]));

    agent.run_decision_phase().unwrap();
    assert_eq!(agent.operator_of(s1), Some(b));
}

#[test]
fn seeded_random_selection_is_reproducible() {
    let pick = || {
        let (mut agent, s1) = agent(DeciderConfig {
            user_select: UserSelect::Random,
            random_seed: Some(42),
            ..DeciderConfig::deterministic()
        });
        let op = agent.predefined().operator;
        let mut prefs = Vec::new();
        for name in ["A", "B", "C", "D"] {
            let v = agent.make_constant(name);
            prefs.push(PreferenceSpec::acceptable(s1, op, v));
            prefs.push(PreferenceSpec::unary(PreferenceType::UnaryIndifferent, s1, op, v));
        }
        deposit(&mut agent, s1, prefs);
        agent.run_decision_phase().unwrap();
        let chosen = agent.operator_of(s1).unwrap();
        agent.symbol_name(chosen)
    };
    assert_eq!(pick(), pick());
}

#[test]
fn acceptable_preference_wmes_track_proposals() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    let first = deposit(&mut agent, s1, vec![PreferenceSpec::acceptable(s1, op, a)]);
    deposit(&mut agent, s1, vec![PreferenceSpec::acceptable(s1, op, b)]);
    agent.flush_buffered_changes();
    assert_eq!(agent.acceptable_preference_values(s1, op), vec![a, b]);
    let plus: Vec<_> = agent
        .working_memory()
        .into_iter()
        .filter(|w| w.acceptable)
        .map(|w| w.value)
        .collect();
    assert_eq!(plus, vec!["A", "B"]);

    agent.retract_instantiation(first).unwrap();
    agent.flush_buffered_changes();
    assert_eq!(agent.acceptable_preference_values(s1, op), vec![b]);
}

#[test]
fn redeciding_without_preference_changes_is_idempotent() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let color = agent.make_constant("color");
    let red = agent.make_constant("red");
    let green = agent.make_constant("green");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, color, red),
            PreferenceSpec::acceptable(s1, color, green),
            PreferenceSpec::unary(PreferenceType::UnaryParallel, s1, color, red),
            PreferenceSpec::unary(PreferenceType::UnaryParallel, s1, color, green),
        ],
    );
    agent.run_working_memory_phase().unwrap();
    assert_eq!(agent.slot_values(s1, color), vec![red, green]);
    let before = agent.working_memory();

    // A duplicate proposal re-marks the slot without changing its outcome.
    deposit(&mut agent, s1, vec![PreferenceSpec::acceptable(s1, color, red)]);
    agent.run_working_memory_phase().unwrap();
    assert!(agent.last_wm_changes().is_empty());
    agent.run_working_memory_phase().unwrap();
    assert_eq!(agent.working_memory(), before);
}

#[test]
fn tie_items_follow_new_proposals() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    let c = agent.make_constant("C");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
        ],
    );
    agent.run_decision_phase().unwrap();
    let s2 = agent.bottom_goal().unwrap();

    deposit(&mut agent, s1, vec![PreferenceSpec::acceptable(s1, op, c)]);
    agent.run_decision_phase().unwrap();

    // Same impasse, refreshed items; the sub-goal then decides on its own.
    assert_eq!(agent.goal_stack()[1], s2);
    assert_eq!(agent.impasse_below(s1).unwrap().items, vec!["A", "B", "C"]);
}

#[test]
fn removing_a_gds_wme_truncates_the_goal_stack() {
    let (mut agent, s1) = agent(DeciderConfig {
        user_select: UserSelect::First,
        ..DeciderConfig::default()
    });
    let op = agent.predefined().operator;
    let sensor = agent.make_constant("sensor");
    let on = agent.make_constant("on");
    let input = agent.add_input_wme(s1, sensor, on).unwrap();

    // S1: tie -> S2; S2: state no-change -> S3.
    let a = agent.make_constant("A");
    let b = agent.make_constant("B");
    deposit(
        &mut agent,
        s1,
        vec![
            PreferenceSpec::acceptable(s1, op, a),
            PreferenceSpec::acceptable(s1, op, b),
        ],
    );
    agent.run_decision_phase().unwrap();
    agent.run_decision_phase().unwrap();
    let stack = agent.goal_stack();
    assert_eq!(stack.len(), 3);
    let s2 = stack[1];

    let note = agent.make_constant("note");
    let seen = agent.make_constant("seen");
    agent
        .add_instantiation(
            InstantiationSpec::new("remember", s2)
                .with_condition(input)
                .with_preference(PreferenceSpec::acceptable(s2, note, seen).o_supported()),
        )
        .unwrap();
    agent.run_working_memory_phase().unwrap();
    assert_eq!(agent.gds_of(s2), vec![input]);

    agent.remove_input_wme(input).unwrap();
    agent.run_working_memory_phase().unwrap();
    assert_eq!(agent.goal_stack(), vec![s1]);
    assert!(agent.gds_of(s2).is_empty());
    assert_eq!(agent.stats().gds_retractions, 1);
}

#[test]
fn phase_counters_accumulate() {
    let (mut agent, s1) = agent(DeciderConfig::deterministic());
    let op = agent.predefined().operator;
    let a = agent.make_constant("A");
    deposit(&mut agent, s1, vec![PreferenceSpec::acceptable(s1, op, a)]);
    agent.run_cycles(3).unwrap();
    let stats = agent.stats();
    assert_eq!(stats.decision_cycles, 3);
    assert_eq!(stats.working_memory_phases, 3);
    assert_eq!(agent.operator_of(s1), Some(a));
    // Cycles two and three stack operator and state no-changes.
    assert_eq!(agent.goal_stack().len(), 3);
}
