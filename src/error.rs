//! Rich diagnostic error types for the akh-decide engine.
//!
//! Recoverable failures (bad handles, bad configuration, malformed scenarios)
//! are [`DecideError`] values carrying miette diagnostic codes and help text.
//! Violations of the decider's own structural invariants are not recoverable:
//! they are reported through [`fatal`], which logs and aborts.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the decider.
#[derive(Debug, Error, Diagnostic)]
pub enum DecideError {
    #[error("unknown symbol: {symbol_id}")]
    #[diagnostic(
        code(akh::decide::unknown_symbol),
        help(
            "The symbol handle does not refer to a live symbol. It may have been \
             garbage collected after its last reference was released."
        )
    )]
    UnknownSymbol { symbol_id: u64 },

    #[error("symbol {symbol} is not an identifier")]
    #[diagnostic(
        code(akh::decide::not_identifier),
        help(
            "Slots, WMEs and preferences must be rooted at an identifier. \
             Create one with `AgentContext::make_identifier` first."
        )
    )]
    NotIdentifier { symbol: String },

    #[error("unknown WME: timetag {timetag}")]
    #[diagnostic(
        code(akh::decide::unknown_wme),
        help("The WME has been removed from working memory and deallocated.")
    )]
    UnknownWme { timetag: u64 },

    #[error("unknown preference: {preference_id}")]
    #[diagnostic(
        code(akh::decide::unknown_preference),
        help("The preference was already removed from preference memory.")
    )]
    UnknownPreference { preference_id: u64 },

    #[error("unknown instantiation: {instantiation_id}")]
    #[diagnostic(
        code(akh::decide::unknown_instantiation),
        help("The instantiation was already retracted and all of its preferences released.")
    )]
    UnknownInstantiation { instantiation_id: u64 },

    #[error("no slot for ({id} ^{attr})")]
    #[diagnostic(
        code(akh::decide::no_slot),
        help("No preference has ever been deposited for this identifier/attribute pair.")
    )]
    NoSlot { id: String, attr: String },

    #[error("{kind} preference for ({id} ^{attr} {value}) has no referent")]
    #[diagnostic(
        code(akh::decide::missing_referent),
        help("Binary preferences (better, worse, binary indifferent, binary parallel) need a referent value.")
    )]
    MissingReferent {
        kind: String,
        id: String,
        attr: String,
        value: String,
    },

    #[error("{symbol} is not a goal on the current goal stack")]
    #[diagnostic(
        code(akh::decide::not_a_goal),
        help(
            "Instantiations must name a match goal that is still on the goal stack. \
             List the stack with `AgentContext::goal_stack`."
        )
    )]
    NotAGoal { symbol: String },

    #[error("no top goal: the goal stack is empty")]
    #[diagnostic(
        code(akh::decide::no_top_goal),
        help("Call `AgentContext::create_top_goal` (or `reinitialize`) before running decision phases.")
    )]
    NoTopGoal,

    #[error("a top goal already exists: {goal}")]
    #[diagnostic(
        code(akh::decide::top_goal_exists),
        help("Clear the goal stack with `clear_goal_stack` before creating a new top goal.")
    )]
    TopGoalExists { goal: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(akh::decide::invalid_config), help("Check the DeciderConfig fields. {message}"))]
    InvalidConfig { message: String },

    #[error("failed to read {path}")]
    #[diagnostic(
        code(akh::decide::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    #[diagnostic(
        code(akh::decide::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(akh::decide::parse),
        help("Check the TOML syntax of the file.")
    )]
    Parse { path: String, message: String },

    #[error("scenario error: {message}")]
    #[diagnostic(
        code(akh::decide::scenario),
        help("Every preference in a scenario must name a valid kind and, for binary kinds, a referent.")
    )]
    Scenario { message: String },
}

/// Convenience alias for functions returning decider results.
pub type DecideResult<T> = std::result::Result<T, DecideError>;

/// A broken structural invariant of the decider itself.
///
/// These indicate a bug in the engine: goal-stack and ownership state can no
/// longer be trusted, so the only response is [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("tried to promote goal or impasse identifier {id}")]
    PromotedGoalOrImpasse { id: String },

    #[error("goal {goal} has a sub-goal without an ^{attr} WME")]
    MalformedImpasse { goal: String, attr: &'static str },

    #[error("sub-goal below {goal} has an unrecognised impasse value {value}")]
    BadImpasseValue { goal: String, value: String },

    #[error("reference count underflow on {what}")]
    RefcountUnderflow { what: String },

    #[error("dangling {what} handle {raw}")]
    DanglingHandle { what: &'static str, raw: u64 },

    #[error("goal dependency set for {goal} assumes level {expected}, found {actual}")]
    GdsLevel {
        goal: String,
        expected: u32,
        actual: u32,
    },
}

/// Abort on a structural invariant violation.
///
/// Logs the violation at error level and panics. Never returns.
#[track_caller]
pub fn fatal(violation: InvariantViolation) -> ! {
    tracing::error!(%violation, "internal decider error, aborting");
    panic!("internal decider error: {violation}");
}
