// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-decide
//!
//! A preference-resolution decider for a Soar-style cognitive architecture:
//! it turns competing preferences about slot values into working-memory
//! changes, raises impasse sub-goals for ties, conflicts, constraint failures
//! and no-changes, and keeps goal-stack ownership of identifiers consistent
//! through promotion, demotion and garbage collection.
//!
//! ## Architecture
//!
//! - **Symbols** (`symbol`): interned, reference-counted constants and identifiers
//! - **Memories** (`wme`, `preference`, `slot`, `instantiation`): arena stores keyed by handles
//! - **Semantics** (`semantics`): the preference resolution function and its consistency variant
//! - **Decider** (`decider`, `impasse`): context and non-context decisions, the goal stack
//! - **Ownership** (`ownership`): link counts, promotion, mark-and-walk demotion, GC
//! - **Dependencies** (`gds`): goal dependency sets that retract invalidated sub-goals
//!
//! ## Library usage
//!
//! ```no_run
//! use akh_decide::agent::AgentContext;
//! use akh_decide::config::DeciderConfig;
//! use akh_decide::instantiation::{InstantiationSpec, PreferenceSpec};
//!
//! let mut agent = AgentContext::new(DeciderConfig::deterministic()).unwrap();
//! let s1 = agent.create_top_goal().unwrap();
//! let operator = agent.predefined().operator;
//! let o1 = agent.make_identifier('O', 1);
//! agent
//!     .add_instantiation(
//!         InstantiationSpec::new("propose", s1)
//!             .with_preference(PreferenceSpec::acceptable(s1, operator, o1)),
//!     )
//!     .unwrap();
//! agent.run_decision_phase().unwrap();
//! assert_eq!(agent.operator_of(s1), Some(o1));
//! ```

pub mod agent;
pub mod config;
pub mod decider;
pub mod error;
pub mod gds;
pub mod handle;
pub mod impasse;
pub mod instantiation;
pub mod ownership;
pub mod preference;
pub mod scenario;
pub mod semantics;
pub mod slot;
pub mod stats;
pub mod symbol;
pub mod wme;
