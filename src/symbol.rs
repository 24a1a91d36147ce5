//! Interned, reference-counted symbols and identifier metadata.
//!
//! Constants (symbolic, integer, float) are interned: making the same constant
//! twice yields the same [`SymbolId`] with its reference count bumped.
//! Identifiers are never interned; each carries [`IdentifierData`] with the
//! goal-stack level bookkeeping the ownership tracker maintains.
//!
//! Reference counts are explicit. Every holder (WME, preference, slot, goal
//! stack entry, ownership work list, caller) adds one reference and releases it
//! with [`SymbolTable::remove_ref`]; the symbol is deallocated when the count
//! reaches zero.

use std::collections::HashMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::{DecideError, DecideResult, InvariantViolation, fatal};
use crate::gds::GdsId;
use crate::preference::PreferenceId;
use crate::slot::SlotId;
use crate::wme::WmeId;

/// Depth on the goal stack. The top goal sits at level 1; deeper goals have
/// numerically larger levels.
pub type GoalLevel = u32;

pub const TOP_GOAL_LEVEL: GoalLevel = 1;
/// Level given to attribute impasse identifiers: below every real goal.
pub const ATTRIBUTE_IMPASSE_LEVEL: GoalLevel = 32_767;
pub const LOWEST_POSSIBLE_GOAL_LEVEL: GoalLevel = GoalLevel::MAX;

/// Unique, niche-optimized identifier for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Create a `SymbolId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// Which of the four symbol kinds a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Identifier,
    SymConstant,
    IntConstant,
    FloatConstant,
}

/// Which ownership work list an identifier currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    /// Level is known.
    Known,
    /// Queued for the mark-and-walk pass.
    Unknown,
    /// Queued for garbage collection.
    Disconnected,
}

/// Goal-stack links and per-goal bookkeeping, present while an identifier is a goal.
#[derive(Debug, Clone)]
pub struct GoalData {
    pub higher_goal: Option<SymbolId>,
    pub lower_goal: Option<SymbolId>,
    pub operator_slot: SlotId,
    pub gds: Option<GdsId>,
    /// Preferences produced by instantiations that matched at this goal.
    pub preferences_from_goal: Vec<PreferenceId>,
}

/// Identifier-only metadata.
#[derive(Debug, Clone)]
pub struct IdentifierData {
    pub letter: char,
    pub number: u64,
    pub level: GoalLevel,
    pub promotion_level: GoalLevel,
    /// Inbound links, excluding links onto goals and impasses.
    pub link_count: u32,
    pub could_be_a_link_from_below: bool,
    pub level_state: LevelState,
    pub tc_num: u64,
    pub slots: Vec<SlotId>,
    pub input_wmes: Vec<WmeId>,
    pub impasse_wmes: Vec<WmeId>,
    pub isa_goal: bool,
    /// Set once a goal is removed; links added while it was a goal were never counted.
    pub former_goal: bool,
    pub isa_impasse: bool,
    pub goal: Option<GoalData>,
}

impl IdentifierData {
    fn new(letter: char, number: u64, level: GoalLevel) -> Self {
        Self {
            letter,
            number,
            level,
            promotion_level: level,
            link_count: 0,
            could_be_a_link_from_below: false,
            level_state: LevelState::Known,
            tc_num: 0,
            slots: Vec::new(),
            input_wmes: Vec::new(),
            impasse_wmes: Vec::new(),
            isa_goal: false,
            former_goal: false,
            isa_impasse: false,
            goal: None,
        }
    }
}

/// The value a symbol stands for.
#[derive(Debug, Clone)]
pub enum SymbolValue {
    Identifier(IdentifierData),
    SymConstant(String),
    IntConstant(i64),
    FloatConstant(f64),
}

impl SymbolValue {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Self::Identifier(_) => SymbolKind::Identifier,
            Self::SymConstant(_) => SymbolKind::SymConstant,
            Self::IntConstant(_) => SymbolKind::IntConstant,
            Self::FloatConstant(_) => SymbolKind::FloatConstant,
        }
    }
}

impl std::fmt::Display for SymbolValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier(data) => write!(f, "{}{}", data.letter, data.number),
            Self::SymConstant(name) => write!(f, "{name}"),
            Self::IntConstant(n) => write!(f, "{n}"),
            Self::FloatConstant(x) => write!(f, "{x}"),
        }
    }
}

/// A live symbol table entry.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub value: SymbolValue,
    reference_count: u32,
}

impl Symbol {
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Sym(String),
    Int(i64),
    Float(u64),
}

/// Owner of every live symbol.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<SymbolId, Symbol>,
    interned: HashMap<InternKey, SymbolId>,
    id_counters: HashMap<char, u64>,
    next: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            next: 1,
            ..Default::default()
        }
    }

    fn allocate(&mut self, value: SymbolValue) -> SymbolId {
        let raw = NonZeroU64::new(self.next).unwrap_or(NonZeroU64::MIN);
        self.next += 1;
        let id = SymbolId(raw);
        self.symbols.insert(
            id,
            Symbol {
                value,
                reference_count: 1,
            },
        );
        id
    }

    fn intern(&mut self, key: InternKey, value: impl FnOnce() -> SymbolValue) -> SymbolId {
        if let Some(&id) = self.interned.get(&key) {
            self.add_ref(id);
            return id;
        }
        let id = self.allocate(value());
        self.interned.insert(key, id);
        id
    }

    /// Make (or re-reference) a symbolic constant. The caller owns one reference.
    pub fn make_sym_constant(&mut self, name: &str) -> SymbolId {
        self.intern(InternKey::Sym(name.to_string()), || {
            SymbolValue::SymConstant(name.to_string())
        })
    }

    pub fn make_int_constant(&mut self, value: i64) -> SymbolId {
        self.intern(InternKey::Int(value), || SymbolValue::IntConstant(value))
    }

    pub fn make_float_constant(&mut self, value: f64) -> SymbolId {
        self.intern(InternKey::Float(value.to_bits()), || {
            SymbolValue::FloatConstant(value)
        })
    }

    /// Make a fresh identifier at `level`. The caller owns one reference.
    pub fn make_identifier(&mut self, letter: char, level: GoalLevel) -> SymbolId {
        let letter = letter.to_ascii_uppercase();
        let counter = self.id_counters.entry(letter).or_insert(0);
        *counter += 1;
        let number = *counter;
        self.allocate(SymbolValue::Identifier(IdentifierData::new(
            letter, number, level,
        )))
    }

    /// Look up a symbolic constant without taking a reference.
    pub fn find_sym_constant(&self, name: &str) -> Option<SymbolId> {
        self.interned.get(&InternKey::Sym(name.to_string())).copied()
    }

    /// Look up an identifier by its printed name (e.g. `S1`) without taking a reference.
    pub fn find_identifier(&self, name: &str) -> Option<SymbolId> {
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let number: u64 = chars.as_str().parse().ok()?;
        self.symbols.iter().find_map(|(&id, sym)| match &sym.value {
            SymbolValue::Identifier(data) if data.letter == letter && data.number == number => {
                Some(id)
            }
            _ => None,
        })
    }

    pub fn add_ref(&mut self, id: SymbolId) {
        match self.symbols.get_mut(&id) {
            Some(sym) => sym.reference_count += 1,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "symbol",
                raw: id.get(),
            }),
        }
    }

    /// Release one reference. Returns `true` if the symbol was deallocated.
    pub fn remove_ref(&mut self, id: SymbolId) -> bool {
        let Some(sym) = self.symbols.get_mut(&id) else {
            fatal(InvariantViolation::DanglingHandle {
                what: "symbol",
                raw: id.get(),
            });
        };
        if sym.reference_count == 0 {
            fatal(InvariantViolation::RefcountUnderflow {
                what: format!("symbol {}", sym.value),
            });
        }
        sym.reference_count -= 1;
        if sym.reference_count > 0 {
            return false;
        }
        if let Some(sym) = self.symbols.remove(&id) {
            match sym.value {
                SymbolValue::SymConstant(name) => {
                    self.interned.remove(&InternKey::Sym(name));
                }
                SymbolValue::IntConstant(n) => {
                    self.interned.remove(&InternKey::Int(n));
                }
                SymbolValue::FloatConstant(x) => {
                    self.interned.remove(&InternKey::Float(x.to_bits()));
                }
                SymbolValue::Identifier(_) => {
                    tracing::trace!(symbol = id.get(), "identifier deallocated");
                }
            }
        }
        true
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(&id)
    }

    pub fn contains(&self, id: SymbolId) -> bool {
        self.symbols.contains_key(&id)
    }

    /// Check that `id` is live, returning a recoverable error otherwise.
    pub fn check(&self, id: SymbolId) -> DecideResult<&Symbol> {
        self.symbols.get(&id).ok_or(DecideError::UnknownSymbol {
            symbol_id: id.get(),
        })
    }

    /// Check that `id` is a live identifier, returning a recoverable error otherwise.
    pub fn check_identifier(&self, id: SymbolId) -> DecideResult<&IdentifierData> {
        match &self.check(id)?.value {
            SymbolValue::Identifier(data) => Ok(data),
            other => Err(DecideError::NotIdentifier {
                symbol: other.to_string(),
            }),
        }
    }

    pub fn is_identifier(&self, id: SymbolId) -> bool {
        matches!(
            self.symbols.get(&id).map(|s| &s.value),
            Some(SymbolValue::Identifier(_))
        )
    }

    pub fn ident(&self, id: SymbolId) -> Option<&IdentifierData> {
        match self.symbols.get(&id).map(|s| &s.value) {
            Some(SymbolValue::Identifier(data)) => Some(data),
            _ => None,
        }
    }

    pub fn ident_mut(&mut self, id: SymbolId) -> Option<&mut IdentifierData> {
        match self.symbols.get_mut(&id).map(|s| &mut s.value) {
            Some(SymbolValue::Identifier(data)) => Some(data),
            _ => None,
        }
    }

    /// Identifier data for a handle the decider itself holds. Aborts if dangling.
    pub(crate) fn id_data(&self, id: SymbolId) -> &IdentifierData {
        self.ident(id).unwrap_or_else(|| {
            fatal(InvariantViolation::DanglingHandle {
                what: "identifier",
                raw: id.get(),
            })
        })
    }

    pub(crate) fn id_data_mut(&mut self, id: SymbolId) -> &mut IdentifierData {
        match self.ident_mut(id) {
            Some(data) => data,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "identifier",
                raw: id.get(),
            }),
        }
    }

    /// Goal data for a handle known to be a goal. Aborts otherwise.
    pub(crate) fn goal_data(&self, goal: SymbolId) -> &GoalData {
        self.id_data(goal).goal.as_ref().unwrap_or_else(|| {
            fatal(InvariantViolation::DanglingHandle {
                what: "goal",
                raw: goal.get(),
            })
        })
    }

    pub(crate) fn goal_data_mut(&mut self, goal: SymbolId) -> &mut GoalData {
        match self.id_data_mut(goal).goal.as_mut() {
            Some(data) => data,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "goal",
                raw: goal.get(),
            }),
        }
    }

    /// Printable form of a symbol, or `#<dead>` for a dangling handle.
    pub fn display(&self, id: SymbolId) -> String {
        self.symbols
            .get(&id)
            .map(|s| s.value.to_string())
            .unwrap_or_else(|| format!("#<dead {}>", id.get()))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All live identifiers, in allocation order.
    pub fn identifiers(&self) -> Vec<SymbolId> {
        let mut ids: Vec<SymbolId> = self
            .symbols
            .iter()
            .filter(|(_, s)| matches!(s.value, SymbolValue::Identifier(_)))
            .map(|(&id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Restart identifier numbering. Only meaningful once no identifiers remain.
    pub fn reset_id_counters(&mut self) {
        let live: Vec<(char, u64)> = self
            .symbols
            .values()
            .filter_map(|s| match &s.value {
                SymbolValue::Identifier(d) => Some((d.letter, d.number)),
                _ => None,
            })
            .collect();
        self.id_counters.clear();
        for (letter, number) in live {
            let counter = self.id_counters.entry(letter).or_insert(0);
            *counter = (*counter).max(number);
        }
    }
}

/// Architecture symbols the decider itself asserts. Held for the agent's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct PredefinedSymbols {
    pub operator: SymbolId,
    pub state: SymbolId,
    pub superstate: SymbolId,
    pub type_: SymbolId,
    pub attribute: SymbolId,
    pub object: SymbolId,
    pub impasse: SymbolId,
    pub choices: SymbolId,
    pub multiple: SymbolId,
    pub none: SymbolId,
    pub item: SymbolId,
    pub quiescence: SymbolId,
    pub t: SymbolId,
    pub nil: SymbolId,
    pub tie: SymbolId,
    pub conflict: SymbolId,
    pub constraint_failure: SymbolId,
    pub no_change: SymbolId,
}

impl PredefinedSymbols {
    pub fn intern(table: &mut SymbolTable) -> Self {
        Self {
            operator: table.make_sym_constant("operator"),
            state: table.make_sym_constant("state"),
            superstate: table.make_sym_constant("superstate"),
            type_: table.make_sym_constant("type"),
            attribute: table.make_sym_constant("attribute"),
            object: table.make_sym_constant("object"),
            impasse: table.make_sym_constant("impasse"),
            choices: table.make_sym_constant("choices"),
            multiple: table.make_sym_constant("multiple"),
            none: table.make_sym_constant("none"),
            item: table.make_sym_constant("item"),
            quiescence: table.make_sym_constant("quiescence"),
            t: table.make_sym_constant("t"),
            nil: table.make_sym_constant("nil"),
            tie: table.make_sym_constant("tie"),
            conflict: table.make_sym_constant("conflict"),
            constraint_failure: table.make_sym_constant("constraint-failure"),
            no_change: table.make_sym_constant("no-change"),
        }
    }
}
