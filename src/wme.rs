//! Working-memory elements.
//!
//! A WME is an `(id ^attr value [+])` fact. Its handle doubles as its timetag.
//! WMEs are reference counted: working memory holds one reference while the
//! WME is installed, and every instantiation condition that matched it holds
//! another, so backtracing through a retracted WME stays valid.

use std::collections::HashSet;

use serde::Serialize;

use crate::agent::AgentContext;
use crate::error::{DecideError, DecideResult, InvariantViolation, fatal};
use crate::gds::GdsId;
use crate::handle::{Arena, handle_type};
use crate::preference::PreferenceId;
use crate::symbol::SymbolId;

handle_type!(
    /// Handle (and timetag) of a working-memory element.
    WmeId,
    "w"
);

/// A working-memory element.
#[derive(Debug, Clone)]
pub struct Wme {
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Set on acceptable-preference WMEs (`+`).
    pub acceptable: bool,
    /// The preference that justifies this WME; `None` for architectural WMEs.
    pub preference: Option<PreferenceId>,
    /// The goal dependency set this WME currently belongs to.
    pub gds: Option<GdsId>,
    /// Installed in working memory (added and not yet removed).
    pub in_wm: bool,
    reference_count: u32,
}

impl Wme {
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }
}

/// A WME as seen by consumers outside the decider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WmeTriple {
    pub timetag: u64,
    pub id: String,
    pub attr: String,
    pub value: String,
    pub acceptable: bool,
}

impl std::fmt::Display for WmeTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}: {} ^{} {}", self.timetag, self.id, self.attr, self.value)?;
        if self.acceptable {
            write!(f, " +")?;
        }
        write!(f, ")")
    }
}

/// Owner of every allocated WME.
#[derive(Debug, Default)]
pub struct WmeStore {
    arena: Arena<WmeId, Wme>,
}

impl WmeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a WME with a zero reference count. The caller is responsible
    /// for the symbol references it holds.
    pub fn make(&mut self, id: SymbolId, attr: SymbolId, value: SymbolId, acceptable: bool) -> WmeId {
        self.arena.insert(Wme {
            id,
            attr,
            value,
            acceptable,
            preference: None,
            gds: None,
            in_wm: false,
            reference_count: 0,
        })
    }

    pub fn get(&self, w: WmeId) -> Option<&Wme> {
        self.arena.get(w)
    }

    pub fn get_mut(&mut self, w: WmeId) -> Option<&mut Wme> {
        self.arena.get_mut(w)
    }

    /// Access a WME the decider itself holds. Aborts if dangling.
    pub(crate) fn wme(&self, w: WmeId) -> &Wme {
        self.arena.get(w).unwrap_or_else(|| {
            fatal(InvariantViolation::DanglingHandle {
                what: "wme",
                raw: w.get(),
            })
        })
    }

    pub(crate) fn wme_mut(&mut self, w: WmeId) -> &mut Wme {
        match self.arena.get_mut(w) {
            Some(wme) => wme,
            None => fatal(InvariantViolation::DanglingHandle {
                what: "wme",
                raw: w.get(),
            }),
        }
    }

    pub fn add_ref(&mut self, w: WmeId) {
        self.wme_mut(w).reference_count += 1;
    }

    /// Release one reference. Returns the WME if this was the last one; the
    /// caller must then release everything the WME referenced.
    pub fn remove_ref(&mut self, w: WmeId) -> Option<Wme> {
        let wme = self.wme_mut(w);
        if wme.reference_count == 0 {
            fatal(InvariantViolation::RefcountUnderflow {
                what: format!("wme {}", w.get()),
            });
        }
        wme.reference_count -= 1;
        if wme.reference_count == 0 {
            self.arena.remove(w)
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

    /// Every allocated WME currently installed in working memory.
    pub fn in_wm(&self) -> impl Iterator<Item = (WmeId, &Wme)> {
        self.arena.iter().filter(|(_, w)| w.in_wm)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WmeId, &Wme)> {
        self.arena.iter()
    }
}

/// WMEs added to and removed from working memory by one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WmChanges {
    pub added: Vec<WmeTriple>,
    pub removed: Vec<WmeTriple>,
}

impl WmChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl AgentContext {
    /// Allocate a WME, taking references on its three symbols.
    pub(crate) fn make_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        acceptable: bool,
    ) -> WmeId {
        self.symbols.add_ref(id);
        self.symbols.add_ref(attr);
        self.symbols.add_ref(value);
        self.wmes.make(id, attr, value, acceptable)
    }

    /// Install `w`. Working memory holds one reference until the removal is
    /// committed by the next flush.
    pub(crate) fn add_wme_to_wm(&mut self, w: WmeId) {
        self.wmes.add_ref(w);
        let wme = self.wmes.wme_mut(w);
        wme.in_wm = true;
        let (id, value) = (wme.id, wme.value);
        self.decider.wmes_to_add.push(w);
        self.post_link_addition_if_id(id, value);
        self.stats.wmes_added += 1;
        tracing::trace!(wme = %self.wme_triple(w), "wme added");
    }

    /// Take `w` out of working memory. Its deallocation waits for the flush.
    pub(crate) fn remove_wme_from_wm(&mut self, w: WmeId) {
        let wme = self.wmes.wme_mut(w);
        if !wme.in_wm {
            return;
        }
        wme.in_wm = false;
        let (id, value) = (wme.id, wme.value);
        self.decider.wmes_to_remove.push(w);
        self.post_link_removal_if_id(id, value);
        if self.config.operand2_mode {
            self.gds_invalid_so_remove_goal(w);
        }
        self.stats.wmes_removed += 1;
        tracing::trace!(wme = %self.wme_triple(w), "wme removed");
    }

    pub(crate) fn remove_wme_list_from_wm(&mut self, wmes: Vec<WmeId>) {
        for w in wmes {
            self.remove_wme_from_wm(w);
        }
    }

    /// Release one reference on `w`, deallocating it with the last one.
    pub(crate) fn release_wme(&mut self, w: WmeId) {
        let Some(wme) = self.wmes.remove_ref(w) else {
            return;
        };
        if let Some(gds) = wme.gds {
            self.remove_from_gds(gds, w);
        }
        if let Some(p) = wme.preference {
            self.release_preference(p);
        }
        self.symbols.remove_ref(wme.id);
        self.symbols.remove_ref(wme.attr);
        self.symbols.remove_ref(wme.value);
    }

    /// Point `w` at a new justifying preference. Returns `false` if it
    /// already pointed there.
    pub(crate) fn repoint_wme_preference(&mut self, w: WmeId, p: PreferenceId) -> bool {
        let wme = self.wmes.wme_mut(w);
        if wme.preference == Some(p) {
            return false;
        }
        let old = wme.preference.replace(p);
        self.prefs.add_ref(p);
        if let Some(old) = old {
            self.release_preference(old);
        }
        true
    }

    /// Commit buffered WME additions and removals, deallocating removed WMEs,
    /// and replace the recorded changes of the previous flush.
    /// A WME added and removed within the same batch is reported in neither list.
    pub(crate) fn do_buffered_wm_changes(&mut self) {
        let added = std::mem::take(&mut self.decider.wmes_to_add);
        let removed = std::mem::take(&mut self.decider.wmes_to_remove);
        if added.is_empty() && removed.is_empty() {
            self.decider.last_wm_changes = WmChanges::default();
            return;
        }
        let added_set: HashSet<WmeId> = added.iter().copied().collect();
        let removed_set: HashSet<WmeId> = removed.iter().copied().collect();

        let changes = WmChanges {
            added: added
                .iter()
                .filter(|w| !removed_set.contains(w) && self.is_in_working_memory(**w))
                .map(|&w| self.wme_triple(w))
                .collect(),
            removed: removed
                .iter()
                .filter(|w| !added_set.contains(w))
                .map(|&w| self.wme_triple(w))
                .collect(),
        };
        for w in removed {
            self.release_wme(w);
        }
        tracing::trace!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            "working memory changes committed"
        );
        self.decider.last_wm_changes = changes;
    }

    /// WME changes committed by the most recent flush.
    pub fn last_wm_changes(&self) -> &WmChanges {
        &self.decider.last_wm_changes
    }

    /// Assert an architectural WME with no justifying preference. It stays
    /// until [`remove_input_wme`](Self::remove_input_wme) or until `id` is
    /// garbage collected.
    pub fn add_input_wme(
        &mut self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
    ) -> DecideResult<WmeId> {
        self.symbols.check_identifier(id)?;
        self.symbols.check(attr)?;
        self.symbols.check(value)?;
        let w = self.make_wme(id, attr, value, false);
        self.symbols.id_data_mut(id).input_wmes.push(w);
        self.add_wme_to_wm(w);
        Ok(w)
    }

    pub fn remove_input_wme(&mut self, w: WmeId) -> DecideResult<()> {
        let id = match self.wmes.get(w) {
            Some(wme) if wme.in_wm => wme.id,
            _ => return Err(DecideError::UnknownWme { timetag: w.get() }),
        };
        let data = self.symbols.id_data_mut(id);
        let Some(pos) = data.input_wmes.iter().position(|&x| x == w) else {
            return Err(DecideError::UnknownWme { timetag: w.get() });
        };
        data.input_wmes.remove(pos);
        self.remove_wme_from_wm(w);
        Ok(())
    }
}
