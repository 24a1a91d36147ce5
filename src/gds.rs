//! Goal dependency sets.
//!
//! When an o-supported WME is installed by an instantiation matched below the
//! top goal, the decider traces backwards through that instantiation's
//! positive conditions (and, transitively, through the instantiations behind
//! local i-supported conditions) and records every supergoal or architectural
//! WME it depends on in the match goal's GDS. Removing any of those WMEs from
//! working memory retracts the goal and everything below it.

use std::collections::{HashSet, VecDeque};

use crate::agent::AgentContext;
use crate::error::{InvariantViolation, fatal};
use crate::handle::{Arena, handle_type};
use crate::instantiation::InstantiationId;
use crate::symbol::{SymbolId, TOP_GOAL_LEVEL};
use crate::wme::WmeId;

handle_type!(
    /// Handle of a goal dependency set.
    GdsId,
    "gds"
);

/// The WMEs a goal depends on. `goal` is `None` once the goal is gone but
/// some member WMEs are still allocated.
#[derive(Debug, Clone, Default)]
pub struct Gds {
    pub goal: Option<SymbolId>,
    pub wmes: Vec<WmeId>,
}

pub type GdsStore = Arena<GdsId, Gds>;

impl AgentContext {
    fn create_gds_for_goal(&mut self, goal: SymbolId) -> GdsId {
        let gds = self.gds.insert(Gds {
            goal: Some(goal),
            wmes: Vec::new(),
        });
        self.symbols.goal_data_mut(goal).gds = Some(gds);
        tracing::debug!(goal = %self.symbols.display(goal), "goal dependency set created");
        gds
    }

    /// Record the dependencies of `w`, an o-supported WME just installed.
    pub(crate) fn elaborate_gds(&mut self, w: WmeId) {
        let Some(p) = self.wmes.wme(w).preference else {
            return;
        };
        let pref = self.prefs.pref(p);
        let (Some(inst), true) = (pref.inst, pref.o_supported) else {
            return;
        };
        let id = pref.id;
        let Some(record) = self.insts.get(inst) else {
            return;
        };
        let goal = record.match_goal;
        let goal_level = record.match_goal_level;
        if goal_level == TOP_GOAL_LEVEL || !self.is_live_goal(goal) {
            return;
        }

        let existing = self.symbols.goal_data(goal).gds;
        let target = match existing {
            Some(gds) => gds,
            // A result returned to a supergoal does not found a GDS here.
            None if self.symbols.id_data(id).level == goal_level => self.create_gds_for_goal(goal),
            None => return,
        };
        let owner_level = self
            .gds
            .get(target)
            .and_then(|g| g.goal)
            .filter(|&g| self.is_live_goal(g))
            .map(|g| self.symbols.id_data(g).level);
        if owner_level != Some(goal_level) {
            fatal(InvariantViolation::GdsLevel {
                goal: self.symbols.display(goal),
                expected: goal_level,
                actual: owner_level.unwrap_or(0),
            });
        }

        let mut visited: HashSet<InstantiationId> = HashSet::new();
        let mut queue: VecDeque<InstantiationId> = VecDeque::from([inst]);
        visited.insert(inst);
        while let Some(current) = queue.pop_front() {
            let Some(record) = self.insts.get(current) else {
                continue;
            };
            let conditions = record.conditions.clone();
            for cond in conditions {
                let Some(wme_pref) = self.wmes.get(cond.wme).map(|wme| wme.preference) else {
                    continue;
                };
                match wme_pref {
                    Some(cond_pref) if cond.level >= goal_level => {
                        let cond_pref = self.prefs.pref(cond_pref);
                        if cond_pref.o_supported {
                            continue;
                        }
                        // A result from a deeper goal has no justification of
                        // its own, so its firing is traced in place.
                        if let Some(next) = cond_pref.inst {
                            let local = self
                                .insts
                                .get(next)
                                .is_some_and(|r| r.match_goal_level != TOP_GOAL_LEVEL);
                            if local && visited.insert(next) {
                                queue.push_back(next);
                            }
                        }
                    }
                    _ => self.attach_wme_to_gds(target, cond.wme, goal_level),
                }
            }
        }
    }

    /// `w` survived a re-decision under a new preference. Leave a GDS whose
    /// goal is gone, and record the dependencies of an o-supported
    /// justification.
    pub(crate) fn refresh_gds_of_kept_wme(&mut self, w: WmeId) {
        let orphaned = self
            .wmes
            .wme(w)
            .gds
            .and_then(|g| self.gds.get(g))
            .is_some_and(|g| g.goal.is_none());
        if orphaned {
            self.remove_wme_from_gds(w);
        }
        let o_supported = self
            .wmes
            .wme(w)
            .preference
            .is_some_and(|p| self.prefs.pref(p).o_supported);
        if o_supported {
            self.elaborate_gds(w);
        }
    }

    /// Put `w` into `target`, moving it out of a GDS whose goal is gone or
    /// lies deeper than `goal_level`.
    fn attach_wme_to_gds(&mut self, target: GdsId, w: WmeId, goal_level: u32) {
        let current = self.wmes.wme(w).gds;
        if let Some(current) = current {
            if current == target {
                return;
            }
            let current_goal = self.gds.get(current).and_then(|g| g.goal);
            let move_it = match current_goal {
                None => true,
                Some(g) => self.symbols.id_data(g).level > goal_level,
            };
            if !move_it {
                return;
            }
            self.remove_wme_from_gds(w);
        }
        if let Some(gds) = self.gds.get_mut(target) {
            gds.wmes.push(w);
            self.wmes.wme_mut(w).gds = Some(target);
        }
    }

    /// Drop `w` from its GDS, freeing the GDS once empty.
    pub(crate) fn remove_wme_from_gds(&mut self, w: WmeId) {
        let Some(gds_id) = self.wmes.get_mut(w).and_then(|wme| wme.gds.take()) else {
            return;
        };
        self.remove_from_gds(gds_id, w);
    }

    /// Same as [`remove_wme_from_gds`](Self::remove_wme_from_gds) for a WME
    /// already taken out of the store.
    pub(crate) fn remove_from_gds(&mut self, gds_id: GdsId, w: WmeId) {
        let Some(gds) = self.gds.get_mut(gds_id) else {
            return;
        };
        gds.wmes.retain(|&x| x != w);
        if gds.wmes.is_empty() {
            let goal = gds.goal;
            self.gds.remove(gds_id);
            if let Some(goal) = goal.filter(|&g| self.is_live_goal(g)) {
                self.symbols.goal_data_mut(goal).gds = None;
            }
        }
    }

    /// A WME in a live goal's GDS left working memory: queue that goal for
    /// retraction at the next flush.
    pub(crate) fn gds_invalid_so_remove_goal(&mut self, w: WmeId) {
        let Some(goal) = self
            .wmes
            .wme(w)
            .gds
            .and_then(|g| self.gds.get(g))
            .and_then(|g| g.goal)
        else {
            return;
        };
        if self.decider.pending_gds_retractions.contains(&goal) {
            return;
        }
        let data = self.symbols.id_data(goal);
        let higher = data.goal.as_ref().and_then(|g| g.higher_goal);
        let level = data.level;
        let highest = self.decider.highest_goal_whose_context_changed;
        let replace = match highest.filter(|&h| self.is_live_goal(h)) {
            Some(h) => level < self.symbols.id_data(h).level,
            None => true,
        };
        if replace {
            self.decider.highest_goal_whose_context_changed = higher;
        }
        self.symbols.add_ref(goal);
        self.decider.pending_gds_retractions.push(goal);
        tracing::debug!(
            goal = %self.symbols.display(goal),
            wme = w.get(),
            "goal dependency set invalidated"
        );
    }

    /// Retract every goal queued by [`gds_invalid_so_remove_goal`](Self::gds_invalid_so_remove_goal).
    /// Returns `true` if anything was queued.
    pub(crate) fn process_pending_gds_retractions(&mut self) -> bool {
        let pending = std::mem::take(&mut self.decider.pending_gds_retractions);
        if pending.is_empty() {
            return false;
        }
        for goal in pending {
            if self.is_live_goal(goal) {
                self.stats.gds_retractions += 1;
                tracing::info!(goal = %self.symbols.display(goal), "retracting goal with invalid dependencies");
                self.remove_existing_context_and_descendents(goal);
            }
            self.symbols.remove_ref(goal);
        }
        true
    }

    /// Disconnect a goal being removed from its GDS. Members that are still
    /// allocated keep the GDS alive until they are released.
    pub(crate) fn detach_gds_from_goal(&mut self, goal: SymbolId) {
        let Some(gds_id) = self.symbols.goal_data_mut(goal).gds.take() else {
            return;
        };
        let Some(gds) = self.gds.get_mut(gds_id) else {
            return;
        };
        if gds.wmes.is_empty() {
            self.gds.remove(gds_id);
        } else {
            gds.goal = None;
        }
    }

    /// Timetags of the WMEs in `goal`'s dependency set.
    pub fn gds_of(&self, goal: SymbolId) -> Vec<WmeId> {
        self.symbols
            .ident(goal)
            .and_then(|d| d.goal.as_ref())
            .and_then(|g| g.gds)
            .and_then(|gds| self.gds.get(gds))
            .map(|gds| gds.wmes.clone())
            .unwrap_or_default()
    }
}
