//! Malfunction work ledgers and the per-entity malfunction manager.
//!
//! The ledger is the single source of truth for "is this work done". Tasks
//! only credit time and check completion through it, so two repairers on the
//! same malfunction can never double-count.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{AgentId, EntityId, Inventory, MalfunctionDef, MalfunctionId, PartId, RepairWork};

/// Scales the wear-based accident modifier.
const WEAR_ACCIDENT_FACTOR: f64 = 1.0;

/// Result of moving parts out of a store into a repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartsTransfer {
    /// Mandatory parts are still missing; the work cannot finish.
    Blocked { missing: u32 },
    /// Work may go on. `missing` parts were wanted but are optional here.
    Proceed { missing: u32 },
}

impl PartsTransfer {
    /// `-1` for a blocking shortfall, otherwise the non-blocking count.
    pub fn shortfall(self) -> i64 {
        match self {
            PartsTransfer::Blocked { .. } => -1,
            PartsTransfer::Proceed { missing } => i64::from(missing),
        }
    }

    pub fn is_blocked(self) -> bool {
        matches!(self, PartsTransfer::Blocked { .. })
    }
}

/// Pulls each part out of `store`, reducing `needed` by what was found.
/// Returns the number of units still missing.
fn draw_parts(needed: &mut BTreeMap<PartId, u32>, store: &mut Inventory) -> u32 {
    let mut missing = 0;
    needed.retain(|part, count| {
        let short = store.retrieve(part, *count);
        *count = short;
        missing += short;
        short > 0
    });
    missing
}

// ---------------------------------------------------------------------------
// Work buckets
// ---------------------------------------------------------------------------

/// Work ledger for one repair category of one malfunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBucket {
    pub required: f64,
    pub completed: f64,
    /// Credited work per worker, kept after the worker leaves.
    pub contributions: BTreeMap<AgentId, f64>,
    /// Workers currently holding a claim.
    pub active: BTreeSet<AgentId>,
}

impl WorkBucket {
    pub fn new(required: f64) -> Self {
        Self {
            required,
            completed: 0.0,
            contributions: BTreeMap::new(),
            active: BTreeSet::new(),
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.required - self.completed).max(0.0)
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.required
    }

    /// Credits up to the remaining requirement and returns what did not fit.
    pub fn credit(&mut self, amount: f64, worker: &AgentId) -> f64 {
        let applied = amount.max(0.0).min(self.remaining());
        if applied > 0.0 {
            self.completed += applied;
            *self.contributions.entry(worker.clone()).or_insert(0.0) += applied;
        }
        // Snap float dust so the threshold is reached exactly.
        if self.remaining() < 1e-9 {
            self.completed = self.required;
        }
        amount.max(0.0) - applied
    }

    /// Claims a repairer slot. Holding a slot already counts as success.
    pub fn join(&mut self, worker: &AgentId, max_workers: usize) -> bool {
        if self.active.contains(worker) {
            return true;
        }
        if self.active.len() >= max_workers {
            return false;
        }
        self.active.insert(worker.clone());
        true
    }

    /// Releases a slot. Returns false when the worker held none.
    pub fn leave(&mut self, worker: &AgentId) -> bool {
        self.active.remove(worker)
    }
}

// ---------------------------------------------------------------------------
// Malfunctions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Malfunction {
    pub id: MalfunctionId,
    pub name: String,
    pub severity: u32,
    pub work: BTreeMap<RepairWork, WorkBucket>,
    /// Replacement parts still to be fitted.
    pub repair_parts: BTreeMap<PartId, u32>,
}

impl Malfunction {
    pub fn from_def(id: MalfunctionId, def: &MalfunctionDef) -> Self {
        Self {
            id,
            name: def.name.clone(),
            severity: def.severity,
            work: def
                .work_time
                .iter()
                .filter(|(_, required)| **required > 0.0)
                .map(|(cat, required)| (*cat, WorkBucket::new(*required)))
                .collect(),
            repair_parts: def
                .repair_parts
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(p, n)| (p.clone(), *n))
                .collect(),
        }
    }

    pub fn needs(&self, category: RepairWork) -> bool {
        self.work.contains_key(&category)
    }

    pub fn bucket(&self, category: RepairWork) -> Option<&WorkBucket> {
        self.work.get(&category)
    }

    /// A category is done when its time is in and, if it needs parts, every
    /// part has been fitted. Categories the malfunction does not need are
    /// trivially done.
    pub fn is_work_done(&self, category: RepairWork) -> bool {
        match self.work.get(&category) {
            None => true,
            Some(bucket) => {
                bucket.is_complete() && (!category.needs_parts() || self.repair_parts.is_empty())
            }
        }
    }

    /// Credits work and returns the part of `amount` that could not be used.
    pub fn add_work_time(&mut self, category: RepairWork, amount: f64, worker: &AgentId) -> f64 {
        match self.work.get_mut(&category) {
            Some(bucket) => bucket.credit(amount, worker),
            None => amount,
        }
    }

    pub fn transfer_parts(&mut self, category: RepairWork, store: &mut Inventory) -> PartsTransfer {
        if !self.needs(category) || !category.needs_parts() {
            return PartsTransfer::Proceed { missing: 0 };
        }
        match draw_parts(&mut self.repair_parts, store) {
            0 => PartsTransfer::Proceed { missing: 0 },
            missing => PartsTransfer::Blocked { missing },
        }
    }

    /// Whether `store` holds every part still to be fitted for `category`.
    pub fn parts_available(&self, category: RepairWork, store: &Inventory) -> bool {
        !self.needs(category)
            || !category.needs_parts()
            || self
                .repair_parts
                .iter()
                .all(|(part, needed)| store.count(part) >= *needed)
    }

    pub fn join_work(&mut self, category: RepairWork, worker: &AgentId, max_workers: usize) -> bool {
        self.work
            .get_mut(&category)
            .is_some_and(|b| b.join(worker, max_workers))
    }

    pub fn leave_work(&mut self, category: RepairWork, worker: &AgentId) -> bool {
        self.work.get_mut(&category).is_some_and(|b| b.leave(worker))
    }

    pub fn is_fixed(&self) -> bool {
        self.work.keys().all(|cat| self.is_work_done(*cat))
    }
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Outcome of crediting maintenance work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceCredit {
    pub leftover: f64,
    pub completed: bool,
}

/// Routine inspection ledger. Inspection-only: it completes without parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceLedger {
    pub base_work_time: f64,
    pub work_completed: f64,
    /// Operating time since the last completed maintenance.
    pub time_since_last: f64,
    pub count: u32,
    /// Parts to fit at the next maintenance, if the store has them.
    pub parts: BTreeMap<PartId, u32>,
}

impl MaintenanceLedger {
    pub fn new(base_work_time: f64) -> Self {
        Self {
            base_work_time,
            work_completed: 0.0,
            time_since_last: 0.0,
            count: 0,
            parts: BTreeMap::new(),
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.base_work_time - self.work_completed).max(0.0)
    }

    pub fn is_due(&self, window: f64) -> bool {
        self.time_since_last >= window
    }

    /// Credits inspection work. On completion the counters reset and the
    /// maintenance count increments.
    pub fn add_work_time(&mut self, amount: f64) -> MaintenanceCredit {
        let applied = amount.max(0.0).min(self.remaining());
        self.work_completed += applied;
        let leftover = amount.max(0.0) - applied;
        if self.remaining() < 1e-9 {
            self.work_completed = 0.0;
            self.time_since_last = 0.0;
            self.count += 1;
            return MaintenanceCredit {
                leftover,
                completed: true,
            };
        }
        MaintenanceCredit {
            leftover,
            completed: false,
        }
    }

    /// Fits whatever posted parts the store holds. Never blocks.
    pub fn transfer_parts(&mut self, store: &mut Inventory) -> PartsTransfer {
        PartsTransfer::Proceed {
            missing: draw_parts(&mut self.parts, store),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalfunctionManager {
    pub malfunctions: Vec<Malfunction>,
    /// 100 is pristine.
    pub wear_condition: f64,
    pub maintenance: MaintenanceLedger,
}

impl MalfunctionManager {
    pub fn new(maintenance_work_time: f64) -> Self {
        Self {
            malfunctions: Vec::new(),
            wear_condition: 100.0,
            maintenance: MaintenanceLedger::new(maintenance_work_time),
        }
    }

    pub fn has_malfunction(&self) -> bool {
        !self.malfunctions.is_empty()
    }

    pub fn get(&self, id: &MalfunctionId) -> Option<&Malfunction> {
        self.malfunctions.iter().find(|m| m.id == *id)
    }

    pub fn get_mut(&mut self, id: &MalfunctionId) -> Option<&mut Malfunction> {
        self.malfunctions.iter_mut().find(|m| m.id == *id)
    }

    /// Most severe malfunction with unfinished emergency work.
    pub fn most_serious_emergency(&self) -> Option<&Malfunction> {
        self.most_serious_in_need(RepairWork::Emergency)
    }

    /// Most severe malfunction with unfinished work in `category`. Ties go to
    /// the oldest.
    pub fn most_serious_in_need(&self, category: RepairWork) -> Option<&Malfunction> {
        self.malfunctions
            .iter()
            .filter(|m| m.needs(category) && !m.is_work_done(category))
            .fold(None, |best: Option<&Malfunction>, m| match best {
                Some(b) if b.severity >= m.severity => Some(b),
                _ => Some(m),
            })
    }

    /// Accident multiplier from wear: zero when pristine.
    pub fn accident_modifier(&self) -> f64 {
        (100.0 - self.wear_condition) / 100.0 * WEAR_ACCIDENT_FACTOR
    }

    pub fn add_wear(&mut self, amount: f64) {
        self.wear_condition = (self.wear_condition - amount).clamp(0.0, 100.0);
    }

    /// Operating time: runs the maintenance clock and wears the entity.
    pub fn time_passing(&mut self, time: f64, wear_per_millisol: f64) {
        self.maintenance.time_since_last += time;
        self.add_wear(time * wear_per_millisol);
    }

    /// Credits maintenance and restores wear when it completes.
    pub fn add_maintenance_work(&mut self, amount: f64, wear_restore: f64) -> MaintenanceCredit {
        let credit = self.maintenance.add_work_time(amount);
        if credit.completed {
            self.wear_condition = (self.wear_condition + wear_restore).min(100.0);
        }
        credit
    }

    /// Removes and returns fixed malfunctions.
    pub fn clear_fixed(&mut self) -> Vec<Malfunction> {
        let (fixed, open): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.malfunctions).into_iter().partition(Malfunction::is_fixed);
        self.malfunctions = open;
        fixed
    }
}

/// A repairer's slot on one malfunction category, held by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkClaim {
    pub entity: EntityId,
    pub malfunction: MalfunctionId,
    pub category: RepairWork,
}
