//! EVA site capability.
//!
//! An EVA behavior walks out of its origin building or vehicle, works at a
//! point on a target entity's footprint and walks back. Equipment taken from
//! the origin store goes back to it on every termination path.

use rand::Rng;
use tracing::info;

use crate::phase::{PhaseTable, TaskPhase};
use crate::task::{TaskBehavior, TaskCtx};
use crate::{EntityId, Event, Location, PartId, StoreId, PART_EVA_SUIT};

pub const WALK_TO_SITE: TaskPhase = TaskPhase::new("WALK_TO_SITE");
pub const WALK_BACK_INSIDE: TaskPhase = TaskPhase::new("WALK_BACK_INSIDE");

/// Site bookkeeping embedded in every EVA behavior.
#[derive(Debug, Clone)]
pub struct EvaSite {
    pub target: EntityId,
    /// Longest time the agent may stay at the site.
    pub site_duration: f64,
    pub time_on_site: f64,
    pub origin: Option<Location>,
    pub origin_store: Option<StoreId>,
    pub site: Option<(f64, f64)>,
    walk_progress: f64,
    returned: bool,
}

impl EvaSite {
    pub fn new(target: EntityId, site_duration: f64) -> Self {
        Self {
            target,
            site_duration,
            time_on_site: 0.0,
            origin: None,
            origin_store: None,
            site: None,
            walk_progress: 0.0,
            returned: false,
        }
    }

    /// Checks the airlock, picks a site and moves the suit plus `extra`
    /// equipment from the origin store to the agent. Optional extras are
    /// taken as far as the store has them.
    pub fn prepare(&mut self, ctx: &mut TaskCtx<'_, '_>, extra: &[(PartId, u32)]) -> Result<(), String> {
        let store_id = can_exit_airlock(ctx)?;
        let footprint = ctx
            .sim
            .world
            .entities
            .get(&self.target)
            .map(|e| e.footprint)
            .ok_or_else(|| format!("no such site {}", self.target))?;
        let x = footprint.x + (ctx.sim.rng.gen::<f64>() - 0.5) * footprint.width;
        let y = footprint.y + (ctx.sim.rng.gen::<f64>() - 0.5) * footprint.length;

        let agent_id = ctx.agent_id().clone();
        let world = &mut *ctx.sim.world;
        let (Some(agent), Some(store)) = (world.agents.get_mut(&agent_id), world.stores.get_mut(&store_id)) else {
            return Err("origin store unavailable".to_string());
        };
        let suit = PartId(PART_EVA_SUIT.to_string());
        if store.retrieve(&suit, 1) > 0 {
            return Err("no EVA suit available".to_string());
        }
        agent.inventory.add(&suit, 1);
        for (part, wanted) in extra {
            let taken = wanted - store.retrieve(part, *wanted);
            agent.inventory.add(part, taken);
        }

        self.origin = Some(agent.location.clone());
        self.origin_store = Some(store_id);
        self.site = Some((x, y));
        Ok(())
    }

    /// Moves everything the agent carries into the origin store and brings
    /// the agent back inside. Runs once; later calls do nothing.
    pub fn return_equipment(&mut self, ctx: &mut TaskCtx<'_, '_>) {
        if self.returned {
            return;
        }
        let (Some(origin), Some(store_id)) = (self.origin.clone(), self.origin_store.clone()) else {
            return;
        };
        self.returned = true;
        let agent_id = ctx.agent_id().clone();
        let world = &mut *ctx.sim.world;
        let (Some(agent), Some(store)) = (world.agents.get_mut(&agent_id), world.stores.get_mut(&store_id)) else {
            return;
        };
        agent.location = origin;
        let units = agent.inventory.drain_into(store);
        ctx.sim.emit(Event::EquipmentReturned {
            agent: agent_id,
            store: store_id,
            units,
        });
    }
}

/// Gives a behavior EVA phases.
pub trait EvaBehavior: TaskBehavior {
    /// Phase entered on arrival at the site.
    const SITE_PHASE: TaskPhase;

    fn eva(&mut self) -> &mut EvaSite;
}

/// Registers the walk phases. The behavior registers its own site phase.
pub fn register<B: EvaBehavior>(table: &mut PhaseTable<B>) {
    table.register(WALK_TO_SITE, walk_to_site::<B>);
    table.register(WALK_BACK_INSIDE, walk_back_inside::<B>);
}

/// Agent may leave: indoors, a suit in the origin store, fit enough and
/// daylight with no radiation event. Returns the origin store.
pub fn can_exit_airlock(ctx: &TaskCtx<'_, '_>) -> Result<StoreId, String> {
    let constants = ctx.constants();
    let agent = ctx.agent().ok_or("agent missing")?;
    let origin = agent
        .location
        .entity()
        .ok_or("already outside")?;
    let store = ctx
        .sim
        .world
        .entities
        .get(origin)
        .map(|e| e.store.clone())
        .ok_or("origin has no store")?;
    let suits = ctx
        .sim
        .world
        .stores
        .get(&store)
        .map_or(0, |s| s.count(&PartId(PART_EVA_SUIT.to_string())));
    if suits == 0 {
        return Err("no EVA suit available".to_string());
    }
    if agent.condition.performance < constants.eva_min_performance {
        return Err("too unfit for EVA".to_string());
    }
    let surface = &ctx.sim.world.surface;
    if surface.is_dark(constants.eva_min_sunlight) {
        return Err("too dark outside".to_string());
    }
    if surface.radiation_event {
        return Err("radiation event".to_string());
    }
    Ok(store)
}

/// Per-dispatch safety check for site phases. Returns false when the site
/// phase must not run: the task is heading home or aborting.
pub fn check_readiness<B: EvaBehavior>(task: &mut B, ctx: &mut TaskCtx<'_, '_>) -> bool {
    if ctx.is_ending() {
        return false;
    }
    let constants = ctx.constants();
    let min_performance = constants.eva_min_performance;
    let min_sunlight = constants.eva_min_sunlight;
    let performance = ctx.agent().map_or(0.0, |a| a.condition.performance);
    if performance < min_performance {
        ctx.abort("too unfit to continue EVA");
        return false;
    }
    let surface = &ctx.sim.world.surface;
    let reason = if surface.is_dark(min_sunlight) {
        Some("darkness")
    } else if surface.radiation_event {
        Some("radiation event")
    } else if task.eva().time_on_site >= task.eva().site_duration {
        Some("site time used up")
    } else {
        None
    };
    match reason {
        Some(reason) => {
            info!(agent = %ctx.agent_id(), task = ctx.task_name(), reason, "returning from EVA site");
            ctx.set_phase(WALK_BACK_INSIDE);
            false
        }
        None => true,
    }
}

/// Books up to `time` of site work against the site budget and returns the
/// part that fits.
pub fn spend_site_time<B: EvaBehavior>(task: &mut B, time: f64) -> f64 {
    let site = task.eva();
    let used = time.min((site.site_duration - site.time_on_site).max(0.0));
    site.time_on_site += used;
    if site.site_duration - site.time_on_site < 1e-9 {
        site.time_on_site = site.site_duration;
    }
    used
}

/// Cleanup for EVA behaviors: equipment home, agent inside.
pub fn clear_down<B: EvaBehavior>(task: &mut B, ctx: &mut TaskCtx<'_, '_>) {
    task.eva().return_equipment(ctx);
}

/// Steps `progress` towards the fixed walk cost. Returns (time used, arrived).
fn walk(progress: &mut f64, walk_time: f64, time: f64) -> (f64, bool) {
    let step = (walk_time - *progress).max(0.0).min(time);
    *progress += step;
    let arrived = *progress >= walk_time - 1e-9;
    if arrived {
        *progress = 0.0;
    }
    (step, arrived)
}

fn walk_to_site<B: EvaBehavior>(task: &mut B, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
    let walk_time = ctx.constants().eva_walk_time;
    let site = task.eva();
    let (used, arrived) = walk(&mut site.walk_progress, walk_time, time);
    let point = site.site;
    if let (Some(agent), Some((x, y))) = (ctx.agent_mut(), point) {
        agent.location = Location::Outside { x, y };
    }
    if arrived {
        ctx.set_phase(B::SITE_PHASE);
    }
    time - used
}

fn walk_back_inside<B: EvaBehavior>(task: &mut B, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
    let walk_time = ctx.constants().eva_walk_time;
    let (used, arrived) = walk(&mut task.eva().walk_progress, walk_time, time);
    if arrived {
        task.eva().return_equipment(ctx);
        ctx.complete();
    }
    time - used
}

/// Units of `part` the agent carries.
pub fn carried(ctx: &TaskCtx<'_, '_>, part: &PartId) -> u32 {
    ctx.agent().map_or(0, |a| a.inventory.count(part))
}

/// Adds up to `units` of `part` to the agent's load without exceeding
/// `capacity`. Returns the units that did not fit.
pub fn stow(ctx: &mut TaskCtx<'_, '_>, part: &PartId, units: u32, capacity: u32) -> u32 {
    let Some(agent) = ctx.agent_mut() else {
        return units;
    };
    let room = capacity.saturating_sub(agent.inventory.count(part));
    let stored = units.min(room);
    agent.inventory.add(part, stored);
    units - stored
}
