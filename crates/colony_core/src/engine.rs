use rand::RngCore;
use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::accident::spawn_malfunction;
use crate::behaviors::start_task;
use crate::error::TaskError;
use crate::random::roll_percent;
use crate::task::{ActiveTask, SimContext};
use crate::{
    AgentId, Command, CommandEnvelope, EntityId, EntityKind, EventEnvelope, EventLevel,
    FacilityKind, Location, TaskContent, World,
};

/// Advance the world by one tick.
///
/// Order: apply commands → entity time passing → agent tasks (sorted by
/// agent id) → advance tick counter.
///
/// A task that finishes with time to spare hands the remainder to the next
/// queued task in the same tick. Only contract violations are errors; the
/// offending task has already been cleaned up when one is returned.
pub fn tick(
    world: &mut World,
    commands: &[CommandEnvelope],
    content: &TaskContent,
    rng: &mut impl RngCore,
    event_level: EventLevel,
) -> Result<Vec<EventEnvelope>, TaskError> {
    let mut sim = SimContext::new(world, content, rng, event_level);
    let dt = content.constants.millisols_per_tick;

    apply_commands(&mut sim, commands)?;
    pass_time(&mut sim, dt);

    let agents: Vec<AgentId> = sim.world.agents.keys().cloned().collect();
    for agent in &agents {
        advance_agent(&mut sim, agent, dt)?;
    }

    sim.world.meta.tick += 1;
    Ok(sim.into_events())
}

fn apply_commands(sim: &mut SimContext<'_>, commands: &[CommandEnvelope]) -> Result<(), TaskError> {
    let current_tick = sim.world.meta.tick;
    for envelope in commands {
        if envelope.execute_at_tick != current_tick {
            continue;
        }
        match &envelope.command {
            Command::AssignTask { agent, task } => {
                let Some(target) = sim.world.agents.get_mut(agent) else {
                    warn!(agent = %agent, command = %envelope.id, "command for unknown agent");
                    continue;
                };
                target.task_queue.push_back(task.clone());
                if target.task.is_none() {
                    start_next(sim, agent)?;
                }
            }
            Command::EndTask { agent } => {
                let Some(target) = sim.world.agents.get_mut(agent) else {
                    warn!(agent = %agent, command = %envelope.id, "command for unknown agent");
                    continue;
                };
                target.task_queue.clear();
                if let Some(mut task) = target.task.take() {
                    task.end(sim, "ended by command");
                }
            }
        }
    }
    Ok(())
}

/// Wear, maintenance clocks and spontaneous breakdowns.
fn pass_time(sim: &mut SimContext<'_>, dt: f64) {
    let constants = sim.constants();
    let entities: Vec<EntityId> = sim.world.entities.keys().cloned().collect();
    for id in &entities {
        let Some(entity) = sim.world.entities.get_mut(id) else {
            continue;
        };
        entity.malfunctions.time_passing(dt, constants.wear_per_millisol);
        let chance = dt
            * constants.malfunction_chance_per_millisol
            * (1.0 + entity.malfunctions.accident_modifier());
        if roll_percent(&mut *sim.rng, chance) {
            spawn_malfunction(sim, id, "wear and tear");
        }
    }
}

fn take_task(sim: &mut SimContext<'_>, agent: &AgentId) -> Option<Box<dyn ActiveTask>> {
    sim.world.agents.get_mut(agent).and_then(|a| a.task.take())
}

/// Starts queued tasks until one survives its preconditions. Returns whether
/// the agent now has an active task.
fn start_next(sim: &mut SimContext<'_>, agent: &AgentId) -> Result<bool, TaskError> {
    loop {
        let Some(kind) = sim
            .world
            .agents
            .get_mut(agent)
            .and_then(|a| a.task_queue.pop_front())
        else {
            return Ok(false);
        };
        let task = start_task(&kind, sim, agent)?;
        if task.is_done() {
            debug!(agent = %agent, task = task.name(), "queued task did not start");
            continue;
        }
        if let Some(target) = sim.world.agents.get_mut(agent) {
            target.task = Some(task);
            return Ok(true);
        }
        return Ok(false);
    }
}

fn advance_agent(sim: &mut SimContext<'_>, agent: &AgentId, dt: f64) -> Result<(), TaskError> {
    let mut left = dt;
    loop {
        let Some(mut task) = take_task(sim, agent) else {
            if start_next(sim, agent)? {
                continue;
            }
            return Ok(());
        };
        let step = task.advance(sim, left)?;
        left = step.leftover;
        if !task.is_done() {
            if let Some(target) = sim.world.agents.get_mut(agent) {
                target.task = Some(task);
            }
            return Ok(());
        }
        // Finished: hand any spare time to the next queued task.
        if !start_next(sim, agent)? || left <= 0.0 {
            return Ok(());
        }
    }
}

/// Ends every active task, in agent id order, so the world holds no leases,
/// repair claims or borrowed equipment. Queued tasks stay queued.
///
/// Active tasks are not saved with the world: call this before writing a
/// snapshot.
pub fn end_all_tasks(
    world: &mut World,
    content: &TaskContent,
    rng: &mut impl RngCore,
    event_level: EventLevel,
    reason: &str,
) -> Vec<EventEnvelope> {
    let mut sim = SimContext::new(world, content, rng, event_level);
    let agents: Vec<AgentId> = sim.world.agents.keys().cloned().collect();
    for agent in &agents {
        if let Some(mut task) = take_task(&mut sim, agent) {
            task.end(&mut sim, reason);
        }
    }
    sim.into_events()
}

/// Frees whatever a snapshot says is held by an agent with no live task:
/// facility seats, repair claims, a garage bay's vehicle, and the agent's
/// own position and load if it was left outside.
///
/// An agent found outside is moved into the nearest pressurised building or
/// vehicle and everything it carries goes into that entity's store. Returns
/// the number of seats, claims and units released.
pub fn release_orphaned(world: &mut World) -> usize {
    let working: BTreeSet<AgentId> = world
        .agents
        .values()
        .filter(|a| a.task.is_some())
        .map(|a| a.id.clone())
        .collect();
    let mut released = world.facilities.retain_occupants(|a| working.contains(a));

    for entity in world.entities.values_mut() {
        for malfunction in &mut entity.malfunctions.malfunctions {
            for bucket in malfunction.work.values_mut() {
                let before = bucket.active.len();
                bucket.active.retain(|a| working.contains(a));
                released += before - bucket.active.len();
            }
        }
    }

    let bays_held = world
        .facilities
        .iter()
        .any(|f| f.kind == FacilityKind::Garage && !f.occupants.is_empty());
    if !bays_held {
        for vehicle in world.entities.values_mut().filter(|e| e.in_garage) {
            vehicle.in_garage = false;
        }
    }

    let idle: Vec<AgentId> = world
        .agents
        .keys()
        .filter(|id| !working.contains(*id))
        .cloned()
        .collect();
    for id in &idle {
        released += bring_inside(world, id);
    }

    if released > 0 {
        info!(released, "released resources held by unsaved tasks");
    }
    released
}

/// Moves an agent left outside to the nearest pressurised entity and empties
/// its load into the store there. Returns the units stored.
fn bring_inside(world: &mut World, id: &AgentId) -> usize {
    let Some(agent) = world.agents.get_mut(id) else {
        return 0;
    };
    if let Location::Outside { x, y } = agent.location {
        let nearest = world
            .entities
            .values()
            .filter(|e| e.life_support)
            .min_by(|a, b| {
                let da = (a.footprint.x - x).powi(2) + (a.footprint.y - y).powi(2);
                let db = (b.footprint.x - x).powi(2) + (b.footprint.y - y).powi(2);
                da.total_cmp(&db)
            });
        let Some(nearest) = nearest else {
            warn!(agent = %id, "agent outside with nowhere to go");
            return 0;
        };
        agent.location = match nearest.kind {
            EntityKind::Vehicle => Location::Vehicle(nearest.id.clone()),
            EntityKind::Building => Location::Building(nearest.id.clone()),
        };
    }
    if agent.inventory.is_empty() {
        return 0;
    }
    let Some(store) = agent
        .location
        .entity()
        .and_then(|e| world.entities.get(e))
        .and_then(|e| world.stores.get_mut(&e.store))
    else {
        warn!(agent = %id, "no store to take the agent's load");
        return 0;
    };
    agent.inventory.drain_into(store) as usize
}
