//! Concrete behaviors. Each is a small struct with a phase table; none
//! extends another. Shared capabilities (leases, repair claims, EVA) are
//! composed in through `TaskCtx` and the `eva` module.

mod field_sampling;
mod maintenance;
mod music;
mod office;
mod repair;
mod vehicle;
mod wellness;

pub use field_sampling::{FieldSampling, COLLECTING};
pub use maintenance::{Maintenance, MAINTAIN};
pub use music::{ListenToMusic, FINDING_SONG, LISTENING};
pub use office::{Administration, REVIEWING};
pub use repair::{RepairEvaMalfunction, RepairMalfunction, REPAIRING, REPAIRING_EVA};
pub use vehicle::{MaintainVehicle, MAINTAIN_VEHICLE};
pub use wellness::{RestInSickBay, Workout, EXERCISING, RESTING};

use crate::error::TaskError;
use crate::task::{self, ActiveTask, SimContext, TaskBehavior};
use crate::{AgentId, EntityId, EntityKind, Location, TaskKind, World};

/// Creates the behavior for `kind` and starts it for `agent`.
pub fn start_task(
    kind: &TaskKind,
    sim: &mut SimContext<'_>,
    agent: &AgentId,
) -> Result<Box<dyn ActiveTask>, TaskError> {
    let constants = sim.constants();
    match kind {
        TaskKind::RepairMalfunction => {
            boxed(RepairMalfunction::new(constants, &mut *sim.rng), sim, agent)
        }
        TaskKind::Maintenance => boxed(Maintenance::new(constants), sim, agent),
        TaskKind::MaintainVehicle { vehicle } => {
            boxed(MaintainVehicle::new(vehicle.clone(), constants), sim, agent)
        }
        TaskKind::Administration => boxed(Administration::new(constants), sim, agent),
        TaskKind::Workout => boxed(Workout::new(constants), sim, agent),
        TaskKind::RestInSickBay => boxed(RestInSickBay::new(constants), sim, agent),
        TaskKind::ListenToMusic => boxed(ListenToMusic::new(constants), sim, agent),
        TaskKind::FieldSampling {
            target,
            site_duration,
        } => boxed(FieldSampling::new(target.clone(), *site_duration), sim, agent),
        TaskKind::RepairEvaMalfunction => boxed(RepairEvaMalfunction::new(constants), sim, agent),
    }
}

fn boxed<B: TaskBehavior>(
    behavior: B,
    sim: &mut SimContext<'_>,
    agent: &AgentId,
) -> Result<Box<dyn ActiveTask>, TaskError> {
    Ok(Box::new(task::start(behavior, sim, agent)?))
}

/// Entities an agent can work on from where it stands: every settlement
/// building plus garaged vehicles when inside the settlement, or just the
/// vehicle it sits in.
pub fn local_entities(world: &World, agent: &AgentId) -> Vec<EntityId> {
    let Some(agent) = world.agents.get(agent) else {
        return Vec::new();
    };
    match &agent.location {
        Location::Building(_) => world
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::Building || e.in_garage)
            .map(|e| e.id.clone())
            .collect(),
        Location::Vehicle(id) => vec![id.clone()],
        Location::Outside { .. } => Vec::new(),
    }
}
