use super::*;
use crate::task::{self as machine, TaskBehavior, TaskConfig, TaskCtx};
use crate::test_fixtures::{
    add_malfunction, agent_id, base_content, base_world, make_rng, ADA, BO, HAB, ROBOT, ROVER,
    ROVER_STORE, SETTLEMENT_STORE, WORKSHOP,
};

mod persistence;
mod scheduling;

// --- Shared test helpers ------------------------------------------------

fn test_content() -> TaskContent {
    base_content()
}

fn test_world(content: &TaskContent) -> World {
    base_world(content)
}

fn assign(world: &World, agent: &str, task: TaskKind) -> CommandEnvelope {
    CommandEnvelope {
        id: CommandId(format!("cmd_{:06}", world.counters.next_command_id)),
        issued_tick: world.meta.tick,
        execute_at_tick: world.meta.tick,
        command: Command::AssignTask {
            agent: agent_id(agent),
            task,
        },
    }
}

fn end_task(world: &World, agent: &str) -> CommandEnvelope {
    CommandEnvelope {
        id: CommandId(format!("cmd_{:06}", world.counters.next_command_id)),
        issued_tick: world.meta.tick,
        execute_at_tick: world.meta.tick,
        command: Command::EndTask {
            agent: agent_id(agent),
        },
    }
}

fn entity_id(id: &str) -> EntityId {
    EntityId(id.to_string())
}

fn facility_id(id: &str) -> FacilityId {
    FacilityId(id.to_string())
}

fn part(id: &str) -> PartId {
    PartId(id.to_string())
}

fn store_count(world: &World, store: &str, item: &str) -> u32 {
    world.stores[&StoreId(store.to_string())].count(&part(item))
}

fn aborted_with<'e>(events: &'e [EventEnvelope], agent: &str) -> Option<&'e str> {
    events.iter().find_map(|e| match &e.event {
        Event::TaskAborted {
            agent: a, reason, ..
        } if a.0 == agent => Some(reason.as_str()),
        _ => None,
    })
}

fn completed(events: &[EventEnvelope], agent: &str, task: &str) -> bool {
    events.iter().any(|e| {
        matches!(
            &e.event,
            Event::TaskCompleted { agent: a, task: t, .. } if a.0 == agent && t == task
        )
    })
}

fn total_occupants(world: &World) -> usize {
    world.facilities.iter().map(|f| f.occupants.len()).sum()
}
