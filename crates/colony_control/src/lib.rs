use std::collections::BTreeMap;

use colony_core::behaviors::local_entities;
use colony_core::{
    Agent, AgentKind, Command, CommandEnvelope, CommandId, EntityId, EntityKind, FacilityKind,
    Location, MalfunctionId, Malfunctionable, PartId, RepairWork, SkillType, TaskContent,
    TaskKind, World, PART_EVA_SUIT,
};
use serde::{Deserialize, Serialize};

pub trait TaskSource {
    fn generate_commands(
        &mut self,
        world: &World,
        content: &TaskContent,
        next_command_id: &mut u64,
    ) -> Vec<CommandEnvelope>;
}

/// Thresholds the planner uses to pick between work and rest. Fields left
/// out of a config file take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Fatigue at or above which an agent heads for a sick-bay bed.
    pub rest_fatigue: f64,
    /// Fatigue at or above which an agent picks desk work over a workout.
    pub desk_fatigue: f64,
    /// Stress at or above which an agent takes a music break.
    pub relax_stress: f64,
    /// Site time for planned sampling trips.
    pub field_site_duration: f64,
    /// Areology level needed before an agent is sent sampling.
    pub sampling_skill: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            rest_fatigue: 70.0,
            desk_fatigue: 50.0,
            relax_stress: 50.0,
            field_site_duration: 100.0,
            sampling_skill: 1,
        }
    }
}

/// Assigns one task to every idle agent:
/// 1. Repair a local malfunction with a free repairer slot.
/// 2. Repair EVA damage when it is safe to go outside.
/// 3. Rest if exhausted, relax if stressed (people only).
/// 4. Inspect the most overdue local building or vehicle.
/// 5. Service an overdue vehicle in a free garage bay.
/// 6. Sample around the vehicle the agent sits in.
/// 7. Otherwise paperwork or a workout (people only).
#[derive(Debug, Default)]
pub struct TaskPlanner {
    pub config: PlannerConfig,
}

impl TaskPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Allocates a command ID and builds a `CommandEnvelope`.
fn make_cmd(tick: u64, next_id: &mut u64, command: Command) -> CommandEnvelope {
    let cmd_id = CommandId(format!("cmd_{:06}", *next_id));
    *next_id += 1;
    CommandEnvelope {
        id: cmd_id,
        issued_tick: tick,
        execute_at_tick: tick,
        command,
    }
}

/// Returns idle agents in id order.
fn collect_idle_agents(world: &World) -> Vec<&Agent> {
    world.agents.values().filter(|a| a.is_idle()).collect()
}

/// Repairer slots already taken or promised this round, per malfunction and
/// category.
#[derive(Default)]
struct RepairBook {
    planned: BTreeMap<(MalfunctionId, RepairWork), usize>,
}

impl RepairBook {
    /// Reserves a slot on the most severe open malfunction in `category`
    /// among `entities` whose parts are in stock. Returns false when every
    /// one is fully crewed or waiting on parts.
    fn reserve(
        &mut self,
        world: &World,
        entities: &[EntityId],
        category: RepairWork,
        max_workers: usize,
        eligible: impl Fn(&Malfunctionable) -> bool,
    ) -> bool {
        let mut open: Vec<(u32, MalfunctionId, usize)> = entities
            .iter()
            .filter_map(|id| world.entities.get(id))
            .filter(|e| eligible(e))
            .filter_map(|e| world.stores.get(&e.store).map(|store| (e, store)))
            .flat_map(|(e, store)| {
                e.malfunctions
                    .malfunctions
                    .iter()
                    .filter(move |m| m.parts_available(category, store))
            })
            .filter(|m| m.needs(category) && !m.is_work_done(category))
            .map(|m| {
                let active = m.bucket(category).map_or(0, |b| b.active.len());
                (m.severity, m.id.clone(), active)
            })
            .collect();
        open.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        for (_, id, active) in open {
            let planned = self.planned.entry((id, category)).or_insert(0);
            if active + *planned < max_workers {
                *planned += 1;
                return true;
            }
        }
        false
    }
}

/// Free garage bays and the vehicles already sent to them this round.
struct GarageBook {
    free: usize,
    booked: Vec<EntityId>,
}

impl GarageBook {
    /// Counts every unoccupied bay, not just garages with room.
    fn new(world: &World) -> Self {
        let free = world
            .facilities
            .iter()
            .filter(|f| f.kind == FacilityKind::Garage)
            .map(|f| f.capacity.saturating_sub(f.occupants.len()))
            .sum();
        Self {
            free,
            booked: Vec::new(),
        }
    }
}

fn eva_possible(world: &World, content: &TaskContent, agent: &Agent) -> bool {
    let constants = &content.constants;
    let Some(store) = agent
        .location
        .entity()
        .and_then(|id| world.entities.get(id))
        .and_then(|e| world.stores.get(&e.store))
    else {
        return false;
    };
    store.count(&PartId(PART_EVA_SUIT.to_string())) > 0
        && agent.condition.performance >= constants.eva_min_performance
        && !world.surface.is_dark(constants.eva_min_sunlight)
        && !world.surface.radiation_event
}

/// Priority 1 and 2: repair work the agent can join.
fn repair_priority(
    agent: &Agent,
    world: &World,
    content: &TaskContent,
    book: &mut RepairBook,
) -> Option<TaskKind> {
    let max = content.constants.max_repairers_per_category;
    let local = local_entities(world, &agent.id);
    if book.reserve(world, &local, RepairWork::Emergency, max, |_| true)
        || book.reserve(world, &local, RepairWork::Inside, max, |e| e.life_support)
    {
        return Some(TaskKind::RepairMalfunction);
    }
    if eva_possible(world, content, agent)
        && book.reserve(world, &local, RepairWork::Eva, max, |_| true)
    {
        return Some(TaskKind::RepairEvaMalfunction);
    }
    None
}

/// Priority 3: look after the agent's own condition.
fn wellbeing_priority(agent: &Agent, world: &World, config: &PlannerConfig) -> Option<TaskKind> {
    if agent.kind == AgentKind::Robot {
        return None;
    }
    let in_settlement = matches!(agent.location, Location::Building(_));
    if in_settlement
        && agent.condition.fatigue >= config.rest_fatigue
        && !world.facilities.find_available(FacilityKind::MedicalBay).is_empty()
    {
        return Some(TaskKind::RestInSickBay);
    }
    (agent.condition.stress >= config.relax_stress).then_some(TaskKind::ListenToMusic)
}

/// Priority 4 and 5: routine maintenance.
fn maintenance_priority(
    agent: &Agent,
    world: &World,
    content: &TaskContent,
    garages: &mut GarageBook,
) -> Option<TaskKind> {
    let window = content.constants.maintenance_inspection_window;
    let due = |id: &EntityId| {
        world.entities.get(id).is_some_and(|e| {
            !e.malfunctions.has_malfunction() && e.malfunctions.maintenance.is_due(window)
        })
    };
    if local_entities(world, &agent.id).iter().any(&due) {
        return Some(TaskKind::Maintenance);
    }
    if !matches!(agent.location, Location::Building(_)) || garages.free == 0 {
        return None;
    }
    let vehicle = world
        .entities
        .values()
        .filter(|e| e.kind == EntityKind::Vehicle && due(&e.id))
        .filter(|e| !garages.booked.contains(&e.id))
        .max_by(|a, b| {
            a.malfunctions
                .maintenance
                .time_since_last
                .total_cmp(&b.malfunctions.maintenance.time_since_last)
        })?;
    garages.free -= 1;
    garages.booked.push(vehicle.id.clone());
    Some(TaskKind::MaintainVehicle {
        vehicle: vehicle.id.clone(),
    })
}

/// Priority 6: field work from a parked vehicle.
fn sampling_priority(
    agent: &Agent,
    world: &World,
    content: &TaskContent,
    config: &PlannerConfig,
) -> Option<TaskKind> {
    let Location::Vehicle(vehicle) = &agent.location else {
        return None;
    };
    if agent.skills.level(SkillType::Areology) < config.sampling_skill
        || !eva_possible(world, content, agent)
    {
        return None;
    }
    Some(TaskKind::FieldSampling {
        target: vehicle.clone(),
        site_duration: config.field_site_duration,
    })
}

/// Priority 7: something useful indoors.
fn fallback_priority(agent: &Agent, world: &World, config: &PlannerConfig) -> Option<TaskKind> {
    if agent.kind == AgentKind::Robot || !matches!(agent.location, Location::Building(_)) {
        return None;
    }
    let desk_free = !world.facilities.find_available(FacilityKind::Office).is_empty();
    if desk_free || agent.condition.fatigue >= config.desk_fatigue {
        Some(TaskKind::Administration)
    } else {
        Some(TaskKind::Workout)
    }
}

// ---------------------------------------------------------------------------
// TaskPlanner
// ---------------------------------------------------------------------------

impl TaskSource for TaskPlanner {
    fn generate_commands(
        &mut self,
        world: &World,
        content: &TaskContent,
        next_command_id: &mut u64,
    ) -> Vec<CommandEnvelope> {
        let mut commands = Vec::new();
        let mut book = RepairBook::default();
        let mut garages = GarageBook::new(world);

        for agent in collect_idle_agents(world) {
            let task = repair_priority(agent, world, content, &mut book)
                .or_else(|| wellbeing_priority(agent, world, &self.config))
                .or_else(|| maintenance_priority(agent, world, content, &mut garages))
                .or_else(|| sampling_priority(agent, world, content, &self.config))
                .or_else(|| fallback_priority(agent, world, &self.config));
            if let Some(task) = task {
                commands.push(make_cmd(
                    world.meta.tick,
                    next_command_id,
                    Command::AssignTask {
                        agent: agent.id.clone(),
                        task,
                    },
                ));
            }
        }

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::lease::Facility;
    use colony_core::test_fixtures::{
        add_malfunction, agent_id, base_content, base_world, make_entity, ADA, BO, HAB, ROBOT,
        ROVER, ROVER_STORE, WORKSHOP,
    };
    use colony_core::FacilityId;

    fn plan(world: &World, content: &TaskContent) -> Vec<(String, TaskKind)> {
        plan_with(TaskPlanner::default(), world, content)
    }

    fn plan_with(
        mut planner: TaskPlanner,
        world: &World,
        content: &TaskContent,
    ) -> Vec<(String, TaskKind)> {
        let mut next_id = 0;
        planner
            .generate_commands(world, content, &mut next_id)
            .into_iter()
            .filter_map(|cmd| match cmd.command {
                Command::AssignTask { agent, task } => Some((agent.0, task)),
                Command::EndTask { .. } => None,
            })
            .collect()
    }

    fn task_for<'a>(plan: &'a [(String, TaskKind)], agent: &str) -> Option<&'a TaskKind> {
        plan.iter().find(|(a, _)| a == agent).map(|(_, t)| t)
    }

    #[test]
    fn repair_slots_are_not_overbooked() {
        let content = base_content();
        let mut world = base_world(&content);
        add_malfunction(&mut world, HAB, 40, &[(RepairWork::Inside, 10.0)], &[]);
        let plan = plan(&world, &content);
        let repairers = plan
            .iter()
            .filter(|(_, t)| *t == TaskKind::RepairMalfunction)
            .count();
        assert_eq!(repairers, 2);
        assert_eq!(task_for(&plan, ADA), Some(&TaskKind::RepairMalfunction));
        assert_eq!(task_for(&plan, BO), Some(&TaskKind::RepairMalfunction));
    }

    #[test]
    fn repairs_waiting_on_parts_are_not_planned() {
        let content = base_content();
        let mut world = base_world(&content);
        add_malfunction(
            &mut world,
            HAB,
            50,
            &[(RepairWork::Inside, 10.0)],
            &[("unobtainium", 1)],
        );
        let starved = plan(&world, &content);
        assert!(!starved
            .iter()
            .any(|(_, t)| *t == TaskKind::RepairMalfunction));

        add_malfunction(&mut world, HAB, 20, &[(RepairWork::Inside, 5.0)], &[]);
        let plan = plan(&world, &content);
        assert_eq!(task_for(&plan, ADA), Some(&TaskKind::RepairMalfunction));
        assert_eq!(task_for(&plan, BO), Some(&TaskKind::RepairMalfunction));
    }

    #[test]
    fn robots_only_do_technical_work() {
        let content = base_content();
        let world = base_world(&content);
        let plan = plan(&world, &content);
        assert_eq!(task_for(&plan, ROBOT), None);
        assert!(task_for(&plan, ADA).is_some());
    }

    #[test]
    fn exhausted_people_rest() {
        let content = base_content();
        let mut world = base_world(&content);
        world
            .agents
            .get_mut(&agent_id(ADA))
            .unwrap()
            .condition
            .adjust_fatigue(90.0);
        let plan = plan(&world, &content);
        assert_eq!(task_for(&plan, ADA), Some(&TaskKind::RestInSickBay));
    }

    #[test]
    fn overdue_vehicle_gets_one_mechanic() {
        let content = base_content();
        let mut world = base_world(&content);
        world
            .entities
            .get_mut(&EntityId(ROVER.to_string()))
            .unwrap()
            .malfunctions
            .maintenance
            .time_since_last = 900.0;
        let plan = plan(&world, &content);
        let vehicle_jobs = plan
            .iter()
            .filter(|(_, t)| matches!(t, TaskKind::MaintainVehicle { .. }))
            .count();
        // One garage bay.
        assert_eq!(vehicle_jobs, 1);
    }

    #[test]
    fn every_free_bay_gets_its_own_vehicle() {
        let content = base_content();
        let mut world = base_world(&content);
        world.facilities.insert(Facility {
            id: FacilityId("garage_1".to_string()),
            kind: FacilityKind::Garage,
            building: EntityId(WORKSHOP.to_string()),
            capacity: 2,
            occupants: Default::default(),
        });
        let mut second = make_entity("rover_2", EntityKind::Vehicle, ROVER_STORE, 80.0);
        second.malfunctions.maintenance.time_since_last = 800.0;
        world.entities.insert(second.id.clone(), second);
        world
            .entities
            .get_mut(&EntityId(ROVER.to_string()))
            .unwrap()
            .malfunctions
            .maintenance
            .time_since_last = 900.0;

        let plan = plan(&world, &content);
        let mut vehicles: Vec<&str> = plan
            .iter()
            .filter_map(|(_, t)| match t {
                TaskKind::MaintainVehicle { vehicle } => Some(vehicle.0.as_str()),
                _ => None,
            })
            .collect();
        vehicles.sort_unstable();
        // One mechanic per vehicle, one vehicle per bay.
        assert_eq!(vehicles, vec![ROVER, "rover_2"]);
    }

    #[test]
    fn desk_fatigue_threshold_is_configurable() {
        let content = base_content();
        let mut world = base_world(&content);
        let office = FacilityId("office_1".to_string());
        world.facilities.try_acquire(&office, &agent_id(BO)).unwrap();
        world.facilities.try_acquire(&office, &agent_id(ROBOT)).unwrap();
        world
            .agents
            .get_mut(&agent_id(ADA))
            .unwrap()
            .condition
            .adjust_fatigue(60.0);

        let plan = plan(&world, &content);
        assert_eq!(task_for(&plan, ADA), Some(&TaskKind::Administration));

        let relaxed = TaskPlanner::new(PlannerConfig {
            desk_fatigue: 80.0,
            ..PlannerConfig::default()
        });
        let plan = plan_with(relaxed, &world, &content);
        assert_eq!(task_for(&plan, ADA), Some(&TaskKind::Workout));
    }

    #[test]
    fn areologist_in_rover_goes_sampling() {
        let content = base_content();
        let mut world = base_world(&content);
        let ada = world.agents.get_mut(&agent_id(ADA)).unwrap();
        ada.location = Location::Vehicle(EntityId(ROVER.to_string()));
        ada.skills = ada.skills.clone().with_level(SkillType::Areology, 2);
        let plan = plan(&world, &content);
        assert!(matches!(
            task_for(&plan, ADA),
            Some(TaskKind::FieldSampling { target, .. }) if target.0 == ROVER
        ));

        world.surface.sun_setting = true;
        let plan = self::plan(&world, &content);
        assert_eq!(task_for(&plan, ADA), None);
    }

    #[test]
    fn busy_agents_are_left_alone() {
        let content = base_content();
        let mut world = base_world(&content);
        for agent in world.agents.values_mut() {
            agent.task_queue.push_back(TaskKind::Workout);
        }
        assert!(plan(&world, &content).is_empty());
    }

    #[test]
    fn command_ids_continue_from_counter() {
        let content = base_content();
        let world = base_world(&content);
        let mut next_id = 7;
        let commands = TaskPlanner::default().generate_commands(&world, &content, &mut next_id);
        assert_eq!(commands[0].id, CommandId("cmd_000007".to_string()));
        assert_eq!(next_id, 7 + commands.len() as u64);
    }
}
