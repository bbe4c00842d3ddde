//! Shared test fixtures for `colony_core` and downstream crates.
//!
//! `base_content()` has realistic rates with background wear and random
//! breakdowns switched off, so only the task under test changes the world.
//! `base_world()` is a small settlement: two buildings, one rover parked
//! outside, one of each facility and three agents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::lease::{Facility, FacilityDirectory};
use crate::skills::{PhysicalCondition, SkillManager};
use crate::{
    Agent, AgentId, AgentKind, Constants, Counters, EntityId, EntityKind, FacilityId,
    FacilityKind, Footprint, Inventory, Location, Malfunction, MalfunctionDef, MalfunctionId,
    MalfunctionManager, Malfunctionable, MetaState, PartId, RepairWork, SkillType, StoreId,
    SurfaceConditions, TaskContent, WorkBucket, World, PART_EVA_SUIT, PART_SAMPLE_CONTAINER,
};

pub const HAB: &str = "bldg_hab";
pub const WORKSHOP: &str = "bldg_workshop";
pub const ROVER: &str = "rover_1";
pub const SETTLEMENT_STORE: &str = "store_settlement";
pub const ROVER_STORE: &str = "store_rover_1";

pub const ADA: &str = "agent_ada";
pub const BO: &str = "agent_bo";
pub const ROBOT: &str = "robot_r1";

pub fn base_content() -> TaskContent {
    TaskContent {
        content_version: "test".to_string(),
        malfunctions: vec![
            MalfunctionDef {
                id: "pump_failure".to_string(),
                name: "Pump Failure".to_string(),
                severity: 30,
                weight: 1.0,
                scope: BTreeSet::from([EntityKind::Building, EntityKind::Vehicle]),
                work_time: BTreeMap::from([(RepairWork::Inside, 20.0)]),
                repair_parts: BTreeMap::from([(PartId("gasket".to_string()), 1)]),
            },
            MalfunctionDef {
                id: "hull_breach".to_string(),
                name: "Hull Breach".to_string(),
                severity: 80,
                weight: 1.0,
                scope: BTreeSet::from([EntityKind::Building]),
                work_time: BTreeMap::from([
                    (RepairWork::Emergency, 4.0),
                    (RepairWork::Eva, 15.0),
                ]),
                repair_parts: BTreeMap::new(),
            },
        ],
        constants: Constants {
            millisols_per_tick: 10.0,
            max_phase_dispatches: 64,
            max_repairers_per_category: 2,
            repair_skill_rate: 0.2,
            maintenance_skill_rate: 0.2,
            vehicle_maintenance_skill_rate: 0.4,
            fieldwork_skill_rate: 0.2,
            repair_accident_chance: 0.001,
            maintenance_accident_chance: 0.005,
            vehicle_accident_chance: 0.001,
            fieldwork_accident_chance: 0.0005,
            accident_stress: 5.0,
            repair_duration_min: 50.0,
            repair_duration_spread: 20.0,
            maintenance_duration: 100.0,
            administration_duration: 50.0,
            workout_duration: 40.0,
            sick_bay_duration: 100.0,
            music_duration: 30.0,
            find_song_time: 3.0,
            skill_stress_modifier: 25.0,
            effort_fatigue_per_millisol: 0.01,
            rest_fatigue_recovery_per_millisol: 0.05,
            maintenance_inspection_window: 500.0,
            maintenance_wear_restore: 25.0,
            wear_per_millisol: 0.0,
            malfunction_chance_per_millisol: 0.0,
            eva_walk_time: 5.0,
            eva_min_sunlight: 10.0,
            eva_min_performance: 0.5,
            sample_units_per_millisol: 0.2,
            sample_container_capacity: 5,
        },
    }
}

pub fn make_entity(id: &str, kind: EntityKind, store: &str, x: f64) -> Malfunctionable {
    Malfunctionable {
        id: EntityId(id.to_string()),
        name: id.to_string(),
        kind,
        store: StoreId(store.to_string()),
        footprint: Footprint {
            x,
            y: 0.0,
            width: 10.0,
            length: 20.0,
        },
        life_support: true,
        in_garage: false,
        malfunctions: MalfunctionManager::new(20.0),
    }
}

fn facility(id: &str, kind: FacilityKind, building: &str, capacity: usize) -> Facility {
    Facility {
        id: FacilityId(id.to_string()),
        kind,
        building: EntityId(building.to_string()),
        capacity,
        occupants: BTreeSet::new(),
    }
}

pub fn make_agent(id: &str, kind: AgentKind, location: Location, skills: SkillManager) -> Agent {
    Agent {
        id: AgentId(id.to_string()),
        name: id.to_string(),
        kind,
        location,
        skills,
        condition: PhysicalCondition::default(),
        experience_aptitude: 50,
        relationships: BTreeMap::new(),
        inventory: Inventory::default(),
        task_queue: VecDeque::new(),
        task: None,
    }
}

fn stocked(parts: &[(&str, u32)]) -> Inventory {
    let mut inventory = Inventory::default();
    for (part, n) in parts {
        inventory.add(&PartId((*part).to_string()), *n);
    }
    inventory
}

pub fn base_world(content: &TaskContent) -> World {
    let hab = Location::Building(EntityId(HAB.to_string()));
    let mut facilities = FacilityDirectory::new();
    facilities.insert(facility("office_1", FacilityKind::Office, HAB, 2));
    facilities.insert(facility("dining_1", FacilityKind::Dining, HAB, 4));
    facilities.insert(facility("gym_1", FacilityKind::Gym, HAB, 1));
    facilities.insert(facility("garage_1", FacilityKind::Garage, WORKSHOP, 1));
    facilities.insert(facility("medical_1", FacilityKind::MedicalBay, HAB, 1));

    let agents = [
        make_agent(ADA, AgentKind::Person, hab.clone(), SkillManager::new()),
        make_agent(
            BO,
            AgentKind::Person,
            hab.clone(),
            SkillManager::new().with_level(SkillType::Mechanics, 2),
        ),
        make_agent(
            ROBOT,
            AgentKind::Robot,
            hab,
            SkillManager::new().with_level(SkillType::Mechanics, 1),
        ),
    ];

    World {
        meta: MetaState {
            tick: 0,
            seed: 42,
            schema_version: 1,
            content_version: content.content_version.clone(),
        },
        agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
        facilities,
        entities: [
            make_entity(HAB, EntityKind::Building, SETTLEMENT_STORE, 0.0),
            make_entity(WORKSHOP, EntityKind::Building, SETTLEMENT_STORE, 20.0),
            make_entity(ROVER, EntityKind::Vehicle, ROVER_STORE, 60.0),
        ]
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect(),
        stores: BTreeMap::from([
            (
                StoreId(SETTLEMENT_STORE.to_string()),
                stocked(&[(PART_EVA_SUIT, 2), (PART_SAMPLE_CONTAINER, 2), ("gasket", 3)]),
            ),
            (
                StoreId(ROVER_STORE.to_string()),
                stocked(&[(PART_EVA_SUIT, 1), (PART_SAMPLE_CONTAINER, 1)]),
            ),
        ]),
        surface: SurfaceConditions {
            solar_irradiance: 500.0,
            sun_setting: false,
            radiation_event: false,
        },
        counters: Counters::default(),
    }
}

/// Adds a malfunction with the given work and parts to `entity`.
pub fn add_malfunction(
    world: &mut World,
    entity: &str,
    severity: u32,
    work: &[(RepairWork, f64)],
    parts: &[(&str, u32)],
) -> MalfunctionId {
    let id = MalfunctionId(format!("mal_{:04}", world.counters.next_malfunction_id));
    world.counters.next_malfunction_id += 1;
    let malfunction = Malfunction {
        id: id.clone(),
        name: format!("test malfunction {}", id.0),
        severity,
        work: work
            .iter()
            .map(|(cat, required)| (*cat, WorkBucket::new(*required)))
            .collect(),
        repair_parts: parts
            .iter()
            .map(|(p, n)| (PartId((*p).to_string()), *n))
            .collect(),
    };
    if let Some(target) = world.entities.get_mut(&EntityId(entity.to_string())) {
        target.malfunctions.malfunctions.push(malfunction);
    }
    id
}

pub fn agent_id(id: &str) -> AgentId {
    AgentId(id.to_string())
}

pub fn make_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}
