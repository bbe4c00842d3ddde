//! Content loading and settlement construction shared by `colony_cli` and tests.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;

use anyhow::{Context, Result};
use colony_core::lease::{Facility, FacilityDirectory};
use colony_core::skills::{PhysicalCondition, SkillManager};
use colony_core::{
    Agent, AgentId, AgentKind, Constants, Counters, EntityId, EntityKind, FacilityId,
    FacilityKind, Footprint, Inventory, Location, MalfunctionDef, MalfunctionManager,
    Malfunctionable, MetaState, PartId, SkillType, StoreId, SurfaceConditions, TaskContent, World,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct MalfunctionsFile {
    content_version: String,
    malfunctions: Vec<MalfunctionDef>,
}

// ---------------------------------------------------------------------------
// Settlement definition
// ---------------------------------------------------------------------------

/// Starting layout of a settlement, as authored in `settlement.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementDef {
    pub buildings: Vec<EntityDef>,
    pub vehicles: Vec<EntityDef>,
    pub facilities: Vec<FacilityDef>,
    pub stores: BTreeMap<StoreId, BTreeMap<PartId, u32>>,
    pub agents: Vec<AgentDef>,
    pub surface: SurfaceConditions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub id: EntityId,
    pub name: String,
    pub store: StoreId,
    pub footprint: Footprint,
    #[serde(default)]
    pub life_support: bool,
    /// Inspection work per maintenance, in millisols.
    pub maintenance_work_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityDef {
    pub id: FacilityId,
    pub kind: FacilityKind,
    pub building: EntityId,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    pub location: Location,
    #[serde(default)]
    pub skills: BTreeMap<SkillType, u32>,
    #[serde(default = "neutral_aptitude")]
    pub experience_aptitude: u32,
}

fn neutral_aptitude() -> u32 {
    50
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates loaded content, panicking on any authoring error.
///
/// Catches mistakes like a malfunction with no repair work, a duplicate
/// template id, or constants that would stall the scheduler.
pub fn validate_content(content: &TaskContent) {
    let c = &content.constants;
    assert!(c.millisols_per_tick > 0.0, "millisols_per_tick must be positive");
    assert!(c.max_phase_dispatches > 0, "max_phase_dispatches must be positive");
    assert!(
        c.max_repairers_per_category > 0,
        "max_repairers_per_category must be at least 1"
    );
    assert!(c.eva_walk_time > 0.0, "eva_walk_time must be positive");
    for (name, value) in [
        ("repair_duration_min", c.repair_duration_min),
        ("maintenance_duration", c.maintenance_duration),
        ("administration_duration", c.administration_duration),
        ("workout_duration", c.workout_duration),
        ("sick_bay_duration", c.sick_bay_duration),
        ("music_duration", c.music_duration),
    ] {
        assert!(value > 0.0, "{name} must be positive, got {value}");
    }

    let mut seen = HashSet::new();
    for def in &content.malfunctions {
        assert!(!def.id.is_empty(), "malfunction template has empty id");
        assert!(
            seen.insert(def.id.as_str()),
            "malfunction template '{}' is defined twice",
            def.id,
        );
        assert!(
            def.weight >= 0.0,
            "malfunction template '{}' has negative weight",
            def.id,
        );
        assert!(
            !def.scope.is_empty(),
            "malfunction template '{}' applies to no entity kind",
            def.id,
        );
        assert!(
            def.work_time.values().any(|t| *t > 0.0),
            "malfunction template '{}' has no repair work",
            def.id,
        );
        assert!(
            def.work_time.values().all(|t| *t >= 0.0),
            "malfunction template '{}' has negative work time",
            def.id,
        );
    }
}

/// Validates settlement cross-references against each other, panicking on any
/// authoring error.
pub fn validate_settlement(settlement: &SettlementDef) {
    let mut entity_ids = HashSet::new();
    for def in settlement.buildings.iter().chain(&settlement.vehicles) {
        assert!(
            entity_ids.insert(&def.id),
            "entity '{}' is defined twice",
            def.id,
        );
        assert!(
            settlement.stores.contains_key(&def.store),
            "entity '{}' uses unknown store '{}'",
            def.id,
            def.store,
        );
    }
    let building_ids: HashSet<&EntityId> = settlement.buildings.iter().map(|b| &b.id).collect();
    let vehicle_ids: HashSet<&EntityId> = settlement.vehicles.iter().map(|v| &v.id).collect();

    for facility in &settlement.facilities {
        assert!(facility.capacity > 0, "facility '{}' has no capacity", facility.id);
        assert!(
            building_ids.contains(&facility.building),
            "facility '{}' is in unknown building '{}'",
            facility.id,
            facility.building,
        );
    }

    for agent in &settlement.agents {
        match &agent.location {
            Location::Building(id) => assert!(
                building_ids.contains(id),
                "agent '{}' starts in unknown building '{id}'",
                agent.id,
            ),
            Location::Vehicle(id) => assert!(
                vehicle_ids.contains(id),
                "agent '{}' starts in unknown vehicle '{id}'",
                agent.id,
            ),
            Location::Outside { .. } => {}
        }
        assert!(
            agent.experience_aptitude <= 100,
            "agent '{}' aptitude above 100",
            agent.id,
        );
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_content(content_dir: &str) -> Result<TaskContent> {
    let dir = Path::new(content_dir);
    let constants: Constants = serde_json::from_str(
        &std::fs::read_to_string(dir.join("constants.json")).context("reading constants.json")?,
    )
    .context("parsing constants.json")?;
    let malfunctions_file: MalfunctionsFile = serde_json::from_str(
        &std::fs::read_to_string(dir.join("malfunctions.json"))
            .context("reading malfunctions.json")?,
    )
    .context("parsing malfunctions.json")?;
    let content = TaskContent {
        content_version: malfunctions_file.content_version,
        malfunctions: malfunctions_file.malfunctions,
        constants,
    };
    validate_content(&content);
    Ok(content)
}

pub fn load_settlement(content_dir: &str) -> Result<SettlementDef> {
    let path = Path::new(content_dir).join("settlement.json");
    let settlement: SettlementDef = serde_json::from_str(
        &std::fs::read_to_string(&path).context("reading settlement.json")?,
    )
    .context("parsing settlement.json")?;
    validate_settlement(&settlement);
    Ok(settlement)
}

// ---------------------------------------------------------------------------
// World construction
// ---------------------------------------------------------------------------

fn build_entity(def: &EntityDef, kind: EntityKind) -> Malfunctionable {
    Malfunctionable {
        id: def.id.clone(),
        name: def.name.clone(),
        kind,
        store: def.store.clone(),
        footprint: def.footprint,
        life_support: def.life_support,
        in_garage: false,
        malfunctions: MalfunctionManager::new(def.maintenance_work_time),
    }
}

fn build_agent(def: &AgentDef) -> Agent {
    let skills = def
        .skills
        .iter()
        .fold(SkillManager::new(), |skills, (skill, level)| {
            skills.with_level(*skill, *level)
        });
    Agent {
        id: def.id.clone(),
        name: def.name.clone(),
        kind: def.kind,
        location: def.location.clone(),
        skills,
        condition: PhysicalCondition::default(),
        experience_aptitude: def.experience_aptitude,
        relationships: BTreeMap::new(),
        inventory: Inventory::default(),
        task_queue: VecDeque::new(),
        task: None,
    }
}

/// Builds the starting world. People get a first opinion of each other drawn
/// from `rng`, so the same seed always yields the same settlement.
pub fn build_initial_state(
    content: &TaskContent,
    settlement: &SettlementDef,
    seed: u64,
    rng: &mut impl Rng,
) -> World {
    let mut facilities = FacilityDirectory::new();
    for def in &settlement.facilities {
        facilities.insert(Facility {
            id: def.id.clone(),
            kind: def.kind,
            building: def.building.clone(),
            capacity: def.capacity,
            occupants: BTreeSet::new(),
        });
    }

    let entities: BTreeMap<EntityId, Malfunctionable> = settlement
        .buildings
        .iter()
        .map(|def| build_entity(def, EntityKind::Building))
        .chain(
            settlement
                .vehicles
                .iter()
                .map(|def| build_entity(def, EntityKind::Vehicle)),
        )
        .map(|e| (e.id.clone(), e))
        .collect();

    let stores = settlement
        .stores
        .iter()
        .map(|(id, parts)| {
            let mut inventory = Inventory::default();
            for (part, count) in parts {
                inventory.add(part, *count);
            }
            (id.clone(), inventory)
        })
        .collect();

    let mut agents: BTreeMap<AgentId, Agent> = settlement
        .agents
        .iter()
        .map(|def| (def.id.clone(), build_agent(def)))
        .collect();
    let people: Vec<AgentId> = agents
        .values()
        .filter(|a| a.kind == AgentKind::Person)
        .map(|a| a.id.clone())
        .collect();
    for id in &people {
        let Some(agent) = agents.get_mut(id) else {
            continue;
        };
        for other in people.iter().filter(|o| *o != id) {
            agent
                .relationships
                .insert(other.clone(), rng.gen_range(40.0..60.0));
        }
    }

    World {
        meta: MetaState {
            tick: 0,
            seed,
            schema_version: 1,
            content_version: content.content_version.clone(),
        },
        agents,
        facilities,
        entities,
        stores,
        surface: settlement.surface.clone(),
        counters: Counters::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::test_fixtures::base_content;
    use colony_core::RepairWork;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn entity(id: &str, store: &str) -> EntityDef {
        EntityDef {
            id: EntityId(id.to_string()),
            name: id.to_string(),
            store: StoreId(store.to_string()),
            footprint: Footprint {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                length: 10.0,
            },
            life_support: true,
            maintenance_work_time: 20.0,
        }
    }

    fn agent(id: &str, kind: AgentKind, location: Location) -> AgentDef {
        AgentDef {
            id: AgentId(id.to_string()),
            name: id.to_string(),
            kind,
            location,
            skills: BTreeMap::from([(SkillType::Mechanics, 2)]),
            experience_aptitude: 50,
        }
    }

    fn minimal_settlement() -> SettlementDef {
        let hab = EntityId("bldg_hab".to_string());
        SettlementDef {
            buildings: vec![entity("bldg_hab", "store_main")],
            vehicles: vec![entity("rover_1", "store_rover")],
            facilities: vec![FacilityDef {
                id: FacilityId("office_1".to_string()),
                kind: FacilityKind::Office,
                building: hab.clone(),
                capacity: 2,
            }],
            stores: BTreeMap::from([
                (
                    StoreId("store_main".to_string()),
                    BTreeMap::from([(PartId("eva_suit".to_string()), 2)]),
                ),
                (StoreId("store_rover".to_string()), BTreeMap::new()),
            ]),
            agents: vec![
                agent("agent_a", AgentKind::Person, Location::Building(hab.clone())),
                agent("agent_b", AgentKind::Person, Location::Building(hab.clone())),
                agent("robot_1", AgentKind::Robot, Location::Building(hab)),
            ],
            surface: SurfaceConditions {
                solar_irradiance: 400.0,
                sun_setting: false,
                radiation_event: false,
            },
        }
    }

    #[test]
    fn test_valid_content_passes_validation() {
        validate_content(&base_content());
    }

    #[test]
    #[should_panic(expected = "is defined twice")]
    fn test_duplicate_malfunction_panics() {
        let mut content = base_content();
        let copy = content.malfunctions[0].clone();
        content.malfunctions.push(copy);
        validate_content(&content);
    }

    #[test]
    #[should_panic(expected = "has no repair work")]
    fn test_malfunction_without_work_panics() {
        let mut content = base_content();
        content.malfunctions[0].work_time = BTreeMap::from([(RepairWork::Inside, 0.0)]);
        validate_content(&content);
    }

    #[test]
    #[should_panic(expected = "max_phase_dispatches must be positive")]
    fn test_zero_dispatch_bound_panics() {
        let mut content = base_content();
        content.constants.max_phase_dispatches = 0;
        validate_content(&content);
    }

    #[test]
    fn test_valid_settlement_passes_validation() {
        validate_settlement(&minimal_settlement());
    }

    #[test]
    #[should_panic(expected = "unknown building")]
    fn test_facility_in_unknown_building_panics() {
        let mut settlement = minimal_settlement();
        settlement.facilities[0].building = EntityId("bldg_missing".to_string());
        validate_settlement(&settlement);
    }

    #[test]
    #[should_panic(expected = "unknown store")]
    fn test_entity_with_unknown_store_panics() {
        let mut settlement = minimal_settlement();
        settlement.vehicles[0].store = StoreId("store_missing".to_string());
        validate_settlement(&settlement);
    }

    #[test]
    #[should_panic(expected = "unknown vehicle")]
    fn test_agent_in_unknown_vehicle_panics() {
        let mut settlement = minimal_settlement();
        settlement.agents[0].location = Location::Vehicle(EntityId("bldg_hab".to_string()));
        validate_settlement(&settlement);
    }

    #[test]
    fn test_initial_state_matches_settlement() {
        let content = base_content();
        let settlement = minimal_settlement();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let world = build_initial_state(&content, &settlement, 7, &mut rng);

        assert_eq!(world.meta.seed, 7);
        assert_eq!(world.entities.len(), 2);
        assert_eq!(
            world.entities[&EntityId("rover_1".to_string())].kind,
            EntityKind::Vehicle
        );
        assert_eq!(
            world.stores[&StoreId("store_main".to_string())].count(&PartId("eva_suit".to_string())),
            2
        );
        let a = &world.agents[&AgentId("agent_a".to_string())];
        assert_eq!(a.skills.level(SkillType::Mechanics), 2);
        assert_eq!(a.relationships.len(), 1);
        let opinion = a.relationships[&AgentId("agent_b".to_string())];
        assert!((40.0..60.0).contains(&opinion));
        assert!(world.agents[&AgentId("robot_1".to_string())]
            .relationships
            .is_empty());
    }

    #[test]
    fn test_same_seed_same_settlement() {
        let content = base_content();
        let settlement = minimal_settlement();
        let a = build_initial_state(&content, &settlement, 3, &mut ChaCha8Rng::seed_from_u64(3));
        let b = build_initial_state(&content, &settlement, 3, &mut ChaCha8Rng::seed_from_u64(3));
        let id = AgentId("agent_a".to_string());
        assert_eq!(a.agents[&id].relationships, b.agents[&id].relationships);
    }
}
