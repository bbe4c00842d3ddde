//! Type definitions for `colony_core`.
//!
//! All public state, command, event and content types used by the task engine.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::lease::FacilityDirectory;
use crate::malfunction::MalfunctionManager;
use crate::skills::{PhysicalCondition, SkillManager};
use crate::task::ActiveTask;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(AgentId);
string_id!(FacilityId);
string_id!(EntityId);
string_id!(MalfunctionId);
string_id!(PartId);
string_id!(StoreId);
string_id!(CommandId);
string_id!(EventId);

/// Part every EVA needs from the origin store.
pub const PART_EVA_SUIT: &str = "eva_suit";
/// Material recovered by field sampling.
pub const PART_ROCK_SAMPLE: &str = "rock_sample";
/// Holds `Constants::sample_container_capacity` rock samples.
pub const PART_SAMPLE_CONTAINER: &str = "sample_container";

// ---------------------------------------------------------------------------
// Core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    Person,
    Robot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkillType {
    Mechanics,
    EvaOperations,
    Areology,
    Management,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationClass {
    InSettlement,
    InVehicle,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FacilityKind {
    Office,
    Dining,
    Gym,
    Garage,
    MedicalBay,
    Lab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Building,
    Vehicle,
}

/// Independent repair-work buckets on a malfunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RepairWork {
    Emergency,
    Inside,
    Eva,
}

impl RepairWork {
    /// Emergency work stabilises the entity and never waits on parts.
    pub fn needs_parts(self) -> bool {
        !matches!(self, RepairWork::Emergency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Normal,
    Debug,
}

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct World {
    pub meta: MetaState,
    pub agents: BTreeMap<AgentId, Agent>,
    pub facilities: FacilityDirectory,
    pub entities: BTreeMap<EntityId, Malfunctionable>,
    /// Part stores: the settlement warehouse and each vehicle's cargo.
    pub stores: BTreeMap<StoreId, Inventory>,
    pub surface: SurfaceConditions,
    pub counters: Counters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaState {
    pub tick: u64,
    pub seed: u64,
    pub schema_version: u32,
    pub content_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub next_event_id: u64,
    pub next_command_id: u64,
    pub next_malfunction_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    pub location: Location,
    pub skills: SkillManager,
    pub condition: PhysicalCondition,
    /// 0–100; 50 is neutral.
    pub experience_aptitude: u32,
    /// Opinion of other agents, 0–100.
    pub relationships: BTreeMap<AgentId, f64>,
    /// Parts and equipment the agent is carrying.
    pub inventory: Inventory,
    /// Behaviors waiting to run once the active task ends.
    pub task_queue: VecDeque<TaskKind>,
    #[serde(skip)]
    pub task: Option<Box<dyn ActiveTask>>,
}

impl Agent {
    pub fn is_idle(&self) -> bool {
        self.task.is_none() && self.task_queue.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Location {
    /// Inside a pressurised settlement building.
    Building(EntityId),
    /// Inside a vehicle cabin.
    Vehicle(EntityId),
    Outside { x: f64, y: f64 },
}

impl Location {
    pub fn class(&self) -> LocationClass {
        match self {
            Location::Building(_) => LocationClass::InSettlement,
            Location::Vehicle(_) => LocationClass::InVehicle,
            Location::Outside { .. } => LocationClass::Outside,
        }
    }

    /// The entity enclosing this location, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Location::Building(id) | Location::Vehicle(id) => Some(id),
            Location::Outside { .. } => None,
        }
    }
}

/// Axis-aligned ground footprint of an entity, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub length: f64,
}

impl Footprint {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.x).abs() <= self.width / 2.0 && (y - self.y).abs() <= self.length / 2.0
    }
}

/// A building or vehicle that can break down.
#[derive(Debug, Serialize, Deserialize)]
pub struct Malfunctionable {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    /// Part store used when repairing or maintaining this entity.
    pub store: StoreId,
    pub footprint: Footprint,
    /// Pressurised interior: inside repair is possible.
    pub life_support: bool,
    /// Vehicles only: parked inside a garage.
    pub in_garage: bool,
    pub malfunctions: MalfunctionManager,
}

/// Countable part inventory. Used for agents, stores and EVA equipment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub parts: BTreeMap<PartId, u32>,
}

impl Inventory {
    pub fn count(&self, part: &PartId) -> u32 {
        self.parts.get(part).copied().unwrap_or(0)
    }

    pub fn add(&mut self, part: &PartId, number: u32) {
        if number > 0 {
            *self.parts.entry(part.clone()).or_insert(0) += number;
        }
    }

    /// Takes up to `number` of `part`. Returns how many could not be taken.
    pub fn retrieve(&mut self, part: &PartId, number: u32) -> u32 {
        let available = self.count(part);
        let taken = available.min(number);
        if taken == available {
            self.parts.remove(part);
        } else if let Some(stored) = self.parts.get_mut(part) {
            *stored -= taken;
        }
        number - taken
    }

    /// Moves everything into `other`, returning the number of units moved.
    pub fn drain_into(&mut self, other: &mut Inventory) -> u32 {
        let mut moved = 0;
        for (part, number) in std::mem::take(&mut self.parts) {
            other.add(&part, number);
            moved += number;
        }
        moved
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Outside conditions supplied by the surface model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConditions {
    /// W/m².
    pub solar_irradiance: f64,
    pub sun_setting: bool,
    pub radiation_event: bool,
}

impl SurfaceConditions {
    pub fn is_dark(&self, min_sunlight: f64) -> bool {
        self.sun_setting || self.solar_irradiance <= min_sunlight
    }
}

/// The behaviors an agent can be assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskKind {
    RepairMalfunction,
    Maintenance,
    MaintainVehicle { vehicle: EntityId },
    Administration,
    Workout,
    RestInSickBay,
    ListenToMusic,
    FieldSampling { target: EntityId, site_duration: f64 },
    RepairEvaMalfunction,
}

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: CommandId,
    pub issued_tick: u64,
    pub execute_at_tick: u64,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Queue a behavior; it starts at once when the agent is idle.
    AssignTask { agent: AgentId, task: TaskKind },
    /// Cancel the active task and drop the queue.
    EndTask { agent: AgentId },
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub tick: u64,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskStarted {
        agent: AgentId,
        task: String,
        phase: String,
    },
    /// Only emitted at `EventLevel::Debug`.
    TaskPhaseChanged {
        agent: AgentId,
        task: String,
        phase: String,
    },
    TaskCompleted {
        agent: AgentId,
        task: String,
        time_completed: f64,
    },
    TaskAborted {
        agent: AgentId,
        task: String,
        reason: String,
    },
    LeaseAcquired {
        agent: AgentId,
        facility: FacilityId,
    },
    LeaseReleased {
        agent: AgentId,
        facility: FacilityId,
    },
    /// Only emitted at `EventLevel::Debug`.
    WorkCredited {
        agent: AgentId,
        entity: EntityId,
        malfunction: Option<MalfunctionId>,
        category: Option<RepairWork>,
        amount: f64,
    },
    RepairWorkDone {
        entity: EntityId,
        malfunction: MalfunctionId,
        category: RepairWork,
    },
    MalfunctionRepaired {
        entity: EntityId,
        malfunction: MalfunctionId,
        name: String,
    },
    MalfunctionOccurred {
        entity: EntityId,
        malfunction: MalfunctionId,
        name: String,
        cause: String,
    },
    AccidentOccurred {
        agent: AgentId,
        entity: EntityId,
        label: String,
    },
    MaintenanceCompleted {
        entity: EntityId,
        agent: AgentId,
    },
    PartsShortfall {
        entity: EntityId,
        missing: u32,
    },
    EquipmentReturned {
        agent: AgentId,
        store: StoreId,
        units: u32,
    },
    SamplesDropped {
        agent: AgentId,
        units: u32,
    },
    SkillLevelUp {
        agent: AgentId,
        skill: SkillType,
        level: u32,
    },
}

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContent {
    pub content_version: String,
    pub malfunctions: Vec<MalfunctionDef>,
    pub constants: Constants,
}

/// Template for a malfunction an accident or wear can cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalfunctionDef {
    pub id: String,
    pub name: String,
    pub severity: u32,
    /// Relative selection weight.
    pub weight: f64,
    pub scope: BTreeSet<EntityKind>,
    /// Required work per category; a missing or zero entry means not needed.
    pub work_time: BTreeMap<RepairWork, f64>,
    pub repair_parts: BTreeMap<PartId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constants {
    /// Simulated time advanced per tick.
    pub millisols_per_tick: f64,
    /// Bound on phase handler calls within one `advance`.
    pub max_phase_dispatches: u32,
    pub max_repairers_per_category: usize,

    pub repair_skill_rate: f64,
    pub maintenance_skill_rate: f64,
    pub vehicle_maintenance_skill_rate: f64,
    pub fieldwork_skill_rate: f64,

    pub repair_accident_chance: f64,
    pub maintenance_accident_chance: f64,
    pub vehicle_accident_chance: f64,
    pub fieldwork_accident_chance: f64,
    pub accident_stress: f64,

    pub repair_duration_min: f64,
    pub repair_duration_spread: f64,
    pub maintenance_duration: f64,
    pub administration_duration: f64,
    pub workout_duration: f64,
    pub sick_bay_duration: f64,
    pub music_duration: f64,
    pub find_song_time: f64,

    pub skill_stress_modifier: f64,
    pub effort_fatigue_per_millisol: f64,
    pub rest_fatigue_recovery_per_millisol: f64,

    pub maintenance_inspection_window: f64,
    pub maintenance_wear_restore: f64,
    pub wear_per_millisol: f64,
    pub malfunction_chance_per_millisol: f64,

    pub eva_walk_time: f64,
    pub eva_min_sunlight: f64,
    pub eva_min_performance: f64,
    pub sample_units_per_millisol: f64,
    pub sample_container_capacity: u32,
}
