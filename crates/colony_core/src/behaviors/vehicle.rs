use super::maintenance::{maintenance_step, post_parts, MaintenanceStep, MaintenanceWork, MECHANICS};
use crate::accident::AccidentModel;
use crate::phase::{PhaseTable, TaskPhase};
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::work_rate::WorkRate;
use crate::{Constants, EntityId, EntityKind, FacilityKind, Location, LocationClass};

pub const MAINTAIN_VEHICLE: TaskPhase = TaskPhase::new("MAINTAIN_VEHICLE");

const SETTLEMENT: &[LocationClass] = &[LocationClass::InSettlement];
const VEHICLE_MAINTENANCE_STRESS: f64 = 0.1;

/// Maintenance of a vehicle in a garage bay. The bay is leased for the whole
/// task; a vehicle moved in for the job is moved out again at the end, and the
/// mechanic walks back to where they started.
#[derive(Debug)]
pub struct MaintainVehicle {
    vehicle: EntityId,
    duration: f64,
    work: MaintenanceWork,
    moved_in: bool,
    /// Where the agent was before walking over to the garage.
    origin: Option<Location>,
}

impl MaintainVehicle {
    pub fn new(vehicle: EntityId, constants: &Constants) -> Self {
        Self {
            vehicle,
            duration: constants.maintenance_duration,
            work: MaintenanceWork {
                rate: WorkRate::new(constants.vehicle_maintenance_skill_rate),
                accident: AccidentModel::new(constants.vehicle_accident_chance),
                window: constants.maintenance_inspection_window,
                wear_restore: constants.maintenance_wear_restore,
            },
            moved_in: false,
            origin: None,
        }
    }

    fn maintain_vehicle(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        let vehicle = self.vehicle.clone();
        match maintenance_step(ctx, &vehicle, time, self.work, "vehicle maintenance") {
            MaintenanceStep::Working { leftover } => leftover,
            MaintenanceStep::Done { leftover } => {
                ctx.complete();
                leftover
            }
            MaintenanceStep::Interrupted(reason) => {
                ctx.abort(reason);
                time
            }
        }
    }
}

impl TaskBehavior for MaintainVehicle {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Maintain Vehicle",
            duration: Some(self.duration),
            stress_modifier: VEHICLE_MAINTENANCE_STRESS,
            effort_driven: true,
            legal_locations: SETTLEMENT,
            impact: Some(MECHANICS),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(MAINTAIN_VEHICLE, Self::maintain_vehicle);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        let Some(vehicle) = ctx.sim.world.entities.get(&self.vehicle) else {
            return Err(format!("no vehicle {}", self.vehicle));
        };
        if vehicle.kind != EntityKind::Vehicle {
            return Err(format!("{} is not a vehicle", self.vehicle));
        }
        if vehicle.malfunctions.has_malfunction() {
            return Err("vehicle has a malfunction".to_string());
        }
        if !vehicle.malfunctions.maintenance.is_due(self.work.window) {
            return Err("vehicle does not need maintenance".to_string());
        }
        let already_garaged = vehicle.in_garage;

        let garage = ctx
            .lease_facility(FacilityKind::Garage)
            .ok_or("no garage bay free")?;
        let building = ctx
            .sim
            .world
            .facilities
            .get(&garage)
            .map(|f| f.building.clone());
        if let (Some(agent), Some(building)) = (ctx.agent_mut(), building) {
            let garage_location = Location::Building(building);
            if agent.location != garage_location {
                self.origin = Some(std::mem::replace(&mut agent.location, garage_location));
            }
        }
        if !already_garaged {
            if let Some(vehicle) = ctx.sim.world.entities.get_mut(&self.vehicle) {
                vehicle.in_garage = true;
                self.moved_in = true;
            }
        }
        post_parts(ctx, &self.vehicle);
        Ok(MAINTAIN_VEHICLE)
    }

    fn clear_down(&mut self, ctx: &mut TaskCtx<'_, '_>) {
        if let Some(origin) = self.origin.take() {
            if let Some(agent) = ctx.agent_mut() {
                agent.location = origin;
            }
        }
        if !self.moved_in {
            return;
        }
        self.moved_in = false;
        if let Some(vehicle) = ctx.sim.world.entities.get_mut(&self.vehicle) {
            vehicle.in_garage = false;
        }
    }
}
