use tracing::info;

use super::local_entities;
use crate::accident::{check_for_accident, AccidentModel};
use crate::phase::{PhaseTable, TaskPhase};
use crate::skills::ExperienceImpact;
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::work_rate::WorkRate;
use crate::{Constants, EntityId, Event, LocationClass, SkillType};

pub const MAINTAIN: TaskPhase = TaskPhase::new("MAINTAIN");

const INDOORS: &[LocationClass] = &[LocationClass::InSettlement, LocationClass::InVehicle];
const MAINTENANCE_STRESS: f64 = 0.1;

pub(super) const MECHANICS: ExperienceImpact = ExperienceImpact {
    skill: SkillType::Mechanics,
    points_per_millisol: 0.05,
};

pub(super) enum MaintenanceStep {
    Working { leftover: f64 },
    Done { leftover: f64 },
    Interrupted(&'static str),
}

/// Rates and limits for one kind of maintenance work.
#[derive(Debug, Clone, Copy)]
pub(super) struct MaintenanceWork {
    pub rate: WorkRate,
    pub accident: AccidentModel,
    pub window: f64,
    pub wear_restore: f64,
}

/// Fits posted maintenance parts from the entity's store. Never blocks; a
/// shortfall is only reported.
pub(super) fn post_parts(ctx: &mut TaskCtx<'_, '_>, entity: &EntityId) {
    let world = &mut *ctx.sim.world;
    let Some(target) = world.entities.get_mut(entity) else {
        return;
    };
    let Some(store) = world.stores.get_mut(&target.store) else {
        return;
    };
    let missing = match target.malfunctions.maintenance.transfer_parts(store) {
        crate::PartsTransfer::Proceed { missing } | crate::PartsTransfer::Blocked { missing } => {
            missing
        }
    };
    if missing > 0 {
        ctx.sim.emit(Event::PartsShortfall {
            entity: entity.clone(),
            missing,
        });
    }
}

/// One dispatch of inspection work on `entity`.
pub(super) fn maintenance_step(
    ctx: &mut TaskCtx<'_, '_>,
    entity: &EntityId,
    time: f64,
    work: MaintenanceWork,
    label: &str,
) -> MaintenanceStep {
    let Some(target) = ctx.sim.world.entities.get(entity) else {
        return MaintenanceStep::Interrupted("entity gone");
    };
    if target.malfunctions.has_malfunction() {
        return MaintenanceStep::Interrupted("malfunction during maintenance");
    }
    if !target.malfunctions.maintenance.is_due(work.window) {
        // Someone else finished it.
        return MaintenanceStep::Done { leftover: time };
    }

    let agent = ctx.agent_id().clone();
    let skill = ctx.skill_level(SkillType::Mechanics);
    let kind = ctx.agent_kind();
    let effective = work.rate.effective_time(time, skill, kind);
    let Some(target) = ctx.sim.world.entities.get_mut(entity) else {
        return MaintenanceStep::Interrupted("entity gone");
    };
    let credit = target
        .malfunctions
        .add_maintenance_work(effective, work.wear_restore);
    let leftover = work.rate.raw_time(credit.leftover, skill, kind).min(time);
    let used = time - leftover;

    ctx.sim.emit_debug(Event::WorkCredited {
        agent: agent.clone(),
        entity: entity.clone(),
        malfunction: None,
        category: None,
        amount: effective - credit.leftover,
    });
    ctx.add_experience(used);
    check_for_accident(ctx.sim, work.accident, entity, used, skill, label, &agent);

    if credit.completed {
        info!(agent = %agent, entity = %entity, "maintenance completed");
        ctx.sim.emit(Event::MaintenanceCompleted {
            entity: entity.clone(),
            agent,
        });
        MaintenanceStep::Done { leftover }
    } else {
        MaintenanceStep::Working { leftover }
    }
}

/// Routine inspection of the local building or vehicle that has gone longest
/// without one.
#[derive(Debug)]
pub struct Maintenance {
    duration: f64,
    work: MaintenanceWork,
    entity: Option<EntityId>,
}

impl Maintenance {
    pub fn new(constants: &Constants) -> Self {
        Self {
            duration: constants.maintenance_duration,
            work: MaintenanceWork {
                rate: WorkRate::new(constants.maintenance_skill_rate),
                accident: AccidentModel::new(constants.maintenance_accident_chance),
                window: constants.maintenance_inspection_window,
                wear_restore: constants.maintenance_wear_restore,
            },
            entity: None,
        }
    }

    pub fn entity(&self) -> Option<&EntityId> {
        self.entity.as_ref()
    }

    fn maintain(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        let Some(entity) = self.entity.clone() else {
            ctx.abort("nothing to maintain");
            return time;
        };
        match maintenance_step(ctx, &entity, time, self.work, "maintenance") {
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

impl TaskBehavior for Maintenance {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Maintenance",
            duration: Some(self.duration),
            stress_modifier: MAINTENANCE_STRESS,
            effort_driven: true,
            legal_locations: INDOORS,
            impact: Some(MECHANICS),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(MAINTAIN, Self::maintain);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        let world = &*ctx.sim.world;
        let window = self.work.window;
        let entity = local_entities(world, ctx.agent_id())
            .into_iter()
            .filter_map(|id| world.entities.get(&id))
            .filter(|e| {
                !e.malfunctions.has_malfunction() && e.malfunctions.maintenance.is_due(window)
            })
            .fold(None, |best: Option<&crate::Malfunctionable>, e| match best {
                Some(b)
                    if b.malfunctions.maintenance.time_since_last
                        >= e.malfunctions.maintenance.time_since_last =>
                {
                    Some(b)
                }
                _ => Some(e),
            })
            .map(|e| e.id.clone())
            .ok_or("nothing needs maintenance")?;
        post_parts(ctx, &entity);
        self.entity = Some(entity);
        Ok(MAINTAIN)
    }
}
