use rand::{Rng, RngCore};
use tracing::{debug, info};

use super::local_entities;
use crate::accident::{check_for_accident, AccidentModel};
use crate::eva::{self, EvaBehavior, EvaSite, WALK_BACK_INSIDE, WALK_TO_SITE};
use crate::malfunction::{Malfunction, PartsTransfer, WorkBucket, WorkClaim};
use crate::phase::{PhaseTable, TaskPhase};
use crate::skills::ExperienceImpact;
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::work_rate::WorkRate;
use crate::{
    Constants, EntityId, Event, LocationClass, Malfunctionable, RepairWork, SkillType, World,
};

pub const REPAIRING: TaskPhase = TaskPhase::new("REPAIRING");
pub const REPAIRING_EVA: TaskPhase = TaskPhase::new("REPAIRING_EVA");

const INDOORS: &[LocationClass] = &[LocationClass::InSettlement, LocationClass::InVehicle];

const MECHANICS: ExperienceImpact = ExperienceImpact {
    skill: SkillType::Mechanics,
    points_per_millisol: 0.05,
};

const REPAIR_STRESS: f64 = 0.3;
const EVA_REPAIR_STRESS: f64 = 0.5;

// ---------------------------------------------------------------------------
// Shared repair work
// ---------------------------------------------------------------------------

enum RepairStep {
    /// Still work to do; `leftover` raw time went unused.
    Working { leftover: f64 },
    /// The category is done, by us or someone else.
    Done { leftover: f64 },
    /// Time is in but parts are missing.
    Blocked,
}

fn malfunction_mut<'w>(world: &'w mut World, claim: &WorkClaim) -> Option<&'w mut Malfunction> {
    world
        .entities
        .get_mut(&claim.entity)
        .and_then(|e| e.malfunctions.get_mut(&claim.malfunction))
}

/// Claims the most serious local malfunction with open `category` work, a
/// free repairer slot and its repair parts in stock.
fn claim_repair(
    ctx: &mut TaskCtx<'_, '_>,
    category: RepairWork,
    eligible: impl Fn(&Malfunctionable) -> bool,
) -> Option<WorkClaim> {
    let world = &*ctx.sim.world;
    let mut candidates: Vec<(u32, WorkClaim)> = local_entities(world, ctx.agent_id())
        .iter()
        .filter_map(|id| world.entities.get(id))
        .filter(|e| eligible(e))
        .filter_map(|e| world.stores.get(&e.store).map(|store| (e, store)))
        .flat_map(|(e, store)| {
            e.malfunctions
                .malfunctions
                .iter()
                .filter(move |m| {
                    m.needs(category)
                        && !m.is_work_done(category)
                        && m.parts_available(category, store)
                })
                .map(move |m| {
                    let claim = WorkClaim {
                        entity: e.id.clone(),
                        malfunction: m.id.clone(),
                        category,
                    };
                    (m.severity, claim)
                })
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
        .into_iter()
        .map(|(_, claim)| claim)
        .find(|claim| ctx.join_work(claim.clone()))
}

/// Moves repair parts from the entity's store. Emits a shortfall event and
/// returns false when mandatory parts are missing.
fn fit_parts(ctx: &mut TaskCtx<'_, '_>, claim: &WorkClaim) -> bool {
    let world = &mut *ctx.sim.world;
    let Some(store_id) = world.entities.get(&claim.entity).map(|e| e.store.clone()) else {
        return false;
    };
    let Some(store) = world.stores.get_mut(&store_id) else {
        return false;
    };
    let Some(malfunction) = world
        .entities
        .get_mut(&claim.entity)
        .and_then(|e| e.malfunctions.get_mut(&claim.malfunction))
    else {
        return false;
    };
    let transfer = malfunction.transfer_parts(claim.category, store);
    if let PartsTransfer::Blocked { missing } = transfer {
        ctx.sim.emit(Event::PartsShortfall {
            entity: claim.entity.clone(),
            missing,
        });
        return false;
    }
    true
}

/// Reports finished category work and clears the malfunction once every
/// category is done.
fn finish_category(ctx: &mut TaskCtx<'_, '_>, claim: &WorkClaim) {
    ctx.sim.emit(Event::RepairWorkDone {
        entity: claim.entity.clone(),
        malfunction: claim.malfunction.clone(),
        category: claim.category,
    });
    let Some(entity) = ctx.sim.world.entities.get_mut(&claim.entity) else {
        return;
    };
    for fixed in entity.malfunctions.clear_fixed() {
        info!(entity = %claim.entity, malfunction = %fixed.id, name = %fixed.name, "malfunction repaired");
        ctx.sim.emit(Event::MalfunctionRepaired {
            entity: claim.entity.clone(),
            malfunction: fixed.id,
            name: fixed.name,
        });
    }
}

/// One dispatch of repair work: re-checks the ledger, credits skill-adjusted
/// time, rolls for an accident and reports completion.
fn repair_step(
    ctx: &mut TaskCtx<'_, '_>,
    claim: &WorkClaim,
    time: f64,
    rate: WorkRate,
    accident: AccidentModel,
    label: &str,
) -> RepairStep {
    let agent = ctx.agent_id().clone();
    let Some(malfunction) = malfunction_mut(ctx.sim.world, claim) else {
        // Cleared by another repairer.
        return RepairStep::Done { leftover: time };
    };
    if malfunction.is_work_done(claim.category) {
        return RepairStep::Done { leftover: time };
    }
    if malfunction
        .bucket(claim.category)
        .is_some_and(WorkBucket::is_complete)
    {
        if !fit_parts(ctx, claim) {
            return RepairStep::Blocked;
        }
        finish_category(ctx, claim);
        return RepairStep::Done { leftover: time };
    }

    let skill = ctx.skill_level(SkillType::Mechanics);
    let kind = ctx.agent_kind();
    let effective = rate.effective_time(time, skill, kind);
    let Some(malfunction) = malfunction_mut(ctx.sim.world, claim) else {
        return RepairStep::Done { leftover: time };
    };
    let unused = malfunction.add_work_time(claim.category, effective, &agent);
    let done = malfunction.is_work_done(claim.category);
    let leftover = rate.raw_time(unused, skill, kind).min(time);
    let used = time - leftover;

    ctx.sim.emit_debug(Event::WorkCredited {
        agent: agent.clone(),
        entity: claim.entity.clone(),
        malfunction: Some(claim.malfunction.clone()),
        category: Some(claim.category),
        amount: effective - unused,
    });
    ctx.add_experience(used);
    check_for_accident(ctx.sim, accident, &claim.entity, used, skill, label, &agent);

    if done {
        finish_category(ctx, claim);
        RepairStep::Done { leftover }
    } else {
        RepairStep::Working { leftover }
    }
}

// ---------------------------------------------------------------------------
// RepairMalfunction
// ---------------------------------------------------------------------------

/// Indoor repair: emergency work first, then general inside work.
#[derive(Debug)]
pub struct RepairMalfunction {
    duration: f64,
    rate: WorkRate,
    accident: AccidentModel,
    claim: Option<WorkClaim>,
}

impl RepairMalfunction {
    pub fn new(constants: &Constants, rng: &mut dyn RngCore) -> Self {
        Self {
            duration: constants.repair_duration_min
                + rng.gen::<f64>() * constants.repair_duration_spread,
            rate: WorkRate::new(constants.repair_skill_rate),
            accident: AccidentModel::new(constants.repair_accident_chance),
            claim: None,
        }
    }

    pub fn claim(&self) -> Option<&WorkClaim> {
        self.claim.as_ref()
    }

    fn repairing(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        let Some(claim) = self.claim.clone() else {
            ctx.abort("no malfunction claimed");
            return time;
        };
        match repair_step(ctx, &claim, time, self.rate, self.accident, "repair") {
            RepairStep::Working { leftover } => leftover,
            RepairStep::Done { leftover } => {
                ctx.complete();
                leftover
            }
            RepairStep::Blocked => {
                ctx.abort("waiting for parts");
                time
            }
        }
    }
}

impl TaskBehavior for RepairMalfunction {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Repair Malfunction",
            duration: Some(self.duration),
            stress_modifier: REPAIR_STRESS,
            effort_driven: true,
            legal_locations: INDOORS,
            impact: Some(MECHANICS),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(REPAIRING, Self::repairing);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        let claim = claim_repair(ctx, RepairWork::Emergency, |_| true)
            .or_else(|| claim_repair(ctx, RepairWork::Inside, |e| e.life_support))
            .ok_or("no repairable malfunction")?;
        if !fit_parts(ctx, &claim) {
            ctx.leave_work(&claim);
            return Err("repair parts unavailable".to_string());
        }
        debug!(agent = %ctx.agent_id(), malfunction = %claim.malfunction, category = ?claim.category, "repair claimed");
        self.claim = Some(claim);
        Ok(REPAIRING)
    }
}

// ---------------------------------------------------------------------------
// RepairEvaMalfunction
// ---------------------------------------------------------------------------

/// Outside repair of EVA work on a settlement building or vehicle.
#[derive(Debug)]
pub struct RepairEvaMalfunction {
    site: EvaSite,
    rate: WorkRate,
    accident: AccidentModel,
    claim: Option<WorkClaim>,
}

impl RepairEvaMalfunction {
    pub fn new(constants: &Constants) -> Self {
        Self {
            // Target is chosen in `begin`.
            site: EvaSite::new(
                EntityId(String::new()),
                constants.repair_duration_min + constants.repair_duration_spread,
            ),
            rate: WorkRate::new(constants.repair_skill_rate),
            accident: AccidentModel::new(constants.repair_accident_chance),
            claim: None,
        }
    }

    pub fn claim(&self) -> Option<&WorkClaim> {
        self.claim.as_ref()
    }

    fn repairing_eva(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        if !eva::check_readiness(self, ctx) {
            return time;
        }
        let Some(claim) = self.claim.clone() else {
            ctx.set_phase(WALK_BACK_INSIDE);
            return time;
        };
        let work = eva::spend_site_time(self, time);
        let step = repair_step(ctx, &claim, work, self.rate, self.accident, "EVA repair");
        let leftover = match step {
            RepairStep::Working { leftover } => leftover,
            RepairStep::Done { leftover } => {
                ctx.leave_work(&claim);
                ctx.set_phase(WALK_BACK_INSIDE);
                leftover
            }
            RepairStep::Blocked => {
                ctx.leave_work(&claim);
                ctx.set_phase(WALK_BACK_INSIDE);
                work
            }
        };
        self.site.time_on_site -= leftover;
        time - work + leftover
    }
}

impl TaskBehavior for RepairEvaMalfunction {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Repair EVA Malfunction",
            duration: None,
            stress_modifier: EVA_REPAIR_STRESS,
            effort_driven: true,
            legal_locations: INDOORS,
            impact: Some(MECHANICS),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        eva::register(table);
        table.register(REPAIRING_EVA, Self::repairing_eva);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        eva::can_exit_airlock(ctx)?;
        let claim =
            claim_repair(ctx, RepairWork::Eva, |_| true).ok_or("no EVA repair needed")?;
        if !fit_parts(ctx, &claim) {
            ctx.leave_work(&claim);
            return Err("repair parts unavailable".to_string());
        }
        self.site.target = claim.entity.clone();
        self.claim = Some(claim);
        self.site.prepare(ctx, &[])?;
        Ok(WALK_TO_SITE)
    }

    fn clear_down(&mut self, ctx: &mut TaskCtx<'_, '_>) {
        eva::clear_down(self, ctx);
    }
}

impl EvaBehavior for RepairEvaMalfunction {
    const SITE_PHASE: TaskPhase = REPAIRING_EVA;

    fn eva(&mut self) -> &mut EvaSite {
        &mut self.site
    }
}
