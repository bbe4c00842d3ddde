use tracing::warn;

use crate::accident::{check_for_accident, AccidentModel};
use crate::eva::{self, EvaBehavior, EvaSite, WALK_TO_SITE};
use crate::phase::{PhaseTable, TaskPhase};
use crate::skills::ExperienceImpact;
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::{
    EntityId, Event, LocationClass, PartId, SkillType, PART_ROCK_SAMPLE, PART_SAMPLE_CONTAINER,
};

pub const COLLECTING: TaskPhase = TaskPhase::new("COLLECTING");

const INDOORS: &[LocationClass] = &[LocationClass::InSettlement, LocationClass::InVehicle];
const FIELD_STRESS: f64 = 0.2;

const AREOLOGY: ExperienceImpact = ExperienceImpact {
    skill: SkillType::Areology,
    points_per_millisol: 0.05,
};

/// EVA to collect rock samples around a target entity. Takes one sample
/// container if the store has one; samples that do not fit are dropped, not
/// retried.
#[derive(Debug)]
pub struct FieldSampling {
    site: EvaSite,
    /// Fraction of the next sample already gathered.
    progress: f64,
    collected: u32,
    dropped: u32,
}

impl FieldSampling {
    pub fn new(target: EntityId, site_duration: f64) -> Self {
        Self {
            site: EvaSite::new(target, site_duration),
            progress: 0.0,
            collected: 0,
            dropped: 0,
        }
    }

    pub fn collected(&self) -> u32 {
        self.collected
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn collecting(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        if !eva::check_readiness(self, ctx) {
            return time;
        }
        let work = eva::spend_site_time(self, time);
        let constants = ctx.constants();
        let rate = constants.sample_units_per_millisol;
        let per_container = constants.sample_container_capacity;
        let accident = AccidentModel::new(constants.fieldwork_accident_chance);

        self.progress += work * rate;
        let whole = self.progress.floor();
        self.progress -= whole;
        let units = whole as u32;
        if units > 0 {
            let containers = eva::carried(ctx, &PartId(PART_SAMPLE_CONTAINER.to_string()));
            let capacity = containers * per_container;
            let sample = PartId(PART_ROCK_SAMPLE.to_string());
            let lost = eva::stow(ctx, &sample, units, capacity);
            self.collected += units - lost;
            if lost > 0 {
                self.dropped += lost;
                warn!(agent = %ctx.agent_id(), lost, "sample containers full, dropping samples");
                let agent = ctx.agent_id().clone();
                ctx.sim.emit(Event::SamplesDropped { agent, units: lost });
            }
        }

        ctx.add_experience(work);
        let skill = ctx.skill_level(SkillType::EvaOperations);
        let agent = ctx.agent_id().clone();
        let target = self.site.target.clone();
        check_for_accident(ctx.sim, accident, &target, work, skill, "field sampling", &agent);
        time - work
    }
}

impl TaskBehavior for FieldSampling {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Field Sampling",
            duration: None,
            stress_modifier: FIELD_STRESS,
            effort_driven: true,
            legal_locations: INDOORS,
            impact: Some(AREOLOGY),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        eva::register(table);
        table.register(COLLECTING, Self::collecting);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        let containers = PartId(PART_SAMPLE_CONTAINER.to_string());
        self.site.prepare(ctx, &[(containers, 1)])?;
        Ok(WALK_TO_SITE)
    }

    fn clear_down(&mut self, ctx: &mut TaskCtx<'_, '_>) {
        eva::clear_down(self, ctx);
    }
}

impl EvaBehavior for FieldSampling {
    const SITE_PHASE: TaskPhase = COLLECTING;

    fn eva(&mut self) -> &mut EvaSite {
        &mut self.site
    }
}
