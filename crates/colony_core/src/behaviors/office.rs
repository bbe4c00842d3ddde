use tracing::debug;

use crate::phase::{PhaseTable, TaskPhase};
use crate::skills::ExperienceImpact;
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::{Constants, FacilityKind, LocationClass, SkillType};

pub const REVIEWING: TaskPhase = TaskPhase::new("REVIEWING");

const SETTLEMENT: &[LocationClass] = &[LocationClass::InSettlement];
const ADMINISTRATION_STRESS: f64 = 0.1;

const MANAGEMENT: ExperienceImpact = ExperienceImpact {
    skill: SkillType::Management,
    points_per_millisol: 0.02,
};

/// Paperwork. Prefers an office seat, settles for a dining table and
/// works standing up when both are full.
#[derive(Debug)]
pub struct Administration {
    duration: f64,
}

impl Administration {
    pub fn new(constants: &Constants) -> Self {
        Self {
            duration: constants.administration_duration,
        }
    }

    fn reviewing(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        ctx.add_experience(time);
        0.0
    }
}

impl TaskBehavior for Administration {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Administration",
            duration: Some(self.duration),
            stress_modifier: ADMINISTRATION_STRESS,
            effort_driven: true,
            legal_locations: SETTLEMENT,
            impact: Some(MANAGEMENT),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(REVIEWING, Self::reviewing);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        let seat = ctx
            .lease_facility(FacilityKind::Office)
            .or_else(|| ctx.lease_facility(FacilityKind::Dining));
        if seat.is_none() {
            debug!(agent = %ctx.agent_id(), "no office or dining seat, working unseated");
        }
        Ok(REVIEWING)
    }
}
