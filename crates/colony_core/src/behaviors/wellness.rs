use crate::phase::{PhaseTable, TaskPhase};
use crate::skills::ExperienceImpact;
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::{Constants, FacilityKind, LocationClass, SkillType};

pub const EXERCISING: TaskPhase = TaskPhase::new("EXERCISING");
pub const RESTING: TaskPhase = TaskPhase::new("RESTING");

const SETTLEMENT: &[LocationClass] = &[LocationClass::InSettlement];
const WORKOUT_STRESS: f64 = -0.3;
const SICK_BAY_STRESS: f64 = -0.2;

// ---------------------------------------------------------------------------
// Workout
// ---------------------------------------------------------------------------

/// Exercise, in a gym when a machine is free.
#[derive(Debug)]
pub struct Workout {
    duration: f64,
}

impl Workout {
    pub fn new(constants: &Constants) -> Self {
        Self {
            duration: constants.workout_duration,
        }
    }

    fn exercising(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        ctx.add_experience(time);
        0.0
    }
}

impl TaskBehavior for Workout {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Workout",
            duration: Some(self.duration),
            stress_modifier: WORKOUT_STRESS,
            effort_driven: true,
            legal_locations: SETTLEMENT,
            impact: Some(ExperienceImpact {
                skill: SkillType::EvaOperations,
                points_per_millisol: 0.01,
            }),
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(EXERCISING, Self::exercising);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        // A full gym is no reason to skip the workout.
        ctx.lease_facility(FacilityKind::Gym);
        Ok(EXERCISING)
    }
}

// ---------------------------------------------------------------------------
// RestInSickBay
// ---------------------------------------------------------------------------

/// Bed rest. Needs a free medical bed.
#[derive(Debug)]
pub struct RestInSickBay {
    duration: f64,
    recovery: f64,
}

impl RestInSickBay {
    pub fn new(constants: &Constants) -> Self {
        Self {
            duration: constants.sick_bay_duration,
            recovery: constants.rest_fatigue_recovery_per_millisol,
        }
    }

    fn resting(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        let recovery = self.recovery;
        if let Some(agent) = ctx.agent_mut() {
            agent.condition.adjust_fatigue(-time * recovery);
        }
        0.0
    }
}

impl TaskBehavior for RestInSickBay {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Rest In Sick Bay",
            duration: Some(self.duration),
            stress_modifier: SICK_BAY_STRESS,
            effort_driven: false,
            legal_locations: SETTLEMENT,
            impact: None,
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(RESTING, Self::resting);
    }

    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        ctx.lease_facility(FacilityKind::MedicalBay)
            .ok_or("no medical bed free")?;
        Ok(RESTING)
    }
}
