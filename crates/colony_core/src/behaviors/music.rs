use crate::phase::{PhaseTable, TaskPhase};
use crate::task::{TaskBehavior, TaskConfig, TaskCtx};
use crate::{Constants, LocationClass};

pub const FINDING_SONG: TaskPhase = TaskPhase::new("FINDING_SONG");
pub const LISTENING: TaskPhase = TaskPhase::new("LISTENING");

const INDOORS: &[LocationClass] = &[LocationClass::InSettlement, LocationClass::InVehicle];
const MUSIC_STRESS: f64 = -0.5;

/// Picks a song, then listens. Picking takes a fixed short time and hands the
/// rest of the tick straight to listening.
#[derive(Debug)]
pub struct ListenToMusic {
    duration: f64,
    find_song_time: f64,
    searched: f64,
}

impl ListenToMusic {
    pub fn new(constants: &Constants) -> Self {
        Self {
            duration: constants.music_duration,
            find_song_time: constants.find_song_time,
            searched: 0.0,
        }
    }

    fn finding_song(&mut self, ctx: &mut TaskCtx<'_, '_>, time: f64) -> f64 {
        let step = (self.find_song_time - self.searched).max(0.0).min(time);
        self.searched += step;
        if self.searched >= self.find_song_time {
            ctx.set_phase(LISTENING);
        }
        time - step
    }

    fn listening(&mut self, _ctx: &mut TaskCtx<'_, '_>, _time: f64) -> f64 {
        0.0
    }
}

impl TaskBehavior for ListenToMusic {
    fn config(&self) -> TaskConfig {
        TaskConfig {
            name: "Listen To Music",
            duration: Some(self.duration),
            stress_modifier: MUSIC_STRESS,
            effort_driven: false,
            legal_locations: INDOORS,
            impact: None,
        }
    }

    fn register(table: &mut PhaseTable<Self>) {
        table.register(FINDING_SONG, Self::finding_song);
        table.register(LISTENING, Self::listening);
    }

    fn begin(&mut self, _ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String> {
        Ok(FINDING_SONG)
    }
}
