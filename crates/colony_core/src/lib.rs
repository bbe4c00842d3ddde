//! `colony_core`: deterministic task engine for colonist and robot agents.
//!
//! No IO, no network. All randomness via the passed-in Rng.

pub mod accident;
pub mod behaviors;
mod engine;
mod error;
pub mod eva;
pub mod lease;
pub mod malfunction;
pub mod phase;
mod random;
pub mod skills;
pub mod task;
mod types;
pub mod work_rate;

pub use engine::{end_all_tasks, release_orphaned, tick};
pub use error::TaskError;
pub use malfunction::{
    MaintenanceLedger, Malfunction, MalfunctionManager, PartsTransfer, WorkBucket, WorkClaim,
};
pub use random::{choose_weighted, generate_uuid, roll_percent};
pub use task::{ActiveTask, Advance, SimContext, TaskOutcome};
pub use types::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

pub(crate) fn emit(counters: &mut Counters, tick: u64, event: Event) -> EventEnvelope {
    let id = EventId(format!("evt_{:06}", counters.next_event_id));
    counters.next_event_id += 1;
    EventEnvelope { id, tick, event }
}

#[cfg(test)]
mod tests;
