//! The phase-driven task state machine.
//!
//! Every behavior is a plain struct implementing [`TaskBehavior`]. The single
//! generic [`TaskMachine`] owns the phase table, time budget, leases and
//! repair claims, and guarantees cleanup on every exit path.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::lease::{select_facility, LeaseHandle, LeaseSet};
use crate::malfunction::WorkClaim;
use crate::phase::{PhaseTable, TaskPhase};
use crate::random::generate_uuid;
use crate::skills::{stress_delta, ExperienceImpact};
use crate::{
    Agent, AgentId, AgentKind, Constants, Event, EventEnvelope, EventLevel, FacilityId,
    FacilityKind, LocationClass, SkillType, TaskContent, World,
};

/// Leftover time below this is treated as fully consumed.
const TIME_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Simulation context
// ---------------------------------------------------------------------------

/// Everything a task may touch during one call. Passed explicitly into
/// `start` and `advance`; there are no global lookups.
pub struct SimContext<'a> {
    pub world: &'a mut World,
    pub content: &'a TaskContent,
    pub rng: &'a mut dyn RngCore,
    pub event_level: EventLevel,
    pub events: Vec<EventEnvelope>,
}

impl<'a> SimContext<'a> {
    pub fn new(
        world: &'a mut World,
        content: &'a TaskContent,
        rng: &'a mut dyn RngCore,
        event_level: EventLevel,
    ) -> Self {
        Self {
            world,
            content,
            rng,
            event_level,
            events: Vec::new(),
        }
    }

    pub fn constants(&self) -> &'a Constants {
        &self.content.constants
    }

    pub fn emit(&mut self, event: Event) {
        let tick = self.world.meta.tick;
        self.events
            .push(crate::emit(&mut self.world.counters, tick, event));
    }

    /// Emits only at `EventLevel::Debug`.
    pub fn emit_debug(&mut self, event: Event) {
        if self.event_level == EventLevel::Debug {
            self.emit(event);
        }
    }

    pub fn into_events(self) -> Vec<EventEnvelope> {
        self.events
    }
}

// ---------------------------------------------------------------------------
// Task status and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Running,
    Completed,
    Aborted,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    /// Time the task did not use; the scheduler may hand it to the next task.
    pub leftover: f64,
    pub outcome: TaskOutcome,
}

/// Static facts about a behavior, read once when the task starts.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub name: &'static str,
    /// Total work-time budget. `None` leaves termination to phase logic.
    pub duration: Option<f64>,
    /// Stress per millisol; negative values relax.
    pub stress_modifier: f64,
    /// Effort-driven tasks tire the agent and stop when it is incapacitated.
    pub effort_driven: bool,
    pub legal_locations: &'static [LocationClass],
    pub impact: Option<ExperienceImpact>,
}

/// A concrete behavior: its data plus phase handlers.
pub trait TaskBehavior: fmt::Debug + Send + Sized + 'static {
    fn config(&self) -> TaskConfig;

    /// Registers every phase the behavior may enter.
    fn register(table: &mut PhaseTable<Self>);

    /// Checks preconditions and takes resources. Returns the first phase, or
    /// the reason the task could not start.
    fn begin(&mut self, ctx: &mut TaskCtx<'_, '_>) -> Result<TaskPhase, String>;

    /// Releases behavior-specific resources. Runs exactly once on every
    /// termination path, before leases and claims are released.
    fn clear_down(&mut self, _ctx: &mut TaskCtx<'_, '_>) {}
}

// ---------------------------------------------------------------------------
// Per-task control block
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskControl {
    id: Uuid,
    agent: AgentId,
    name: &'static str,
    phase: Option<TaskPhase>,
    outcome: TaskOutcome,
    /// Terminal transition requested by a handler, applied after it returns.
    pending: Option<(TaskOutcome, Option<String>)>,
    time_completed: f64,
    impact: Option<ExperienceImpact>,
    leases: LeaseSet,
    claims: SmallVec<[WorkClaim; 1]>,
}

impl TaskControl {
    fn release_all(&mut self, sim: &mut SimContext<'_>) {
        for handle in self.leases.drain(..) {
            if sim.world.facilities.release(&handle) {
                sim.emit(Event::LeaseReleased {
                    agent: handle.agent,
                    facility: handle.facility,
                });
            }
        }
        for claim in self.claims.drain(..) {
            if let Some(malfunction) = sim
                .world
                .entities
                .get_mut(&claim.entity)
                .and_then(|e| e.malfunctions.get_mut(&claim.malfunction))
            {
                malfunction.leave_work(claim.category, &self.agent);
            }
        }
    }
}

/// Handle given to behaviors while they run: the world plus their own
/// control block.
pub struct TaskCtx<'s, 'a> {
    pub sim: &'s mut SimContext<'a>,
    control: &'s mut TaskControl,
}

impl TaskCtx<'_, '_> {
    pub fn agent_id(&self) -> &AgentId {
        &self.control.agent
    }

    pub fn task_name(&self) -> &'static str {
        self.control.name
    }

    pub fn phase(&self) -> Option<TaskPhase> {
        self.control.phase
    }

    pub fn time_completed(&self) -> f64 {
        self.control.time_completed
    }

    pub fn constants(&self) -> &Constants {
        self.sim.constants()
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.sim.world.agents.get(&self.control.agent)
    }

    pub fn agent_mut(&mut self) -> Option<&mut Agent> {
        self.sim.world.agents.get_mut(&self.control.agent)
    }

    pub fn agent_kind(&self) -> AgentKind {
        self.agent().map_or(AgentKind::Person, |a| a.kind)
    }

    /// Skill level scaled by the agent's performance.
    pub fn skill_level(&self, skill: SkillType) -> u32 {
        self.agent().map_or(0, |a| {
            a.skills.effective_level(skill, a.condition.performance)
        })
    }

    pub fn set_phase(&mut self, phase: TaskPhase) {
        if self.control.phase == Some(phase) {
            return;
        }
        self.control.phase = Some(phase);
        let event = Event::TaskPhaseChanged {
            agent: self.control.agent.clone(),
            task: self.control.name.to_string(),
            phase: phase.to_string(),
        };
        self.sim.emit_debug(event);
    }

    /// Ends the task normally once the current handler returns.
    pub fn complete(&mut self) {
        self.control.pending.get_or_insert((TaskOutcome::Completed, None));
    }

    /// Ends the task early once the current handler returns.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.control
            .pending
            .get_or_insert((TaskOutcome::Aborted, Some(reason.into())));
    }

    pub fn is_ending(&self) -> bool {
        self.control.pending.is_some() || self.control.outcome != TaskOutcome::Running
    }

    /// Takes a seat in `facility` for the rest of the task.
    pub fn try_acquire(&mut self, facility: &FacilityId) -> bool {
        let Some(handle) = self
            .sim
            .world
            .facilities
            .try_acquire(facility, &self.control.agent)
        else {
            return false;
        };
        if !self.control.leases.contains(&handle) {
            self.sim.emit(Event::LeaseAcquired {
                agent: handle.agent.clone(),
                facility: handle.facility.clone(),
            });
            self.control.leases.push(handle);
        }
        true
    }

    pub fn leases(&self) -> &[LeaseHandle] {
        &self.control.leases
    }

    /// Picks a facility of `kind` with room and takes a seat in it.
    pub fn lease_facility(&mut self, kind: FacilityKind) -> Option<FacilityId> {
        let sim = &mut *self.sim;
        let agent = sim.world.agents.get(&self.control.agent)?;
        let facility = select_facility(&sim.world.facilities, kind, agent, &mut *sim.rng)?;
        self.try_acquire(&facility).then_some(facility)
    }

    /// Claims a repairer slot on a malfunction category. Fails when the
    /// category is full or the malfunction is gone.
    pub fn join_work(&mut self, claim: WorkClaim) -> bool {
        let max = self.sim.constants().max_repairers_per_category;
        let joined = self
            .sim
            .world
            .entities
            .get_mut(&claim.entity)
            .and_then(|e| e.malfunctions.get_mut(&claim.malfunction))
            .is_some_and(|m| m.join_work(claim.category, &self.control.agent, max));
        if joined && !self.control.claims.contains(&claim) {
            self.control.claims.push(claim);
        }
        joined
    }

    /// Gives up a claim early. Credited work stays on the ledger.
    pub fn leave_work(&mut self, claim: &WorkClaim) {
        self.control.claims.retain(|c| c != claim);
        if let Some(malfunction) = self
            .sim
            .world
            .entities
            .get_mut(&claim.entity)
            .and_then(|e| e.malfunctions.get_mut(&claim.malfunction))
        {
            malfunction.leave_work(claim.category, &self.control.agent);
        }
    }

    /// Awards experience for `time` of work on the task's declared skill.
    pub fn add_experience(&mut self, time: f64) {
        let Some(impact) = self.control.impact else {
            return;
        };
        let agent_id = self.control.agent.clone();
        let Some(agent) = self.sim.world.agents.get_mut(&agent_id) else {
            return;
        };
        let points = impact.points(time, agent.experience_aptitude);
        if let Some(level) = agent.skills.add_experience(impact.skill, points) {
            self.sim.emit(Event::SkillLevelUp {
                agent: agent_id,
                skill: impact.skill,
                level,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Object-safe task interface
// ---------------------------------------------------------------------------

/// A running task as seen by the scheduler.
pub trait ActiveTask: fmt::Debug + Send {
    fn id(&self) -> Uuid;
    fn name(&self) -> &'static str;
    fn phase(&self) -> Option<TaskPhase>;
    fn outcome(&self) -> TaskOutcome;
    fn time_completed(&self) -> f64;
    fn duration(&self) -> Option<f64>;

    fn is_done(&self) -> bool {
        self.outcome() != TaskOutcome::Running
    }

    /// Runs phases for up to `time` millisols.
    fn advance(&mut self, sim: &mut SimContext<'_>, time: f64) -> Result<Advance, TaskError>;

    /// Cancels the task with full cleanup. A no-op on a finished task.
    fn end(&mut self, sim: &mut SimContext<'_>, reason: &str);
}

// ---------------------------------------------------------------------------
// Task machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskMachine<B: TaskBehavior> {
    behavior: B,
    table: PhaseTable<B>,
    config: TaskConfig,
    control: TaskControl,
}

/// Starts `behavior` for `agent`.
///
/// Unmet preconditions are not errors: the task is returned already
/// `Aborted` with no work done ("born dead"). Only an unknown agent or a
/// first phase that was never registered is an error.
pub fn start<B: TaskBehavior>(
    behavior: B,
    sim: &mut SimContext<'_>,
    agent: &AgentId,
) -> Result<TaskMachine<B>, TaskError> {
    let Some(location) = sim.world.agents.get(agent).map(|a| a.location.class()) else {
        return Err(TaskError::UnknownAgent(agent.clone()));
    };
    let config = behavior.config();
    let mut table = PhaseTable::new();
    B::register(&mut table);
    let mut task = TaskMachine {
        behavior,
        table,
        control: TaskControl {
            id: generate_uuid(&mut *sim.rng),
            agent: agent.clone(),
            name: config.name,
            phase: None,
            outcome: TaskOutcome::Running,
            pending: None,
            time_completed: 0.0,
            impact: config.impact,
            leases: LeaseSet::new(),
            claims: SmallVec::new(),
        },
        config,
    };

    if !task.config.legal_locations.contains(&location) {
        task.born_dead(sim, format!("cannot be done {location:?}"));
        return Ok(task);
    }
    if task.config.effort_driven && task.agent_incapacitated(sim) {
        task.born_dead(sim, "agent incapacitated".to_string());
        return Ok(task);
    }

    let first = {
        let mut ctx = TaskCtx {
            sim: &mut *sim,
            control: &mut task.control,
        };
        task.behavior.begin(&mut ctx)
    };
    match first {
        Err(reason) => task.born_dead(sim, reason),
        Ok(phase) if !task.table.contains(phase) => {
            task.finish(sim, TaskOutcome::Aborted, Some("unregistered first phase".to_string()));
            return Err(TaskError::UnregisteredPhase {
                task: task.control.name.to_string(),
                phase: phase.to_string(),
            });
        }
        Ok(phase) => {
            task.control.phase = Some(phase);
            debug!(agent = %agent, task = task.control.name, %phase, "task started");
            sim.emit(Event::TaskStarted {
                agent: agent.clone(),
                task: task.control.name.to_string(),
                phase: phase.to_string(),
            });
        }
    }
    Ok(task)
}

impl<B: TaskBehavior> TaskMachine<B> {
    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn leases(&self) -> &[LeaseHandle] {
        &self.control.leases
    }

    pub fn claims(&self) -> &[WorkClaim] {
        &self.control.claims
    }

    fn agent_incapacitated(&self, sim: &SimContext<'_>) -> bool {
        sim.world
            .agents
            .get(&self.control.agent)
            .map_or(true, |a| a.condition.is_incapacitated())
    }

    fn born_dead(&mut self, sim: &mut SimContext<'_>, reason: String) {
        debug!(
            agent = %self.control.agent,
            task = self.control.name,
            reason = %reason,
            "task could not start"
        );
        self.finish(sim, TaskOutcome::Aborted, Some(reason));
    }

    /// Terminal transition. Idempotent: cleanup runs once.
    fn finish(&mut self, sim: &mut SimContext<'_>, outcome: TaskOutcome, reason: Option<String>) {
        if self.control.outcome != TaskOutcome::Running {
            return;
        }
        self.control.outcome = outcome;
        {
            let mut ctx = TaskCtx {
                sim: &mut *sim,
                control: &mut self.control,
            };
            self.behavior.clear_down(&mut ctx);
        }
        self.control.pending = None;
        self.control.release_all(sim);
        self.control.phase = None;

        let agent = self.control.agent.clone();
        let task = self.control.name.to_string();
        if outcome == TaskOutcome::Completed {
            debug!(agent = %agent, task = %task, time = self.control.time_completed, "task completed");
            sim.emit(Event::TaskCompleted {
                agent,
                task,
                time_completed: self.control.time_completed,
            });
        } else {
            let reason = reason.unwrap_or_else(|| "ended".to_string());
            info!(agent = %agent, task = %task, reason = %reason, "task ended early");
            sim.emit(Event::TaskAborted {
                agent,
                task,
                reason,
            });
        }
    }

    fn contract_violation(&mut self, sim: &mut SimContext<'_>, error: TaskError) -> TaskError {
        warn!(agent = %self.control.agent, %error, "task contract violation");
        self.finish(sim, TaskOutcome::Aborted, Some(error.to_string()));
        error
    }

    fn apply_condition(&self, sim: &mut SimContext<'_>, consumed: f64) {
        let constants = sim.constants();
        let Some(agent) = sim.world.agents.get_mut(&self.control.agent) else {
            return;
        };
        let skill = self.config.impact.map_or(0, |impact| {
            agent
                .skills
                .effective_level(impact.skill, agent.condition.performance)
        });
        agent.condition.adjust_stress(stress_delta(
            consumed,
            self.config.stress_modifier,
            skill,
            constants.skill_stress_modifier,
        ));
        if self.config.effort_driven {
            agent
                .condition
                .adjust_fatigue(consumed * constants.effort_fatigue_per_millisol);
        }
    }

    fn budget_left(&self) -> f64 {
        self.config
            .duration
            .map_or(f64::INFINITY, |d| (d - self.control.time_completed).max(0.0))
    }
}

impl<B: TaskBehavior> ActiveTask for TaskMachine<B> {
    fn id(&self) -> Uuid {
        self.control.id
    }

    fn name(&self) -> &'static str {
        self.control.name
    }

    fn phase(&self) -> Option<TaskPhase> {
        self.control.phase
    }

    fn outcome(&self) -> TaskOutcome {
        self.control.outcome
    }

    fn time_completed(&self) -> f64 {
        self.control.time_completed
    }

    fn duration(&self) -> Option<f64> {
        self.config.duration
    }

    fn advance(&mut self, sim: &mut SimContext<'_>, time: f64) -> Result<Advance, TaskError> {
        let limit = sim.constants().max_phase_dispatches;
        let mut left = time.max(0.0);
        let mut dispatches = 0;

        while left > 0.0 && self.control.outcome == TaskOutcome::Running {
            let Some(phase) = self.control.phase else {
                let error = TaskError::NullPhase {
                    task: self.control.name.to_string(),
                };
                return Err(self.contract_violation(sim, error));
            };
            if dispatches >= limit {
                let error = TaskError::RunawayPhase {
                    task: self.control.name.to_string(),
                    phase: phase.to_string(),
                    limit,
                };
                return Err(self.contract_violation(sim, error));
            }
            let Some(handler) = self.table.handler(phase) else {
                let error = TaskError::UnregisteredPhase {
                    task: self.control.name.to_string(),
                    phase: phase.to_string(),
                };
                return Err(self.contract_violation(sim, error));
            };
            if self.config.effort_driven && self.agent_incapacitated(sim) {
                self.finish(sim, TaskOutcome::Aborted, Some("agent incapacitated".to_string()));
                break;
            }
            dispatches += 1;

            let give = left.min(self.budget_left());
            let returned = {
                let mut ctx = TaskCtx {
                    sim: &mut *sim,
                    control: &mut self.control,
                };
                handler(&mut self.behavior, &mut ctx, give)
            };
            let consumed = give - returned.clamp(0.0, give);
            self.control.time_completed += consumed;
            left -= consumed;
            if consumed > 0.0 {
                self.apply_condition(sim, consumed);
            }

            if let Some((outcome, reason)) = self.control.pending.take() {
                self.finish(sim, outcome, reason);
            } else if let Some(duration) = self.config.duration {
                if self.control.time_completed >= duration - TIME_EPSILON {
                    self.control.time_completed = duration;
                    self.finish(sim, TaskOutcome::Completed, None);
                }
            }
            if left < TIME_EPSILON {
                left = 0.0;
            }
        }

        Ok(Advance {
            leftover: left,
            outcome: self.control.outcome,
        })
    }

    fn end(&mut self, sim: &mut SimContext<'_>, reason: &str) {
        self.finish(sim, TaskOutcome::Aborted, Some(reason.to_string()));
    }
}
