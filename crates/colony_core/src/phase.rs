//! Task phases and the per-behavior phase handler table.

use std::fmt;

use ahash::AHashMap;

use crate::task::TaskCtx;

/// Named sub-state of a task. Phases are `const` values shared by every
/// task of the same kind and compare by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskPhase(&'static str);

impl TaskPhase {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Runs one phase for up to `time` millisols and returns the time it did not
/// use. A handler that switches phase returns the remainder so the next phase
/// runs in the same tick.
pub type PhaseHandler<B> = fn(&mut B, &mut TaskCtx<'_, '_>, f64) -> f64;

/// Phase → handler mapping for one behavior type. Built once when the task is
/// created; registration order is declaration order, not execution order.
pub struct PhaseTable<B> {
    order: Vec<TaskPhase>,
    handlers: AHashMap<TaskPhase, PhaseHandler<B>>,
}

impl<B> PhaseTable<B> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            handlers: AHashMap::new(),
        }
    }

    /// Appends a phase. Registering the same phase twice is a programming error.
    pub fn register(&mut self, phase: TaskPhase, handler: PhaseHandler<B>) {
        assert!(
            !self.handlers.contains_key(&phase),
            "phase {phase} registered twice"
        );
        self.order.push(phase);
        self.handlers.insert(phase, handler);
    }

    pub fn handler(&self, phase: TaskPhase) -> Option<PhaseHandler<B>> {
        self.handlers.get(&phase).copied()
    }

    pub fn contains(&self, phase: TaskPhase) -> bool {
        self.handlers.contains_key(&phase)
    }

    /// Registered phases in declaration order.
    pub fn phases(&self) -> &[TaskPhase] {
        &self.order
    }
}

impl<B> Default for PhaseTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> fmt::Debug for PhaseTable<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: TaskPhase = TaskPhase::new("IDLE");
    const BUSY: TaskPhase = TaskPhase::new("BUSY");

    struct Dummy;

    fn consume_all(_: &mut Dummy, _: &mut TaskCtx<'_, '_>, _: f64) -> f64 {
        0.0
    }

    #[test]
    fn phases_compare_by_name() {
        assert_eq!(IDLE, TaskPhase::new("IDLE"));
        assert_ne!(IDLE, BUSY);
    }

    #[test]
    fn registration_keeps_declaration_order() {
        let mut table = PhaseTable::<Dummy>::new();
        table.register(BUSY, consume_all);
        table.register(IDLE, consume_all);
        assert_eq!(table.phases(), &[BUSY, IDLE]);
        assert!(table.contains(IDLE));
        assert!(table.handler(TaskPhase::new("MISSING")).is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut table = PhaseTable::<Dummy>::new();
        table.register(IDLE, consume_all);
        table.register(IDLE, consume_all);
    }
}
