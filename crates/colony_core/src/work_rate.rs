use serde::{Deserialize, Serialize};

use crate::AgentKind;

/// Skill-modified work rate for one kind of work.
///
/// `per_level` is the bonus per skill level above one (0.2 for general
/// maintenance and repair, 0.4 for specialised vehicle work).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkRate {
    pub per_level: f64,
}

impl WorkRate {
    pub const fn new(per_level: f64) -> Self {
        Self { per_level }
    }

    /// Multiplier applied to raw time for a worker at `skill`.
    ///
    /// Skill 0 halves the rate, skill 1 is neutral and each level above one
    /// adds `per_level`.
    pub fn skill_factor(&self, skill: u32) -> f64 {
        match skill {
            0 => 0.5,
            1 => 1.0,
            s => 1.0 + self.per_level * f64::from(s),
        }
    }

    /// Effective work produced by `raw` millisols of effort. Robots move
    /// slower, so their time is halved before the skill curve.
    pub fn effective_time(&self, raw: f64, skill: u32, kind: AgentKind) -> f64 {
        raw * agent_factor(kind) * self.skill_factor(skill)
    }

    /// Raw time that produces `effective` work. Used to hand unused effective
    /// work back to the scheduler as raw leftover time.
    pub fn raw_time(&self, effective: f64, skill: u32, kind: AgentKind) -> f64 {
        effective / (agent_factor(kind) * self.skill_factor(skill))
    }
}

fn agent_factor(kind: AgentKind) -> f64 {
    match kind {
        AgentKind::Person => 1.0,
        AgentKind::Robot => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPAIR: WorkRate = WorkRate::new(0.2);

    #[test]
    fn unskilled_halves_time() {
        assert!((REPAIR.effective_time(10.0, 0, AgentKind::Person) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn skill_one_is_neutral() {
        assert!((REPAIR.effective_time(10.0, 1, AgentKind::Person) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn higher_skill_scales_linearly() {
        // 10 * (1 + 0.2 * 3)
        assert!((REPAIR.effective_time(10.0, 3, AgentKind::Person) - 16.0).abs() < 1e-9);
        let vehicle = WorkRate::new(0.4);
        // 10 * (1 + 0.4 * 2)
        assert!((vehicle.effective_time(10.0, 2, AgentKind::Person) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn robot_penalty_applies_before_skill() {
        // 10 / 2 * (1 + 0.2 * 2)
        assert!((REPAIR.effective_time(10.0, 2, AgentKind::Robot) - 7.0).abs() < 1e-9);
        assert!((REPAIR.effective_time(10.0, 0, AgentKind::Robot) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn raw_time_inverts_effective_time() {
        for skill in 0..6 {
            let eff = REPAIR.effective_time(7.0, skill, AgentKind::Robot);
            assert!((REPAIR.raw_time(eff, skill, AgentKind::Robot) - 7.0).abs() < 1e-9);
        }
    }
}
