//! Skill levels, experience gain and the physical-condition sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SkillType;

/// Experience points needed to advance from `level` to `level + 1`.
pub fn experience_for_level(level: u32) -> f64 {
    25.0 * 2f64.powi(i32::try_from(level).unwrap_or(i32::MAX))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillManager {
    levels: BTreeMap<SkillType, u32>,
    experience: BTreeMap<SkillType, f64>,
}

impl SkillManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_level(mut self, skill: SkillType, level: u32) -> Self {
        self.levels.insert(skill, level);
        self
    }

    pub fn level(&self, skill: SkillType) -> u32 {
        self.levels.get(&skill).copied().unwrap_or(0)
    }

    pub fn experience(&self, skill: SkillType) -> f64 {
        self.experience.get(&skill).copied().unwrap_or(0.0)
    }

    /// Level scaled down by the agent's current performance, rounded down.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn effective_level(&self, skill: SkillType, performance: f64) -> u32 {
        (f64::from(self.level(skill)) * performance.clamp(0.0, 1.0)).floor() as u32
    }

    /// Adds points and applies any level-ups. Returns the new level if it changed.
    pub fn add_experience(&mut self, skill: SkillType, points: f64) -> Option<u32> {
        if points <= 0.0 {
            return None;
        }
        let start = self.level(skill);
        let mut level = start;
        let mut pool = self.experience(skill) + points;
        while pool >= experience_for_level(level) {
            pool -= experience_for_level(level);
            level += 1;
        }
        self.experience.insert(skill, pool);
        self.levels.insert(skill, level);
        (level != start).then_some(level)
    }
}

/// Experience awarded by a kind of work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperienceImpact {
    pub skill: SkillType,
    pub points_per_millisol: f64,
}

impl ExperienceImpact {
    /// Points for `time` of work, adjusted by aptitude (50 is neutral).
    pub fn points(&self, time: f64, aptitude: u32) -> f64 {
        let aptitude_mod = (f64::from(aptitude) - 50.0) / 100.0;
        (time * self.points_per_millisol * (1.0 + aptitude_mod)).max(0.0)
    }
}

/// Stress from `time` of a task with `modifier`. Skilled workers find
/// stressful work easier, but skill never turns stress into relief.
pub fn stress_delta(time: f64, modifier: f64, skill: u32, skill_stress_modifier: f64) -> f64 {
    let base = time * modifier;
    if modifier <= 0.0 {
        return base;
    }
    let relief = time * f64::from(skill) * skill_stress_modifier / 100.0;
    (base - relief).max(0.0)
}

/// Stress, fatigue and performance of an agent. The engine writes deltas;
/// the formulas that produce them live with each task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCondition {
    pub stress: f64,
    pub fatigue: f64,
    /// 0 means incapacitated.
    pub performance: f64,
}

impl Default for PhysicalCondition {
    fn default() -> Self {
        Self {
            stress: 0.0,
            fatigue: 0.0,
            performance: 1.0,
        }
    }
}

impl PhysicalCondition {
    pub fn adjust_stress(&mut self, delta: f64) {
        self.stress = (self.stress + delta).clamp(0.0, 100.0);
    }

    pub fn adjust_fatigue(&mut self, delta: f64) {
        self.fatigue = (self.fatigue + delta).clamp(0.0, 100.0);
    }

    pub fn set_performance(&mut self, value: f64) {
        self.performance = value.clamp(0.0, 1.0);
    }

    pub fn is_incapacitated(&self) -> bool {
        self.performance <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_up_thresholds_double() {
        assert!((experience_for_level(0) - 25.0).abs() < 1e-9);
        assert!((experience_for_level(2) - 100.0).abs() < 1e-9);

        let mut skills = SkillManager::new();
        assert_eq!(skills.add_experience(SkillType::Mechanics, 24.0), None);
        assert_eq!(skills.add_experience(SkillType::Mechanics, 1.0), Some(1));
        // 50 more to reach level 2, carrying nothing over.
        assert_eq!(skills.add_experience(SkillType::Mechanics, 60.0), Some(2));
        assert!((skills.experience(SkillType::Mechanics) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn effective_level_scales_with_performance() {
        let skills = SkillManager::new().with_level(SkillType::Mechanics, 5);
        assert_eq!(skills.effective_level(SkillType::Mechanics, 1.0), 5);
        assert_eq!(skills.effective_level(SkillType::Mechanics, 0.5), 2);
        assert_eq!(skills.effective_level(SkillType::Mechanics, 0.0), 0);
    }

    #[test]
    fn aptitude_modifies_points() {
        let impact = ExperienceImpact {
            skill: SkillType::Mechanics,
            points_per_millisol: 0.1,
        };
        assert!((impact.points(10.0, 50) - 1.0).abs() < 1e-9);
        assert!((impact.points(10.0, 100) - 1.5).abs() < 1e-9);
        assert!((impact.points(10.0, 0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn skill_reduces_stress_but_not_below_zero() {
        assert!((stress_delta(10.0, 0.5, 0, 25.0) - 5.0).abs() < 1e-9);
        assert!((stress_delta(10.0, 0.5, 1, 25.0) - 2.5).abs() < 1e-9);
        assert!(stress_delta(10.0, 0.5, 4, 25.0).abs() < 1e-9);
        // Relaxing tasks keep their relief regardless of skill.
        assert!((stress_delta(10.0, -0.2, 3, 25.0) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn condition_is_clamped() {
        let mut cond = PhysicalCondition::default();
        cond.adjust_stress(150.0);
        cond.adjust_fatigue(-5.0);
        cond.set_performance(2.0);
        assert!((cond.stress - 100.0).abs() < 1e-9);
        assert!(cond.fatigue.abs() < 1e-9);
        assert!((cond.performance - 1.0).abs() < 1e-9);
    }
}
