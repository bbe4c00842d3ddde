//! Probabilistic accidents during work and the malfunctions they cause.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::random::{choose_weighted, roll_percent};
use crate::task::SimContext;
use crate::{AgentId, EntityId, Event, Malfunction, MalfunctionDef, MalfunctionId};

/// Accident risk of one kind of work. `base_chance` is a percent per
/// millisol at skill level 3 on a fully worn entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccidentModel {
    pub base_chance: f64,
}

impl AccidentModel {
    pub const fn new(base_chance: f64) -> Self {
        Self { base_chance }
    }

    /// Percent chance of an accident over `elapsed` millisols.
    ///
    /// Novices (skill 0–3) multiply the chance by `4 - skill`; experts divide
    /// it by `skill - 2`. The entity's wear modifier scales the result.
    pub fn probability(&self, elapsed: f64, skill: u32, wear_modifier: f64) -> f64 {
        let chance = if skill <= 3 {
            self.base_chance * f64::from(4 - skill)
        } else {
            self.base_chance / f64::from(skill - 2)
        };
        chance * wear_modifier * elapsed
    }
}

/// Rolls for an accident on `entity`. On a hit, creates a series of
/// malfunctions on it and stresses everyone inside.
pub fn check_for_accident(
    sim: &mut SimContext<'_>,
    model: AccidentModel,
    entity: &EntityId,
    elapsed: f64,
    skill: u32,
    label: &str,
    actor: &AgentId,
) -> bool {
    let Some(wear_modifier) = sim
        .world
        .entities
        .get(entity)
        .map(|e| e.malfunctions.accident_modifier())
    else {
        return false;
    };
    let percent = model.probability(elapsed, skill, wear_modifier);
    if !roll_percent(&mut *sim.rng, percent) {
        return false;
    }

    info!(agent = %actor, entity = %entity, label, "accident");
    sim.emit(Event::AccidentOccurred {
        agent: actor.clone(),
        entity: entity.clone(),
        label: label.to_string(),
    });
    create_malfunction_series(sim, entity, label);

    let stress = sim.constants().accident_stress;
    for agent in sim.world.agents.values_mut() {
        if agent.location.entity() == Some(entity) {
            agent.condition.adjust_stress(stress);
        }
    }
    true
}

/// Creates one malfunction for certain, then keeps adding more, each with a
/// third of the previous chance.
pub fn create_malfunction_series(
    sim: &mut SimContext<'_>,
    entity: &EntityId,
    cause: &str,
) -> Vec<MalfunctionId> {
    let mut created = Vec::new();
    let mut chance = 100.0;
    while roll_percent(&mut *sim.rng, chance) {
        match spawn_malfunction(sim, entity, cause) {
            Some(id) => created.push(id),
            None => break,
        }
        chance /= 3.0;
    }
    created
}

/// Picks a template that applies to the entity's kind and adds it.
pub fn spawn_malfunction(
    sim: &mut SimContext<'_>,
    entity: &EntityId,
    cause: &str,
) -> Option<MalfunctionId> {
    let kind = sim.world.entities.get(entity)?.kind;
    let content = sim.content;
    let weights: Vec<(&MalfunctionDef, f64)> = content
        .malfunctions
        .iter()
        .filter(|def| def.scope.contains(&kind))
        .map(|def| (def, def.weight))
        .collect();
    let def = *choose_weighted(&weights, &mut *sim.rng)?;

    let id = MalfunctionId(format!("mal_{:04}", sim.world.counters.next_malfunction_id));
    sim.world.counters.next_malfunction_id += 1;
    let target = sim.world.entities.get_mut(entity)?;
    target
        .malfunctions
        .malfunctions
        .push(Malfunction::from_def(id.clone(), def));

    info!(entity = %entity, malfunction = %id, name = %def.name, cause, "malfunction");
    sim.emit(Event::MalfunctionOccurred {
        entity: entity.clone(),
        malfunction: id.clone(),
        name: def.name.clone(),
        cause: cause.to_string(),
    });
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn novices_are_riskier() {
        let model = AccidentModel::new(0.001);
        // skill 0: 0.001 * 4
        assert!((model.probability(1.0, 0, 1.0) - 0.004).abs() < 1e-12);
        // skill 3: 0.001 * 1
        assert!((model.probability(1.0, 3, 1.0) - 0.001).abs() < 1e-12);
        // skill 6: 0.001 / 4
        assert!((model.probability(1.0, 6, 1.0) - 0.000_25).abs() < 1e-12);
    }

    #[test]
    fn probability_scales_with_time_and_wear() {
        let model = AccidentModel::new(0.005);
        let base = model.probability(1.0, 2, 1.0);
        assert!((model.probability(10.0, 2, 1.0) - base * 10.0).abs() < 1e-12);
        assert!((model.probability(10.0, 2, 0.5) - base * 5.0).abs() < 1e-12);
        assert!(model.probability(10.0, 2, 0.0).abs() < 1e-12);
    }
}
