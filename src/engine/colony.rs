//! Colony advancement, one tick per simulated hour. Ticks are idempotent
//! on (planet, tick index): re-applying an already-seen index is a no-op.

use crate::models::{BuildingKind, Planet};

const BASE_GROWTH_RATE: f64 = 0.002;
const SEED_POPULATION: i64 = 100;

pub struct TickOutcome {
    pub applied: bool,
    pub population_delta: i64,
    pub produced: Vec<(&'static str, i64)>,
    pub upkeep_paid: i64,
}

pub fn advance(planet: &mut Planet, tick: i64) -> TickOutcome {
    if tick <= planet.last_tick {
        return TickOutcome {
            applied: false,
            population_delta: 0,
            produced: vec![],
            upkeep_paid: 0,
        };
    }

    let before = planet.population;
    if planet.owner.is_some() && planet.population == 0 {
        planet.population = SEED_POPULATION.min(planet.max_population);
    }

    // Logistic growth scaled by habitability and the agriculture
    // allocation; hostile worlds shrink instead.
    if planet.population > 0 && planet.max_population > 0 {
        let fill = planet.population as f64 / planet.max_population as f64;
        let food_bonus = 0.5 + planet.allocation.agriculture;
        let rate = BASE_GROWTH_RATE * (planet.habitability - 0.2) * food_bonus * (1.0 - fill);
        let delta = (planet.population as f64 * rate).round() as i64;
        planet.population = (planet.population + delta).clamp(0, planet.max_population);
    }

    // Production scales with the industry allocation and worked
    // buildings; the specialized commodity yields a quarter more.
    let mut produced = vec![];
    let industry = 0.5 + planet.allocation.industry;
    for building in &planet.buildings {
        if let Some((commodity, per_level)) = building.kind.produces() {
            let focus = if planet.specialization.as_deref() == Some(commodity) {
                1.25
            } else {
                1.0
            };
            let output =
                ((per_level * building.level as i64) as f64 * industry * focus).round() as i64;
            if output > 0 {
                *planet.stockpile.entry(commodity.to_string()).or_insert(0) += output;
                produced.push((commodity, output));
            }
        }
    }

    // Defense upkeep comes out of the goods stockpile; unpaid upkeep
    // bleeds shield strength.
    let upkeep: i64 = planet
        .buildings
        .iter()
        .filter(|b| {
            matches!(
                b.kind,
                BuildingKind::DefenseBattery | BuildingKind::ShieldGenerator
            )
        })
        .map(|b| b.kind.upkeep() * b.level as i64)
        .sum();
    let goods = planet.stockpile.entry("goods".to_string()).or_insert(0);
    let paid = upkeep.min(*goods);
    *goods -= paid;
    if paid < upkeep {
        planet.shield_strength = (planet.shield_strength - 1).max(0);
    } else if planet.building_count(BuildingKind::ShieldGenerator) > 0 {
        planet.shield_strength += 1;
    }

    planet.last_tick = tick;
    TickOutcome {
        applied: true,
        population_delta: planet.population - before,
        produced,
        upkeep_paid: paid,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{Building, ColonistAllocation, PlanetId, PlanetType, PlayerId, SectorIndex};
    use std::collections::BTreeMap;

    fn colony() -> Planet {
        Planet {
            id: PlanetId::new(),
            name: "Haven".to_string(),
            sector: SectorIndex(3),
            planet_type: PlanetType::Terran,
            habitability: PlanetType::Terran.base_habitability(),
            population: 10_000,
            max_population: 1_000_000,
            owner: Some(PlayerId::new()),
            specialization: None,
            buildings: vec![
                Building {
                    kind: BuildingKind::Farm,
                    level: 2,
                },
                Building {
                    kind: BuildingKind::Mine,
                    level: 1,
                },
            ],
            allocation: ColonistAllocation {
                agriculture: 0.4,
                industry: 0.4,
                defense: 0.2,
            },
            defense_drones: 0,
            shield_strength: 0,
            siege: None,
            stockpile: BTreeMap::new(),
            last_tick: 0,
        }
    }

    #[test]
    fn test_tick_idempotent_on_index() {
        let mut planet = colony();
        let first = advance(&mut planet, 1);
        assert!(first.applied);
        let population = planet.population;
        let stockpile = planet.stockpile.clone();
        let replay = advance(&mut planet, 1);
        assert!(!replay.applied);
        assert_eq!(planet.population, population);
        assert_eq!(planet.stockpile, stockpile);
    }

    #[test]
    fn test_habitably_world_grows() {
        let mut planet = colony();
        advance(&mut planet, 1);
        assert!(planet.population > 10_000);
        // farm level 2 x 10/level x 0.9 industry factor
        assert_eq!(planet.stockpile["food"], 18);
        assert_eq!(planet.stockpile["ore"], 7);
    }

    #[test]
    fn test_hostile_world_shrinks() {
        let mut planet = colony();
        planet.planet_type = PlanetType::Barren;
        planet.habitability = PlanetType::Barren.base_habitability();
        advance(&mut planet, 1);
        assert!(planet.population < 10_000);
    }

    #[test]
    fn test_population_caps_at_max() {
        let mut planet = colony();
        planet.population = planet.max_population;
        advance(&mut planet, 1);
        assert!(planet.population <= planet.max_population);
    }

    #[test]
    fn test_specialization_boosts_focused_commodity() {
        let mut plain = colony();
        advance(&mut plain, 1);
        let mut focused = colony();
        focused.specialization = Some("food".to_string());
        advance(&mut focused, 1);
        assert!(focused.stockpile["food"] > plain.stockpile["food"]);
        assert_eq!(focused.stockpile["ore"], plain.stockpile["ore"]);
    }

    #[test]
    fn test_unpaid_upkeep_bleeds_shields() {
        let mut planet = colony();
        planet.buildings.push(Building {
            kind: BuildingKind::DefenseBattery,
            level: 3,
        });
        planet.shield_strength = 5;
        // empty stockpile, upkeep 15 cannot be paid
        advance(&mut planet, 1);
        assert_eq!(planet.shield_strength, 4);
    }
}
