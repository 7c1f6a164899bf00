//! Deterministic galaxy generation. Identical (seed, config) inputs
//! produce structurally identical output: same sector list, same warp
//! graph, same planet and station placement.

use rand::seq::IndexedRandom as _;
use rand::Rng as _;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::models::{
    MarketEntry, Planet, PlanetId, PlanetType, RegionConfig, Sector, SectorIndex, SectorType,
    Services, Specialization, Station, StationId, WarpLink, MAX_WARP_LINKS, SERVICE_EQUIPMENT,
    SERVICE_FUEL, SERVICE_INFORMATION, SERVICE_REPAIRS, SERVICE_SHIPYARD, SERVICE_TRADING,
};

pub struct GeneratedGalaxy {
    pub sectors: Vec<Sector>,
    pub planets: Vec<Planet>,
    pub stations: Vec<Station>,
}

/// Commodities every generated market knows about.
pub const COMMODITIES: &[&str] = &["fuel", "food", "ore", "goods", "equipment", "medicine"];

fn sector_type_weights(spec: Specialization) -> Vec<(SectorType, u32)> {
    let base = vec![
        (SectorType::Normal, 55),
        (SectorType::Nebula, 12),
        (SectorType::Asteroid, 12),
        (SectorType::Ice, 8),
        (SectorType::Radiation, 8),
        (SectorType::Void, 5),
    ];
    base.into_iter()
        .map(|(t, w)| {
            let w = match (spec, t) {
                (Specialization::Mining, SectorType::Asteroid) => w * 3,
                (Specialization::Research, SectorType::Nebula) => w * 2,
                (Specialization::Agriculture, SectorType::Normal) => w + 15,
                _ => w,
            };
            (t, w)
        })
        .collect()
}

fn pick_weighted<T: Copy>(rng: &mut ChaCha8Rng, weights: &[(T, u32)]) -> T {
    let total: u32 = weights.iter().map(|(_, w)| w).sum();
    let mut roll = rng.random_range(0..total);
    for (value, weight) in weights {
        if roll < *weight {
            return *value;
        }
        roll -= weight;
    }
    weights[weights.len() - 1].0
}

fn planet_density(spec: Specialization) -> f64 {
    match spec {
        Specialization::Agriculture => 0.30,
        Specialization::Mining => 0.12,
        Specialization::Industry => 0.18,
        Specialization::Research => 0.15,
        Specialization::Commerce => 0.20,
        Specialization::Military => 0.10,
    }
}

fn station_density(spec: Specialization) -> f64 {
    match spec {
        Specialization::Commerce => 0.25,
        Specialization::Industry => 0.22,
        Specialization::Military => 0.20,
        _ => 0.15,
    }
}

/// Station class distribution shifts with the specialization; classes are
/// 0..=11 with the heavy industrial classes rarer.
fn station_class(rng: &mut ChaCha8Rng, spec: Specialization) -> i32 {
    let shift = match spec {
        Specialization::Industry => 2,
        Specialization::Commerce => 1,
        _ => 0,
    };
    let class: i32 = rng.random_range(0..=9) + shift;
    class.min(11)
}

pub fn generate(seed: u64, config: &RegionConfig) -> GeneratedGalaxy {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let count = config.sector_count;
    let spec = config.specialization;
    let type_weights = sector_type_weights(spec);

    let mut sectors: Vec<Sector> = (1..=count)
        .map(|i| {
            let sector_type = pick_weighted(&mut rng, &type_weights);
            let (hazard, radiation) = match sector_type {
                SectorType::Radiation => (rng.random_range(4..=8), rng.random_range(5..=10)),
                SectorType::Nebula => (rng.random_range(2..=6), rng.random_range(1..=4)),
                SectorType::Asteroid => (rng.random_range(3..=7), 0),
                SectorType::Void => (rng.random_range(1..=3), 0),
                _ => (rng.random_range(0..=3), 0),
            };
            Sector {
                index: SectorIndex(i),
                sector_type,
                hazard_level: hazard,
                radiation_level: radiation,
                security_level: rng.random_range(1..=10),
                development_level: rng.random_range(0..=8),
                traffic_level: rng.random_range(0..=8),
                district: None,
                warp_links: vec![],
            }
        })
        .collect();

    // Spanning tree first so the warp graph is connected, then chords for
    // texture, all under the degree cap.
    let mut degrees: BTreeMap<i32, usize> = BTreeMap::new();
    let mut add_link = |sectors: &mut Vec<Sector>, degrees: &mut BTreeMap<i32, usize>, a: i32, b: i32, cost: i32| {
        let toll = if cost > 3 { Some((cost as i64) * 5) } else { None };
        sectors[(a - 1) as usize].warp_links.push(WarpLink {
            to: SectorIndex(b),
            travel_cost: cost,
            toll,
            restriction: None,
        });
        sectors[(b - 1) as usize].warp_links.push(WarpLink {
            to: SectorIndex(a),
            travel_cost: cost,
            toll,
            restriction: None,
        });
        *degrees.entry(a).or_insert(0) += 1;
        *degrees.entry(b).or_insert(0) += 1;
    };

    for i in 2..=count {
        // Anchor to a nearby earlier sector to keep the tree's diameter
        // reasonable.
        let lo = ((i - 8).max(1)..i).collect::<Vec<_>>();
        let candidates: Vec<i32> = lo
            .into_iter()
            .filter(|c| degrees.get(c).copied().unwrap_or(0) < MAX_WARP_LINKS - 1)
            .collect();
        let anchor = match candidates.as_slice() {
            [] => i - 1,
            some => *some.choose(&mut rng).expect("non-empty candidates"),
        };
        let cost = rng.random_range(1..=5);
        add_link(&mut sectors, &mut degrees, i, anchor, cost);
    }

    let chord_count = count / 4;
    for _ in 0..chord_count {
        let a = rng.random_range(1..=count);
        let b = rng.random_range(1..=count);
        if a == b {
            continue;
        }
        let deg_a = degrees.get(&a).copied().unwrap_or(0);
        let deg_b = degrees.get(&b).copied().unwrap_or(0);
        if deg_a >= MAX_WARP_LINKS || deg_b >= MAX_WARP_LINKS {
            continue;
        }
        if sectors[(a - 1) as usize].link_to(SectorIndex(b)).is_some() {
            continue;
        }
        let cost = rng.random_range(1..=6);
        add_link(&mut sectors, &mut degrees, a, b, cost);
    }

    // Planets and stations. Ids are derived from the seeded stream so the
    // whole structure replays identically.
    let mut planets = Vec::new();
    let mut stations = Vec::new();
    let planet_types = [
        PlanetType::Terran,
        PlanetType::Ice,
        PlanetType::Volcanic,
        PlanetType::GasGiant,
        PlanetType::Barren,
        PlanetType::Oceanic,
        PlanetType::Desert,
        PlanetType::Jungle,
    ];
    for i in 1..=count {
        if rng.random_bool(planet_density(spec)) {
            let planet_type = *planet_types.choose(&mut rng).expect("non-empty types");
            let habitability = planet_type.base_habitability();
            let max_population = (habitability * 1_000_000.0) as i64;
            planets.push(Planet {
                id: PlanetId(uuid_from_rng(&mut rng)),
                name: format!("P-{}-{}", i, planets.len() + 1),
                sector: SectorIndex(i),
                planet_type,
                habitability,
                population: 0,
                max_population,
                owner: None,
                specialization: None,
                buildings: vec![],
                allocation: Default::default(),
                defense_drones: 0,
                shield_strength: 0,
                siege: None,
                stockpile: BTreeMap::new(),
                last_tick: 0,
            });
        }
        if rng.random_bool(station_density(spec)) {
            let class = station_class(&mut rng, spec);
            let mut services = SERVICE_TRADING | SERVICE_FUEL;
            if class >= 3 {
                services |= SERVICE_REPAIRS;
            }
            if class >= 6 {
                services |= SERVICE_EQUIPMENT;
            }
            if class >= 8 {
                services |= SERVICE_SHIPYARD;
            }
            if rng.random_bool(0.4) {
                services |= SERVICE_INFORMATION;
            }
            let mut market = BTreeMap::new();
            for commodity in COMMODITIES {
                let capacity = rng.random_range(500..=5000);
                market.insert(
                    commodity.to_string(),
                    MarketEntry {
                        inventory: capacity / 2,
                        capacity,
                        base_price: trading_base_price(commodity),
                    },
                );
            }
            let paired_planet = planets
                .iter()
                .rev()
                .find(|p| p.sector.0 == i)
                .map(|p| p.id);
            stations.push(Station {
                id: StationId(uuid_from_rng(&mut rng)),
                name: format!("ST-{}-{}", i, stations.len() + 1),
                sector: SectorIndex(i),
                paired_planet,
                class,
                services: Services(services),
                faction: None,
                owner: None,
                status: crate::models::StationStatus::Operational,
                market,
            });
        }
    }

    // Faction presence: weight territory by catalog weights, striping the
    // sector list deterministically.
    let catalog = crate::models::faction_catalog();
    for station in stations.iter_mut() {
        let faction = catalog
            .choose_weighted(&mut rng, |f| f.territory_weight)
            .expect("non-empty catalog");
        station.faction = Some(faction.symbol.clone());
    }

    GeneratedGalaxy {
        sectors,
        planets,
        stations,
    }
}

fn uuid_from_rng(rng: &mut ChaCha8Rng) -> uuid::Uuid {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub fn trading_base_price(commodity: &str) -> i64 {
    match commodity {
        "fuel" => 5,
        "food" => 8,
        "ore" => 12,
        "goods" => 25,
        "equipment" => 60,
        "medicine" => 45,
        _ => 10,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    fn config(sector_count: i32, spec: Specialization) -> RegionConfig {
        RegionConfig {
            sector_count,
            specialization: spec,
            ..Default::default()
        }
    }

    fn reachable_count(sectors: &[Sector]) -> usize {
        let mut seen = BTreeSet::new();
        let mut stack = vec![1];
        while let Some(i) = stack.pop() {
            if !seen.insert(i) {
                continue;
            }
            for link in &sectors[(i - 1) as usize].warp_links {
                stack.push(link.to.0);
            }
        }
        seen.len()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let cfg = config(150, Specialization::Mining);
        let a = generate(42, &cfg);
        let b = generate(42, &cfg);
        assert_eq!(
            serde_json::to_value(&a.sectors).unwrap(),
            serde_json::to_value(&b.sectors).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.planets).unwrap(),
            serde_json::to_value(&b.planets).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.stations).unwrap(),
            serde_json::to_value(&b.stations).unwrap()
        );
    }

    #[test]
    fn test_different_seeds_differ() {
        let cfg = config(150, Specialization::Mining);
        let a = generate(1, &cfg);
        let b = generate(2, &cfg);
        assert_ne!(
            serde_json::to_value(&a.sectors).unwrap(),
            serde_json::to_value(&b.sectors).unwrap()
        );
    }

    #[test]
    fn test_warp_graph_connected() {
        for seed in [7, 99, 1234] {
            let cfg = config(300, Specialization::Commerce);
            let galaxy = generate(seed, &cfg);
            assert_eq!(reachable_count(&galaxy.sectors), 300);
        }
    }

    #[test]
    fn test_degree_cap() {
        let cfg = config(500, Specialization::Industry);
        let galaxy = generate(11, &cfg);
        for sector in &galaxy.sectors {
            assert!(
                sector.warp_links.len() <= MAX_WARP_LINKS,
                "sector {} has {} links",
                sector.index,
                sector.warp_links.len()
            );
        }
    }

    #[test]
    fn test_sector_count_floor_and_ceiling() {
        let floor = generate(3, &config(100, Specialization::Research));
        assert_eq!(floor.sectors.len(), 100);
        let ceiling = generate(3, &config(1000, Specialization::Research));
        assert_eq!(ceiling.sectors.len(), 1000);
    }

    #[test]
    fn test_specialization_shifts_density() {
        let agri = generate(5, &config(600, Specialization::Agriculture));
        let military = generate(5, &config(600, Specialization::Military));
        assert!(agri.planets.len() > military.planets.len());
    }

    #[test]
    fn test_stations_carry_markets_and_factions() {
        let galaxy = generate(8, &config(200, Specialization::Commerce));
        assert!(!galaxy.stations.is_empty());
        for station in &galaxy.stations {
            assert_eq!(station.market.len(), COMMODITIES.len());
            assert!(station.faction.is_some());
            assert!((0..=11).contains(&station.class));
        }
    }
}
