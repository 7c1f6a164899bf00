use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{PlanetId, PlayerId, SectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PlanetType {
    #[serde(rename = "terran")]
    Terran,
    #[serde(rename = "ice")]
    Ice,
    #[serde(rename = "volcanic")]
    Volcanic,
    #[serde(rename = "gas-giant")]
    GasGiant,
    #[serde(rename = "barren")]
    Barren,
    #[serde(rename = "oceanic")]
    Oceanic,
    #[serde(rename = "desert")]
    Desert,
    #[serde(rename = "jungle")]
    Jungle,
}

impl PlanetType {
    /// Habitability in [0, 1]; drives population growth per colony tick.
    pub fn base_habitability(&self) -> f64 {
        match self {
            PlanetType::Terran => 0.9,
            PlanetType::Oceanic => 0.75,
            PlanetType::Jungle => 0.7,
            PlanetType::Desert => 0.45,
            PlanetType::Ice => 0.35,
            PlanetType::Volcanic => 0.25,
            PlanetType::Barren => 0.15,
            PlanetType::GasGiant => 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingKind {
    #[serde(rename = "farm")]
    Farm,
    #[serde(rename = "mine")]
    Mine,
    #[serde(rename = "factory")]
    Factory,
    #[serde(rename = "research-lab")]
    ResearchLab,
    #[serde(rename = "defense-battery")]
    DefenseBattery,
    #[serde(rename = "shield-generator")]
    ShieldGenerator,
}

impl BuildingKind {
    pub fn produces(&self) -> Option<(&'static str, i64)> {
        match self {
            BuildingKind::Farm => Some(("food", 10)),
            BuildingKind::Mine => Some(("ore", 8)),
            BuildingKind::Factory => Some(("goods", 5)),
            BuildingKind::ResearchLab => Some(("research", 3)),
            BuildingKind::DefenseBattery | BuildingKind::ShieldGenerator => None,
        }
    }

    pub fn upkeep(&self) -> i64 {
        match self {
            BuildingKind::Farm => 1,
            BuildingKind::Mine => 2,
            BuildingKind::Factory => 3,
            BuildingKind::ResearchLab => 4,
            BuildingKind::DefenseBattery => 5,
            BuildingKind::ShieldGenerator => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub kind: BuildingKind,
    pub level: i32,
}

/// Colonist allocation across work types; fractions sum to at most 1.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColonistAllocation {
    pub agriculture: f64,
    pub industry: f64,
    pub defense: f64,
}

impl ColonistAllocation {
    pub fn validate(&self) -> Result<()> {
        let parts = [self.agriculture, self.industry, self.defense];
        if parts.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(Error::validation("allocation", "fractions must be in [0, 1]"));
        }
        if parts.iter().sum::<f64>() > 1.0 + 1e-9 {
            return Err(Error::validation("allocation", "fractions sum over 1.0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiegeState {
    pub attacker: PlayerId,
    pub started_tick: i64,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Planet {
    pub id: PlanetId,
    pub name: String,
    pub sector: SectorIndex,
    pub planet_type: PlanetType,
    pub habitability: f64,
    pub population: i64,
    pub max_population: i64,
    pub owner: Option<PlayerId>,
    /// Production focus; the specialized commodity yields a bonus each
    /// colony tick.
    #[serde(default)]
    pub specialization: Option<String>,
    pub buildings: Vec<Building>,
    pub allocation: ColonistAllocation,
    pub defense_drones: i32,
    pub shield_strength: i32,
    pub siege: Option<SiegeState>,
    pub stockpile: BTreeMap<String, i64>,
    /// Last colony tick applied; ticks are idempotent on (planet, tick).
    pub last_tick: i64,
}

impl Planet {
    pub fn building_count(&self, kind: BuildingKind) -> i32 {
        self.buildings
            .iter()
            .filter(|b| b.kind == kind)
            .map(|b| b.level)
            .sum()
    }

    pub fn set_allocation(&mut self, allocation: ColonistAllocation) -> Result<()> {
        allocation.validate()?;
        self.allocation = allocation;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allocation_validation() {
        let ok = ColonistAllocation {
            agriculture: 0.5,
            industry: 0.3,
            defense: 0.2,
        };
        ok.validate().unwrap();
        let over = ColonistAllocation {
            agriculture: 0.6,
            industry: 0.6,
            defense: 0.0,
        };
        assert!(over.validate().is_err());
        let negative = ColonistAllocation {
            agriculture: -0.1,
            industry: 0.5,
            defense: 0.0,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_habitability_ordering() {
        assert!(PlanetType::Terran.base_habitability() > PlanetType::Barren.base_habitability());
        assert!(PlanetType::GasGiant.base_habitability() < 0.1);
    }
}
