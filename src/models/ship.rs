use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{PlayerId, SectorIndex, ShipId, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum HullClass {
    #[serde(rename = "scout")]
    Scout,
    #[serde(rename = "shuttle")]
    Shuttle,
    #[serde(rename = "freighter")]
    Freighter,
    #[serde(rename = "corvette")]
    Corvette,
    #[serde(rename = "frigate")]
    Frigate,
    #[serde(rename = "cruiser")]
    Cruiser,
    #[serde(rename = "dreadnought")]
    Dreadnought,
}

impl HullClass {
    /// Base initiative weight used by combat resolution.
    pub fn initiative_base(&self) -> f64 {
        match self {
            HullClass::Scout => 9.0,
            HullClass::Shuttle => 7.0,
            HullClass::Corvette => 6.5,
            HullClass::Frigate => 5.5,
            HullClass::Freighter => 4.0,
            HullClass::Cruiser => 3.5,
            HullClass::Dreadnought => 2.0,
        }
    }

    pub fn base_hull_points(&self) -> i32 {
        match self {
            HullClass::Scout => 50,
            HullClass::Shuttle => 80,
            HullClass::Freighter => 150,
            HullClass::Corvette => 120,
            HullClass::Frigate => 200,
            HullClass::Cruiser => 350,
            HullClass::Dreadnought => 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsuranceTier {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "premium")]
    Premium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ship {
    pub id: ShipId,
    pub name: String,
    pub pilot: PlayerId,
    /// Team whose treasury shares maintenance and salvage, if any.
    pub shared_with_team: Option<TeamId>,
    pub hull_class: HullClass,
    pub sector: SectorIndex,
    /// 0.0 destroyed ..= 1.0 factory condition.
    pub condition: f64,
    pub shield: i32,
    pub max_shield: i32,
    pub fuel: i32,
    pub max_fuel: i32,
    pub cargo_capacity: i64,
    /// commodity -> units; quantities are non-negative and sum to at most
    /// the capacity.
    pub cargo: BTreeMap<String, i64>,
    pub insurance: InsuranceTier,
    pub modification_slots: i32,
    pub modifications: Vec<String>,
    pub maintenance_debt: i64,
}

impl Ship {
    pub fn cargo_used(&self) -> i64 {
        self.cargo.values().sum()
    }

    pub fn cargo_free(&self) -> i64 {
        self.cargo_capacity - self.cargo_used()
    }

    pub fn load_cargo(&mut self, commodity: &str, units: i64) -> Result<()> {
        if units <= 0 {
            return Err(Error::validation("units", "must be positive"));
        }
        if units > self.cargo_free() {
            return Err(Error::validation(
                "units",
                "exceeds remaining cargo capacity",
            ));
        }
        *self.cargo.entry(commodity.to_string()).or_insert(0) += units;
        Ok(())
    }

    pub fn unload_cargo(&mut self, commodity: &str, units: i64) -> Result<()> {
        if units <= 0 {
            return Err(Error::validation("units", "must be positive"));
        }
        let held = self.cargo.get(commodity).copied().unwrap_or(0);
        if held < units {
            return Err(Error::validation("units", "exceeds held quantity"));
        }
        if held == units {
            self.cargo.remove(commodity);
        } else {
            self.cargo.insert(commodity.to_string(), held - units);
        }
        Ok(())
    }

    /// A ship at condition exactly 0 cannot jump; exactly 1 is full
    /// condition.
    pub fn can_jump(&self) -> bool {
        self.condition > 0.0
    }

    pub fn apply_damage(&mut self, damage: i32) {
        let absorbed = damage.min(self.shield);
        self.shield -= absorbed;
        let hull_damage = damage - absorbed;
        if hull_damage > 0 {
            let max_hull = self.hull_class.base_hull_points() as f64;
            self.condition = (self.condition - hull_damage as f64 / max_hull).max(0.0);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.condition <= 0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub fn test_ship(capacity: i64) -> Ship {
        Ship {
            id: ShipId::new(),
            name: "Rocinante".to_string(),
            pilot: PlayerId::new(),
            shared_with_team: None,
            hull_class: HullClass::Frigate,
            sector: SectorIndex(1),
            condition: 1.0,
            shield: 50,
            max_shield: 50,
            fuel: 100,
            max_fuel: 100,
            cargo_capacity: capacity,
            cargo: BTreeMap::new(),
            insurance: InsuranceTier::None,
            modification_slots: 2,
            modifications: vec![],
            maintenance_debt: 0,
        }
    }

    #[test]
    fn test_cargo_capacity_invariant() {
        let mut ship = test_ship(200);
        ship.load_cargo("fuel", 150).unwrap();
        assert_eq!(ship.cargo_free(), 50);
        // one unit over capacity is rejected, manifest unchanged
        assert!(ship.load_cargo("ore", 51).is_err());
        assert_eq!(ship.cargo_used(), 150);
        ship.load_cargo("ore", 50).unwrap();
        assert_eq!(ship.cargo_free(), 0);
    }

    #[test]
    fn test_unload_never_goes_negative() {
        let mut ship = test_ship(100);
        ship.load_cargo("ore", 10).unwrap();
        assert!(ship.unload_cargo("ore", 11).is_err());
        ship.unload_cargo("ore", 10).unwrap();
        assert!(ship.cargo.get("ore").is_none());
    }

    #[test]
    fn test_condition_jump_boundary() {
        let mut ship = test_ship(10);
        ship.condition = 0.0;
        assert!(!ship.can_jump());
        ship.condition = f64::EPSILON;
        assert!(ship.can_jump());
        ship.condition = 1.0;
        assert!(ship.can_jump());
    }

    #[test]
    fn test_damage_shield_first() {
        let mut ship = test_ship(10);
        ship.apply_damage(30);
        assert_eq!(ship.shield, 20);
        assert_eq!(ship.condition, 1.0);
        ship.apply_damage(40);
        assert_eq!(ship.shield, 0);
        assert!(ship.condition < 1.0);
        assert!(!ship.is_destroyed());
    }
}
