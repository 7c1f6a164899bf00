use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{PlanetId, PlayerId, SectorIndex, StationId};

/// Station service flags, stored as a bitset. Capability discovery goes
/// through this set rather than station sub-typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Services(pub u8);

pub const SERVICE_FUEL: u8 = 1 << 0;
pub const SERVICE_REPAIRS: u8 = 1 << 1;
pub const SERVICE_TRADING: u8 = 1 << 2;
pub const SERVICE_SHIPYARD: u8 = 1 << 3;
pub const SERVICE_EQUIPMENT: u8 = 1 << 4;
pub const SERVICE_INFORMATION: u8 = 1 << 5;

impl Services {
    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut out = vec![];
        for (flag, name) in [
            (SERVICE_FUEL, "fuel"),
            (SERVICE_REPAIRS, "repairs"),
            (SERVICE_TRADING, "trading"),
            (SERVICE_SHIPYARD, "shipyard"),
            (SERVICE_EQUIPMENT, "equipment"),
            (SERVICE_INFORMATION, "information"),
        ] {
            if self.has(flag) {
                out.push(name);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationStatus {
    #[serde(rename = "operational")]
    Operational,
    #[serde(rename = "damaged")]
    Damaged,
    #[serde(rename = "offline")]
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEntry {
    pub inventory: i64,
    pub capacity: i64,
    pub base_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub sector: SectorIndex,
    /// Optional pairing to a planet in the same sector, by id.
    pub paired_planet: Option<PlanetId>,
    /// Economic class, 0..=11.
    pub class: i32,
    pub services: Services,
    pub faction: Option<String>,
    pub owner: Option<PlayerId>,
    pub status: StationStatus,
    /// commodity -> market state; prices are derived per query, never
    /// stored.
    pub market: BTreeMap<String, MarketEntry>,
}

pub const STATION_CLASS_MAX: i32 = 11;

impl Station {
    pub fn validate_class(class: i32) -> Result<()> {
        if !(0..=STATION_CLASS_MAX).contains(&class) {
            return Err(Error::validation("class", "must be within [0, 11]"));
        }
        Ok(())
    }

    pub fn is_operational(&self) -> bool {
        self.status == StationStatus::Operational
    }

    pub fn trades(&self) -> bool {
        self.is_operational() && self.services.has(SERVICE_TRADING)
    }

    pub fn market_entry(&self, commodity: &str) -> Option<&MarketEntry> {
        self.market.get(commodity)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_services_bitset() {
        let services = Services(SERVICE_FUEL | SERVICE_TRADING | SERVICE_SHIPYARD);
        assert!(services.has(SERVICE_FUEL));
        assert!(!services.has(SERVICE_REPAIRS));
        assert_eq!(services.names(), vec!["fuel", "trading", "shipyard"]);
    }

    #[test]
    fn test_class_bounds() {
        Station::validate_class(0).unwrap();
        Station::validate_class(11).unwrap();
        assert!(Station::validate_class(12).is_err());
        assert!(Station::validate_class(-1).is_err());
    }
}
