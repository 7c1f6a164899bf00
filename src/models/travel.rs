use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{PlayerId, RegionName, ShipId, TravelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelMethod {
    #[serde(rename = "platform-gate")]
    PlatformGate,
    #[serde(rename = "player-gate")]
    PlayerGate,
    #[serde(rename = "warp-jumper")]
    WarpJumper,
}

impl TravelMethod {
    pub fn base_cost(&self) -> i64 {
        match self {
            TravelMethod::PlatformGate => 100,
            TravelMethod::PlayerGate => 60,
            TravelMethod::WarpJumper => 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelState {
    #[serde(rename = "in-transit")]
    InTransit,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

/// Everything the player carries across the region boundary. The sum of
/// these manifests across reservation, transit, and materialization must
/// equal the pre-travel holdings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub ships: Vec<ShipId>,
    pub credits: i64,
    pub cargo: BTreeMap<String, i64>,
}

impl AssetManifest {
    pub fn validate(&self) -> Result<()> {
        if self.credits < 0 {
            return Err(Error::validation("credits", "must be non-negative"));
        }
        if self.cargo.values().any(|&v| v < 0) {
            return Err(Error::validation("cargo", "quantities must be non-negative"));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ships.is_empty() && self.credits == 0 && self.cargo.is_empty()
    }
}

/// Inter-region transit record, held in the global shard. The id is the
/// idempotency key for the whole protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Travel {
    pub id: TravelId,
    pub player: PlayerId,
    pub source: RegionName,
    pub destination: RegionName,
    pub method: TravelMethod,
    pub cost: i64,
    pub manifest: AssetManifest,
    pub state: TravelState,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Travel {
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TravelState::InTransit {
            return Err(Error::Conflict("travel not in transit"));
        }
        self.state = TravelState::Completed;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.state != TravelState::InTransit {
            return Err(Error::Conflict("travel not in transit"));
        }
        self.state = TravelState::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manifest_validation() {
        let mut manifest = AssetManifest {
            ships: vec![ShipId::new()],
            credits: 500,
            cargo: BTreeMap::new(),
        };
        manifest.validate().unwrap();
        manifest.credits = -1;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_state_machine() {
        let now = Utc::now();
        let mut travel = Travel {
            id: TravelId::new(),
            player: PlayerId::new(),
            source: RegionName::new("region-foo").unwrap(),
            destination: RegionName::new("region-bar").unwrap(),
            method: TravelMethod::PlatformGate,
            cost: 100,
            manifest: AssetManifest {
                ships: vec![],
                credits: 0,
                cargo: BTreeMap::new(),
            },
            state: TravelState::InTransit,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        travel.complete(now).unwrap();
        assert!(travel.complete(now).is_err());
        assert!(travel.fail("late", now).is_err());
    }
}
