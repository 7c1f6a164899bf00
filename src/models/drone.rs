use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{DeploymentId, DroneId, PlanetId, PlayerId, SectorIndex, ShipId, StationId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drone {
    pub id: DroneId,
    pub owner: PlayerId,
    pub count: i32,
    pub attack: i32,
    pub defense: i32,
}

/// Where a deployment pins its drones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentTarget {
    Ship(ShipId),
    Planet(PlanetId),
    Sector(SectorIndex),
    Station(StationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPriority {
    #[serde(rename = "ships")]
    Ships,
    #[serde(rename = "drones")]
    Drones,
    #[serde(rename = "stations")]
    Stations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DronePolicy {
    /// 0 (passive) ..= 10 (berserk).
    pub aggression: i32,
    pub target_priority: Vec<TargetPriority>,
    pub defend_allies: bool,
    pub auto_replace: bool,
}

impl DronePolicy {
    pub fn validate(&self) -> Result<()> {
        if !(0..=10).contains(&self.aggression) {
            return Err(Error::validation("aggression", "must be within [0, 10]"));
        }
        if self.target_priority.is_empty() {
            return Err(Error::validation("target_priority", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneDeployment {
    pub id: DeploymentId,
    pub drone: DroneId,
    pub owner: PlayerId,
    pub target: DeploymentTarget,
    pub count: i32,
    pub policy: DronePolicy,
}

impl DroneDeployment {
    pub fn reconfigure(&mut self, policy: DronePolicy) -> Result<()> {
        policy.validate()?;
        self.policy = policy;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_policy_validation() {
        let mut policy = DronePolicy {
            aggression: 5,
            target_priority: vec![TargetPriority::Drones, TargetPriority::Ships],
            defend_allies: true,
            auto_replace: false,
        };
        policy.validate().unwrap();
        policy.aggression = 11;
        assert!(policy.validate().is_err());
        policy.aggression = 0;
        policy.target_priority.clear();
        assert!(policy.validate().is_err());
    }
}
