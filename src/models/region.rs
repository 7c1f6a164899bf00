use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::{AccountId, PlayerId, RegionName, SectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "terminated")]
    Terminated,
}

impl std::fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceType {
    #[serde(rename = "autocracy")]
    Autocracy,
    #[serde(rename = "democracy")]
    Democracy,
    #[serde(rename = "council")]
    Council,
    #[serde(rename = "galactic-council")]
    GalacticCouncil,
}

/// Economic specialization, drives galaxy generation densities and the
/// trading engine's specialization factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Specialization {
    #[serde(rename = "mining")]
    Mining,
    #[serde(rename = "agriculture")]
    Agriculture,
    #[serde(rename = "industry")]
    Industry,
    #[serde(rename = "research")]
    Research,
    #[serde(rename = "commerce")]
    Commerce,
    #[serde(rename = "military")]
    Military,
}

pub const TAX_RATE_MIN: f64 = 0.05;
pub const TAX_RATE_MAX: f64 = 0.25;
pub const VOTING_THRESHOLD_MIN: f64 = 0.1;
pub const VOTING_THRESHOLD_MAX: f64 = 0.9;
pub const ELECTION_CADENCE_MIN: i32 = 30;
pub const ELECTION_CADENCE_MAX: i32 = 365;
pub const SECTOR_COUNT_MIN: i32 = 100;
pub const SECTOR_COUNT_MAX: i32 = 1000;

/// Owner-tunable regional configuration. Range violations fail the
/// mutation rather than clamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub governance_type: GovernanceType,
    pub tax_rate: f64,
    pub voting_threshold: f64,
    pub election_cadence_days: i32,
    pub trade_bonuses: BTreeMap<String, f64>,
    pub specialization: Specialization,
    pub sector_count: i32,
    /// Opaque cultural payload, passed through to clients untouched.
    pub culture: Value,
    pub starting_credits: i64,
}

impl RegionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(TAX_RATE_MIN..=TAX_RATE_MAX).contains(&self.tax_rate) {
            return Err(Error::validation("tax_rate", "must be within [0.05, 0.25]"));
        }
        if !(VOTING_THRESHOLD_MIN..=VOTING_THRESHOLD_MAX).contains(&self.voting_threshold) {
            return Err(Error::validation(
                "voting_threshold",
                "must be within [0.1, 0.9]",
            ));
        }
        if !(ELECTION_CADENCE_MIN..=ELECTION_CADENCE_MAX).contains(&self.election_cadence_days) {
            return Err(Error::validation(
                "election_cadence_days",
                "must be within [30, 365]",
            ));
        }
        if !(SECTOR_COUNT_MIN..=SECTOR_COUNT_MAX).contains(&self.sector_count) {
            return Err(Error::validation(
                "sector_count",
                "must be within [100, 1000]",
            ));
        }
        for (good, bonus) in &self.trade_bonuses {
            if !(0.5..=2.0).contains(bonus) {
                return Err(Error::validation(good, "trade bonus must be within [0.5, 2.0]"));
            }
        }
        Ok(())
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            governance_type: GovernanceType::Autocracy,
            tax_rate: 0.10,
            voting_threshold: 0.5,
            election_cadence_days: 90,
            trade_bonuses: BTreeMap::new(),
            specialization: Specialization::Commerce,
            sector_count: 100,
            culture: Value::Null,
            starting_credits: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub name: RegionName,
    pub display_name: String,
    pub owner: Option<AccountId>,
    pub status: RegionStatus,
    pub config: RegionConfig,
    pub galaxy_seed: u64,
    /// Sector in the Nexus that gates into this region; a warp link between
    /// the Nexus and the region exists iff this is set.
    pub nexus_gate_sector: Option<SectorIndex>,
    /// Set when termination starts; residents may evacuate until then.
    pub evacuation_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Region {
    pub fn accepts_travel(&self) -> bool {
        self.status == RegionStatus::Active
    }

    pub fn transition(&mut self, to: RegionStatus, now: DateTime<Utc>) -> Result<()> {
        let ok = matches!(
            (self.status, to),
            (RegionStatus::Pending, RegionStatus::Active)
                | (RegionStatus::Active, RegionStatus::Suspended)
                | (RegionStatus::Suspended, RegionStatus::Active)
                | (RegionStatus::Active, RegionStatus::Terminated)
                | (RegionStatus::Suspended, RegionStatus::Terminated)
        );
        if !ok {
            return Err(Error::Conflict("invalid region lifecycle transition"));
        }
        if to == RegionStatus::Terminated {
            self.evacuation_deadline = Some(now + chrono::Duration::days(30));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MembershipType {
    #[serde(rename = "visitor")]
    Visitor,
    #[serde(rename = "resident")]
    Resident,
    #[serde(rename = "citizen")]
    Citizen,
}

/// Association of a player with a region; unique per (player, region).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub player_id: PlayerId,
    pub region: RegionName,
    pub membership_type: MembershipType,
    pub reputation: i32,
    pub voting_weight: f64,
    pub visit_count: i32,
    pub last_visit: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn adjust_reputation(&mut self, delta: i32) -> i32 {
        self.reputation = crate::util::clamp_i32(self.reputation.saturating_add(delta), -1000, 1000);
        self.reputation
    }

    pub fn set_voting_weight(&mut self, weight: f64) -> Result<()> {
        if !(0.0..=5.0).contains(&weight) {
            return Err(Error::validation("voting_weight", "must be within [0.0, 5.0]"));
        }
        self.voting_weight = weight;
        Ok(())
    }

    pub fn may_vote(&self) -> bool {
        self.membership_type == MembershipType::Citizen
    }

    pub fn may_receive_region_broadcasts(&self) -> bool {
        self.membership_type >= MembershipType::Resident
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_ranges() {
        let mut config = RegionConfig::default();
        config.validate().unwrap();

        config.tax_rate = 0.04;
        assert!(config.validate().is_err());
        config.tax_rate = 0.25;
        config.validate().unwrap();

        config.sector_count = 1001;
        assert!(config.validate().is_err());
        config.sector_count = 1000;
        config.validate().unwrap();
        config.sector_count = 100;
        config.validate().unwrap();
        config.sector_count = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let now = Utc::now();
        let mut region = Region {
            name: RegionName::new("mining-co").unwrap(),
            display_name: "Mining Co".to_string(),
            owner: None,
            status: RegionStatus::Pending,
            config: RegionConfig::default(),
            galaxy_seed: 42,
            nexus_gate_sector: None,
            evacuation_deadline: None,
            created_at: now,
            updated_at: now,
        };
        region.transition(RegionStatus::Active, now).unwrap();
        region.transition(RegionStatus::Suspended, now).unwrap();
        region.transition(RegionStatus::Active, now).unwrap();
        region.transition(RegionStatus::Terminated, now).unwrap();
        assert!(region.evacuation_deadline.is_some());
        // terminated is terminal
        assert!(region.transition(RegionStatus::Active, now).is_err());
    }

    #[test]
    fn test_membership_reputation_and_weight() {
        let now = Utc::now();
        let mut m = Membership {
            player_id: PlayerId::new(),
            region: RegionName::nexus(),
            membership_type: MembershipType::Resident,
            reputation: 990,
            voting_weight: 1.0,
            visit_count: 0,
            last_visit: now,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(m.adjust_reputation(50), 1000);
        assert!(m.set_voting_weight(5.1).is_err());
        m.set_voting_weight(2.5).unwrap();
        assert!(!m.may_vote());
        assert!(m.may_receive_region_broadcasts());
    }
}
