use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::{RegionName, TreatyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatyKind {
    #[serde(rename = "trade-agreement")]
    TradeAgreement,
    #[serde(rename = "non-aggression")]
    NonAggression,
    #[serde(rename = "mutual-defense")]
    MutualDefense,
    #[serde(rename = "open-borders")]
    OpenBorders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatyStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "terminated")]
    Terminated,
    #[serde(rename = "expired")]
    Expired,
}

/// Directed pair of regions bound by typed terms. Terms are structured but
/// open-ended JSON; the known keys are read by travel cost, trade bonus,
/// and combat legality checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treaty {
    pub id: TreatyId,
    pub region_a: RegionName,
    pub region_b: RegionName,
    pub kind: TreatyKind,
    pub terms: Value,
    pub status: TreatyStatus,
    pub signed_a: bool,
    pub signed_b: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Treaty {
    pub fn links(&self, a: &RegionName, b: &RegionName) -> bool {
        (&self.region_a == a && &self.region_b == b)
            || (&self.region_a == b && &self.region_b == a)
    }

    /// A treaty activates only once both governing authorities signed.
    pub fn sign(&mut self, region: &RegionName, now: DateTime<Utc>) -> Result<()> {
        if self.status != TreatyStatus::Active && (self.signed_a && self.signed_b) {
            return Err(Error::Conflict("treaty no longer signable"));
        }
        if region == &self.region_a {
            self.signed_a = true;
        } else if region == &self.region_b {
            self.signed_b = true;
        } else {
            return Err(Error::validation("region", "not a party to this treaty"));
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.status == TreatyStatus::Active
            && self.signed_a
            && self.signed_b
            && self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    /// Travel cost multiplier granted by this treaty, 1.0 when none.
    pub fn travel_cost_factor(&self) -> f64 {
        match self.kind {
            TreatyKind::OpenBorders => 0.5,
            TreatyKind::TradeAgreement => 0.8,
            _ => 1.0,
        }
    }

    /// Additional trade bonus multiplier between the two regions.
    pub fn trade_bonus_factor(&self) -> f64 {
        match self.kind {
            TreatyKind::TradeAgreement => 1.1,
            _ => 1.0,
        }
    }

    /// Whether combat between members of the two regions is treaty-illegal.
    pub fn forbids_combat(&self) -> bool {
        matches!(
            self.kind,
            TreatyKind::NonAggression | TreatyKind::MutualDefense
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn treaty(kind: TreatyKind) -> Treaty {
        let now = Utc::now();
        Treaty {
            id: TreatyId::new(),
            region_a: RegionName::new("mining-co").unwrap(),
            region_b: RegionName::new("agri-belt").unwrap(),
            kind,
            terms: Value::Null,
            status: TreatyStatus::Active,
            signed_a: false,
            signed_b: false,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_requires_both_signatures() {
        let now = Utc::now();
        let mut t = treaty(TreatyKind::NonAggression);
        assert!(!t.is_in_force(now));
        t.sign(&RegionName::new("mining-co").unwrap(), now).unwrap();
        assert!(!t.is_in_force(now));
        t.sign(&RegionName::new("agri-belt").unwrap(), now).unwrap();
        assert!(t.is_in_force(now));
        assert!(t.forbids_combat());
    }

    #[test]
    fn test_non_party_cannot_sign() {
        let mut t = treaty(TreatyKind::TradeAgreement);
        let outsider = RegionName::new("outsider").unwrap();
        assert!(t.sign(&outsider, Utc::now()).is_err());
    }

    #[test]
    fn test_links_is_symmetric() {
        let t = treaty(TreatyKind::OpenBorders);
        let a = RegionName::new("mining-co").unwrap();
        let b = RegionName::new("agri-belt").unwrap();
        assert!(t.links(&a, &b));
        assert!(t.links(&b, &a));
    }
}
