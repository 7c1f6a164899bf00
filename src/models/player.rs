use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AccountId, PlayerId, RegionName, SectorIndex, ShipId};

/// Game persona for an account. One player per account per region context;
/// the current region is always set (the Nexus when none was chosen).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub account_id: AccountId,
    pub callsign: String,
    pub current_region: RegionName,
    pub current_sector: SectorIndex,
    pub current_ship: Option<ShipId>,
    pub credits: i64,
    /// Reputation per faction symbol, clamped to [-1000, 1000] on update.
    pub faction_reputation: BTreeMap<String, i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Player {
    pub fn adjust_reputation(&mut self, faction: &str, delta: i32) -> i32 {
        let entry = self.faction_reputation.entry(faction.to_string()).or_insert(0);
        *entry = crate::util::clamp_i32(entry.saturating_add(delta), -1000, 1000);
        *entry
    }

    pub fn reputation_with(&self, faction: &str) -> i32 {
        self.faction_reputation.get(faction).copied().unwrap_or(0)
    }

    pub fn debit_credits(&mut self, amount: i64) -> Result<(), crate::error::Error> {
        if amount < 0 {
            return Err(crate::error::Error::validation(
                "amount",
                "must be non-negative",
            ));
        }
        if self.credits < amount {
            return Err(crate::error::Error::InsufficientCredits {
                required: amount,
                available: self.credits,
            });
        }
        self.credits -= amount;
        Ok(())
    }

    pub fn credit_credits(&mut self, amount: i64) {
        self.credits = self.credits.saturating_add(amount.max(0));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn player() -> Player {
        Player {
            id: PlayerId::new(),
            account_id: AccountId::new(),
            callsign: "ALEX".to_string(),
            current_region: RegionName::nexus(),
            current_sector: SectorIndex(1),
            current_ship: None,
            credits: 1000,
            faction_reputation: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_reputation_clamps() {
        let mut p = player();
        assert_eq!(p.adjust_reputation("solar-federation", 600), 600);
        assert_eq!(p.adjust_reputation("solar-federation", 600), 1000);
        assert_eq!(p.adjust_reputation("solar-federation", -3000), -1000);
    }

    #[test]
    fn test_debit_rejects_overdraft() {
        let mut p = player();
        p.debit_credits(250).unwrap();
        assert_eq!(p.credits, 750);
        let err = p.debit_credits(1000).unwrap_err();
        assert_eq!(err.code().as_str(), "INSUFFICIENT_CREDITS");
        assert_eq!(p.credits, 750);
    }
}
