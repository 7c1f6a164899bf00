use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{ContractId, PlayerId, StationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "fulfilled")]
    Fulfilled,
    #[serde(rename = "cancelled")]
    Cancelled,
}

/// Player-posted hauling contract: deliver the listed units to the named
/// station for the escrowed reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    pub poster: PlayerId,
    pub assignee: Option<PlayerId>,
    pub commodity: String,
    pub units: i64,
    pub station: StationId,
    pub reward: i64,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn accept(&mut self, assignee: PlayerId, now: DateTime<Utc>) -> Result<()> {
        if self.status != ContractStatus::Open {
            return Err(Error::Conflict("contract not open"));
        }
        if assignee == self.poster {
            return Err(Error::validation("contract", "cannot haul your own contract"));
        }
        self.assignee = Some(assignee);
        self.status = ContractStatus::Accepted;
        self.updated_at = now;
        Ok(())
    }

    pub fn fulfill(&mut self, by: PlayerId, now: DateTime<Utc>) -> Result<()> {
        if self.status != ContractStatus::Accepted {
            return Err(Error::Conflict("contract not accepted"));
        }
        if self.assignee != Some(by) {
            return Err(Error::InsufficientPermissions);
        }
        self.status = ContractStatus::Fulfilled;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn contract(poster: PlayerId) -> Contract {
        let now = Utc::now();
        Contract {
            id: ContractId::new(),
            poster,
            assignee: None,
            commodity: "ore".to_string(),
            units: 100,
            station: StationId::new(),
            reward: 500,
            status: ContractStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_accept_then_fulfill() {
        let poster = PlayerId::new();
        let hauler = PlayerId::new();
        let mut c = contract(poster);
        c.accept(hauler, Utc::now()).unwrap();
        assert_eq!(c.status, ContractStatus::Accepted);
        // double-accept conflicts
        assert!(c.accept(PlayerId::new(), Utc::now()).is_err());
        // only the assignee fulfills
        assert!(c.fulfill(poster, Utc::now()).is_err());
        c.fulfill(hauler, Utc::now()).unwrap();
        assert_eq!(c.status, ContractStatus::Fulfilled);
        assert!(c.fulfill(hauler, Utc::now()).is_err());
    }

    #[test]
    fn test_poster_cannot_self_haul() {
        let poster = PlayerId::new();
        let mut c = contract(poster);
        assert!(c.accept(poster, Utc::now()).is_err());
    }
}
