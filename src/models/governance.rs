use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{ElectionId, PlayerId, PolicyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    #[serde(rename = "voting")]
    Voting,
    #[serde(rename = "passed")]
    Passed,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "withdrawn")]
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    pub proposer: PlayerId,
    pub title: String,
    pub proposal: String,
    pub voting_opens_at: DateTime<Utc>,
    pub voting_closes_at: DateTime<Utc>,
    pub votes_for: f64,
    pub votes_against: f64,
    pub status: PolicyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == PolicyStatus::Voting
            && now >= self.voting_opens_at
            && now < self.voting_closes_at
    }

    /// Tally against the region's voting threshold; called by the
    /// scheduler once the window closes.
    pub fn tally(&mut self, threshold: f64, now: DateTime<Utc>) -> Result<PolicyStatus> {
        if self.status != PolicyStatus::Voting {
            return Err(Error::Conflict("policy already tallied"));
        }
        if now < self.voting_closes_at {
            return Err(Error::Conflict("voting window still open"));
        }
        let total = self.votes_for + self.votes_against;
        self.status = if total > 0.0 && self.votes_for / total >= threshold {
            PolicyStatus::Passed
        } else {
            PolicyStatus::Rejected
        };
        self.updated_at = now;
        Ok(self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "governor")]
    Governor,
    #[serde(rename = "council-member")]
    CouncilMember,
    #[serde(rename = "ambassador")]
    Ambassador,
    #[serde(rename = "trade-commissioner")]
    TradeCommissioner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: ElectionId,
    pub position: Position,
    pub candidates: Vec<PlayerId>,
    pub voting_opens_at: DateTime<Utc>,
    pub voting_closes_at: DateTime<Utc>,
    pub status: ElectionStatus,
    pub winner: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ballot; unique per (election, voter). Retraction deletes the row in
/// a distinct mutation, it never overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub election: ElectionId,
    pub voter: PlayerId,
    pub candidate: PlayerId,
    pub weight: f64,
    pub cast_at: DateTime<Utc>,
}

impl Election {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ElectionStatus::Open
            && now >= self.voting_opens_at
            && now < self.voting_closes_at
    }

    pub fn validate_candidate(&self, candidate: PlayerId) -> Result<()> {
        if !self.candidates.contains(&candidate) {
            return Err(Error::validation("candidate", "not standing in this election"));
        }
        Ok(())
    }

    /// Weighted tally over the ballots; the candidate with the highest
    /// summed weight wins, ties broken by candidate list order.
    pub fn close(&mut self, ballots: &[Ballot], now: DateTime<Utc>) -> Result<Option<PlayerId>> {
        if self.status != ElectionStatus::Open {
            return Err(Error::Conflict("election already closed"));
        }
        if now < self.voting_closes_at {
            return Err(Error::Conflict("voting window still open"));
        }
        let mut best: Option<(PlayerId, f64)> = None;
        for candidate in &self.candidates {
            let total: f64 = ballots
                .iter()
                .filter(|b| b.election == self.id && b.candidate == *candidate)
                .map(|b| b.weight)
                .sum();
            match best {
                Some((_, best_total)) if total <= best_total => {}
                _ => best = Some((*candidate, total)),
            }
        }
        self.winner = best.map(|(c, _)| c);
        self.status = ElectionStatus::Closed;
        self.updated_at = now;
        Ok(self.winner)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - chrono::Duration::hours(2), now - chrono::Duration::hours(1))
    }

    #[test]
    fn test_policy_tally_threshold() {
        let now = Utc::now();
        let (opens, closes) = window(now);
        let mut policy = Policy {
            id: PolicyId::new(),
            proposer: PlayerId::new(),
            title: "Lower tariffs".to_string(),
            proposal: "Reduce tax rate".to_string(),
            voting_opens_at: opens,
            voting_closes_at: closes,
            votes_for: 6.0,
            votes_against: 4.0,
            status: PolicyStatus::Voting,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(policy.tally(0.5, now).unwrap(), PolicyStatus::Passed);
        assert!(policy.tally(0.5, now).is_err());
    }

    #[test]
    fn test_policy_tally_rejects_below_threshold() {
        let now = Utc::now();
        let (opens, closes) = window(now);
        let mut policy = Policy {
            id: PolicyId::new(),
            proposer: PlayerId::new(),
            title: "t".to_string(),
            proposal: "p".to_string(),
            voting_opens_at: opens,
            voting_closes_at: closes,
            votes_for: 3.0,
            votes_against: 7.0,
            status: PolicyStatus::Voting,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(policy.tally(0.5, now).unwrap(), PolicyStatus::Rejected);
    }

    #[test]
    fn test_weighted_election() {
        let now = Utc::now();
        let (opens, closes) = window(now);
        let a = PlayerId::new();
        let b = PlayerId::new();
        let mut election = Election {
            id: ElectionId::new(),
            position: Position::Governor,
            candidates: vec![a, b],
            voting_opens_at: opens,
            voting_closes_at: closes,
            status: ElectionStatus::Open,
            winner: None,
            created_at: now,
            updated_at: now,
        };
        // three citizens: weights 1.0, 2.0, 1.5 for A, B, A
        let ballots = vec![
            Ballot {
                election: election.id,
                voter: PlayerId::new(),
                candidate: a,
                weight: 1.0,
                cast_at: now,
            },
            Ballot {
                election: election.id,
                voter: PlayerId::new(),
                candidate: b,
                weight: 2.0,
                cast_at: now,
            },
            Ballot {
                election: election.id,
                voter: PlayerId::new(),
                candidate: a,
                weight: 1.5,
                cast_at: now,
            },
        ];
        let winner = election.close(&ballots, now).unwrap();
        assert_eq!(winner, Some(a));
        assert_eq!(election.status, ElectionStatus::Closed);
        assert!(election.close(&ballots, now).is_err());
    }

    #[test]
    fn test_close_before_window_end_fails() {
        let now = Utc::now();
        let mut election = Election {
            id: ElectionId::new(),
            position: Position::Governor,
            candidates: vec![PlayerId::new()],
            voting_opens_at: now,
            voting_closes_at: now + chrono::Duration::hours(1),
            status: ElectionStatus::Open,
            winner: None,
            created_at: now,
            updated_at: now,
        };
        assert!(election.close(&[], now).is_err());
    }
}
