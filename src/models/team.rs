use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{PlayerId, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamKind {
    #[serde(rename = "corporation")]
    Corporation,
    #[serde(rename = "alliance")]
    Alliance,
    #[serde(rename = "guild")]
    Guild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPolicy {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "application")]
    Application,
    #[serde(rename = "invite-only")]
    InviteOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamRole {
    #[serde(rename = "leader")]
    Leader,
    #[serde(rename = "officer")]
    Officer,
    #[serde(rename = "treasurer")]
    Treasurer,
    #[serde(rename = "member")]
    Member,
}

impl TeamRole {
    pub fn may_manage_members(&self) -> bool {
        matches!(self, TeamRole::Leader | TeamRole::Officer)
    }

    pub fn may_withdraw(&self) -> bool {
        matches!(self, TeamRole::Leader | TeamRole::Treasurer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub player: PlayerId,
    pub role: TeamRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamApplication {
    pub player: PlayerId,
    pub message: String,
    pub applied_at: DateTime<Utc>,
}

/// Voluntary player group; name unique per region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub kind: TeamKind,
    pub size_cap: u32,
    pub join_policy: JoinPolicy,
    pub treasury: i64,
    pub members: Vec<TeamMember>,
    pub applications: Vec<TeamApplication>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    pub fn member(&self, player: PlayerId) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.player == player)
    }

    pub fn role_of(&self, player: PlayerId) -> Option<TeamRole> {
        self.member(player).map(|m| m.role)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() as u32 >= self.size_cap
    }

    pub fn add_member(&mut self, player: PlayerId, role: TeamRole, now: DateTime<Utc>) -> Result<()> {
        if self.member(player).is_some() {
            return Err(Error::Conflict("already a member"));
        }
        if self.is_full() {
            return Err(Error::validation("team", "team is at its size cap"));
        }
        self.members.push(TeamMember {
            player,
            role,
            joined_at: now,
        });
        self.applications.retain(|a| a.player != player);
        self.updated_at = now;
        Ok(())
    }

    pub fn assign_role(
        &mut self,
        actor: PlayerId,
        target: PlayerId,
        role: TeamRole,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let actor_role = self.role_of(actor).ok_or(Error::TeamPermissionDenied)?;
        if actor_role != TeamRole::Leader {
            return Err(Error::TeamPermissionDenied);
        }
        let member = self
            .members
            .iter_mut()
            .find(|m| m.player == target)
            .ok_or(Error::NotFound("team member"))?;
        member.role = role;
        self.updated_at = now;
        Ok(())
    }

    pub fn deposit(&mut self, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(Error::validation("amount", "must be positive"));
        }
        self.treasury = self.treasury.saturating_add(amount);
        Ok(())
    }

    pub fn withdraw(&mut self, actor: PlayerId, amount: i64) -> Result<()> {
        let role = self.role_of(actor).ok_or(Error::TeamPermissionDenied)?;
        if !role.may_withdraw() {
            return Err(Error::TeamPermissionDenied);
        }
        if amount <= 0 {
            return Err(Error::validation("amount", "must be positive"));
        }
        if self.treasury < amount {
            return Err(Error::InsufficientCredits {
                required: amount,
                available: self.treasury,
            });
        }
        self.treasury -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn team_with_leader(leader: PlayerId) -> Team {
        let now = Utc::now();
        Team {
            id: TeamId::new(),
            name: "Free Traders".to_string(),
            kind: TeamKind::Corporation,
            size_cap: 2,
            join_policy: JoinPolicy::Application,
            treasury: 0,
            members: vec![TeamMember {
                player: leader,
                role: TeamRole::Leader,
                joined_at: now,
            }],
            applications: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_size_cap() {
        let leader = PlayerId::new();
        let mut team = team_with_leader(leader);
        team.add_member(PlayerId::new(), TeamRole::Member, Utc::now())
            .unwrap();
        let err = team
            .add_member(PlayerId::new(), TeamRole::Member, Utc::now())
            .unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_treasury_permissions() {
        let leader = PlayerId::new();
        let member = PlayerId::new();
        let mut team = team_with_leader(leader);
        team.add_member(member, TeamRole::Member, Utc::now()).unwrap();
        team.deposit(500).unwrap();
        assert!(team.withdraw(member, 100).is_err());
        team.withdraw(leader, 100).unwrap();
        assert_eq!(team.treasury, 400);
        assert!(team.withdraw(leader, 500).is_err());
    }

    #[test]
    fn test_role_assignment_requires_leader() {
        let leader = PlayerId::new();
        let officer = PlayerId::new();
        let mut team = team_with_leader(leader);
        team.add_member(officer, TeamRole::Officer, Utc::now())
            .unwrap();
        assert!(team
            .assign_role(officer, leader, TeamRole::Member, Utc::now())
            .is_err());
        team.assign_role(leader, officer, TeamRole::Treasurer, Utc::now())
            .unwrap();
        assert_eq!(team.role_of(officer), Some(TeamRole::Treasurer));
    }
}
