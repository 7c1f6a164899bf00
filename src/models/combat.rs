use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{CombatId, SectorIndex, ShipId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatState {
    #[serde(rename = "engaging")]
    Engaging,
    #[serde(rename = "resolving")]
    Resolving,
    #[serde(rename = "victory")]
    Victory,
    #[serde(rename = "defeat")]
    Defeat,
    #[serde(rename = "draw")]
    Draw,
    #[serde(rename = "retreat")]
    Retreat,
}

impl CombatState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CombatState::Victory | CombatState::Defeat | CombatState::Draw | CombatState::Retreat
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponMix {
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "alpha-strike")]
    AlphaStrike,
    #[serde(rename = "defensive")]
    Defensive,
}

/// Per-round command from one side; missing commands past the deadline are
/// filled from the prior round's command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatCommand {
    pub target: Option<ShipId>,
    pub weapon_mix: WeaponMix,
    pub drones_attack: bool,
    pub attempt_retreat: bool,
}

impl Default for CombatCommand {
    fn default() -> Self {
        CombatCommand {
            target: None,
            weapon_mix: WeaponMix::Balanced,
            drones_attack: true,
            attempt_retreat: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub ship: ShipId,
    pub joined_at: DateTime<Utc>,
    pub hull_remaining: f64,
    pub shield_remaining: i32,
    pub drones: i32,
    pub retreat_score: f64,
    pub last_command: Option<CombatCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatRound {
    pub round: u32,
    pub initiative_order: Vec<ShipId>,
    pub damage_dealt: Vec<(ShipId, i32)>,
    pub drones_lost: Vec<(ShipId, i32)>,
    pub retreat_attempted: Vec<ShipId>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combat {
    pub id: CombatId,
    pub sector: SectorIndex,
    pub state: CombatState,
    pub attacker: Combatant,
    pub defender: Combatant,
    pub round_cap: u32,
    pub round_deadline_secs: u32,
    pub rounds: Vec<CombatRound>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Combat {
    /// Round log is append-only; once terminal, immutable.
    pub fn push_round(&mut self, round: CombatRound) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Conflict("combat already terminal"));
        }
        if round.round as usize != self.rounds.len() + 1 {
            return Err(Error::InvariantViolation(format!(
                "round {} out of sequence, expected {}",
                round.round,
                self.rounds.len() + 1
            )));
        }
        self.rounds.push(round);
        Ok(())
    }

    pub fn finish(&mut self, state: CombatState, now: DateTime<Utc>) -> Result<()> {
        if !state.is_terminal() {
            return Err(Error::InvariantViolation(
                "finish requires a terminal state".to_string(),
            ));
        }
        if self.state.is_terminal() {
            return Err(Error::Conflict("combat already terminal"));
        }
        self.state = state;
        self.updated_at = now;
        Ok(())
    }

    pub fn combatant(&self, ship: ShipId) -> Option<&Combatant> {
        if self.attacker.ship == ship {
            Some(&self.attacker)
        } else if self.defender.ship == ship {
            Some(&self.defender)
        } else {
            None
        }
    }

    pub fn combatant_mut(&mut self, ship: ShipId) -> Option<&mut Combatant> {
        if self.attacker.ship == ship {
            Some(&mut self.attacker)
        } else if self.defender.ship == ship {
            Some(&mut self.defender)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn combatant(ship: ShipId) -> Combatant {
        Combatant {
            ship,
            joined_at: Utc::now(),
            hull_remaining: 1.0,
            shield_remaining: 50,
            drones: 0,
            retreat_score: 0.0,
            last_command: None,
        }
    }

    fn combat() -> Combat {
        let now = Utc::now();
        Combat {
            id: CombatId::new(),
            sector: SectorIndex(10),
            state: CombatState::Engaging,
            attacker: combatant(ShipId::new()),
            defender: combatant(ShipId::new()),
            round_cap: 20,
            round_deadline_secs: 5,
            rounds: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn round(n: u32) -> CombatRound {
        CombatRound {
            round: n,
            initiative_order: vec![],
            damage_dealt: vec![],
            drones_lost: vec![],
            retreat_attempted: vec![],
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_log_sequencing() {
        let mut c = combat();
        c.push_round(round(1)).unwrap();
        c.push_round(round(2)).unwrap();
        assert!(c.push_round(round(4)).is_err());
    }

    #[test]
    fn test_terminal_log_immutable() {
        let mut c = combat();
        c.push_round(round(1)).unwrap();
        c.finish(CombatState::Victory, Utc::now()).unwrap();
        let err = c.push_round(round(2)).unwrap_err();
        assert_eq!(err.code().as_str(), "CONFLICT");
        // double-finish is also a conflict
        assert!(c.finish(CombatState::Draw, Utc::now()).is_err());
    }

    #[test]
    fn test_finish_requires_terminal() {
        let mut c = combat();
        assert!(c.finish(CombatState::Resolving, Utc::now()).is_err());
    }
}
