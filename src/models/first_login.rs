use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{PlayerId, SessionId, ShipId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirstLoginState {
    #[serde(rename = "greeting")]
    Greeting,
    #[serde(rename = "ship-claim")]
    ShipClaim,
    #[serde(rename = "questioning")]
    Questioning,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "caught")]
    Caught,
    #[serde(rename = "suspicious")]
    Suspicious,
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl FirstLoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FirstLoginState::Success
                | FirstLoginState::Caught
                | FirstLoginState::Suspicious
                | FirstLoginState::Abandoned
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

/// Onboarding dialogue persisted as a finite-state machine; each player
/// input advances the state in one transaction. At most one active
/// session per player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstLoginSession {
    pub id: SessionId,
    pub player: PlayerId,
    pub state: FirstLoginState,
    pub exchanges: Vec<Exchange>,
    /// Ships presented for the claim step.
    pub offered_ships: Vec<ShipId>,
    pub claimed_ship: Option<ShipId>,
    /// Running consistency score over the player's answers; low scores
    /// terminate in `caught` or `suspicious`.
    pub credibility: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FirstLoginInput {
    Acknowledge,
    ClaimShip(ShipId),
    Answer(String),
    Abandon,
}

impl FirstLoginSession {
    /// Advance the FSM by one input; pure, the caller persists.
    pub fn advance(&mut self, input: FirstLoginInput, now: DateTime<Utc>) -> Result<FirstLoginState> {
        if self.state.is_terminal() {
            return Err(Error::Conflict("session already finished"));
        }
        if input == FirstLoginInput::Abandon {
            self.state = FirstLoginState::Abandoned;
            self.updated_at = now;
            return Ok(self.state);
        }
        self.state = match (self.state, input) {
            (FirstLoginState::Greeting, FirstLoginInput::Acknowledge) => FirstLoginState::ShipClaim,
            (FirstLoginState::ShipClaim, FirstLoginInput::ClaimShip(ship)) => {
                if !self.offered_ships.contains(&ship) {
                    return Err(Error::validation("ship", "not among the offered ships"));
                }
                self.claimed_ship = Some(ship);
                FirstLoginState::Questioning
            }
            (FirstLoginState::Questioning, FirstLoginInput::Answer(answer)) => {
                // A short, vague answer reads as evasive.
                let delta = if answer.trim().len() < 8 { -0.3 } else { 0.15 };
                self.credibility = crate::util::clamp_f64(self.credibility + delta, 0.0, 1.0);
                self.exchanges.push(Exchange {
                    prompt: "guard-question".to_string(),
                    response: answer,
                    at: now,
                });
                if self.exchanges.len() >= 3 {
                    if self.credibility >= 0.6 {
                        FirstLoginState::Success
                    } else if self.credibility >= 0.3 {
                        FirstLoginState::Suspicious
                    } else {
                        FirstLoginState::Caught
                    }
                } else {
                    FirstLoginState::Questioning
                }
            }
            (state, _) => {
                return Err(Error::validation(
                    "input",
                    &format!("not valid in state {:?}", state),
                ))
            }
        };
        self.updated_at = now;
        Ok(self.state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn session() -> (FirstLoginSession, ShipId) {
        let now = Utc::now();
        let ship = ShipId::new();
        (
            FirstLoginSession {
                id: SessionId::new(),
                player: PlayerId::new(),
                state: FirstLoginState::Greeting,
                exchanges: vec![],
                offered_ships: vec![ship],
                claimed_ship: None,
                credibility: 0.5,
                created_at: now,
                updated_at: now,
            },
            ship,
        )
    }

    #[test]
    fn test_happy_path_reaches_success() {
        let (mut s, ship) = session();
        let now = Utc::now();
        s.advance(FirstLoginInput::Acknowledge, now).unwrap();
        s.advance(FirstLoginInput::ClaimShip(ship), now).unwrap();
        for _ in 0..2 {
            s.advance(FirstLoginInput::Answer("a well considered answer".to_string()), now)
                .unwrap();
        }
        let end = s
            .advance(FirstLoginInput::Answer("another solid answer".to_string()), now)
            .unwrap();
        assert_eq!(end, FirstLoginState::Success);
        assert!(s.state.is_terminal());
    }

    #[test]
    fn test_evasive_answers_get_caught() {
        let (mut s, ship) = session();
        let now = Utc::now();
        s.advance(FirstLoginInput::Acknowledge, now).unwrap();
        s.advance(FirstLoginInput::ClaimShip(ship), now).unwrap();
        s.advance(FirstLoginInput::Answer("uh".to_string()), now).unwrap();
        s.advance(FirstLoginInput::Answer("no".to_string()), now).unwrap();
        let end = s.advance(FirstLoginInput::Answer("hm".to_string()), now).unwrap();
        assert_eq!(end, FirstLoginState::Caught);
    }

    #[test]
    fn test_cannot_claim_unoffered_ship() {
        let (mut s, _) = session();
        let now = Utc::now();
        s.advance(FirstLoginInput::Acknowledge, now).unwrap();
        assert!(s.advance(FirstLoginInput::ClaimShip(ShipId::new()), now).is_err());
    }

    #[test]
    fn test_terminal_is_final() {
        let (mut s, _) = session();
        let now = Utc::now();
        s.advance(FirstLoginInput::Abandon, now).unwrap();
        assert!(s.advance(FirstLoginInput::Acknowledge, now).is_err());
    }
}
