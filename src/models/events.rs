use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    CombatId, ElectionId, MessageId, PlayerId, PolicyId, RegionName, SectorIndex, ShipId, TeamId,
    TravelId,
};

/// Subscription scope for the event fabric. Scopes serialize to the wire
/// form used in subscribe/unsubscribe frames: `player`, `sector:17`,
/// `team:<uuid>`, `region:mining-co`, `admin`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Player(PlayerId),
    Sector(RegionName, SectorIndex),
    Team(TeamId),
    Region(RegionName),
    Admin,
}

impl Scope {
    pub fn wire_name(&self) -> String {
        match self {
            Scope::Player(id) => format!("player:{}", id),
            Scope::Sector(region, idx) => format!("sector:{}:{}", region, idx),
            Scope::Team(id) => format!("team:{}", id),
            Scope::Region(name) => format!("region:{}", name),
            Scope::Admin => "admin".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        if s == "admin" {
            return Some(Scope::Admin);
        }
        let (kind, rest) = s.split_once(':')?;
        match kind {
            "player" => rest.parse().ok().map(|u| Scope::Player(PlayerId(u))),
            "team" => rest.parse().ok().map(|u| Scope::Team(TeamId(u))),
            "region" => RegionName::new(rest).map(Scope::Region),
            "sector" => {
                let (region, idx) = rest.rsplit_once(':')?;
                let region = RegionName::new(region)?;
                let idx: i32 = idx.parse().ok()?;
                Some(Scope::Sector(region, SectorIndex(idx)))
            }
            _ => None,
        }
    }
}

/// Domain events, emitted by mutations and fed to the fabric. The durable
/// subset is persisted and replayable by cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DomainEvent {
    ShipEntered {
        region: RegionName,
        sector: SectorIndex,
        ship: ShipId,
        player: PlayerId,
    },
    ShipDeparted {
        region: RegionName,
        sector: SectorIndex,
        ship: ShipId,
    },
    SectorTraffic {
        region: RegionName,
        sector: SectorIndex,
        ships: u32,
    },
    RadarPing {
        region: RegionName,
        sector: SectorIndex,
        contact: ShipId,
    },
    TradeExecuted {
        player: PlayerId,
        commodity: String,
        units: i64,
        total: i64,
    },
    CombatStarted {
        combat: CombatId,
        region: RegionName,
        sector: SectorIndex,
        attacker: PlayerId,
        defender: PlayerId,
    },
    CombatRoundResolved {
        combat: CombatId,
        region: RegionName,
        sector: SectorIndex,
        round: u32,
        participants: Vec<PlayerId>,
    },
    CombatEnded {
        combat: CombatId,
        region: RegionName,
        sector: SectorIndex,
        outcome: String,
        participants: Vec<PlayerId>,
    },
    MessageDelivered {
        message: MessageId,
        recipient: PlayerId,
    },
    TeamMessage {
        message: MessageId,
        team: TeamId,
    },
    SectorBroadcast {
        message: MessageId,
        region: RegionName,
        sector: SectorIndex,
    },
    RegionBroadcast {
        message: MessageId,
        region: RegionName,
    },
    PolicyPassed {
        policy: PolicyId,
        region: RegionName,
    },
    ElectionClosed {
        election: ElectionId,
        region: RegionName,
        winner: Option<PlayerId>,
    },
    TravelReserved {
        travel: TravelId,
        player: PlayerId,
    },
    TravelCompleted {
        travel: TravelId,
        player: PlayerId,
        source: RegionName,
        destination: RegionName,
    },
    TravelFailed {
        travel: TravelId,
        player: PlayerId,
    },
    RegionLifecycle {
        region: RegionName,
        status: String,
    },
    ColonyTick {
        region: RegionName,
        planet_count: u32,
        tick: i64,
    },
    AdvisoryDegraded {
        provider: String,
    },
}

impl DomainEvent {
    /// Durable events survive reconnects; the fabric persists them with a
    /// per-scope cursor.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            DomainEvent::CombatRoundResolved { .. }
                | DomainEvent::CombatEnded { .. }
                | DomainEvent::MessageDelivered { .. }
                | DomainEvent::PolicyPassed { .. }
                | DomainEvent::ElectionClosed { .. }
                | DomainEvent::TravelCompleted { .. }
        )
    }

    /// Scopes this event fans out to. Admin receives everything via its
    /// own subscription, not through this list.
    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            DomainEvent::ShipEntered {
                region,
                sector,
                player,
                ..
            } => vec![
                Scope::Sector(region.clone(), *sector),
                Scope::Player(*player),
            ],
            DomainEvent::ShipDeparted { region, sector, .. } => {
                vec![Scope::Sector(region.clone(), *sector)]
            }
            DomainEvent::SectorTraffic { region, sector, .. }
            | DomainEvent::RadarPing { region, sector, .. } => {
                vec![Scope::Sector(region.clone(), *sector)]
            }
            DomainEvent::TradeExecuted { player, .. } => vec![Scope::Player(*player)],
            DomainEvent::CombatStarted {
                region,
                sector,
                attacker,
                defender,
                ..
            } => vec![
                Scope::Sector(region.clone(), *sector),
                Scope::Player(*attacker),
                Scope::Player(*defender),
            ],
            DomainEvent::CombatRoundResolved {
                region,
                sector,
                participants,
                ..
            }
            | DomainEvent::CombatEnded {
                region,
                sector,
                participants,
                ..
            } => {
                let mut scopes = vec![Scope::Sector(region.clone(), *sector)];
                scopes.extend(participants.iter().map(|p| Scope::Player(*p)));
                scopes
            }
            DomainEvent::MessageDelivered { recipient, .. } => vec![Scope::Player(*recipient)],
            DomainEvent::TeamMessage { team, .. } => vec![Scope::Team(*team)],
            DomainEvent::SectorBroadcast { region, sector, .. } => {
                vec![Scope::Sector(region.clone(), *sector)]
            }
            DomainEvent::RegionBroadcast { region, .. } => vec![Scope::Region(region.clone())],
            DomainEvent::PolicyPassed { region, .. } => vec![Scope::Region(region.clone())],
            DomainEvent::ElectionClosed { region, .. } => vec![Scope::Region(region.clone())],
            DomainEvent::TravelReserved { player, .. }
            | DomainEvent::TravelFailed { player, .. } => vec![Scope::Player(*player)],
            DomainEvent::TravelCompleted {
                player,
                source,
                destination,
                ..
            } => vec![
                Scope::Player(*player),
                Scope::Region(source.clone()),
                Scope::Region(destination.clone()),
            ],
            DomainEvent::RegionLifecycle { region, .. } => vec![Scope::Region(region.clone())],
            DomainEvent::ColonyTick { region, .. } => vec![Scope::Region(region.clone())],
            DomainEvent::AdvisoryDegraded { .. } => vec![Scope::Admin],
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scope_wire_roundtrip() {
        let scopes = vec![
            Scope::Player(PlayerId::new()),
            Scope::Sector(RegionName::nexus(), SectorIndex(17)),
            Scope::Team(TeamId::new()),
            Scope::Region(RegionName::new("mining-co").unwrap()),
            Scope::Admin,
        ];
        for scope in scopes {
            let wire = scope.wire_name();
            assert_eq!(Scope::parse(&wire), Some(scope));
        }
    }

    #[test]
    fn test_scope_parse_rejects_garbage() {
        assert_eq!(Scope::parse("nonsense"), None);
        assert_eq!(Scope::parse("sector:only-one-part"), None);
        assert_eq!(Scope::parse("player:not-a-uuid"), None);
    }

    #[test]
    fn test_durable_classification() {
        let durable = DomainEvent::TravelCompleted {
            travel: TravelId::new(),
            player: PlayerId::new(),
            source: RegionName::new("region-foo").unwrap(),
            destination: RegionName::new("region-bar").unwrap(),
        };
        assert!(durable.is_durable());
        let tactical = DomainEvent::RadarPing {
            region: RegionName::nexus(),
            sector: SectorIndex(1),
            contact: ShipId::new(),
        };
        assert!(!tactical.is_durable());
    }

    #[test]
    fn test_travel_completed_visible_in_both_region_scopes() {
        let source = RegionName::new("region-foo").unwrap();
        let destination = RegionName::new("region-bar").unwrap();
        let event = DomainEvent::TravelCompleted {
            travel: TravelId::new(),
            player: PlayerId::new(),
            source: source.clone(),
            destination: destination.clone(),
        };
        let scopes = event.scopes();
        assert!(scopes.contains(&Scope::Region(source)));
        assert!(scopes.contains(&Scope::Region(destination)));
    }
}
