//! The event fabric: authoritative publish/subscribe over the socket
//! layer. Scope routing and authorization live here; `socket` wires the
//! registry to socketioxide.

pub mod socket;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::database::{global, DbClient};
use crate::error::{Error, Result};
use crate::models::{
    DomainEvent, MembershipType, PlayerId, RegionName, Role, Scope, SectorIndex, TeamId,
};

/// How long a durable publish may block on a full outbound queue before
/// the originating mutation fails `Unavailable`.
const DURABLE_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// One frame on a socket's outbound queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub scope: String,
    /// Sequence id for durable events; cursor for resumption.
    pub id: Option<i64>,
    pub payload: Value,
    pub durable: bool,
}

/// What a subscriber is allowed to see, resolved at connect/subscribe
/// time from authoritative state.
#[derive(Debug, Clone)]
pub struct SubscriberCtx {
    pub player: PlayerId,
    pub role: Role,
    pub current_region: RegionName,
    pub current_sector: SectorIndex,
    pub teams: BTreeSet<TeamId>,
    pub memberships: BTreeMap<RegionName, MembershipType>,
}

impl SubscriberCtx {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// Scope authorization rules. Pure so the matrix is testable without a
/// socket in sight.
pub fn authorize(ctx: &SubscriberCtx, scope: &Scope) -> Result<()> {
    let allowed = match scope {
        Scope::Player(player) => *player == ctx.player,
        Scope::Sector(region, sector) => {
            ctx.is_admin()
                || (ctx.current_region == *region && ctx.current_sector == *sector)
        }
        Scope::Team(team) => ctx.teams.contains(team),
        Scope::Region(region) => {
            ctx.is_admin()
                || ctx
                    .memberships
                    .get(region)
                    .map(|t| *t >= MembershipType::Resident)
                    .unwrap_or(false)
        }
        Scope::Admin => ctx.is_admin(),
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions)
    }
}

struct SocketEntry {
    tx: mpsc::Sender<OutboundFrame>,
    ctx: SubscriberCtx,
    scopes: BTreeSet<Scope>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub total_sockets: usize,
    pub admin_sockets: usize,
    pub per_sector: BTreeMap<String, usize>,
    pub per_team: BTreeMap<String, usize>,
}

#[derive(Clone)]
pub struct EventFabric {
    db: DbClient,
    sockets: Arc<DashMap<String, SocketEntry>>,
    scopes: Arc<DashMap<Scope, BTreeSet<String>>>,
}

impl EventFabric {
    pub(crate) fn db(&self) -> &DbClient {
        &self.db
    }

    pub fn new(db: &DbClient) -> EventFabric {
        EventFabric {
            db: db.clone(),
            sockets: Arc::new(DashMap::new()),
            scopes: Arc::new(DashMap::new()),
        }
    }

    /// Register a connected socket; the receiver feeds the socket's write
    /// loop. Every socket starts subscribed to its own player scope.
    pub fn connect(&self, socket_id: &str, ctx: SubscriberCtx) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(CONFIG.ws_outbound_high_water);
        let player_scope = Scope::Player(ctx.player);
        self.sockets.insert(
            socket_id.to_string(),
            SocketEntry {
                tx,
                ctx,
                scopes: BTreeSet::from([player_scope.clone()]),
            },
        );
        self.scopes
            .entry(player_scope)
            .or_default()
            .insert(socket_id.to_string());
        debug!("socket {} connected", socket_id);
        rx
    }

    pub fn disconnect(&self, socket_id: &str) {
        if let Some((_, entry)) = self.sockets.remove(socket_id) {
            for scope in entry.scopes {
                if let Some(mut set) = self.scopes.get_mut(&scope) {
                    set.remove(socket_id);
                }
            }
        }
        debug!("socket {} disconnected", socket_id);
    }

    /// Subscribe with optional cursor resumption for durable scopes. The
    /// replayed backlog is queued ahead of live traffic for this scope.
    pub async fn subscribe(
        &self,
        socket_id: &str,
        scope: Scope,
        cursor: Option<i64>,
    ) -> Result<()> {
        let (tx, ctx) = {
            let entry = self
                .sockets
                .get(socket_id)
                .ok_or(Error::NotFound("socket"))?;
            (entry.tx.clone(), entry.ctx.clone())
        };
        authorize(&ctx, &scope)?;

        if let Some(cursor) = cursor {
            let mut conn = self.db.conn().await?;
            let backlog = global::replay_durable_events(&mut conn, &scope, cursor, 500).await?;
            for row in backlog {
                let frame = OutboundFrame {
                    scope: scope.wire_name(),
                    id: Some(row.seq),
                    payload: row.payload,
                    durable: true,
                };
                tx.send(frame)
                    .await
                    .map_err(|_| Error::Unavailable("socket gone during replay".into()))?;
            }
        }

        if let Some(mut entry) = self.sockets.get_mut(socket_id) {
            entry.scopes.insert(scope.clone());
        }
        self.scopes
            .entry(scope)
            .or_default()
            .insert(socket_id.to_string());
        Ok(())
    }

    /// Close a scope; queued frames for it are simply not delivered once
    /// the subscription is gone.
    pub fn unsubscribe(&self, socket_id: &str, scope: &Scope) {
        if let Some(mut entry) = self.sockets.get_mut(socket_id) {
            entry.scopes.remove(scope);
        }
        if let Some(mut set) = self.scopes.get_mut(scope) {
            set.remove(socket_id);
        }
    }

    /// Publish a domain event to every subscribed socket of every scope
    /// it maps to. Durable events are persisted first (gaining their
    /// cursor ids) and block briefly on full queues; best-effort events
    /// drop on overflow.
    pub async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let durable = event.is_durable();
        let payload = event.payload();
        for scope in event.scopes() {
            let seq = if durable {
                let mut conn = self.db.conn().await?;
                Some(global::insert_durable_event(&mut conn, &scope, event).await?)
            } else {
                None
            };
            let frame = OutboundFrame {
                scope: scope.wire_name(),
                id: seq,
                payload: payload.clone(),
                durable,
            };
            let subscriber_ids: Vec<String> = match self.scopes.get(&scope) {
                Some(set) => set.iter().cloned().collect(),
                None => continue,
            };
            for socket_id in subscriber_ids {
                let tx = match self.sockets.get(&socket_id) {
                    Some(entry) => entry.tx.clone(),
                    None => continue,
                };
                if durable {
                    if tokio::time::timeout(DURABLE_SEND_TIMEOUT, tx.send(frame.clone()))
                        .await
                        .map(|r| r.is_err())
                        .unwrap_or(true)
                    {
                        // Persisted above, so the subscriber recovers via
                        // cursor replay, but the producer must hear about
                        // the backpressure.
                        warn!("durable send stalled for socket {}", socket_id);
                        return Err(Error::Unavailable("subscriber backpressure".into()));
                    }
                } else if tx.try_send(frame.clone()).is_err() {
                    debug!("dropped best-effort frame for socket {}", socket_id);
                }
            }
        }
        Ok(())
    }

    /// Presence counters for administrators.
    pub fn presence(&self) -> Presence {
        let mut per_sector = BTreeMap::new();
        let mut per_team = BTreeMap::new();
        for entry in self.scopes.iter() {
            let count = entry.value().len();
            if count == 0 {
                continue;
            }
            match entry.key() {
                Scope::Sector(region, sector) => {
                    per_sector.insert(format!("{}:{}", region, sector), count);
                }
                Scope::Team(team) => {
                    per_team.insert(team.to_string(), count);
                }
                _ => {}
            }
        }
        let admin_sockets = self
            .sockets
            .iter()
            .filter(|e| e.value().ctx.is_admin())
            .count();
        Presence {
            total_sockets: self.sockets.len(),
            admin_sockets,
            per_sector,
            per_team,
        }
    }
}

/// Client frame shapes for the socket layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFrame {
    pub scope: String,
    pub cursor: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub scope: String,
    pub cursor: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    fn ctx(role: Role) -> SubscriberCtx {
        SubscriberCtx {
            player: PlayerId::new(),
            role,
            current_region: RegionName::nexus(),
            current_sector: SectorIndex(5),
            teams: BTreeSet::new(),
            memberships: BTreeMap::from([(RegionName::nexus(), MembershipType::Resident)]),
        }
    }

    #[test]
    fn test_player_scope_only_self() {
        let me = ctx(Role::Player);
        assert!(authorize(&me, &Scope::Player(me.player)).is_ok());
        assert!(authorize(&me, &Scope::Player(PlayerId::new())).is_err());
    }

    #[test]
    fn test_sector_scope_requires_occupancy_or_admin() {
        let me = ctx(Role::Player);
        assert!(authorize(&me, &Scope::Sector(RegionName::nexus(), SectorIndex(5))).is_ok());
        assert!(authorize(&me, &Scope::Sector(RegionName::nexus(), SectorIndex(6))).is_err());
        let admin = ctx(Role::Administrator);
        assert!(authorize(&admin, &Scope::Sector(RegionName::nexus(), SectorIndex(6))).is_ok());
    }

    #[test]
    fn test_team_scope_requires_membership() {
        let mut me = ctx(Role::Player);
        let team = TeamId::new();
        assert!(authorize(&me, &Scope::Team(team)).is_err());
        me.teams.insert(team);
        assert!(authorize(&me, &Scope::Team(team)).is_ok());
    }

    #[test]
    fn test_region_scope_needs_residency() {
        let mut me = ctx(Role::Player);
        assert!(authorize(&me, &Scope::Region(RegionName::nexus())).is_ok());
        let other = RegionName::new("mining-co").unwrap();
        assert!(authorize(&me, &Scope::Region(other.clone())).is_err());
        me.memberships.insert(other.clone(), MembershipType::Visitor);
        assert!(authorize(&me, &Scope::Region(other.clone())).is_err());
        me.memberships.insert(other.clone(), MembershipType::Citizen);
        assert!(authorize(&me, &Scope::Region(other)).is_ok());
    }

    #[test]
    fn test_admin_scope() {
        assert!(authorize(&ctx(Role::Player), &Scope::Admin).is_err());
        assert!(authorize(&ctx(Role::Administrator), &Scope::Admin).is_ok());
    }
}
