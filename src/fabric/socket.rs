//! socketioxide wiring for the event fabric. Clients authenticate at
//! handshake with an access token, then drive subscribe/unsubscribe/ack
//! frames; server events arrive as `event` emissions.

use serde_json::Value;
use socketioxide::extract::{Data, SocketRef, State, TryData};
use socketioxide::{SocketIo, TransportType};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::tokens;
use crate::database::{global, regional, DbClient};
use crate::error::{Error, Result};
use crate::models::{Scope, TeamId};

use super::{AckFrame, EventFabric, SubscribeFrame, SubscriberCtx};

/// Build the socket.io layer and bind the fabric handlers to the root
/// namespace.
pub fn build_layer(fabric: EventFabric) -> (socketioxide::layer::SocketIoLayer, SocketIo) {
    let (layer, io) = SocketIo::builder()
        .req_path("/api/v1/events")
        .transports([TransportType::Websocket])
        .ping_interval(Duration::from_secs(5))
        .ping_timeout(Duration::from_secs(10))
        .with_state(fabric)
        .build_layer();

    io.ns("/", on_connect);
    (layer, io)
}

fn token_from_handshake(s: &SocketRef, auth: &Value) -> Option<String> {
    if let Some(token) = auth.get("token").and_then(|t| t.as_str()) {
        return Some(token.to_string());
    }
    // Fallback: `?token=` query parameter on the handshake request.
    let query = s.req_parts().uri.query()?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_string())
    })
}

async fn build_ctx(db: &DbClient, token: &str) -> Result<SubscriberCtx> {
    let claims = tokens::verify_access_token(token)?;
    let account_id = claims.account_id()?;
    let mut conn = db.conn().await?;
    let player = global::get_player_by_account(&mut conn, account_id)
        .await?
        .ok_or(Error::NotFound("player"))?
        .data;
    let memberships = global::list_memberships_for_player(&mut conn, player.id).await?;
    drop(conn);

    let mut teams: BTreeSet<TeamId> = BTreeSet::new();
    if db.has_region_shard(&player.current_region) {
        let mut conn = db.region_conn(&player.current_region).await?;
        for team in regional::list_teams(&mut conn).await? {
            if team.member(player.id).is_some() {
                teams.insert(team.id);
            }
        }
    }

    Ok(SubscriberCtx {
        player: player.id,
        role: claims.role(),
        current_region: player.current_region.clone(),
        current_sector: player.current_sector,
        teams,
        memberships: memberships
            .into_iter()
            .map(|m| (m.region, m.membership_type))
            .collect::<BTreeMap<_, _>>(),
    })
}

async fn on_connect(s: SocketRef, State(fabric): State<EventFabric>, TryData(auth): TryData<Value>) {
    let auth = auth.unwrap_or(Value::Null);
    let token = match token_from_handshake(&s, &auth) {
        Some(token) => token,
        None => {
            warn!("socket {} presented no token", s.id);
            s.disconnect().ok();
            return;
        }
    };
    let ctx = match build_ctx(fabric.db(), &token).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!("socket {} auth failed: {}", s.id, e);
            s.disconnect().ok();
            return;
        }
    };
    info!("socket {} connected as player {}", s.id, ctx.player);

    let socket_id = s.id.to_string();
    let mut rx = fabric.connect(&socket_id, ctx);

    // Writer task: drain the bounded queue onto the wire. The queue is
    // where the high-water mark is enforced, not here.
    {
        let s = s.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if s.emit("event", &frame).is_err() {
                    break;
                }
            }
        });
    }

    s.on(
        "subscribe",
        |s: SocketRef, State(fabric): State<EventFabric>, Data::<SubscribeFrame>(frame)| async move {
            let scope = match Scope::parse(&frame.scope) {
                Some(scope) => scope,
                None => {
                    s.emit("subscribe_error", &serde_json::json!({ "scope": frame.scope, "code": "VALIDATION_ERROR" })).ok();
                    return;
                }
            };
            match fabric.subscribe(&s.id.to_string(), scope, frame.cursor).await {
                Ok(()) => {
                    s.emit("subscribed", &serde_json::json!({ "scope": frame.scope })).ok();
                }
                Err(e) => {
                    s.emit(
                        "subscribe_error",
                        &serde_json::json!({ "scope": frame.scope, "code": e.code().as_str() }),
                    )
                    .ok();
                }
            }
        },
    );

    s.on(
        "unsubscribe",
        |s: SocketRef, State(fabric): State<EventFabric>, Data::<SubscribeFrame>(frame)| async move {
            if let Some(scope) = Scope::parse(&frame.scope) {
                fabric.unsubscribe(&s.id.to_string(), &scope);
                s.emit("unsubscribed", &serde_json::json!({ "scope": frame.scope })).ok();
            }
        },
    );

    // Acks confirm client-side durability; the cursor itself lives with
    // the client and comes back at resubscribe time.
    s.on("ack", |_s: SocketRef, Data::<AckFrame>(frame)| async move {
        debug!("ack {} @ {}", frame.scope, frame.cursor);
    });

    s.on_disconnect(|s: SocketRef, State(fabric): State<EventFabric>| async move {
        fabric.disconnect(&s.id.to_string());
    });
}
