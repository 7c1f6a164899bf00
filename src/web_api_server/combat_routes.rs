use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::AsyncConnection as _;
use crate::engine::combat as combat_engine;
use crate::error::Error;
use crate::federation::diplomacy;
use crate::models::{
    CombatCommand, CombatId, CombatState, Combatant, Combat, DeploymentId, DomainEvent,
    DroneDeployment, DronePolicy, DeploymentTarget, ShipId,
};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState, Ctx};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/engage", post(engage))
        .route("/{combat}/status", get(status))
        .route("/{combat}/command", post(command))
        .route("/{combat}/retreat", post(retreat))
        .route("/drones/deploy", post(deploy_drones))
        .route("/drones/{deployment}/recall", post(recall_drones))
        .route("/drones/{deployment}/reconfigure", post(reconfigure_drones))
}

fn parse_combat(raw: &str, rid: &str) -> Result<CombatId, ApiError> {
    raw.parse()
        .map(CombatId)
        .map_err(|_| ApiError::new(Error::validation("combat", "not a combat id"), rid))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EngageBody {
    target_ship_id: ShipId,
}

async fn engage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EngageBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let attacker_ship_id = player.current_ship.ok_or_else(|| {
        ApiError::new(Error::validation("ship", "no piloted ship"), &ctx.request_id)
    })?;
    if body.target_ship_id == attacker_ship_id {
        return Err(ApiError::new(
            Error::validation("targetShipId", "cannot engage own ship"),
            &ctx.request_id,
        ));
    }

    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let attacker_ship = regional::get_ship(&mut conn, attacker_ship_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let defender_ship = regional::get_ship(&mut conn, body.target_ship_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    if attacker_ship.sector != defender_ship.sector {
        return Err(ApiError::new(
            Error::validation("targetShipId", "target not in this sector"),
            &ctx.request_id,
        ));
    }
    // Drones pinned to a ship fight alongside it.
    let drones_for = |deployments: &[DroneDeployment], ship: ShipId| -> i32 {
        deployments
            .iter()
            .filter(|d| d.target == DeploymentTarget::Ship(ship))
            .map(|d| d.count)
            .sum()
    };
    let attacker_deployments = regional::list_deployments_of_owner(&mut conn, player.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    let defender_deployments = regional::list_deployments_of_owner(&mut conn, defender_ship.pilot)
        .await
        .map_err(fail(&ctx.request_id))?;
    let attacker_drones = drones_for(&attacker_deployments, attacker_ship.id);
    let defender_drones = drones_for(&defender_deployments, defender_ship.id);
    drop(conn);

    // Treaty legality between the two pilots' current regions.
    let defender_region = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_player(&mut conn, defender_ship.pilot)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .current_region
    };
    if diplomacy::combat_forbidden(&state.db, &region, &defender_region)
        .await
        .map_err(fail(&ctx.request_id))?
    {
        return Err(ApiError::new(
            Error::FactionRestriction("a treaty forbids combat between these regions".into()),
            &ctx.request_id,
        ));
    }

    let now = Utc::now();
    let combat = Combat {
        id: CombatId::new(),
        sector: attacker_ship.sector,
        state: CombatState::Engaging,
        attacker: Combatant {
            ship: attacker_ship.id,
            joined_at: now,
            hull_remaining: attacker_ship.condition,
            shield_remaining: attacker_ship.shield,
            drones: attacker_drones,
            retreat_score: 0.0,
            last_command: None,
        },
        defender: Combatant {
            ship: defender_ship.id,
            joined_at: now,
            hull_remaining: defender_ship.condition,
            shield_remaining: defender_ship.shield,
            drones: defender_drones,
            retreat_score: 0.0,
            last_command: None,
        },
        round_cap: combat_engine::DEFAULT_ROUND_CAP,
        round_deadline_secs: combat_engine::DEFAULT_ROUND_DEADLINE_SECS,
        rounds: vec![],
        created_at: now,
        updated_at: now,
    };
    {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::insert_combat(&mut conn, &combat)
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    state
        .fabric
        .publish(&DomainEvent::CombatStarted {
            combat: combat.id,
            region: region.clone(),
            sector: combat.sector,
            attacker: player.id,
            defender: defender_ship.pilot,
        })
        .await
        .ok();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "combatId": combat.id, "state": combat.state }),
    ))
}

async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(combat): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let combat_id = parse_combat(&combat, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let combat = regional::get_combat(&mut conn, combat_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, combat))
}

/// Submit this round's command; when both sides have committed (or the
/// deadline passed for the opponent) the round resolves.
async fn command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(combat): Path<String>,
    Json(body): Json<CombatCommand>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let combat_id = parse_combat(&combat, &ctx.request_id)?;
    submit_command(&state, &ctx, combat_id, body).await
}

async fn retreat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(combat): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let combat_id = parse_combat(&combat, &ctx.request_id)?;
    let command = CombatCommand {
        attempt_retreat: true,
        ..Default::default()
    };
    submit_command(&state, &ctx, combat_id, command).await
}

async fn submit_command(
    state: &Arc<AppState>,
    ctx: &Ctx,
    combat_id: CombatId,
    command: CombatCommand,
) -> ApiResult {
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let my_ship = player.current_ship.ok_or_else(|| {
        ApiError::new(Error::validation("ship", "no piloted ship"), &ctx.request_id)
    })?;

    // Round resolution mirrors damage onto the ships; all of it commits
    // in one shard transaction so a conflict retry replays cleanly.
    let (resolved, participants) = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let command = command.clone();
        conn.transaction::<_, Error, _>(|conn| {
            async move {
                let mut combat = regional::get_combat(conn, combat_id).await?;
                if combat.data.state.is_terminal() {
                    return Err(Error::Conflict("combat already terminal"));
                }
                let is_attacker = combat.data.attacker.ship == my_ship;
                let is_defender = combat.data.defender.ship == my_ship;
                if !is_attacker && !is_defender {
                    return Err(Error::InsufficientPermissions);
                }

                // Record the command on our side. The round resolves when the
                // opposite side has a standing command too, or after its
                // deadline using the fallback.
                let deadline_passed = Utc::now()
                    .signed_duration_since(combat.data.updated_at)
                    .num_seconds()
                    >= combat.data.round_deadline_secs as i64;
                let (mine, theirs_cmd) = if is_attacker {
                    (
                        &mut combat.data.attacker,
                        combat.data.defender.last_command.clone(),
                    )
                } else {
                    (
                        &mut combat.data.defender,
                        combat.data.attacker.last_command.clone(),
                    )
                };
                mine.last_command = Some(command.clone());

                let mut resolved = None;
                if theirs_cmd.is_some() || deadline_passed {
                    let attacker_hull = regional::get_ship(conn, combat.data.attacker.ship)
                        .await?
                        .data
                        .hull_class;
                    let defender_hull = regional::get_ship(conn, combat.data.defender.ship)
                        .await?
                        .data
                        .hull_class;
                    let (attacker_cmd, defender_cmd) = if is_attacker {
                        (Some(command.clone()), theirs_cmd)
                    } else {
                        (theirs_cmd, Some(command.clone()))
                    };
                    let outcome = combat_engine::resolve_round(
                        &mut combat.data,
                        attacker_hull,
                        defender_hull,
                        attacker_cmd,
                        defender_cmd,
                        Utc::now(),
                    )?;
                    // Mirror the result back onto the ships once terminal.
                    if let Some(terminal) = outcome.terminal {
                        let mut attacker_ship =
                            regional::get_ship(conn, combat.data.attacker.ship).await?;
                        attacker_ship.data.condition = combat.data.attacker.hull_remaining;
                        attacker_ship.data.shield = combat.data.attacker.shield_remaining;
                        regional::update_ship(conn, &attacker_ship.data, attacker_ship.version)
                            .await?;
                        let mut defender_ship =
                            regional::get_ship(conn, combat.data.defender.ship).await?;
                        defender_ship.data.condition = combat.data.defender.hull_remaining;
                        defender_ship.data.shield = combat.data.defender.shield_remaining;
                        regional::update_ship(conn, &defender_ship.data, defender_ship.version)
                            .await?;
                        resolved = Some((outcome.round.round, Some(terminal)));
                    } else {
                        resolved = Some((outcome.round.round, None));
                    }
                }
                regional::update_combat(conn, &combat.data, combat.version).await?;
                Ok((resolved, (combat.data.attacker.ship, combat.data.defender.ship)))
            }
            .scope_boxed()
        })
        .await
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    // Participants for event fan-out.
    let pilots = {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        let a = regional::get_ship(&mut conn, participants.0)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .pilot;
        let b = regional::get_ship(&mut conn, participants.1)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .pilot;
        vec![a, b]
    };
    if let Some((round, terminal)) = resolved {
        let sector = player.current_sector;
        state
            .fabric
            .publish(&DomainEvent::CombatRoundResolved {
                combat: combat_id,
                region: region.clone(),
                sector,
                round,
                participants: pilots.clone(),
            })
            .await
            .map_err(fail(&ctx.request_id))?;
        if let Some(terminal) = terminal {
            state
                .fabric
                .publish(&DomainEvent::CombatEnded {
                    combat: combat_id,
                    region: region.clone(),
                    sector,
                    outcome: format!("{:?}", terminal).to_lowercase(),
                    participants: pilots,
                })
                .await
                .map_err(fail(&ctx.request_id))?;
        }
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "accepted": true, "resolvedRound": resolved.map(|(r, _)| r) }),
    ))
}

// ---- drones ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeployBody {
    target: DeploymentTarget,
    count: i32,
    policy: DronePolicy,
}

async fn deploy_drones(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DeployBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    body.policy.validate().map_err(fail(&ctx.request_id))?;
    if body.count <= 0 {
        return Err(ApiError::new(
            Error::validation("count", "must be positive"),
            &ctx.request_id,
        ));
    }
    let player_id = ctx.player.data.id;
    let region = ctx.player.data.current_region.clone();
    let deployment = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        // one drone pool per player per region shard
        let drones = regional::list_deployments_of_owner(&mut conn, player_id).await?;
        let deployed: i32 = drones.iter().map(|d| d.count).sum();
        let pool = match regional::get_drone(&mut conn, crate::models::DroneId(player_id.0)).await {
            Ok(pool) => pool.data,
            Err(Error::NotFound(_)) => {
                let pool = crate::models::Drone {
                    id: crate::models::DroneId(player_id.0),
                    owner: player_id,
                    count: 20,
                    attack: 2,
                    defense: 1,
                };
                regional::upsert_drone(&mut conn, &pool).await?;
                pool
            }
            Err(e) => return Err(e),
        };
        if deployed + body.count > pool.count {
            return Err(Error::validation("count", "not enough drones in the pool"));
        }
        let deployment = DroneDeployment {
            id: DeploymentId::new(),
            drone: pool.id,
            owner: player_id,
            target: body.target.clone(),
            count: body.count,
            policy: body.policy.clone(),
        };
        regional::insert_deployment(&mut conn, &deployment).await?;
        Ok(deployment)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, deployment))
}

async fn recall_drones(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(deployment): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let deployment_id: DeploymentId = deployment
        .parse()
        .map(DeploymentId)
        .map_err(|_| ApiError::new(Error::validation("deployment", "not an id"), &ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let deployment = regional::get_deployment(&mut conn, deployment_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    if deployment.data.owner != player_id {
        return Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id));
    }
    regional::delete_deployment(&mut conn, deployment_id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "recalled": deployment.data.count }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ReconfigureBody {
    policy: DronePolicy,
}

async fn reconfigure_drones(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(deployment): Path<String>,
    Json(body): Json<ReconfigureBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "combat")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let deployment_id: DeploymentId = deployment
        .parse()
        .map(DeploymentId)
        .map_err(|_| ApiError::new(Error::validation("deployment", "not an id"), &ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut deployment = regional::get_deployment(&mut conn, deployment_id).await?;
        if deployment.data.owner != player_id {
            return Err(Error::InsufficientPermissions);
        }
        deployment.data.reconfigure(body.policy.clone())?;
        regional::update_deployment(&mut conn, &deployment.data, deployment.version).await?;
        Ok(deployment.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}
