use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::models::{
    JoinPolicy, Team, TeamApplication, TeamId, TeamKind, TeamMember, TeamRole,
};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{team}", get(detail))
        .route("/{team}/apply", post(apply))
        .route("/{team}/invite", post(invite))
        .route("/{team}/applications/{player}", post(decide_application))
        .route("/{team}/roles", post(assign_role))
        .route("/{team}/treasury/deposit", post(deposit))
        .route("/{team}/treasury/withdraw", post(withdraw))
        .route("/{team}/missions", get(missions))
        .route("/{team}/missions/accept", post(accept_mission))
}

/// Cooperative mission board, scaled to the roster size.
fn mission_board(team: &crate::models::Team) -> Vec<serde_json::Value> {
    let mut board = vec![json!({
        "id": format!("{}-convoy", team.id),
        "kind": "convoy-escort",
        "minMembers": 2,
        "rewardTreasury": 800,
    })];
    if team.members.len() >= 5 {
        board.push(json!({
            "id": format!("{}-blockade", team.id),
            "kind": "blockade-run",
            "minMembers": 5,
            "rewardTreasury": 2500,
        }));
    }
    if team.members.len() >= 10 {
        board.push(json!({
            "id": format!("{}-flotilla", team.id),
            "kind": "flotilla-defense",
            "minMembers": 10,
            "rewardTreasury": 6000,
        }));
    }
    board
}

async fn missions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let team = regional::get_team(&mut conn, team_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    if team.member(ctx.player.data.id).is_none() {
        return Err(super::ApiError::new(Error::TeamPermissionDenied, &ctx.request_id));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        mission_board(&team),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AcceptMissionBody {
    mission_id: String,
}

/// Officers commit the team to a mission; acceptance is audited.
async fn accept_mission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<AcceptMissionBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let team = regional::get_team(&mut conn, team_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let role = team
        .role_of(ctx.player.data.id)
        .ok_or_else(|| super::ApiError::new(Error::TeamPermissionDenied, &ctx.request_id))?;
    if !role.may_manage_members() {
        return Err(super::ApiError::new(Error::TeamPermissionDenied, &ctx.request_id));
    }
    let mission = mission_board(&team)
        .into_iter()
        .find(|m| m["id"] == body.mission_id)
        .ok_or_else(|| super::ApiError::new(Error::NotFound("mission"), &ctx.request_id))?;
    drop(conn);
    {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::insert_audit(
            &mut conn,
            Some(ctx.account.id),
            "team.mission_accepted",
            json!({ "team": team.id, "mission": body.mission_id }),
            Some(&ctx.request_id),
        )
        .await
        .map_err(fail(&ctx.request_id))?;
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "accepted": mission }),
    ))
}

fn parse_team(raw: &str, rid: &str) -> Result<TeamId, ApiError> {
    raw.parse()
        .map(TeamId)
        .map_err(|_| ApiError::new(Error::validation("team", "not a team id"), rid))
}

async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let teams = regional::list_teams(&mut conn)
        .await
        .map_err(fail(&ctx.request_id))?;
    let summaries: Vec<_> = teams
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "name": t.name,
                "kind": t.kind,
                "members": t.members.len(),
                "sizeCap": t.size_cap,
                "joinPolicy": t.join_policy,
            })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, summaries))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateBody {
    name: String,
    kind: TeamKind,
    #[serde(default = "default_size_cap")]
    size_cap: u32,
    join_policy: JoinPolicy,
}

fn default_size_cap() -> u32 {
    20
}

async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let name = body.name.trim().to_string();
    if name.len() < 3 || name.len() > 40 {
        return Err(ApiError::new(
            Error::validation("name", "3-40 characters"),
            &ctx.request_id,
        ));
    }
    if !(2..=200).contains(&body.size_cap) {
        return Err(ApiError::new(
            Error::validation("sizeCap", "must be within [2, 200]"),
            &ctx.request_id,
        ));
    }
    let region = ctx.player.data.current_region.clone();
    let now = Utc::now();
    let team = Team {
        id: TeamId::new(),
        name,
        kind: body.kind,
        size_cap: body.size_cap,
        join_policy: body.join_policy,
        treasury: 0,
        members: vec![TeamMember {
            player: ctx.player.data.id,
            role: TeamRole::Leader,
            joined_at: now,
        }],
        applications: vec![],
        created_at: now,
        updated_at: now,
    };
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    regional::insert_team(&mut conn, &team)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, team))
}

async fn detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let team = regional::get_team(&mut conn, team_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, team))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApplyBody {
    #[serde(default)]
    message: String,
}

async fn apply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<ApplyBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let joined = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut conn, team_id).await?;
        let now = Utc::now();
        match team.data.join_policy {
            JoinPolicy::Open => {
                team.data.add_member(player_id, TeamRole::Member, now)?;
                regional::update_team(&mut conn, &team.data, team.version).await?;
                Ok(true)
            }
            JoinPolicy::Application => {
                if team.data.member(player_id).is_some() {
                    return Err(Error::Conflict("already a member"));
                }
                if team.data.applications.iter().any(|a| a.player == player_id) {
                    return Err(Error::Conflict("application already pending"));
                }
                team.data.applications.push(TeamApplication {
                    player: player_id,
                    message: body.message.chars().take(500).collect(),
                    applied_at: now,
                });
                regional::update_team(&mut conn, &team.data, team.version).await?;
                Ok(false)
            }
            JoinPolicy::InviteOnly => Err(Error::validation("team", "invite only")),
        }
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "joined": joined, "pending": !joined }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InviteBody {
    player: crate::models::PlayerId,
}

/// Officers may invite directly; the invitee joins as a member.
async fn invite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<InviteBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let actor = ctx.player.data.id;
    // the invitee must be a real player
    {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_player(&mut conn, body.player)
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut conn, team_id).await?;
        let actor_role = team.data.role_of(actor).ok_or(Error::TeamPermissionDenied)?;
        if !actor_role.may_manage_members() {
            return Err(Error::TeamPermissionDenied);
        }
        team.data.add_member(body.player, TeamRole::Member, Utc::now())?;
        regional::update_team(&mut conn, &team.data, team.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "invited": body.player }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DecisionBody {
    approve: bool,
}

async fn decide_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((team, player)): Path<(String, String)>,
    Json(body): Json<DecisionBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let applicant = player
        .parse()
        .map(crate::models::PlayerId)
        .map_err(|_| ApiError::new(Error::validation("player", "not a player id"), &ctx.request_id))?;
    let region = ctx.player.data.current_region.clone();
    let actor = ctx.player.data.id;
    retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut conn, team_id).await?;
        let actor_role = team.data.role_of(actor).ok_or(Error::TeamPermissionDenied)?;
        if !actor_role.may_manage_members() {
            return Err(Error::TeamPermissionDenied);
        }
        let application = team
            .data
            .applications
            .iter()
            .position(|a| a.player == applicant)
            .ok_or(Error::NotFound("application"))?;
        team.data.applications.remove(application);
        if body.approve {
            team.data.add_member(applicant, TeamRole::Member, Utc::now())?;
        }
        regional::update_team(&mut conn, &team.data, team.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "approved": body.approve }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RoleBody {
    player: crate::models::PlayerId,
    role: TeamRole,
}

async fn assign_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<RoleBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let actor = ctx.player.data.id;
    retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut conn, team_id).await?;
        team.data.assign_role(actor, body.player, body.role, Utc::now())?;
        regional::update_team(&mut conn, &team.data, team.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "assigned": true }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AmountBody {
    amount: i64,
}

async fn deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<AmountBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    // membership gate before any money moves
    {
        let mut region_conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        let team = regional::get_team(&mut region_conn, team_id)
            .await
            .map_err(fail(&ctx.request_id))?;
        if team.data.member(player_id).is_none() {
            return Err(super::ApiError::new(Error::TeamPermissionDenied, &ctx.request_id));
        }
    }
    // debit globally first, then credit the treasury; refund on failure
    retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        player.data.debit_credits(body.amount)?;
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    let credited = retry_conflict(|| async {
        let mut region_conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut region_conn, team_id).await?;
        team.data.deposit(body.amount)?;
        regional::update_team(&mut region_conn, &team.data, team.version).await?;
        Ok(team.data.treasury)
    })
    .await;
    let treasury = match credited {
        Ok(treasury) => treasury,
        Err(e) => {
            let refund = retry_conflict(|| async {
                let mut conn = state.db.conn().await?;
                let mut player = global::get_player(&mut conn, player_id).await?;
                player.data.credit_credits(body.amount);
                global::update_player(&mut conn, &player.data, player.version).await?;
                Ok(())
            })
            .await;
            if let Err(refund_err) = refund {
                tracing::error!("deposit refund failed: {}", refund_err);
            }
            return Err(fail(&ctx.request_id)(e));
        }
    };
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "treasury": treasury }),
    ))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(team): Path<String>,
    Json(body): Json<AmountBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "team")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let team_id = parse_team(&team, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    // take from the treasury first (role and balance checks live there),
    // then pay out; re-deposit if the payout cannot land
    let treasury = retry_conflict(|| async {
        let mut region_conn = state.db.region_conn(&region).await?;
        let mut team = regional::get_team(&mut region_conn, team_id).await?;
        team.data.withdraw(player_id, body.amount)?;
        regional::update_team(&mut region_conn, &team.data, team.version).await?;
        Ok(team.data.treasury)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    let paid = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        player.data.credit_credits(body.amount);
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await;
    if let Err(e) = paid {
        let restore = retry_conflict(|| async {
            let mut region_conn = state.db.region_conn(&region).await?;
            let mut team = regional::get_team(&mut region_conn, team_id).await?;
            team.data.deposit(body.amount)?;
            regional::update_team(&mut region_conn, &team.data, team.version).await?;
            Ok(())
        })
        .await;
        if let Err(restore_err) = restore {
            tracing::error!("withdraw restore failed: {}", restore_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "treasury": treasury }),
    ))
}
