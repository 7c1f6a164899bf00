use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::federation;
use crate::models::{RegionName, RegionStatus};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState, Ctx};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/presence", get(presence))
        .route("/economy", get(economy_overview))
        .route("/combat", get(combat_overview))
        .route("/accounts/{handle}/disable", post(disable_account))
        .route("/players/{handle}/behavior-profile", get(behavior_profile))
        .route("/fleet", get(fleet_overview))
        .route("/colonization", get(colonization_overview))
        .route("/moderation", get(moderation_overview))
        .route("/regions/{region}/suspend", post(suspend_region))
        .route("/regions/{region}/resume", post(resume_region))
        .route("/regions/{region}/terminate", post(terminate_region))
        .route("/audit", get(recent_audit))
}

fn require_admin(ctx: &Ctx) -> Result<(), ApiError> {
    if ctx.is_admin() {
        Ok(())
    } else {
        Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id))
    }
}

/// Fabric presence counters: total sockets, admin sockets, per sector,
/// per team.
async fn presence(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        state.fabric.presence(),
    ))
}

async fn economy_overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let regions = global::list_regions(&mut conn, Some(RegionStatus::Active))
        .await
        .map_err(fail(&ctx.request_id))?;
    let mut per_region = vec![];
    for region in &regions {
        if !state.db.has_region_shard(&region.name) {
            continue;
        }
        let mut shard = state
            .db
            .region_conn(&region.name)
            .await
            .map_err(fail(&ctx.request_id))?;
        let sectors = regional::sector_count(&mut shard)
            .await
            .map_err(fail(&ctx.request_id))?;
        per_region.push(json!({
            "region": region.name,
            "sectors": sectors,
            "taxRate": region.config.tax_rate,
            "specialization": region.config.specialization,
        }));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "activeRegions": regions.len(), "regions": per_region }),
    ))
}

async fn combat_overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let regions = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_regions(&mut conn, Some(RegionStatus::Active))
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let mut active = vec![];
    for region in &regions {
        if !state.db.has_region_shard(&region.name) {
            continue;
        }
        let mut shard = state
            .db
            .region_conn(&region.name)
            .await
            .map_err(fail(&ctx.request_id))?;
        let combats = regional::list_active_combats(&mut shard)
            .await
            .map_err(fail(&ctx.request_id))?;
        for combat in combats {
            active.push(json!({
                "region": region.name,
                "combatId": combat.data.id,
                "sector": combat.data.sector,
                "rounds": combat.data.rounds.len(),
                "state": combat.data.state,
            }));
        }
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "activeCombats": active.len(), "combats": active }),
    ))
}

/// Advisory behavior profile of a player, for moderation triage. Never
/// authoritative; degrades to the deterministic heuristic.
async fn behavior_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let (account, player) = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        let account = global::get_account_by_handle(&mut conn, &handle)
            .await
            .map_err(fail(&ctx.request_id))?
            .ok_or_else(|| ApiError::new(Error::NotFound("account"), &ctx.request_id))?;
        let player = global::get_player_by_account(&mut conn, account.id)
            .await
            .map_err(fail(&ctx.request_id))?
            .ok_or_else(|| ApiError::new(Error::NotFound("player"), &ctx.request_id))?
            .data;
        (account, player)
    };
    let memberships = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_memberships_for_player(&mut conn, player.id)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let input = json!({
        "player": player.callsign,
        "credits": player.credits,
        "reputation": player.faction_reputation,
        "regionsVisited": memberships.len(),
        "degraded": state.security.abuse.is_degraded(account.id),
    });
    let (advisory, degraded) = state
        .advisory
        .advise(crate::engine::advisory::AdvisoryKind::BehaviorProfile, input)
        .await;
    if degraded {
        super::record_advisory_degradation(
            &state,
            ctx.account.id,
            "behavior-profile",
            &ctx.request_id,
        )
        .await;
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, advisory))
}

/// Ship counts per active region.
async fn fleet_overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let regions = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_regions(&mut conn, Some(RegionStatus::Active))
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let mut per_region = vec![];
    let mut total = 0i64;
    for region in &regions {
        if !state.db.has_region_shard(&region.name) {
            continue;
        }
        let mut shard = state
            .db
            .region_conn(&region.name)
            .await
            .map_err(fail(&ctx.request_id))?;
        let ships = regional::ship_count(&mut shard)
            .await
            .map_err(fail(&ctx.request_id))?;
        total += ships;
        per_region.push(json!({ "region": region.name, "ships": ships }));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "totalShips": total, "regions": per_region }),
    ))
}

/// Colony totals per active region.
async fn colonization_overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let regions = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_regions(&mut conn, Some(RegionStatus::Active))
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let mut per_region = vec![];
    for region in &regions {
        if !state.db.has_region_shard(&region.name) {
            continue;
        }
        let mut shard = state
            .db
            .region_conn(&region.name)
            .await
            .map_err(fail(&ctx.request_id))?;
        let (total, owned) = regional::planet_counts(&mut shard)
            .await
            .map_err(fail(&ctx.request_id))?;
        per_region.push(json!({
            "region": region.name,
            "planets": total,
            "colonized": owned,
        }));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "regions": per_region }),
    ))
}

/// Moderation posture: disabled accounts and the live fabric presence,
/// beside the violations feed under /security.
async fn moderation_overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let disabled = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_disabled_accounts(&mut conn)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let listing: Vec<_> = disabled
        .iter()
        .map(|a| {
            json!({
                "handle": a.handle,
                "deletedAt": a.deleted_at,
                "updatedAt": a.updated_at,
            })
        })
        .collect();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "disabledAccounts": listing,
            "presence": state.fabric.presence(),
        }),
    ))
}

async fn disable_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    let disabled = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut account = global::get_account_by_handle(&mut conn, &handle)
            .await?
            .ok_or(Error::NotFound("account"))?;
        account.disabled = true;
        global::update_account(&mut conn, &account).await?;
        global::revoke_account_tokens(&mut conn, account.id).await?;
        global::insert_audit(
            &mut conn,
            Some(account.id),
            "admin.account_disabled",
            json!({ "by": ctx.account.handle }),
            Some(&ctx.request_id),
        )
        .await?;
        Ok(account.handle)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "disabled": disabled }),
    ))
}

async fn suspend_region(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(region): Path<RegionName>,
) -> ApiResult {
    lifecycle(state, headers, region, RegionStatus::Suspended).await
}

async fn resume_region(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(region): Path<RegionName>,
) -> ApiResult {
    lifecycle(state, headers, region, RegionStatus::Active).await
}

async fn terminate_region(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(region): Path<RegionName>,
) -> ApiResult {
    lifecycle(state, headers, region, RegionStatus::Terminated).await
}

async fn lifecycle(
    state: Arc<AppState>,
    headers: HeaderMap,
    region: RegionName,
    to: RegionStatus,
) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    match to {
        RegionStatus::Suspended => federation::suspend_region(&state.db, &state.fabric, &region)
            .await
            .map_err(fail(&ctx.request_id))?,
        RegionStatus::Active => federation::resume_region(&state.db, &state.fabric, &region)
            .await
            .map_err(fail(&ctx.request_id))?,
        RegionStatus::Terminated => federation::terminate_region(&state.db, &state.fabric, &region)
            .await
            .map_err(fail(&ctx.request_id))?,
        RegionStatus::Pending => {
            return Err(ApiError::new(
                Error::validation("status", "cannot move a region back to pending"),
                &ctx.request_id,
            ))
        }
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "region": region, "status": to }),
    ))
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn recent_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "admin")
        .await
        .map_err(fail(&request_id(&headers)))?;
    require_admin(&ctx)?;
    use crate::schema::audit_log;
    use diesel::ExpressionMethods as _;
    use diesel::QueryDsl as _;
    use diesel_async::RunQueryDsl as _;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let rows: Vec<(i64, Option<uuid::Uuid>, String, serde_json::Value)> = audit_log::table
        .order(audit_log::id.desc())
        .limit(query.limit.clamp(1, 500))
        .select((
            audit_log::id,
            audit_log::account_id,
            audit_log::action,
            audit_log::detail,
        ))
        .load(&mut conn)
        .await
        .map_err(|e| ApiError::new(e.into(), &ctx.request_id))?;
    let entries: Vec<_> = rows
        .into_iter()
        .map(|(id, account, action, detail)| {
            json!({ "id": id, "account": account, "action": action, "detail": detail })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, entries))
}
