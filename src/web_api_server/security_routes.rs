use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::AsyncConnection as _;
use crate::error::Error;
use crate::models::{faction_catalog, PlayerId, ReputationTier};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/bounties", get(list_bounties).post(post_bounty))
        .route("/violations", get(violations))
        .route("/faction-response/{faction}", get(faction_response))
}

/// Player-facing security posture: local sector security, bounty
/// exposure, soft-degradation state.
async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "security")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let sector_security = {
        let mut conn = state
            .db
            .region_conn(&player.current_region)
            .await
            .map_err(fail(&ctx.request_id))?;
        regional::get_sector(&mut conn, player.current_sector)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .security_level
    };
    let bounty_on_me = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::bounty_total_on(&mut conn, player.id)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "sectorSecurity": sector_security,
            "bountyOnYou": bounty_on_me,
            "degraded": state.security.abuse.is_degraded(ctx.account.id),
        }),
    ))
}

async fn list_bounties(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "security")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let bounties = global::list_open_bounties(&mut conn, &region)
        .await
        .map_err(fail(&ctx.request_id))?;
    let listing: Vec<_> = bounties
        .into_iter()
        .map(|b| {
            json!({
                "id": b.id,
                "target": b.target,
                "amount": b.amount,
                "postedAt": b.created_at,
            })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, listing))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BountyBody {
    target: PlayerId,
    amount: i64,
}

/// Posting a bounty escrows the amount from the poster and is a
/// high-impact action, so it lands in the audit trail.
async fn post_bounty(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BountyBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "security")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if body.amount < 100 {
        return Err(ApiError::new(
            Error::validation("amount", "minimum bounty is 100"),
            &ctx.request_id,
        ));
    }
    let poster = ctx.player.data.id;
    if body.target == poster {
        return Err(ApiError::new(
            Error::validation("target", "cannot post a bounty on yourself"),
            &ctx.request_id,
        ));
    }
    let region = ctx.player.data.current_region.clone();
    let account_id = ctx.account.id;
    let bounty_id = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let region = region.clone();
        let request_id = ctx.request_id.clone();
        conn.transaction::<uuid::Uuid, Error, _>(|conn| {
            async move {
                // target must exist
                global::get_player(conn, body.target).await?;
                let mut player = global::get_player(conn, poster).await?;
                player.data.debit_credits(body.amount)?;
                global::update_player(conn, &player.data, player.version).await?;
                let id =
                    global::insert_bounty(conn, &region, body.target, poster, body.amount).await?;
                global::insert_audit(
                    conn,
                    Some(account_id),
                    "security.bounty_posted",
                    json!({ "bounty": id, "target": body.target, "amount": body.amount }),
                    Some(&request_id),
                )
                .await?;
                Ok(id)
            }
            .scope_boxed()
        })
        .await
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "bountyId": bounty_id }),
    ))
}

/// Admin view of recent abuse flags and auth failures.
async fn violations(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "security")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if !ctx.is_admin() {
        return Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id));
    }
    use crate::schema::audit_log;
    use diesel::ExpressionMethods as _;
    use diesel::QueryDsl as _;
    use diesel_async::RunQueryDsl as _;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let rows: Vec<(i64, Option<uuid::Uuid>, String)> = audit_log::table
        .filter(audit_log::action.eq_any([
            "auth.login_failed",
            "auth.refresh_reuse",
            "security.bounty_posted",
        ]))
        .order(audit_log::id.desc())
        .limit(100)
        .select((audit_log::id, audit_log::account_id, audit_log::action))
        .load(&mut conn)
        .await
        .map_err(|e| ApiError::new(e.into(), &ctx.request_id))?;
    let entries: Vec<_> = rows
        .into_iter()
        .map(|(id, account, action)| json!({ "id": id, "account": account, "action": action }))
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, entries))
}

/// How a faction would respond to this player right now, derived from
/// standing and hostilities.
async fn faction_response(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(faction): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "security")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let faction = faction_catalog()
        .into_iter()
        .find(|f| f.symbol == faction)
        .ok_or_else(|| ApiError::new(Error::NotFound("faction"), &ctx.request_id))?;
    let tier = ReputationTier::from_score(ctx.player.data.reputation_with(&faction.symbol));
    let response = match tier {
        ReputationTier::Hated => "shoot-on-sight",
        ReputationTier::Hostile => "intercept",
        ReputationTier::Unfriendly => "shadow",
        ReputationTier::Neutral => "ignore",
        ReputationTier::Friendly | ReputationTier::Honored => "assist",
        ReputationTier::Exalted => "escort",
    };
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "faction": faction.symbol, "tier": tier, "response": response }),
    ))
}
