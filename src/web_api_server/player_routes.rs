use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, retry_conflict};
use crate::models::ReputationTier;

use super::{authed, fail, request_id, respond, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/profile", get(profile))
        .route("/settings", axum::routing::put(update_settings))
        .route("/memberships", get(memberships))
        .route("/sessions", get(sessions))
}

/// Active device sessions, i.e. live refresh-token chains.
async fn sessions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "self")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let tokens = global::list_active_refresh_tokens(&mut conn, ctx.account.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    let listing: Vec<_> = tokens
        .into_iter()
        .map(|t| {
            json!({
                "family": t.family,
                "deviceFingerprint": t.device_fingerprint,
                "createdAt": t.created_at,
                "expiresAt": t.expires_at,
            })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, listing))
}

async fn profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "self")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let reputation: Vec<_> = player
        .faction_reputation
        .iter()
        .map(|(faction, score)| {
            json!({
                "faction": faction,
                "score": score,
                "tier": ReputationTier::from_score(*score),
            })
        })
        .collect();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "account": {
                "id": ctx.account.id,
                "handle": ctx.account.handle,
                "email": ctx.account.email,
                "role": ctx.account.role,
                "mfaEnabled": ctx.account.mfa_enabled,
                "oauthBindings": ctx.account.oauth_bindings,
            },
            "player": player,
            "reputation": reputation,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SettingsBody {
    #[serde(default)]
    callsign: Option<String>,
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SettingsBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "self")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player_id = ctx.player.data.id;
    if let Some(callsign) = body.callsign {
        let callsign = callsign.trim().to_ascii_uppercase();
        if callsign.len() < 3 || callsign.len() > 20 {
            return Err(super::ApiError::new(
                crate::error::Error::validation("callsign", "3-20 characters"),
                &ctx.request_id,
            ));
        }
        retry_conflict(|| async {
            let mut conn = state.db.conn().await?;
            let mut player = global::get_player(&mut conn, player_id).await?;
            player.data.callsign = callsign.clone();
            global::update_player(&mut conn, &player.data, player.version).await?;
            Ok(())
        })
        .await
        .map_err(fail(&ctx.request_id))?;
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "updated": true }),
    ))
}

async fn memberships(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "self")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let memberships = global::list_memberships_for_player(&mut conn, ctx.player.data.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, memberships))
}
