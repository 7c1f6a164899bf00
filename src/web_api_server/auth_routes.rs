use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{self, LoginOutcome};
use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::models::{FirstLoginInput, FirstLoginSession, FirstLoginState, OAuthProvider, SessionId};
use crate::security::AbuseSignal;

use super::{authed, fail, public, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/mfa/enroll", post(mfa_enroll))
        .route("/mfa/verify", post(mfa_verify))
        .route("/mfa/challenge", post(mfa_challenge))
        .route("/credential", post(change_credential))
        .route("/revoke", post(revoke))
        .route("/oauth/{provider}/callback", axum::routing::get(oauth_callback))
        .route("/first-login/start", post(first_login_start))
        .route("/first-login/input", post(first_login_input))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegisterBody {
    handle: String,
    email: String,
    credential: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "auth").map_err(fail(&rid))?;
    let (account, player) = auth::register(&state.db, &body.handle, &body.email, &body.credential)
        .await
        .map_err(fail(&rid))?;
    {
        let mut conn = state.db.conn().await.map_err(fail(&rid))?;
        global::insert_audit(
            &mut conn,
            Some(account.id),
            "auth.registered",
            json!({ "handle": account.handle }),
            Some(&rid),
        )
        .await
        .map_err(fail(&rid))?;
    }
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "account": { "id": account.id, "handle": account.handle, "role": account.role },
            "player": {
                "id": player.id,
                "callsign": player.callsign,
                "currentRegion": player.current_region,
                "currentSector": player.current_sector,
                "credits": player.credits,
            },
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoginBody {
    handle: String,
    credential: String,
    #[serde(default)]
    device_fingerprint: Option<String>,
}

async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "auth").map_err(fail(&rid))?;
    let fingerprint = body.device_fingerprint.unwrap_or_else(|| "unknown".to_string());
    let outcome = auth::login(&state.db, &body.handle, &body.credential, &fingerprint).await;
    match outcome {
        Ok(LoginOutcome::Tokens(pair)) => {
            let mut conn = state.db.conn().await.map_err(fail(&rid))?;
            if let Ok(Some(account)) = global::get_account_by_handle(&mut conn, &body.handle).await {
                global::insert_audit(
                    &mut conn,
                    Some(account.id),
                    "auth.login",
                    json!({}),
                    Some(&rid),
                )
                .await
                .ok();
            }
            Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, pair))
        }
        Ok(LoginOutcome::SecondFactorRequired { challenge_token }) => Ok(respond(
            StatusCode::OK,
            &ctx.request_id,
            &ctx.rate,
            json!({ "secondFactorRequired": true, "challengeToken": challenge_token }),
        )),
        Err(e) => {
            if matches!(e, Error::InvalidCredential) {
                let mut conn = state.db.conn().await.map_err(fail(&rid))?;
                if let Ok(Some(account)) =
                    global::get_account_by_handle(&mut conn, &body.handle).await
                {
                    state.security.abuse.record(account.id, AbuseSignal::FailedLogin);
                    global::insert_audit(
                        &mut conn,
                        Some(account.id),
                        "auth.login_failed",
                        json!({}),
                        Some(&rid),
                    )
                    .await
                    .ok();
                }
            }
            Err(ApiError::new(e, &rid))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RefreshBody {
    refresh_token: String,
    #[serde(default)]
    device_fingerprint: Option<String>,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RefreshBody>,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "auth").map_err(fail(&rid))?;
    let fingerprint = body.device_fingerprint.unwrap_or_else(|| "unknown".to_string());
    let pair = auth::rotate_refresh(&state.db, &body.refresh_token, &fingerprint)
        .await
        .map_err(fail(&rid))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, pair))
}

async fn mfa_enroll(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let (secret, backup_codes) = auth::enroll_mfa(&state.db, ctx.account.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "secret": secret, "backupCodes": backup_codes, "algorithm": "SHA256", "digits": 6, "period": 30 }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CodeBody {
    code: String,
}

async fn mfa_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CodeBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    auth::verify_enrollment(&state.db, ctx.account.id, &body.code)
        .await
        .map_err(fail(&ctx.request_id))?;
    {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::insert_audit(
            &mut conn,
            Some(ctx.account.id),
            "auth.mfa_enabled",
            json!({}),
            Some(&ctx.request_id),
        )
        .await
        .ok();
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "mfaEnabled": true }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChallengeBody {
    challenge_token: String,
    code: String,
    #[serde(default)]
    device_fingerprint: Option<String>,
}

async fn mfa_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChallengeBody>,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "auth").map_err(fail(&rid))?;
    let fingerprint = body.device_fingerprint.unwrap_or_else(|| "unknown".to_string());
    let pair = auth::complete_challenge(&state.db, &body.challenge_token, &body.code, &fingerprint)
        .await
        .map_err(fail(&rid))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, pair))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CredentialBody {
    current: String,
    new: String,
}

async fn change_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CredentialBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    auth::change_credential(&state.db, ctx.account.id, &body.current, &body.new)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "changed": true }),
    ))
}

async fn revoke(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let revoked = auth::revoke_sessions(&state.db, ctx.account.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "revokedSessions": revoked }),
    ))
}

#[derive(Deserialize)]
struct OAuthQuery {
    code: String,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    device_fingerprint: Option<String>,
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Query(query): Query<OAuthQuery>,
) -> ApiResult {
    let rid = request_id(&headers);
    let ctx = public(&state, &headers, "auth").map_err(fail(&rid))?;
    let provider = OAuthProvider::from_str(&provider)
        .ok_or_else(|| ApiError::new(Error::validation("provider", "unknown provider"), &rid))?;
    let fingerprint = query.device_fingerprint.unwrap_or_else(|| "unknown".to_string());
    let redirect_uri = query.redirect_uri.unwrap_or_default();
    let pair = auth::oauth_signin(
        &state.db,
        &state.http,
        provider,
        &query.code,
        &redirect_uri,
        &fingerprint,
    )
    .await
    .map_err(fail(&rid))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, pair))
}

// ---- first-login onboarding ----

async fn first_login_start(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    if let Some(existing) = regional::get_active_first_login(&mut conn, player.id)
        .await
        .map_err(fail(&ctx.request_id))?
    {
        return Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, existing.data));
    }
    let now = Utc::now();
    let offered = regional::list_ships_of_pilot(&mut conn, player.id)
        .await
        .map_err(fail(&ctx.request_id))?
        .into_iter()
        .map(|s| s.data.id)
        .collect::<Vec<_>>();
    let session = FirstLoginSession {
        id: SessionId::new(),
        player: player.id,
        state: FirstLoginState::Greeting,
        exchanges: vec![],
        offered_ships: offered,
        claimed_ship: None,
        credibility: 0.5,
        created_at: now,
        updated_at: now,
    };
    regional::insert_first_login(&mut conn, &session)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, session))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FirstLoginBody {
    input: FirstLoginInput,
}

async fn first_login_input(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<FirstLoginBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "auth")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player_id = ctx.player.data.id;
    let region = ctx.player.data.current_region.clone();
    let session = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut session = regional::get_active_first_login(&mut conn, player_id)
            .await?
            .ok_or(Error::NotFound("first login session"))?;
        session.data.advance(body.input.clone(), Utc::now())?;
        regional::update_first_login(&mut conn, &session.data, session.version).await?;
        Ok(session.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, session))
}
