use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional};
use crate::error::Error;
use crate::federation::{diplomacy, travel};
use crate::models::{
    AssetManifest, RegionName, TravelId, TravelMethod, TreatyId, TreatyKind,
};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_regions))
        .route("/{region}/statistics", get(statistics))
        .route("/travel", post(initiate_travel))
        .route("/travel/{travel}", get(travel_status))
        .route("/treaties", post(propose_treaty))
        .route("/treaties/{treaty}/sign", post(sign_treaty))
}

async fn list_regions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let regions = global::list_regions(&mut conn, None)
        .await
        .map_err(fail(&ctx.request_id))?;
    let listing: Vec<_> = regions
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "displayName": r.display_name,
                "status": r.status,
                "governance": r.config.governance_type,
                "specialization": r.config.specialization,
                "sectorCount": r.config.sector_count,
                "nexusGateSector": r.nexus_gate_sector,
            })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, listing))
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(region): Path<RegionName>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let stored = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
    };
    let members = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_members_of_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let sector_count = if state.db.has_region_shard(&region) {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::sector_count(&mut conn)
            .await
            .map_err(fail(&ctx.request_id))?
    } else {
        0
    };
    let citizens = members
        .iter()
        .filter(|m| m.membership_type == crate::models::MembershipType::Citizen)
        .count();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "region": stored.name,
            "status": stored.status,
            "sectors": sector_count,
            "members": members.len(),
            "citizens": citizens,
            "taxRate": stored.config.tax_rate,
            "evacuationDeadline": stored.evacuation_deadline,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TravelBody {
    /// Idempotency key; replays observe the existing record.
    travel_id: Option<TravelId>,
    destination: RegionName,
    method: TravelMethod,
    #[serde(default)]
    manifest: Option<AssetManifest>,
}

async fn initiate_travel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TravelBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let manifest = body.manifest.unwrap_or_else(|| AssetManifest {
        ships: player.current_ship.into_iter().collect(),
        credits: 0,
        cargo: Default::default(),
    });
    let command = travel::TravelCommand {
        id: body.travel_id.unwrap_or_default(),
        destination: body.destination,
        method: body.method,
        manifest,
    };
    let record = travel::initiate_travel(&state.db, &state.fabric, player.id, command)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, record))
}

async fn travel_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(travel): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let travel_id = travel
        .parse()
        .map(TravelId)
        .map_err(|_| ApiError::new(Error::validation("travel", "not a travel id"), &ctx.request_id))?;
    let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
    let record = global::get_travel(&mut conn, travel_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .ok_or_else(|| ApiError::new(Error::NotFound("travel"), &ctx.request_id))?;
    if record.player != ctx.player.data.id && !ctx.is_admin() {
        return Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id));
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, record))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TreatyBody {
    region_a: RegionName,
    region_b: RegionName,
    kind: TreatyKind,
    #[serde(default)]
    terms: serde_json::Value,
}

async fn propose_treaty(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TreatyBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let treaty = diplomacy::propose_treaty(&state.db, &body.region_a, &body.region_b, body.kind, body.terms)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, treaty))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SignBody {
    region: RegionName,
    #[serde(default)]
    policy_id: Option<crate::models::PolicyId>,
}

/// Sign as the governing authority of `region`. Governors sign directly;
/// democracies cite the passed policy that authorized the treaty.
async fn sign_treaty(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(treaty): Path<String>,
    Json(body): Json<SignBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "regional")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let treaty_id = treaty
        .parse()
        .map(TreatyId)
        .map_err(|_| ApiError::new(Error::validation("treaty", "not a treaty id"), &ctx.request_id))?;

    let region = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &body.region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
    };
    let authority = match body.policy_id {
        Some(policy_id) => {
            // the cited policy must exist in the region's shard and have
            // passed
            let mut conn = state
                .db
                .region_conn(&body.region)
                .await
                .map_err(fail(&ctx.request_id))?;
            let policy = regional::get_policy(&mut conn, policy_id)
                .await
                .map_err(fail(&ctx.request_id))?
                .data;
            if policy.status != crate::models::PolicyStatus::Passed {
                return Err(ApiError::new(
                    Error::validation("policyId", "policy has not passed"),
                    &ctx.request_id,
                ));
            }
            diplomacy::Authority::PassedPolicy(policy_id)
        }
        None => {
            // governor path: owner account or administrator
            let is_governor = region.owner == Some(ctx.account.id) || ctx.is_admin();
            if !is_governor {
                return Err(ApiError::new(Error::InsufficientPermissions, &ctx.request_id));
            }
            diplomacy::Authority::Governor(ctx.player.data.id)
        }
    };
    let treaty = diplomacy::sign_treaty(&state.db, treaty_id, &body.region, authority)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, treaty))
}
