use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, retry_conflict};
use crate::error::Error;
use crate::models::{faction_catalog, ReputationTier};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list))
        .route("/relations", get(relations))
        .route("/territory", get(territory))
        .route("/{faction}", get(detail))
        .route("/{faction}/missions", get(missions))
        .route("/{faction}/missions/accept", post(accept_mission))
}

/// Pairwise faction standings from the fixed catalog.
async fn relations(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let catalog = faction_catalog();
    let mut pairs = vec![];
    for a in &catalog {
        for b in &catalog {
            if a.symbol >= b.symbol {
                continue;
            }
            let hostile = a.hostile_to.contains(&b.symbol) || b.hostile_to.contains(&a.symbol);
            pairs.push(json!({
                "factions": [a.symbol, b.symbol],
                "stance": if hostile { "hostile" } else { "neutral" },
            }));
        }
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, pairs))
}

/// Faction presence in the player's current region, by affiliated
/// station count.
async fn territory(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let mut conn = state
        .db
        .region_conn(&region)
        .await
        .map_err(fail(&ctx.request_id))?;
    let stations = crate::database::regional::list_stations_in_sector(&mut conn, player.current_sector)
        .await
        .map_err(fail(&ctx.request_id))?;
    let mut counts = std::collections::BTreeMap::new();
    for station in &stations {
        if let Some(faction) = &station.faction {
            *counts.entry(faction.clone()).or_insert(0u32) += 1;
        }
    }
    let weights: Vec<_> = faction_catalog()
        .into_iter()
        .map(|f| {
            json!({
                "faction": f.symbol,
                "territoryWeight": f.territory_weight,
                "stationsHere": counts.get(&f.symbol).copied().unwrap_or(0),
            })
        })
        .collect();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "region": region, "sector": player.current_sector, "factions": weights }),
    ))
}

async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let factions: Vec<_> = faction_catalog()
        .into_iter()
        .map(|f| {
            let score = player.reputation_with(&f.symbol);
            json!({
                "symbol": f.symbol,
                "name": f.name,
                "description": f.description,
                "reputation": score,
                "tier": ReputationTier::from_score(score),
            })
        })
        .collect();
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, factions))
}

fn find_faction(symbol: &str, rid: &str) -> Result<crate::models::Faction, ApiError> {
    faction_catalog()
        .into_iter()
        .find(|f| f.symbol == symbol)
        .ok_or_else(|| ApiError::new(Error::NotFound("faction"), rid))
}

async fn detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(faction): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let faction = find_faction(&faction, &ctx.request_id)?;
    let score = ctx.player.data.reputation_with(&faction.symbol);
    let tier = ReputationTier::from_score(score);
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "faction": faction,
            "reputation": score,
            "tier": tier,
            "priceFactor": tier.price_factor(),
            "missionsAvailable": tier.allows_missions(),
        }),
    ))
}

/// Missions scale with standing; a simple deterministic board per tier.
fn mission_board(symbol: &str, tier: ReputationTier) -> Vec<serde_json::Value> {
    if !tier.allows_missions() {
        return vec![];
    }
    let mut missions = vec![json!({
        "id": format!("{}-courier", symbol),
        "kind": "courier",
        "rewardCredits": 250,
        "rewardReputation": 10,
    })];
    if tier >= ReputationTier::Friendly {
        missions.push(json!({
            "id": format!("{}-patrol", symbol),
            "kind": "patrol",
            "rewardCredits": 600,
            "rewardReputation": 25,
        }));
    }
    if tier >= ReputationTier::Honored {
        missions.push(json!({
            "id": format!("{}-strike", symbol),
            "kind": "strike",
            "rewardCredits": 1500,
            "rewardReputation": 50,
        }));
    }
    missions
}

async fn missions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(faction): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let faction = find_faction(&faction, &ctx.request_id)?;
    let tier = ReputationTier::from_score(ctx.player.data.reputation_with(&faction.symbol));
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        mission_board(&faction.symbol, tier),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AcceptBody {
    mission_id: String,
}

async fn accept_mission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(faction): Path<String>,
    Json(body): Json<AcceptBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "faction")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let faction = find_faction(&faction, &ctx.request_id)?;
    let player_id = ctx.player.data.id;
    let tier = ReputationTier::from_score(ctx.player.data.reputation_with(&faction.symbol));
    if !tier.allows_missions() {
        return Err(ApiError::new(
            Error::FactionRestriction("standing too low for missions".into()),
            &ctx.request_id,
        ));
    }
    let board = mission_board(&faction.symbol, tier);
    let mission = board
        .iter()
        .find(|m| m["id"] == body.mission_id)
        .cloned()
        .ok_or_else(|| ApiError::new(Error::NotFound("mission"), &ctx.request_id))?;

    // Accepting banks a small reputation gesture immediately; rewards
    // land on completion.
    retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        player.data.adjust_reputation(&faction.symbol, 1);
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "accepted": mission }),
    ))
}
