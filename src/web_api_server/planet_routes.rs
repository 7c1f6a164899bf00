use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::models::{Building, BuildingKind, ColonistAllocation, PlanetId, SiegeState};

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/owned", get(owned))
        .route("/genesis", post(genesis))
        .route("/{planet}", get(detail))
        .route("/{planet}/allocate", put(allocate))
        .route("/{planet}/buildings", post(build))
        .route("/{planet}/defenses", put(defenses))
        .route("/{planet}/specialize", put(specialize))
        .route("/{planet}/claim", post(claim))
        .route("/{planet}/siege", post(siege))
}

fn parse_planet(raw: &str, rid: &str) -> Result<PlanetId, ApiError> {
    raw.parse()
        .map(PlanetId)
        .map_err(|_| ApiError::new(Error::validation("planet", "not a planet id"), rid))
}

async fn owned(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let planets = regional::list_planets_of_owner(&mut conn, ctx.player.data.id)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, planets))
}

async fn detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let planet = regional::get_planet(&mut conn, planet_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, planet))
}

const GENESIS_COST: i64 = 5000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GenesisBody {
    name: String,
}

/// Fire a genesis device: seed a new barren world in the player's
/// current sector. The fee burns first; a failed insert refunds it.
async fn genesis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenesisBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let name = body.name.trim().to_string();
    if name.len() < 2 || name.len() > 40 {
        return Err(ApiError::new(
            Error::validation("name", "2-40 characters"),
            &ctx.request_id,
        ));
    }
    let player = &ctx.player.data;
    let player_id = player.id;
    let region = player.current_region.clone();
    let sector = player.current_sector;

    retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut stored = global::get_player(&mut conn, player_id).await?;
        stored.data.debit_credits(GENESIS_COST)?;
        global::update_player(&mut conn, &stored.data, stored.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    let planet_type = crate::models::PlanetType::Barren;
    let planet = crate::models::Planet {
        id: crate::models::PlanetId::new(),
        name,
        sector,
        planet_type,
        habitability: planet_type.base_habitability(),
        population: 0,
        max_population: (planet_type.base_habitability() * 1_000_000.0) as i64,
        owner: Some(player_id),
        specialization: None,
        buildings: vec![],
        allocation: Default::default(),
        defense_drones: 0,
        shield_strength: 0,
        siege: None,
        stockpile: Default::default(),
        last_tick: 0,
    };
    let inserted = async {
        let mut conn = state.db.region_conn(&region).await?;
        regional::insert_planet(&mut conn, &planet).await
    }
    .await;
    if let Err(e) = inserted {
        let refund = retry_conflict(|| async {
            let mut conn = state.db.conn().await?;
            let mut stored = global::get_player(&mut conn, player_id).await?;
            stored.data.credit_credits(GENESIS_COST);
            global::update_player(&mut conn, &stored.data, stored.version).await?;
            Ok(())
        })
        .await;
        if let Err(refund_err) = refund {
            tracing::error!("genesis refund failed: {}", refund_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, planet))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SpecializeBody {
    commodity: Option<String>,
}

/// Set or clear the colony's production focus.
async fn specialize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
    Json(body): Json<SpecializeBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    if let Some(commodity) = &body.commodity {
        if !crate::engine::galaxy::COMMODITIES.contains(&commodity.as_str()) {
            return Err(ApiError::new(
                Error::validation("commodity", "unknown commodity"),
                &ctx.request_id,
            ));
        }
    }
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.owner != Some(player_id) {
            return Err(Error::InsufficientPermissions);
        }
        planet.data.specialization = body.commodity.clone();
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}

/// Claim an unowned planet in the player's current sector.
async fn claim(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let player_id = player.id;
    let sector = player.current_sector;
    let claimed = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.owner.is_some() {
            return Err(Error::Conflict("planet already claimed"));
        }
        if planet.data.sector != sector {
            return Err(Error::validation("planet", "not in this sector"));
        }
        planet.data.owner = Some(player_id);
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, claimed))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AllocateBody {
    allocation: ColonistAllocation,
}

async fn allocate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
    Json(body): Json<AllocateBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.owner != Some(player_id) {
            return Err(Error::InsufficientPermissions);
        }
        planet.data.set_allocation(body.allocation.clone())?;
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BuildBody {
    kind: BuildingKind,
}

/// Raise one building level; costs goods from the planet stockpile.
async fn build(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
    Json(body): Json<BuildBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    const BUILD_COST_GOODS: i64 = 50;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.owner != Some(player_id) {
            return Err(Error::InsufficientPermissions);
        }
        let goods = planet.data.stockpile.entry("goods".to_string()).or_insert(0);
        if *goods < BUILD_COST_GOODS {
            return Err(Error::validation("stockpile", "not enough goods to build"));
        }
        *goods -= BUILD_COST_GOODS;
        match planet.data.buildings.iter_mut().find(|b| b.kind == body.kind) {
            Some(existing) => existing.level += 1,
            None => planet.data.buildings.push(Building {
                kind: body.kind,
                level: 1,
            }),
        }
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DefensesBody {
    defense_drones: i32,
}

async fn defenses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
    Json(body): Json<DefensesBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    if body.defense_drones < 0 {
        return Err(ApiError::new(
            Error::validation("defenseDrones", "must be non-negative"),
            &ctx.request_id,
        ));
    }
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.owner != Some(player_id) {
            return Err(Error::InsufficientPermissions);
        }
        planet.data.defense_drones = body.defense_drones;
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}

/// Open a siege against someone else's colony.
async fn siege(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(planet): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "planet")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let planet_id = parse_planet(&planet, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player = &ctx.player.data;
    let player_id = player.id;
    let sector = player.current_sector;
    let tick = chrono::Utc::now().timestamp() / 3600;
    let updated = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut planet = regional::get_planet(&mut conn, planet_id).await?;
        if planet.data.sector != sector {
            return Err(Error::validation("planet", "not in this sector"));
        }
        match planet.data.owner {
            None => return Err(Error::validation("planet", "nothing to siege")),
            Some(owner) if owner == player_id => {
                return Err(Error::validation("planet", "cannot siege your own colony"))
            }
            Some(_) => {}
        }
        if planet.data.siege.is_some() {
            return Err(Error::Conflict("siege already underway"));
        }
        planet.data.siege = Some(SiegeState {
            attacker: player_id,
            started_tick: tick,
            progress: 0.0,
        });
        regional::update_planet(&mut conn, &planet.data, planet.version).await?;
        Ok(planet.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, updated))
}
