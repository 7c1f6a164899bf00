use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{global, regional, retry_conflict};
use crate::error::Error;
use crate::fabric::{authorize, SubscriberCtx};
use crate::models::{DomainEvent, LinkRestriction, MembershipType, Paginated, Scope, SectorIndex};
use crate::pathfinding::WarpGraph;

use super::{authed, fail, request_id, respond, ApiResult, AppState, PageQuery};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sectors", get(list_sectors))
        .route("/sectors/{index}/scan", get(scan_sector))
        .route("/route", get(calculate_route))
        .route("/warp-tunnels", get(warp_tunnels))
        .route("/warp", post(warp))
}

/// Warp links out of the player's current sector, tolls and restrictions
/// included.
async fn warp_tunnels(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "navigation")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let sector = regional::get_sector(&mut conn, player.current_sector)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "sector": sector.index, "tunnels": sector.warp_links }),
    ))
}

async fn list_sectors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "navigation")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let total = regional::sector_count(&mut conn).await.map_err(fail(&ctx.request_id))?;
    let (p, per) = page.clamped();
    let sectors = regional::list_sectors_page(&mut conn, p as i64, per as i64)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        Paginated {
            data: sectors,
            pagination: page.pagination(total as u64),
        },
    ))
}

/// Scan is gated by the same rule as the sector event scope: you must be
/// there, or be an administrator.
async fn scan_sector(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(index): Path<i32>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "navigation")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let target = SectorIndex(index);
    let sub = SubscriberCtx {
        player: player.id,
        role: ctx.account.role,
        current_region: region.clone(),
        current_sector: player.current_sector,
        teams: Default::default(),
        memberships: Default::default(),
    };
    authorize(&sub, &Scope::Sector(region.clone(), target)).map_err(fail(&ctx.request_id))?;

    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let sector = regional::get_sector(&mut conn, target)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let ships = regional::list_ships_in_sector(&mut conn, target)
        .await
        .map_err(fail(&ctx.request_id))?;
    let planets = regional::list_planets_in_sector(&mut conn, target)
        .await
        .map_err(fail(&ctx.request_id))?;
    let stations = regional::list_stations_in_sector(&mut conn, target)
        .await
        .map_err(fail(&ctx.request_id))?;
    if let Some(ship) = player.current_ship {
        state
            .fabric
            .publish(&DomainEvent::RadarPing {
                region: region.clone(),
                sector: target,
                contact: ship,
            })
            .await
            .ok();
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "sector": sector,
            "ships": ships,
            "planets": planets,
            "stations": stations,
        }),
    ))
}

#[derive(Deserialize)]
struct RouteQuery {
    from: i32,
    to: i32,
}

async fn calculate_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RouteQuery>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "navigation")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let links = regional::list_sector_links(&mut conn)
        .await
        .map_err(fail(&ctx.request_id))?;
    let graph = WarpGraph::from_links(links);
    let route = graph
        .route(SectorIndex(query.from), SectorIndex(query.to))
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "hops": route.hops,
            "totalCost": route.total_cost,
            "totalTolls": route.total_tolls,
            "fuelRequired": WarpGraph::fuel_required(&route),
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WarpBody {
    to_sector: i32,
}

/// Use a warp link out of the current sector: charges fuel and any toll,
/// honors link restrictions, moves ship and player together.
async fn warp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WarpBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "navigation")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player_id = ctx.player.data.id;
    let region = ctx.player.data.current_region.clone();
    let ship_id = ctx
        .player
        .data
        .current_ship
        .ok_or_else(|| super::ApiError::new(Error::validation("ship", "no piloted ship"), &ctx.request_id))?;
    let destination = SectorIndex(body.to_sector);

    let membership = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_membership(&mut conn, player_id, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .map(|m| m.data)
    };

    // Shard-local move first (fuel burn + sector change); the toll and
    // the player's position settle against the global shard afterwards,
    // with the move reversed if settlement fails.
    let (from, link) = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut ship = regional::get_ship(&mut conn, ship_id).await?;
        if !ship.data.can_jump() {
            return Err(Error::validation("ship", "ship condition too low to jump"));
        }
        let sector = regional::get_sector(&mut conn, ship.data.sector).await?.data;
        let link = sector
            .link_to(destination)
            .ok_or_else(|| Error::validation("toSector", "no warp link from here"))?
            .clone();
        match &link.restriction {
            Some(LinkRestriction::MinReputation(min)) => {
                let rep = membership.as_ref().map(|m| m.reputation).unwrap_or(0);
                if rep < *min {
                    return Err(Error::FactionRestriction("reputation too low for this lane".into()));
                }
            }
            Some(LinkRestriction::CitizensOnly) => {
                let citizen = membership
                    .as_ref()
                    .map(|m| m.membership_type == MembershipType::Citizen)
                    .unwrap_or(false);
                if !citizen {
                    return Err(Error::FactionRestriction("citizens only".into()));
                }
            }
            None => {}
        }
        if ship.data.fuel < link.travel_cost {
            return Err(Error::validation("fuel", "not enough fuel"));
        }
        let from = ship.data.sector;
        ship.data.fuel -= link.travel_cost;
        ship.data.sector = destination;
        regional::update_ship(&mut conn, &ship.data, ship.version).await?;
        Ok((from, link))
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    let settled = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        if let Some(toll) = link.toll {
            player.data.debit_credits(toll)?;
        }
        player.data.current_sector = destination;
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await;
    if let Err(e) = settled {
        let reversal = retry_conflict(|| async {
            let mut conn = state.db.region_conn(&region).await?;
            let mut ship = regional::get_ship(&mut conn, ship_id).await?;
            ship.data.fuel += link.travel_cost;
            ship.data.sector = from;
            regional::update_ship(&mut conn, &ship.data, ship.version).await?;
            Ok(())
        })
        .await;
        if let Err(reversal_err) = reversal {
            tracing::error!("warp reversal failed: {}", reversal_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }
    let to = destination;

    state
        .fabric
        .publish(&DomainEvent::ShipDeparted {
            region: region.clone(),
            sector: from,
            ship: ship_id,
        })
        .await
        .ok();
    state
        .fabric
        .publish(&DomainEvent::ShipEntered {
            region: region.clone(),
            sector: to,
            ship: ship_id,
            player: player_id,
        })
        .await
        .ok();
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "from": from, "to": to }),
    ))
}
