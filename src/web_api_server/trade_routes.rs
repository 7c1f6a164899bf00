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
use crate::engine::advisory::AdvisoryKind;
use crate::engine::trading;
use crate::error::Error;
use crate::federation::diplomacy;
use crate::models::{DomainEvent, ReputationTier, StationId};
use crate::security::AbuseSignal;

use super::{authed, fail, request_id, respond, ApiError, ApiResult, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stations/{station}/market", get(market))
        .route("/stations/{station}/buy", post(buy))
        .route("/stations/{station}/sell", post(sell))
        .route("/stations/{station}/futures", get(futures))
        .route("/analysis", get(market_analysis))
        .route("/optimize-route", post(optimize_route))
        .route("/contracts", get(list_contracts).post(post_contract))
        .route("/contracts/{contract}/accept", post(accept_contract))
        .route("/contracts/{contract}/fulfill", post(fulfill_contract))
        .route("/alerts", get(list_alerts).post(set_alert))
}

fn parse_station(raw: &str, rid: &str) -> Result<StationId, ApiError> {
    raw.parse()
        .map(StationId)
        .map_err(|_| ApiError::new(Error::validation("station", "not a station id"), rid))
}

/// Full quote sheet for a station; prices derived per call.
async fn market(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let station_id = parse_station(&station, &ctx.request_id)?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let config = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
    };
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let station = regional::get_station(&mut conn, station_id)
        .await
        .map_err(fail(&ctx.request_id))?
        .data;
    let tier = match &station.faction {
        Some(f) => ReputationTier::from_score(player.reputation_with(f)),
        None => ReputationTier::Neutral,
    };
    let mut quotes = vec![];
    for (commodity, entry) in &station.market {
        quotes.push(json!({
            "commodity": commodity,
            "inventory": entry.inventory,
            "capacity": entry.capacity,
            "buyPrice": trading::quote_buy(&station, commodity, tier, &config).map_err(fail(&ctx.request_id))?,
            "sellPrice": trading::quote_sell(&station, commodity, tier, &config).map_err(fail(&ctx.request_id))?,
        }));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "station": { "id": station.id, "name": station.name, "class": station.class, "services": station.services.names() },
            "reputationTier": tier,
            "quotes": quotes,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TradeBody {
    commodity: String,
    units: i64,
}

async fn buy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station): Path<String>,
    Json(body): Json<TradeBody>,
) -> ApiResult {
    trade(state, headers, station, body, true).await
}

async fn sell(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station): Path<String>,
    Json(body): Json<TradeBody>,
) -> ApiResult {
    trade(state, headers, station, body, false).await
}

async fn trade(
    state: Arc<AppState>,
    headers: HeaderMap,
    station: String,
    body: TradeBody,
    buying: bool,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let station_id = parse_station(&station, &ctx.request_id)?;
    let player_id = ctx.player.data.id;
    let region = ctx.player.data.current_region.clone();
    let ship_id = ctx.player.data.current_ship.ok_or_else(|| {
        ApiError::new(Error::validation("ship", "no piloted ship"), &ctx.request_id)
    })?;

    state.security.abuse.record(ctx.account.id, AbuseSignal::Trade);

    let mut config = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
    };
    // A citizen trading abroad carries their home region's treaty trade
    // bonus with them.
    let home = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::list_memberships_for_player(&mut conn, player_id)
            .await
            .map_err(fail(&ctx.request_id))?
            .into_iter()
            .find(|m| m.membership_type == crate::models::MembershipType::Citizen && m.region != region)
            .map(|m| m.region)
    };
    if let Some(home) = home {
        let bonus = diplomacy::trade_bonus_factor(&state.db, &region, &home)
            .await
            .unwrap_or(1.0);
        if bonus != 1.0 {
            for commodity in crate::engine::galaxy::COMMODITIES {
                let entry = config.trade_bonuses.entry(commodity.to_string()).or_insert(1.0);
                *entry = (*entry * bonus).clamp(0.5, 2.0);
            }
        }
    }

    // Shard-local half first: cargo and inventory move atomically in one
    // region transaction. Credits settle against the global shard after,
    // with a compensating reversal if settlement fails.
    let player_snapshot = ctx.player.data.clone();
    let receipt = retry_conflict(|| async {
        let mut region_conn = state.db.region_conn(&region).await?;
        let body = &body;
        let config = &config;
        let player_snapshot = player_snapshot.clone();
        region_conn
            .transaction::<trading::TradeReceipt, Error, _>(|conn| {
                async move {
                    let mut ship = regional::get_ship(conn, ship_id).await?;
                    let mut station = regional::get_station(conn, station_id).await?;
                    if station.data.sector != ship.data.sector {
                        return Err(Error::validation("station", "not in this sector"));
                    }
                    // the snapshot validates affordability as of request
                    // time; the authoritative debit follows
                    let mut player = player_snapshot;
                    let receipt = if buying {
                        trading::execute_buy(
                            &mut player,
                            &mut ship.data,
                            &mut station.data,
                            &body.commodity,
                            body.units,
                            config,
                        )?
                    } else {
                        trading::execute_sell(
                            &mut player,
                            &mut ship.data,
                            &mut station.data,
                            &body.commodity,
                            body.units,
                            config,
                        )?
                    };
                    regional::update_ship(conn, &ship.data, ship.version).await?;
                    regional::update_station(conn, &station.data, station.version).await?;
                    Ok(receipt)
                }
                .scope_boxed()
            })
            .await
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    let settled = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        if buying {
            player.data.debit_credits(receipt.total)?;
        } else {
            player.data.credit_credits(receipt.total);
        }
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await;
    if let Err(e) = settled {
        // reverse the shard-local half
        let reversal = retry_conflict(|| async {
            let mut region_conn = state.db.region_conn(&region).await?;
            let receipt = &receipt;
            region_conn
                .transaction::<(), Error, _>(|conn| {
                    async move {
                        let mut ship = regional::get_ship(conn, ship_id).await?;
                        let mut station = regional::get_station(conn, station_id).await?;
                        let entry = station
                            .data
                            .market
                            .get_mut(&receipt.commodity)
                            .ok_or(Error::NotFound("market entry"))?;
                        if buying {
                            ship.data.unload_cargo(&receipt.commodity, receipt.units)?;
                            entry.inventory += receipt.units;
                        } else {
                            entry.inventory -= receipt.units;
                            ship.data.load_cargo(&receipt.commodity, receipt.units)?;
                        }
                        regional::update_ship(conn, &ship.data, ship.version).await?;
                        regional::update_station(conn, &station.data, station.version).await?;
                        Ok(())
                    }
                    .scope_boxed()
                })
                .await
        })
        .await;
        if let Err(reversal_err) = reversal {
            tracing::error!("trade reversal failed: {}", reversal_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }

    state
        .fabric
        .publish(&DomainEvent::TradeExecuted {
            player: player_id,
            commodity: receipt.commodity.clone(),
            units: if buying { receipt.units } else { -receipt.units },
            total: receipt.total,
        })
        .await
        .ok();

    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({
            "commodity": receipt.commodity,
            "units": receipt.units,
            "pricePerUnit": receipt.price_per_unit,
            "total": receipt.total,
            "side": if buying { "buy" } else { "sell" },
        }),
    ))
}

/// Forward quotes: the price the station would ask at projected supply
/// levels. Read-only, derived from the same curve the spot price uses.
async fn futures(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let station_id = parse_station(&station, &ctx.request_id)?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let config = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
    };
    let station = {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::get_station(&mut conn, station_id)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
    };
    let tier = match &station.faction {
        Some(f) => ReputationTier::from_score(player.reputation_with(f)),
        None => ReputationTier::Neutral,
    };
    let mut curves = vec![];
    for (commodity, entry) in &station.market {
        let mut points = vec![];
        for shift in [-20i64, -10, 0, 10, 20] {
            let mut projected = station.clone();
            let p = projected
                .market
                .get_mut(commodity)
                .expect("iterating this station's own market");
            p.inventory = (entry.inventory + entry.capacity * shift / 100).clamp(0, entry.capacity);
            points.push(json!({
                "supplyShiftPct": shift,
                "buyPrice": trading::quote_buy(&projected, commodity, tier, &config)
                    .map_err(fail(&ctx.request_id))?,
                "sellPrice": trading::quote_sell(&projected, commodity, tier, &config)
                    .map_err(fail(&ctx.request_id))?,
            }));
        }
        curves.push(json!({ "commodity": commodity, "points": points }));
    }
    Ok(respond(
        StatusCode::OK,
        &ctx.request_id,
        &ctx.rate,
        json!({ "station": station.id, "futures": curves }),
    ))
}

// ---- hauling contracts ----

async fn list_contracts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let region = ctx.player.data.current_region.clone();
    let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
    let contracts = regional::list_open_contracts(&mut conn)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, contracts))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PostContractBody {
    commodity: String,
    units: i64,
    station_id: StationId,
    reward: i64,
}

/// Post a hauling contract; the reward escrows out of the poster's
/// wallet and pays the hauler on delivery.
async fn post_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PostContractBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if body.units <= 0 || body.reward <= 0 {
        return Err(ApiError::new(
            Error::validation("contract", "units and reward must be positive"),
            &ctx.request_id,
        ));
    }
    if !crate::engine::galaxy::COMMODITIES.contains(&body.commodity.as_str()) {
        return Err(ApiError::new(
            Error::validation("commodity", "unknown commodity"),
            &ctx.request_id,
        ));
    }
    let player_id = ctx.player.data.id;
    let region = ctx.player.data.current_region.clone();
    // destination station must exist in this region
    {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::get_station(&mut conn, body.station_id)
            .await
            .map_err(fail(&ctx.request_id))?;
    }
    // escrow the reward, then write the contract; refund if the write
    // fails
    retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        player.data.debit_credits(body.reward)?;
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    let now = chrono::Utc::now();
    let contract = crate::models::Contract {
        id: crate::models::ContractId::new(),
        poster: player_id,
        assignee: None,
        commodity: body.commodity.clone(),
        units: body.units,
        station: body.station_id,
        reward: body.reward,
        status: crate::models::ContractStatus::Open,
        created_at: now,
        updated_at: now,
    };
    let inserted = async {
        let mut conn = state.db.region_conn(&region).await?;
        regional::insert_contract(&mut conn, &contract).await
    }
    .await;
    if let Err(e) = inserted {
        let refund = retry_conflict(|| async {
            let mut conn = state.db.conn().await?;
            let mut player = global::get_player(&mut conn, player_id).await?;
            player.data.credit_credits(body.reward);
            global::update_player(&mut conn, &player.data, player.version).await?;
            Ok(())
        })
        .await;
        if let Err(refund_err) = refund {
            tracing::error!("contract escrow refund failed: {}", refund_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }
    Ok(respond(StatusCode::CREATED, &ctx.request_id, &ctx.rate, contract))
}

fn parse_contract(raw: &str, rid: &str) -> Result<crate::models::ContractId, ApiError> {
    raw.parse()
        .map(crate::models::ContractId)
        .map_err(|_| ApiError::new(Error::validation("contract", "not a contract id"), rid))
}

async fn accept_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(contract): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let contract_id = parse_contract(&contract, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let accepted = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        let mut contract = regional::get_contract(&mut conn, contract_id).await?;
        contract.data.accept(player_id, chrono::Utc::now())?;
        regional::update_contract(&mut conn, &contract.data, contract.version).await?;
        Ok(contract.data)
    })
    .await
    .map_err(fail(&ctx.request_id))?;
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, accepted))
}

/// Deliver the cargo at the contract station: units leave the hauler's
/// ship into station storage inside one shard transaction, then the
/// escrowed reward pays out (reversed if the payout cannot land).
async fn fulfill_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(contract): Path<String>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let contract_id = parse_contract(&contract, &ctx.request_id)?;
    let region = ctx.player.data.current_region.clone();
    let player_id = ctx.player.data.id;
    let ship_id = ctx.player.data.current_ship.ok_or_else(|| {
        ApiError::new(Error::validation("ship", "no piloted ship"), &ctx.request_id)
    })?;

    let delivered = retry_conflict(|| async {
        let mut conn = state.db.region_conn(&region).await?;
        conn.transaction::<crate::models::Contract, Error, _>(|conn| {
            async move {
                let mut contract = regional::get_contract(conn, contract_id).await?;
                let mut ship = regional::get_ship(conn, ship_id).await?;
                let mut station = regional::get_station(conn, contract.data.station).await?;
                if station.data.sector != ship.data.sector {
                    return Err(Error::validation("ship", "not at the contract station"));
                }
                contract.data.fulfill(player_id, chrono::Utc::now())?;
                ship.data.unload_cargo(&contract.data.commodity, contract.data.units)?;
                let entry = station
                    .data
                    .market
                    .get_mut(&contract.data.commodity)
                    .ok_or_else(|| Error::validation("commodity", "station does not store this"))?;
                if entry.inventory + contract.data.units > entry.capacity {
                    return Err(Error::validation("units", "station storage full"));
                }
                entry.inventory += contract.data.units;
                regional::update_ship(conn, &ship.data, ship.version).await?;
                regional::update_station(conn, &station.data, station.version).await?;
                regional::update_contract(conn, &contract.data, contract.version).await?;
                Ok(contract.data)
            }
            .scope_boxed()
        })
        .await
    })
    .await
    .map_err(fail(&ctx.request_id))?;

    let paid = retry_conflict(|| async {
        let mut conn = state.db.conn().await?;
        let mut player = global::get_player(&mut conn, player_id).await?;
        player.data.credit_credits(delivered.reward);
        global::update_player(&mut conn, &player.data, player.version).await?;
        Ok(())
    })
    .await;
    if let Err(e) = paid {
        let reversal = retry_conflict(|| async {
            let mut conn = state.db.region_conn(&region).await?;
            conn.transaction::<(), Error, _>(|conn| {
                let delivered = &delivered;
                async move {
                    let mut contract = regional::get_contract(conn, contract_id).await?;
                    contract.data.status = crate::models::ContractStatus::Accepted;
                    let mut ship = regional::get_ship(conn, ship_id).await?;
                    let mut station = regional::get_station(conn, delivered.station).await?;
                    if let Some(entry) = station.data.market.get_mut(&delivered.commodity) {
                        entry.inventory -= delivered.units;
                    }
                    ship.data.load_cargo(&delivered.commodity, delivered.units)?;
                    regional::update_ship(conn, &ship.data, ship.version).await?;
                    regional::update_station(conn, &station.data, station.version).await?;
                    regional::update_contract(conn, &contract.data, contract.version).await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await
        })
        .await;
        if let Err(reversal_err) = reversal {
            tracing::error!("contract fulfillment reversal failed: {}", reversal_err);
        }
        return Err(fail(&ctx.request_id)(e));
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, delivered))
}

// ---- price alerts ----

#[derive(Debug, Clone, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PriceAlert {
    station_id: StationId,
    commodity: String,
    /// Alert when the buy price crosses the threshold in this direction.
    above: bool,
    threshold: i64,
}

/// Add a price alert; alerts are evaluated on read against live quotes.
async fn set_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PriceAlert>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if body.threshold <= 0 {
        return Err(ApiError::new(
            Error::validation("threshold", "must be positive"),
            &ctx.request_id,
        ));
    }
    let key = format!("price_alerts/{}", ctx.player.data.id);
    let mut alerts: Vec<PriceAlert> = state
        .db
        .get_value(&key)
        .await
        .map_err(fail(&ctx.request_id))?
        .unwrap_or_default();
    if alerts.len() >= 20 {
        return Err(ApiError::new(
            Error::validation("alerts", "at most 20 alerts"),
            &ctx.request_id,
        ));
    }
    alerts.push(body);
    state
        .db
        .set_value(&key, &alerts)
        .await
        .map_err(fail(&ctx.request_id))?;
    Ok(respond(
        StatusCode::CREATED,
        &ctx.request_id,
        &ctx.rate,
        json!({ "alerts": alerts.len() }),
    ))
}

async fn list_alerts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let key = format!("price_alerts/{}", player.id);
    let alerts: Vec<PriceAlert> = state
        .db
        .get_value(&key)
        .await
        .map_err(fail(&ctx.request_id))?
        .unwrap_or_default();
    let config = {
        let mut conn = state.db.conn().await.map_err(fail(&ctx.request_id))?;
        global::get_region(&mut conn, &region)
            .await
            .map_err(fail(&ctx.request_id))?
            .data
            .config
    };
    let mut evaluated = vec![];
    for alert in &alerts {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        let quote = match regional::get_station(&mut conn, alert.station_id).await {
            Ok(station) => {
                let tier = match &station.data.faction {
                    Some(f) => ReputationTier::from_score(player.reputation_with(f)),
                    None => ReputationTier::Neutral,
                };
                trading::quote_buy(&station.data, &alert.commodity, tier, &config).ok()
            }
            // a station in another region evaluates when the player is
            // back there
            Err(_) => None,
        };
        let triggered = quote
            .map(|p| if alert.above { p >= alert.threshold } else { p <= alert.threshold })
            .unwrap_or(false);
        evaluated.push(json!({
            "alert": alert,
            "currentPrice": quote,
            "triggered": triggered,
        }));
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, evaluated))
}

/// Advisory market analysis; never authoritative, degrades to the
/// deterministic heuristic.
async fn market_analysis(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    let player = &ctx.player.data;
    let region = player.current_region.clone();
    let stations = {
        let mut conn = state.db.region_conn(&region).await.map_err(fail(&ctx.request_id))?;
        regional::list_stations_in_sector(&mut conn, player.current_sector)
            .await
            .map_err(fail(&ctx.request_id))?
    };
    let market = stations
        .first()
        .map(|s| serde_json::to_value(&s.market).unwrap_or_default())
        .unwrap_or_default();
    let (advisory, degraded) = state
        .advisory
        .advise(AdvisoryKind::MarketPrediction, json!({ "market": market }))
        .await;
    if degraded {
        super::record_advisory_degradation(
            &state,
            ctx.account.id,
            "market-prediction",
            &ctx.request_id,
        )
        .await;
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, advisory))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OptimizeBody {
    stops: Vec<i32>,
}

async fn optimize_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OptimizeBody>,
) -> ApiResult {
    let ctx = authed(&state, &headers, "trade")
        .await
        .map_err(fail(&request_id(&headers)))?;
    if body.stops.is_empty() || body.stops.len() > 20 {
        return Err(ApiError::new(
            Error::validation("stops", "between 1 and 20 stops"),
            &ctx.request_id,
        ));
    }
    let (advisory, degraded) = state
        .advisory
        .advise(
            AdvisoryKind::RouteOptimization,
            json!({ "start": ctx.player.data.current_sector, "stops": body.stops }),
        )
        .await;
    if degraded {
        super::record_advisory_degradation(
            &state,
            ctx.account.id,
            "route-optimization",
            &ctx.request_id,
        )
        .await;
    }
    Ok(respond(StatusCode::OK, &ctx.request_id, &ctx.rate, advisory))
}
