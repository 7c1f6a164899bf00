//! Repository operations against one region shard. Callers grab the
//! shard connection from `DbClient::region_conn` and can wrap several of
//! these calls in a single transaction.

use chrono::{DateTime, Utc};
use diesel::ExpressionMethods as _;
use diesel::JoinOnDsl as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::SelectableHelper as _;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl as _;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Ballot, Combat, CombatId, CombatState, Contract, ContractId, DroneDeployment, DeploymentId,
    Drone, DroneId, Election, ElectionId, FirstLoginSession, Message, MessageId, MessageReceipt,
    Planet, PlanetId, PlayerId, Policy, PolicyId, Sector, SectorIndex, SessionId, Ship, ShipId,
    Station, StationId, Team, TeamId, WarpLink,
};
use crate::region_schema::*;

use super::db_models::*;
use super::{decode, encode, Versioned};

// ---- sectors and warp links ----

/// Bulk insert at galaxy generation; link lists live in their own table
/// and are reassembled on load.
pub async fn insert_sectors(conn: &mut AsyncPgConnection, sector_list: &[Sector]) -> Result<()> {
    for chunk in sector_list.chunks(500) {
        let mut rows = Vec::with_capacity(chunk.len());
        for s in chunk {
            let mut stripped = s.clone();
            stripped.warp_links = vec![];
            rows.push((
                sectors::sector_index.eq(s.index.0),
                sectors::sector_type.eq(serde_plain_name(&s.sector_type)?),
                sectors::district.eq(s.district.map(|d| d.to_string())),
                sectors::data.eq(encode(&stripped)?),
            ));
        }
        diesel::insert_into(sectors::table)
            .values(rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;

        let mut link_rows = Vec::new();
        for s in chunk {
            for link in &s.warp_links {
                link_rows.push((
                    warp_links::from_sector.eq(s.index.0),
                    warp_links::to_sector.eq(link.to.0),
                    warp_links::data.eq(encode(link)?),
                ));
            }
        }
        if !link_rows.is_empty() {
            diesel::insert_into(warp_links::table)
                .values(link_rows)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

fn serde_plain_name<T: serde::Serialize>(value: &T) -> Result<String> {
    match encode(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

pub async fn get_sector(
    conn: &mut AsyncPgConnection,
    index: SectorIndex,
) -> Result<Versioned<Sector>> {
    let row: SectorRow = sectors::table
        .filter(sectors::sector_index.eq(index.0))
        .select(SectorRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("sector"))?;
    let links: Vec<WarpLinkRow> = warp_links::table
        .filter(warp_links::from_sector.eq(index.0))
        .select(WarpLinkRow::as_select())
        .load(conn)
        .await?;
    let mut sector: Sector = decode(row.data)?;
    sector.warp_links = links
        .into_iter()
        .map(|l| decode::<WarpLink>(l.data))
        .collect::<Result<_>>()?;
    Ok(Versioned {
        data: sector,
        version: row.version,
    })
}

pub async fn sector_count(conn: &mut AsyncPgConnection) -> Result<i64> {
    let count: i64 = sectors::table.count().get_result(conn).await?;
    Ok(count)
}

pub async fn ship_count(conn: &mut AsyncPgConnection) -> Result<i64> {
    let count: i64 = ships::table.count().get_result(conn).await?;
    Ok(count)
}

/// (total, player-owned) planet counts for the shard.
pub async fn planet_counts(conn: &mut AsyncPgConnection) -> Result<(i64, i64)> {
    let total: i64 = planets::table.count().get_result(conn).await?;
    let owned: i64 = planets::table
        .filter(planets::owner.is_not_null())
        .count()
        .get_result(conn)
        .await?;
    Ok((total, owned))
}

pub async fn list_sector_links(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<(SectorIndex, SectorIndex, WarpLink)>> {
    let rows: Vec<WarpLinkRow> = warp_links::table
        .select(WarpLinkRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|l| {
            let link: WarpLink = decode(l.data)?;
            Ok((SectorIndex(l.from_sector), SectorIndex(l.to_sector), link))
        })
        .collect()
}

pub async fn list_sectors_page(
    conn: &mut AsyncPgConnection,
    page: i64,
    per_page: i64,
) -> Result<Vec<Sector>> {
    let rows: Vec<SectorRow> = sectors::table
        .order(sectors::sector_index.asc())
        .offset((page - 1).max(0) * per_page)
        .limit(per_page)
        .select(SectorRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- ships ----

pub async fn insert_ship(conn: &mut AsyncPgConnection, ship: &Ship) -> Result<()> {
    diesel::insert_into(ships::table)
        .values((
            ships::id.eq(ship.id.0),
            ships::pilot.eq(ship.pilot.0),
            ships::sector_index.eq(ship.sector.0),
            ships::data.eq(encode(ship)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_ship(conn: &mut AsyncPgConnection, id: ShipId) -> Result<Versioned<Ship>> {
    let row: ShipRow = ships::table
        .filter(ships::id.eq(id.0))
        .select(ShipRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("ship"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_ship(
    conn: &mut AsyncPgConnection,
    ship: &Ship,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        ships::table
            .filter(ships::id.eq(ship.id.0))
            .filter(ships::version.eq(expected_version)),
    )
    .set((
        ships::sector_index.eq(ship.sector.0),
        ships::data.eq(encode(ship)?),
        ships::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("ship modified concurrently"));
    }
    Ok(())
}

/// Travel reservation: flip the reserved flag on unreserved ships; all or
/// nothing.
pub async fn reserve_ships(conn: &mut AsyncPgConnection, ship_ids: &[ShipId]) -> Result<()> {
    let ids: Vec<Uuid> = ship_ids.iter().map(|s| s.0).collect();
    let updated = diesel::update(
        ships::table
            .filter(ships::id.eq_any(&ids))
            .filter(ships::reserved.eq(false)),
    )
    .set(ships::reserved.eq(true))
    .execute(conn)
    .await?;
    if updated != ids.len() {
        return Err(Error::Conflict("ship already reserved"));
    }
    Ok(())
}

/// Compensation path and successful-arrival cleanup; idempotent.
pub async fn release_ships(conn: &mut AsyncPgConnection, ship_ids: &[ShipId]) -> Result<()> {
    let ids: Vec<Uuid> = ship_ids.iter().map(|s| s.0).collect();
    diesel::update(ships::table.filter(ships::id.eq_any(&ids)))
        .set(ships::reserved.eq(false))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_ships(conn: &mut AsyncPgConnection, ship_ids: &[ShipId]) -> Result<()> {
    let ids: Vec<Uuid> = ship_ids.iter().map(|s| s.0).collect();
    diesel::delete(ships::table.filter(ships::id.eq_any(&ids)))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_ships_in_sector(
    conn: &mut AsyncPgConnection,
    sector: SectorIndex,
) -> Result<Vec<Ship>> {
    let rows: Vec<ShipRow> = ships::table
        .filter(ships::sector_index.eq(sector.0))
        .select(ShipRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

pub async fn list_ships_of_pilot(
    conn: &mut AsyncPgConnection,
    pilot: PlayerId,
) -> Result<Vec<Versioned<Ship>>> {
    let rows: Vec<ShipRow> = ships::table
        .filter(ships::pilot.eq(pilot.0))
        .select(ShipRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|r| {
            Ok(Versioned {
                data: decode(r.data)?,
                version: r.version,
            })
        })
        .collect()
}

// ---- planets ----

pub async fn insert_planet(conn: &mut AsyncPgConnection, planet: &Planet) -> Result<()> {
    diesel::insert_into(planets::table)
        .values((
            planets::id.eq(planet.id.0),
            planets::sector_index.eq(planet.sector.0),
            planets::owner.eq(planet.owner.map(|o| o.0)),
            planets::data.eq(encode(planet)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_planet(conn: &mut AsyncPgConnection, id: PlanetId) -> Result<Versioned<Planet>> {
    let row: PlanetRow = planets::table
        .filter(planets::id.eq(id.0))
        .select(PlanetRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("planet"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_planet(
    conn: &mut AsyncPgConnection,
    planet: &Planet,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        planets::table
            .filter(planets::id.eq(planet.id.0))
            .filter(planets::version.eq(expected_version)),
    )
    .set((
        planets::owner.eq(planet.owner.map(|o| o.0)),
        planets::data.eq(encode(planet)?),
        planets::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("planet modified concurrently"));
    }
    Ok(())
}

pub async fn list_planets_of_owner(
    conn: &mut AsyncPgConnection,
    owner: PlayerId,
) -> Result<Vec<Planet>> {
    let rows: Vec<PlanetRow> = planets::table
        .filter(planets::owner.eq(owner.0))
        .select(PlanetRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

pub async fn list_all_planets(conn: &mut AsyncPgConnection) -> Result<Vec<Versioned<Planet>>> {
    let rows: Vec<PlanetRow> = planets::table
        .select(PlanetRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|r| {
            Ok(Versioned {
                data: decode(r.data)?,
                version: r.version,
            })
        })
        .collect()
}

pub async fn list_planets_in_sector(
    conn: &mut AsyncPgConnection,
    sector: SectorIndex,
) -> Result<Vec<Planet>> {
    let rows: Vec<PlanetRow> = planets::table
        .filter(planets::sector_index.eq(sector.0))
        .select(PlanetRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- stations ----

pub async fn insert_station(conn: &mut AsyncPgConnection, station: &Station) -> Result<()> {
    diesel::insert_into(stations::table)
        .values((
            stations::id.eq(station.id.0),
            stations::sector_index.eq(station.sector.0),
            stations::data.eq(encode(station)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_station(
    conn: &mut AsyncPgConnection,
    id: StationId,
) -> Result<Versioned<Station>> {
    let row: StationRow = stations::table
        .filter(stations::id.eq(id.0))
        .select(StationRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("station"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_station(
    conn: &mut AsyncPgConnection,
    station: &Station,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        stations::table
            .filter(stations::id.eq(station.id.0))
            .filter(stations::version.eq(expected_version)),
    )
    .set((
        stations::data.eq(encode(station)?),
        stations::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("station modified concurrently"));
    }
    Ok(())
}

pub async fn list_stations_in_sector(
    conn: &mut AsyncPgConnection,
    sector: SectorIndex,
) -> Result<Vec<Station>> {
    let rows: Vec<StationRow> = stations::table
        .filter(stations::sector_index.eq(sector.0))
        .select(StationRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- drones ----

pub async fn upsert_drone(conn: &mut AsyncPgConnection, drone: &Drone) -> Result<()> {
    let data = encode(drone)?;
    diesel::insert_into(drones::table)
        .values((
            drones::id.eq(drone.id.0),
            drones::owner.eq(drone.owner.0),
            drones::data.eq(&data),
        ))
        .on_conflict(drones::id)
        .do_update()
        .set(drones::data.eq(&data))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_drone(conn: &mut AsyncPgConnection, id: DroneId) -> Result<Versioned<Drone>> {
    let row = drones::table
        .filter(drones::id.eq(id.0))
        .select((drones::data, drones::version))
        .first::<(serde_json::Value, i32)>(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("drone"))?;
    Ok(Versioned {
        data: decode(row.0)?,
        version: row.1,
    })
}

pub async fn insert_deployment(
    conn: &mut AsyncPgConnection,
    deployment: &DroneDeployment,
) -> Result<()> {
    diesel::insert_into(drone_deployments::table)
        .values((
            drone_deployments::id.eq(deployment.id.0),
            drone_deployments::owner.eq(deployment.owner.0),
            drone_deployments::data.eq(encode(deployment)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_deployment(
    conn: &mut AsyncPgConnection,
    id: DeploymentId,
) -> Result<Versioned<DroneDeployment>> {
    let row = drone_deployments::table
        .filter(drone_deployments::id.eq(id.0))
        .select((drone_deployments::data, drone_deployments::version))
        .first::<(serde_json::Value, i32)>(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("drone deployment"))?;
    Ok(Versioned {
        data: decode(row.0)?,
        version: row.1,
    })
}

pub async fn update_deployment(
    conn: &mut AsyncPgConnection,
    deployment: &DroneDeployment,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        drone_deployments::table
            .filter(drone_deployments::id.eq(deployment.id.0))
            .filter(drone_deployments::version.eq(expected_version)),
    )
    .set((
        drone_deployments::data.eq(encode(deployment)?),
        drone_deployments::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("deployment modified concurrently"));
    }
    Ok(())
}

pub async fn delete_deployment(conn: &mut AsyncPgConnection, id: DeploymentId) -> Result<()> {
    let deleted =
        diesel::delete(drone_deployments::table.filter(drone_deployments::id.eq(id.0)))
            .execute(conn)
            .await?;
    if deleted == 0 {
        return Err(Error::NotFound("drone deployment"));
    }
    Ok(())
}

pub async fn list_deployments_of_owner(
    conn: &mut AsyncPgConnection,
    owner: PlayerId,
) -> Result<Vec<DroneDeployment>> {
    let rows: Vec<(serde_json::Value, i32)> = drone_deployments::table
        .filter(drone_deployments::owner.eq(owner.0))
        .select((drone_deployments::data, drone_deployments::version))
        .load(conn)
        .await?;
    rows.into_iter().map(|(data, _)| decode(data)).collect()
}

// ---- combats ----

pub async fn insert_combat(conn: &mut AsyncPgConnection, combat: &Combat) -> Result<()> {
    diesel::insert_into(combats::table)
        .values((
            combats::id.eq(combat.id.0),
            combats::sector_index.eq(combat.sector.0),
            combats::state.eq(combat_state_str(combat.state)),
            combats::data.eq(encode(combat)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

fn combat_state_str(state: CombatState) -> &'static str {
    match state {
        CombatState::Engaging => "engaging",
        CombatState::Resolving => "resolving",
        CombatState::Victory => "victory",
        CombatState::Defeat => "defeat",
        CombatState::Draw => "draw",
        CombatState::Retreat => "retreat",
    }
}

pub async fn get_combat(conn: &mut AsyncPgConnection, id: CombatId) -> Result<Versioned<Combat>> {
    let row: CombatRow = combats::table
        .filter(combats::id.eq(id.0))
        .select(CombatRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("combat"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_combat(
    conn: &mut AsyncPgConnection,
    combat: &Combat,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        combats::table
            .filter(combats::id.eq(combat.id.0))
            .filter(combats::version.eq(expected_version)),
    )
    .set((
        combats::state.eq(combat_state_str(combat.state)),
        combats::data.eq(encode(combat)?),
        combats::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("combat modified concurrently"));
    }
    Ok(())
}

pub async fn list_active_combats(conn: &mut AsyncPgConnection) -> Result<Vec<Versioned<Combat>>> {
    let rows: Vec<CombatRow> = combats::table
        .filter(combats::state.eq_any(["engaging", "resolving"]))
        .select(CombatRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|r| {
            Ok(Versioned {
                data: decode(r.data)?,
                version: r.version,
            })
        })
        .collect()
}

// ---- messages ----

pub async fn insert_message(
    conn: &mut AsyncPgConnection,
    message: &Message,
    recipients: &[PlayerId],
) -> Result<()> {
    diesel::insert_into(messages::table)
        .values((
            messages::id.eq(message.id.0),
            messages::author.eq(message.author.0),
            messages::data.eq(encode(message)?),
        ))
        .execute(conn)
        .await?;
    let receipt_rows: Vec<_> = recipients
        .iter()
        .map(|r| {
            (
                message_recipients::message_id.eq(message.id.0),
                message_recipients::recipient.eq(r.0),
            )
        })
        .collect();
    if !receipt_rows.is_empty() {
        diesel::insert_into(message_recipients::table)
            .values(receipt_rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub async fn get_message(conn: &mut AsyncPgConnection, id: MessageId) -> Result<Message> {
    let row = messages::table
        .filter(messages::id.eq(id.0))
        .select(messages::data)
        .first::<serde_json::Value>(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("message"))?;
    decode(row)
}

pub async fn inbox_page(
    conn: &mut AsyncPgConnection,
    recipient: PlayerId,
    page: i64,
    per_page: i64,
) -> Result<(Vec<(Message, MessageReceipt)>, i64)> {
    let total: i64 = message_recipients::table
        .filter(message_recipients::recipient.eq(recipient.0))
        .filter(message_recipients::deleted.eq(false))
        .count()
        .get_result(conn)
        .await?;
    let rows: Vec<(MessageReceiptRow, serde_json::Value)> = message_recipients::table
        .inner_join(messages::table.on(messages::id.eq(message_recipients::message_id)))
        .filter(message_recipients::recipient.eq(recipient.0))
        .filter(message_recipients::deleted.eq(false))
        .order(messages::created_at.desc())
        .offset((page - 1).max(0) * per_page)
        .limit(per_page)
        .select((MessageReceiptRow::as_select(), messages::data))
        .load(conn)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for (receipt, data) in rows {
        out.push((
            decode(data)?,
            MessageReceipt {
                message: MessageId(receipt.message_id),
                recipient: PlayerId(receipt.recipient),
                read_at: receipt.read_at,
                confirmed_at: receipt.confirmed_at,
                deleted: receipt.deleted,
            },
        ));
    }
    Ok((out, total))
}

pub async fn mark_message_read(
    conn: &mut AsyncPgConnection,
    message: MessageId,
    recipient: PlayerId,
    now: DateTime<Utc>,
) -> Result<()> {
    let updated = diesel::update(
        message_recipients::table
            .filter(message_recipients::message_id.eq(message.0))
            .filter(message_recipients::recipient.eq(recipient.0))
            .filter(message_recipients::read_at.is_null()),
    )
    .set(message_recipients::read_at.eq(now))
    .execute(conn)
    .await?;
    // Re-reading is a no-op, a missing receipt is not.
    if updated == 0 {
        let exists: i64 = message_recipients::table
            .filter(message_recipients::message_id.eq(message.0))
            .filter(message_recipients::recipient.eq(recipient.0))
            .count()
            .get_result(conn)
            .await?;
        if exists == 0 {
            return Err(Error::NotFound("message"));
        }
    }
    Ok(())
}

pub async fn delete_message_for(
    conn: &mut AsyncPgConnection,
    message: MessageId,
    recipient: PlayerId,
) -> Result<()> {
    let updated = diesel::update(
        message_recipients::table
            .filter(message_recipients::message_id.eq(message.0))
            .filter(message_recipients::recipient.eq(recipient.0)),
    )
    .set(message_recipients::deleted.eq(true))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::NotFound("message"));
    }
    Ok(())
}

// ---- teams ----

pub async fn insert_team(conn: &mut AsyncPgConnection, team: &Team) -> Result<()> {
    let inserted = diesel::insert_into(teams::table)
        .values((
            teams::id.eq(team.id.0),
            teams::name.eq(&team.name),
            teams::data.eq(encode(team)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("team name taken"));
    }
    Ok(())
}

pub async fn get_team(conn: &mut AsyncPgConnection, id: TeamId) -> Result<Versioned<Team>> {
    let row: TeamRow = teams::table
        .filter(teams::id.eq(id.0))
        .select(TeamRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("team"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_team(
    conn: &mut AsyncPgConnection,
    team: &Team,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        teams::table
            .filter(teams::id.eq(team.id.0))
            .filter(teams::version.eq(expected_version)),
    )
    .set((
        teams::data.eq(encode(team)?),
        teams::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("team modified concurrently"));
    }
    Ok(())
}

pub async fn list_teams(conn: &mut AsyncPgConnection) -> Result<Vec<Team>> {
    let rows: Vec<TeamRow> = teams::table
        .order(teams::name.asc())
        .select(TeamRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- contracts ----

fn contract_status_str(status: crate::models::ContractStatus) -> &'static str {
    use crate::models::ContractStatus::*;
    match status {
        Open => "open",
        Accepted => "accepted",
        Fulfilled => "fulfilled",
        Cancelled => "cancelled",
    }
}

pub async fn insert_contract(conn: &mut AsyncPgConnection, contract: &Contract) -> Result<()> {
    diesel::insert_into(contracts::table)
        .values((
            contracts::id.eq(contract.id.0),
            contracts::poster.eq(contract.poster.0),
            contracts::assignee.eq(contract.assignee.map(|a| a.0)),
            contracts::commodity.eq(&contract.commodity),
            contracts::units.eq(contract.units),
            contracts::station.eq(contract.station.0),
            contracts::reward.eq(contract.reward),
            contracts::status.eq(contract_status_str(contract.status)),
            contracts::data.eq(encode(contract)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_contract(
    conn: &mut AsyncPgConnection,
    id: ContractId,
) -> Result<Versioned<Contract>> {
    let row: (serde_json::Value, i32) = contracts::table
        .filter(contracts::id.eq(id.0))
        .select((contracts::data, contracts::version))
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("contract"))?;
    Ok(Versioned {
        data: decode(row.0)?,
        version: row.1,
    })
}

pub async fn update_contract(
    conn: &mut AsyncPgConnection,
    contract: &Contract,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        contracts::table
            .filter(contracts::id.eq(contract.id.0))
            .filter(contracts::version.eq(expected_version)),
    )
    .set((
        contracts::assignee.eq(contract.assignee.map(|a| a.0)),
        contracts::status.eq(contract_status_str(contract.status)),
        contracts::data.eq(encode(contract)?),
        contracts::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("contract modified concurrently"));
    }
    Ok(())
}

pub async fn list_open_contracts(conn: &mut AsyncPgConnection) -> Result<Vec<Contract>> {
    let rows: Vec<serde_json::Value> = contracts::table
        .filter(contracts::status.eq_any(["open", "accepted"]))
        .order(contracts::created_at.desc())
        .limit(100)
        .select(contracts::data)
        .load(conn)
        .await?;
    rows.into_iter().map(decode).collect()
}

// ---- governance ----

pub async fn insert_policy(conn: &mut AsyncPgConnection, policy: &Policy) -> Result<()> {
    diesel::insert_into(policies::table)
        .values((
            policies::id.eq(policy.id.0),
            policies::status.eq("voting"),
            policies::closes_at.eq(policy.voting_closes_at),
            policies::data.eq(encode(policy)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_policy(conn: &mut AsyncPgConnection, id: PolicyId) -> Result<Versioned<Policy>> {
    let row: PolicyRow = policies::table
        .filter(policies::id.eq(id.0))
        .select(PolicyRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("policy"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_policy(
    conn: &mut AsyncPgConnection,
    policy: &Policy,
    expected_version: i32,
) -> Result<()> {
    let status = match policy.status {
        crate::models::PolicyStatus::Voting => "voting",
        crate::models::PolicyStatus::Passed => "passed",
        crate::models::PolicyStatus::Rejected => "rejected",
        crate::models::PolicyStatus::Withdrawn => "withdrawn",
    };
    let updated = diesel::update(
        policies::table
            .filter(policies::id.eq(policy.id.0))
            .filter(policies::version.eq(expected_version)),
    )
    .set((
        policies::status.eq(status),
        policies::data.eq(encode(policy)?),
        policies::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("policy modified concurrently"));
    }
    Ok(())
}

pub async fn list_due_policies(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
) -> Result<Vec<Versioned<Policy>>> {
    let rows: Vec<PolicyRow> = policies::table
        .filter(policies::status.eq("voting"))
        .filter(policies::closes_at.le(now))
        .select(PolicyRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|r| {
            Ok(Versioned {
                data: decode(r.data)?,
                version: r.version,
            })
        })
        .collect()
}

/// One policy ballot per (policy, voter); re-votes conflict, retraction is
/// its own mutation.
pub async fn insert_policy_vote(
    conn: &mut AsyncPgConnection,
    policy: PolicyId,
    voter: PlayerId,
    in_favor: bool,
    weight: f64,
) -> Result<()> {
    let inserted = diesel::insert_into(policy_votes::table)
        .values((
            policy_votes::policy_id.eq(policy.0),
            policy_votes::voter.eq(voter.0),
            policy_votes::in_favor.eq(in_favor),
            policy_votes::weight.eq(weight),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("already voted on this policy"));
    }
    Ok(())
}

pub async fn retract_policy_vote(
    conn: &mut AsyncPgConnection,
    policy: PolicyId,
    voter: PlayerId,
) -> Result<()> {
    let deleted = diesel::delete(
        policy_votes::table
            .filter(policy_votes::policy_id.eq(policy.0))
            .filter(policy_votes::voter.eq(voter.0)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(Error::NotFound("policy vote"));
    }
    Ok(())
}

pub async fn policy_vote_totals(
    conn: &mut AsyncPgConnection,
    policy: PolicyId,
) -> Result<(f64, f64)> {
    let rows: Vec<(bool, f64)> = policy_votes::table
        .filter(policy_votes::policy_id.eq(policy.0))
        .select((policy_votes::in_favor, policy_votes::weight))
        .load(conn)
        .await?;
    let mut votes_for = 0.0;
    let mut votes_against = 0.0;
    for (in_favor, weight) in rows {
        if in_favor {
            votes_for += weight;
        } else {
            votes_against += weight;
        }
    }
    Ok((votes_for, votes_against))
}

pub async fn insert_election(conn: &mut AsyncPgConnection, election: &Election) -> Result<()> {
    diesel::insert_into(elections::table)
        .values((
            elections::id.eq(election.id.0),
            elections::status.eq("open"),
            elections::closes_at.eq(election.voting_closes_at),
            elections::data.eq(encode(election)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_election(
    conn: &mut AsyncPgConnection,
    id: ElectionId,
) -> Result<Versioned<Election>> {
    let row: ElectionRow = elections::table
        .filter(elections::id.eq(id.0))
        .select(ElectionRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("election"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_election(
    conn: &mut AsyncPgConnection,
    election: &Election,
    expected_version: i32,
) -> Result<()> {
    let status = match election.status {
        crate::models::ElectionStatus::Open => "open",
        crate::models::ElectionStatus::Closed => "closed",
        crate::models::ElectionStatus::Cancelled => "cancelled",
    };
    let updated = diesel::update(
        elections::table
            .filter(elections::id.eq(election.id.0))
            .filter(elections::version.eq(expected_version)),
    )
    .set((
        elections::status.eq(status),
        elections::data.eq(encode(election)?),
        elections::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("election modified concurrently"));
    }
    Ok(())
}

pub async fn list_elections(conn: &mut AsyncPgConnection) -> Result<Vec<Election>> {
    let rows: Vec<ElectionRow> = elections::table
        .order(elections::closes_at.desc())
        .limit(50)
        .select(ElectionRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

pub async fn list_due_elections(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
) -> Result<Vec<Versioned<Election>>> {
    let rows: Vec<ElectionRow> = elections::table
        .filter(elections::status.eq("open"))
        .filter(elections::closes_at.le(now))
        .select(ElectionRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter()
        .map(|r| {
            Ok(Versioned {
                data: decode(r.data)?,
                version: r.version,
            })
        })
        .collect()
}

/// Ballot insert; the composite primary key enforces one vote per
/// (election, voter).
pub async fn insert_ballot(conn: &mut AsyncPgConnection, ballot: &Ballot) -> Result<()> {
    let inserted = diesel::insert_into(votes::table)
        .values((
            votes::election_id.eq(ballot.election.0),
            votes::voter.eq(ballot.voter.0),
            votes::data.eq(encode(ballot)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("already voted in this election"));
    }
    Ok(())
}

pub async fn retract_ballot(
    conn: &mut AsyncPgConnection,
    election: ElectionId,
    voter: PlayerId,
) -> Result<()> {
    let deleted = diesel::delete(
        votes::table
            .filter(votes::election_id.eq(election.0))
            .filter(votes::voter.eq(voter.0)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(Error::NotFound("ballot"));
    }
    Ok(())
}

pub async fn list_ballots(
    conn: &mut AsyncPgConnection,
    election: ElectionId,
) -> Result<Vec<Ballot>> {
    let rows: Vec<serde_json::Value> = votes::table
        .filter(votes::election_id.eq(election.0))
        .select(votes::data)
        .load(conn)
        .await?;
    rows.into_iter().map(decode).collect()
}

// ---- first login sessions ----

pub async fn get_active_first_login(
    conn: &mut AsyncPgConnection,
    player: PlayerId,
) -> Result<Option<Versioned<FirstLoginSession>>> {
    let row: Option<(serde_json::Value, i32)> = first_login_sessions::table
        .filter(first_login_sessions::player.eq(player.0))
        .filter(first_login_sessions::state.ne_all(["success", "caught", "suspicious", "abandoned"]))
        .select((first_login_sessions::data, first_login_sessions::version))
        .first(conn)
        .await
        .optional()?;
    match row {
        Some((data, version)) => Ok(Some(Versioned {
            data: decode(data)?,
            version,
        })),
        None => Ok(None),
    }
}

pub async fn insert_first_login(
    conn: &mut AsyncPgConnection,
    session: &FirstLoginSession,
) -> Result<()> {
    // The partial unique index on player enforces at most one active
    // session; a second insert surfaces as a conflict.
    diesel::insert_into(first_login_sessions::table)
        .values((
            first_login_sessions::id.eq(session.id.0),
            first_login_sessions::player.eq(session.player.0),
            first_login_sessions::state.eq(first_login_state_str(session)),
            first_login_sessions::data.eq(encode(session)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

fn first_login_state_str(session: &FirstLoginSession) -> &'static str {
    use crate::models::FirstLoginState::*;
    match session.state {
        Greeting => "greeting",
        ShipClaim => "ship-claim",
        Questioning => "questioning",
        Success => "success",
        Caught => "caught",
        Suspicious => "suspicious",
        Abandoned => "abandoned",
    }
}

pub async fn update_first_login(
    conn: &mut AsyncPgConnection,
    session: &FirstLoginSession,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        first_login_sessions::table
            .filter(first_login_sessions::id.eq(session.id.0))
            .filter(first_login_sessions::version.eq(expected_version)),
    )
    .set((
        first_login_sessions::state.eq(first_login_state_str(session)),
        first_login_sessions::data.eq(encode(session)?),
        first_login_sessions::version.eq(expected_version + 1),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("session modified concurrently"));
    }
    Ok(())
}

pub async fn get_first_login(
    conn: &mut AsyncPgConnection,
    id: SessionId,
) -> Result<Versioned<FirstLoginSession>> {
    let row: (serde_json::Value, i32) = first_login_sessions::table
        .filter(first_login_sessions::id.eq(id.0))
        .select((first_login_sessions::data, first_login_sessions::version))
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("first login session"))?;
    Ok(Versioned {
        data: decode(row.0)?,
        version: row.1,
    })
}

// ---- scheduler lease ----

/// Grab or renew the shard's scheduler lease. Returns true when this
/// holder owns the lease afterwards.
pub async fn acquire_lease(
    conn: &mut AsyncPgConnection,
    name: &str,
    holder: &str,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let expires = now + chrono::Duration::seconds(ttl_secs);
    let rows = diesel::sql_query(
        "INSERT INTO scheduler_lease (name, holder, expires_at) VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE SET holder = $2, expires_at = $3
         WHERE scheduler_lease.holder = $2 OR scheduler_lease.expires_at < $4",
    )
    .bind::<diesel::sql_types::Text, _>(name)
    .bind::<diesel::sql_types::Text, _>(holder)
    .bind::<diesel::sql_types::Timestamptz, _>(expires)
    .bind::<diesel::sql_types::Timestamptz, _>(now)
    .execute(conn)
    .await?;
    Ok(rows == 1)
}
