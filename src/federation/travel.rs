//! Inter-region travel: reserve in the source shard, record in the
//! global shard, materialize in the destination shard, compensate on
//! failure. The travel id keys the whole protocol; replaying a request
//! observes the existing record.
//!
//! The manifest is conserved end to end: listed ships flip to reserved in
//! the source shard and re-appear in the destination, the declared cargo
//! must sit in those ships' holds at both reservation and
//! materialization, and the manifest credits are escrowed out of the
//! wallet at reservation and released back on arrival. Only the travel
//! fee burns.

use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::AsyncConnection as _;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::database::{global, regional, retry_conflict, DbClient};
use crate::error::{Error, Result};
use crate::fabric::EventFabric;
use crate::models::{
    AssetManifest, DomainEvent, Membership, MembershipType, PlayerId, RegionName, SectorIndex,
    Ship, Travel, TravelId, TravelMethod, TravelState,
};

use super::diplomacy;

pub struct TravelCommand {
    /// Client-supplied idempotency key.
    pub id: TravelId,
    pub destination: RegionName,
    pub method: TravelMethod,
    pub manifest: AssetManifest,
}

/// Arrivals land at the destination's first sector.
const ARRIVAL_SECTOR: SectorIndex = SectorIndex(1);

fn cargo_holdings(ships: &[Ship]) -> BTreeMap<String, i64> {
    let mut holdings = BTreeMap::new();
    for ship in ships {
        for (commodity, units) in &ship.cargo {
            *holdings.entry(commodity.clone()).or_insert(0) += units;
        }
    }
    holdings
}

/// The declared cargo must be aboard the listed ships; anything short
/// fails the command before assets move.
fn verify_manifest_cargo(ships: &[Ship], manifest: &AssetManifest) -> Result<()> {
    let holdings = cargo_holdings(ships);
    for (commodity, declared) in &manifest.cargo {
        let held = holdings.get(commodity).copied().unwrap_or(0);
        if held < *declared {
            return Err(Error::validation(
                "cargo",
                &format!("manifest lists {} {} but ships hold {}", declared, commodity, held),
            ));
        }
    }
    Ok(())
}

pub async fn initiate_travel(
    db: &DbClient,
    fabric: &EventFabric,
    player_id: PlayerId,
    command: TravelCommand,
) -> Result<Travel> {
    command.manifest.validate()?;

    // Idempotent replay: observe the existing record.
    {
        let mut conn = db.conn().await?;
        if let Some(existing) = global::get_travel(&mut conn, command.id).await? {
            return Ok(existing);
        }
    }

    let player = {
        let mut conn = db.conn().await?;
        global::get_player(&mut conn, player_id).await?.data
    };
    let source = player.current_region.clone();
    if source == command.destination {
        return Err(Error::validation(
            "destination",
            "already in this region",
        ));
    }

    let destination_region = {
        let mut conn = db.conn().await?;
        global::get_region(&mut conn, &command.destination).await?.data
    };
    if !destination_region.accepts_travel() {
        return Err(Error::validation("destination", "region not accepting travel"));
    }
    // any player with an active membership in the source region may leave
    let membership = {
        let mut conn = db.conn().await?;
        global::get_membership(&mut conn, player_id, &source).await?
    };
    if membership.is_none() {
        return Err(Error::validation("source", "no membership in source region"));
    }

    let treaty_factor = diplomacy::travel_cost_factor(db, &source, &command.destination).await?;
    let cost = ((command.method.base_cost() as f64) * treaty_factor).round() as i64;
    let escrow = command.manifest.credits;
    if player.credits < cost + escrow {
        return Err(Error::InsufficientCredits {
            required: cost + escrow,
            available: player.credits,
        });
    }

    // Ships must belong to the traveller, sit in the source shard, and
    // hold the declared cargo.
    {
        let mut conn = db.region_conn(&source).await?;
        let mut ships = Vec::with_capacity(command.manifest.ships.len());
        for ship_id in &command.manifest.ships {
            let ship = regional::get_ship(&mut conn, *ship_id).await?;
            if ship.data.pilot != player_id {
                return Err(Error::validation("ships", "not the pilot of a listed ship"));
            }
            ships.push(ship.data);
        }
        verify_manifest_cargo(&ships, &command.manifest)?;
    }

    let now = Utc::now();
    let mut travel = Travel {
        id: command.id,
        player: player_id,
        source: source.clone(),
        destination: command.destination.clone(),
        method: command.method,
        cost,
        manifest: command.manifest,
        state: TravelState::InTransit,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    };

    // Step 1: reserve assets in the source shard.
    {
        let mut conn = db.region_conn(&source).await?;
        regional::reserve_ships(&mut conn, &travel.manifest.ships).await?;
    }

    // Step 1b: escrow the fee and the manifest credits out of the wallet;
    // the escrow releases at the destination, the fee burns here.
    let escrowed = retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let mut stored = global::get_player(&mut conn, player_id).await?;
        stored.data.debit_credits(cost + escrow)?;
        global::update_player(&mut conn, &stored.data, stored.version).await?;
        Ok(())
    })
    .await;
    if let Err(e) = escrowed {
        let mut src = db.region_conn(&source).await?;
        regional::release_ships(&mut src, &travel.manifest.ships).await?;
        return Err(e);
    }

    // Step 2: global record, in-transit. A concurrent duplicate loses the
    // insert race, hands everything back, and observes the winner.
    {
        let mut conn = db.conn().await?;
        if !global::insert_travel(&mut conn, &travel).await? {
            refund_escrow(db, &travel).await?;
            let mut src = db.region_conn(&source).await?;
            regional::release_ships(&mut src, &travel.manifest.ships).await?;
            return global::get_travel(&mut conn, travel.id)
                .await?
                .ok_or(Error::Unavailable("travel record vanished".into()));
        }
    }
    fabric
        .publish(&DomainEvent::TravelReserved {
            travel: travel.id,
            player: player_id,
        })
        .await
        .ok();

    // Step 3: materialize in the destination shard; compensate on any
    // failure.
    match materialize(db, &mut travel).await {
        Ok(()) => {
            fabric
                .publish(&DomainEvent::TravelCompleted {
                    travel: travel.id,
                    player: player_id,
                    source: travel.source.clone(),
                    destination: travel.destination.clone(),
                })
                .await
                .ok();
            info!("travel {} completed", travel.id);
            Ok(travel)
        }
        Err(e) => {
            warn!("travel {} failed: {}", travel.id, e);
            compensate(db, &mut travel, &e.to_string()).await?;
            fabric
                .publish(&DomainEvent::TravelFailed {
                    travel: travel.id,
                    player: player_id,
                })
                .await
                .ok();
            Err(Error::Unavailable(format!(
                "travel {} failed and was compensated",
                travel.id
            )))
        }
    }
}

async fn materialize(db: &DbClient, travel: &mut Travel) -> Result<()> {
    let destination = travel.destination.clone();
    let source = travel.source.clone();

    // Move the ships: insert into destination, then drop from source.
    // Re-running after a crash re-inserts idempotently (insert is
    // on-conflict-do-nothing keyed by ship id). The declared cargo must
    // still be aboard; a shortfall aborts into compensation.
    let ships = {
        let mut src = db.region_conn(&source).await?;
        let mut ships = Vec::new();
        for ship_id in &travel.manifest.ships {
            ships.push(regional::get_ship(&mut src, *ship_id).await?.data);
        }
        ships
    };
    verify_manifest_cargo(&ships, &travel.manifest)?;
    {
        let mut dst = db.region_conn(&destination).await?;
        for mut ship in ships {
            ship.sector = ARRIVAL_SECTOR;
            regional::insert_ship(&mut dst, &ship).await?;
            regional::release_ships(&mut dst, &[ship.id]).await?;
        }
    }
    {
        let mut src = db.region_conn(&source).await?;
        regional::delete_ships(&mut src, &travel.manifest.ships).await?;
    }

    // Destination membership: first visit creates a visitor row.
    let now = Utc::now();
    {
        let mut conn = db.conn().await?;
        match global::get_membership(&mut conn, travel.player, &destination).await? {
            Some(mut existing) => {
                existing.data.visit_count += 1;
                existing.data.last_visit = now;
                global::update_membership(&mut conn, &existing.data, existing.version).await?;
            }
            None => {
                global::insert_membership(
                    &mut conn,
                    &Membership {
                        player_id: travel.player,
                        region: destination.clone(),
                        membership_type: MembershipType::Visitor,
                        reputation: 0,
                        voting_weight: 0.0,
                        visit_count: 1,
                        last_visit: now,
                        created_at: now,
                        updated_at: now,
                    },
                )
                .await?;
            }
        }
    }

    // Move the persona, release the escrow, and close the record in one
    // global transaction: region, sector, the manifest credits back into
    // the wallet (the fee stays burned), and the completed state. The
    // single commit keeps compensation from ever refunding a released
    // escrow.
    travel.complete(now)?;
    let travel = &*travel;
    retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let destination = destination.clone();
        conn.transaction::<(), Error, _>(|conn| {
            async move {
                let mut stored = global::get_player(conn, travel.player).await?;
                stored.data.current_region = destination;
                stored.data.current_sector = ARRIVAL_SECTOR;
                stored.data.credit_credits(travel.manifest.credits);
                global::update_player(conn, &stored.data, stored.version).await?;
                global::update_travel(conn, travel).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    })
    .await?;
    Ok(())
}

/// Return the escrowed manifest credits and the fee to the wallet.
async fn refund_escrow(db: &DbClient, travel: &Travel) -> Result<()> {
    let amount = travel.cost + travel.manifest.credits;
    if amount == 0 {
        return Ok(());
    }
    retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let mut stored = global::get_player(&mut conn, travel.player).await?;
        stored.data.credit_credits(amount);
        global::update_player(&mut conn, &stored.data, stored.version).await?;
        Ok(())
    })
    .await
}

/// Release the reservation in the source shard, refund the escrow, and
/// mark the travel failed. Keyed by travel id; the refund rides the same
/// global transaction as the state flip so a repeat cannot pay twice.
pub async fn compensate(db: &DbClient, travel: &mut Travel, reason: &str) -> Result<()> {
    {
        let mut src = db.region_conn(&travel.source).await?;
        regional::release_ships(&mut src, &travel.manifest.ships).await?;
    }
    if travel.state == TravelState::InTransit {
        travel.fail(reason, Utc::now())?;
        let mut conn = db.conn().await?;
        let travel = &*travel;
        conn.transaction::<(), Error, _>(|conn| {
            async move {
                global::update_travel(conn, travel).await?;
                let mut stored = global::get_player(conn, travel.player).await?;
                stored
                    .data
                    .credit_credits(travel.cost + travel.manifest.credits);
                global::update_player(conn, &stored.data, stored.version).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
    }
    Ok(())
}

/// Scheduler hook: fail and compensate travels stuck in transit.
pub async fn timeout_stale_travels(db: &DbClient, fabric: &EventFabric) -> Result<usize> {
    let stale = {
        let mut conn = db.conn().await?;
        global::list_stale_travels(&mut conn, Utc::now() - chrono::Duration::minutes(15)).await?
    };
    let count = stale.len();
    for mut travel in stale {
        warn!("timing out stale travel {}", travel.id);
        compensate(db, &mut travel, "travel timed out").await?;
        fabric
            .publish(&DomainEvent::TravelFailed {
                travel: travel.id,
                player: travel.player,
            })
            .await
            .ok();
    }
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{HullClass, InsuranceTier, ShipId};

    fn ship_with(cargo: &[(&str, i64)]) -> Ship {
        Ship {
            id: ShipId::new(),
            name: "S".to_string(),
            pilot: PlayerId::new(),
            shared_with_team: None,
            hull_class: HullClass::Freighter,
            sector: SectorIndex(1),
            condition: 1.0,
            shield: 0,
            max_shield: 0,
            fuel: 10,
            max_fuel: 10,
            cargo_capacity: 1000,
            cargo: cargo.iter().map(|(c, u)| (c.to_string(), *u)).collect(),
            insurance: InsuranceTier::None,
            modification_slots: 0,
            modifications: vec![],
            maintenance_debt: 0,
        }
    }

    fn manifest(ships: &[&Ship], credits: i64, cargo: &[(&str, i64)]) -> AssetManifest {
        AssetManifest {
            ships: ships.iter().map(|s| s.id).collect(),
            credits,
            cargo: cargo.iter().map(|(c, u)| (c.to_string(), *u)).collect(),
        }
    }

    #[test]
    fn test_manifest_cargo_covered_across_ships() {
        let a = ship_with(&[("ore", 30), ("fuel", 5)]);
        let b = ship_with(&[("ore", 20)]);
        let ok = manifest(&[&a, &b], 0, &[("ore", 50), ("fuel", 5)]);
        verify_manifest_cargo(&[a.clone(), b.clone()], &ok).unwrap();
    }

    #[test]
    fn test_manifest_cargo_shortfall_rejected() {
        let a = ship_with(&[("ore", 30)]);
        let short = manifest(&[&a], 0, &[("ore", 31)]);
        let err = verify_manifest_cargo(&[a.clone()], &short).unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
        let missing = manifest(&[&a], 0, &[("medicine", 1)]);
        assert!(verify_manifest_cargo(&[a], &missing).is_err());
    }

    #[test]
    fn test_empty_manifest_cargo_always_covered() {
        let a = ship_with(&[]);
        let empty = manifest(&[&a], 100, &[]);
        verify_manifest_cargo(&[a], &empty).unwrap();
    }
}
