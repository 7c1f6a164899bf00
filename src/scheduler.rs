//! Per-region scheduled jobs: colony ticks, policy and election tallies,
//! travel timeouts, evacuation closure. One scheduler task per region
//! shard, gated by a lease in that shard's database so exactly one
//! process runs the jobs even when several instances are up.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::{global, regional, retry_conflict, DbClient};
use crate::error::Result;
use crate::fabric::EventFabric;
use crate::federation;
use crate::models::{DomainEvent, RegionName, RegionStatus};

const LEASE_NAME: &str = "region-scheduler";
const LEASE_TTL_SECS: i64 = 60;
const TICK_INTERVAL: Duration = Duration::from_secs(20);

/// One simulated hour per colony tick, indexed from the epoch so ticks
/// are idempotent across restarts and lease handovers.
fn current_tick() -> i64 {
    Utc::now().timestamp() / 3600
}

pub fn spawn(db: DbClient, fabric: EventFabric) {
    tokio::spawn(async move {
        let holder = format!("scheduler-{}", uuid::Uuid::new_v4());
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_all_regions(&db, &fabric, &holder).await {
                warn!("scheduler pass failed: {}", e);
            }
        }
    });
}

async fn run_all_regions(db: &DbClient, fabric: &EventFabric, holder: &str) -> Result<()> {
    let regions = {
        let mut conn = db.conn().await?;
        global::list_regions(&mut conn, None).await?
    };
    for region in regions {
        match region.status {
            RegionStatus::Active => {
                if let Err(e) = run_region(db, fabric, &region.name, holder).await {
                    warn!("scheduler for {} failed: {}", region.name, e);
                }
            }
            RegionStatus::Terminated => {
                federation::archive_if_window_closed(db, &region.name).await?;
            }
            _ => {}
        }
    }
    federation::travel::timeout_stale_travels(db, fabric).await?;
    // webhook dedup window: one week
    {
        let mut conn = db.conn().await?;
        global::prune_deliveries(&mut conn, Utc::now() - chrono::Duration::days(7)).await?;
    }
    Ok(())
}

async fn run_region(
    db: &DbClient,
    fabric: &EventFabric,
    region: &RegionName,
    holder: &str,
) -> Result<()> {
    if !db.has_region_shard(region) {
        db.open_region_shard(region).await?;
    }
    let now = Utc::now();
    {
        let mut conn = db.region_conn(region).await?;
        if !regional::acquire_lease(&mut conn, LEASE_NAME, holder, LEASE_TTL_SECS, now).await? {
            debug!("lease for {} held elsewhere", region);
            return Ok(());
        }
    }

    colony_ticks(db, fabric, region).await?;
    tally_policies(db, fabric, region).await?;
    close_elections(db, fabric, region).await?;
    Ok(())
}

async fn colony_ticks(db: &DbClient, fabric: &EventFabric, region: &RegionName) -> Result<()> {
    let tick = current_tick();
    let planets = {
        let mut conn = db.region_conn(region).await?;
        regional::list_all_planets(&mut conn).await?
    };
    let mut advanced = 0u32;
    for mut planet in planets {
        if planet.data.last_tick >= tick {
            continue;
        }
        let outcome = crate::engine::colony::advance(&mut planet.data, tick);
        if outcome.applied {
            let mut conn = db.region_conn(region).await?;
            match regional::update_planet(&mut conn, &planet.data, planet.version).await {
                Ok(()) => advanced += 1,
                // another instance won the race for this planet; its tick
                // already applied
                Err(e) if e.is_retryable_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }
    if advanced > 0 {
        info!("region {} advanced {} colonies to tick {}", region, advanced, tick);
        fabric
            .publish(&DomainEvent::ColonyTick {
                region: region.clone(),
                planet_count: advanced,
                tick,
            })
            .await
            .ok();
    }
    Ok(())
}

async fn tally_policies(db: &DbClient, fabric: &EventFabric, region: &RegionName) -> Result<()> {
    let threshold = {
        let mut conn = db.conn().await?;
        global::get_region(&mut conn, region).await?.data.config.voting_threshold
    };
    let due = {
        let mut conn = db.region_conn(region).await?;
        regional::list_due_policies(&mut conn, Utc::now()).await?
    };
    for policy in due {
        let id = policy.data.id;
        let passed = retry_conflict(|| async {
            let mut conn = db.region_conn(region).await?;
            let mut stored = regional::get_policy(&mut conn, id).await?;
            let (votes_for, votes_against) = regional::policy_vote_totals(&mut conn, id).await?;
            stored.data.votes_for = votes_for;
            stored.data.votes_against = votes_against;
            let status = stored.data.tally(threshold, Utc::now())?;
            regional::update_policy(&mut conn, &stored.data, stored.version).await?;
            Ok(status == crate::models::PolicyStatus::Passed)
        })
        .await?;
        if passed {
            let mut conn = db.conn().await?;
            global::insert_audit(
                &mut conn,
                None,
                "governance.policy_passed",
                serde_json::json!({ "policy": id.to_string(), "region": region.to_string() }),
                None,
            )
            .await?;
            drop(conn);
            fabric
                .publish(&DomainEvent::PolicyPassed {
                    policy: id,
                    region: region.clone(),
                })
                .await?;
        }
    }
    Ok(())
}

async fn close_elections(db: &DbClient, fabric: &EventFabric, region: &RegionName) -> Result<()> {
    let due = {
        let mut conn = db.region_conn(region).await?;
        regional::list_due_elections(&mut conn, Utc::now()).await?
    };
    for election in due {
        let id = election.data.id;
        let winner = retry_conflict(|| async {
            let mut conn = db.region_conn(region).await?;
            let mut stored = regional::get_election(&mut conn, id).await?;
            let ballots = regional::list_ballots(&mut conn, id).await?;
            let winner = stored.data.close(&ballots, Utc::now())?;
            regional::update_election(&mut conn, &stored.data, stored.version).await?;
            Ok(winner)
        })
        .await?;
        info!("election {} closed, winner {:?}", id, winner);
        fabric
            .publish(&DomainEvent::ElectionClosed {
                election: id,
                region: region.clone(),
                winner,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tick_index_is_hourly() {
        let tick = current_tick();
        assert!(tick > 480_000); // sanity: decades of hours since epoch
        assert_eq!(Utc::now().timestamp() / 3600, tick);
    }
}
