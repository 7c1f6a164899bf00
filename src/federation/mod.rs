//! Regional federation: the Central Nexus hub, member-region lifecycle,
//! inter-region travel, and diplomacy.

pub mod diplomacy;
pub mod nexus;
pub mod travel;

use chrono::Utc;
use rand::Rng as _;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::config::{GatePolicy, CONFIG};
use crate::database::{global, regional, retry_conflict, DbClient};
use crate::engine::galaxy;
use crate::error::{Error, Result};
use crate::fabric::EventFabric;
use crate::models::{
    DomainEvent, Region, RegionConfig, RegionName, RegionStatus, SectorIndex,
};

/// Bootstrap the singleton hub region on first start; re-opens its shard
/// on every later start.
pub async fn ensure_nexus(db: &DbClient) -> Result<()> {
    let name = RegionName::nexus();
    db.open_region_shard(&name).await?;
    let existing = {
        let mut conn = db.conn().await?;
        global::list_regions(&mut conn, None)
            .await?
            .into_iter()
            .any(|r| r.name == name)
    };
    if existing {
        return Ok(());
    }
    let now = Utc::now();
    let seed = 2102;
    let region = Region {
        name: name.clone(),
        display_name: "Central Nexus".to_string(),
        owner: None,
        status: RegionStatus::Active,
        config: RegionConfig {
            sector_count: crate::models::SECTOR_COUNT_MAX,
            ..Default::default()
        },
        galaxy_seed: seed,
        nexus_gate_sector: None,
        evacuation_deadline: None,
        created_at: now,
        updated_at: now,
    };
    {
        let mut conn = db.conn().await?;
        global::insert_region(&mut conn, &region).await?;
    }
    let sectors = nexus::generate_nexus(seed);
    {
        let mut conn = db.region_conn(&name).await?;
        regional::insert_sectors(&mut conn, &sectors).await?;
    }
    info!("Central Nexus bootstrapped with {} sectors", sectors.len());
    Ok(())
}

/// Pick the new region's gate sector in the Nexus gateway plaza.
fn pick_gate_sector(region: &RegionName, policy: GatePolicy) -> SectorIndex {
    let (lo, hi) = nexus::gateway_plaza_range();
    match policy {
        GatePolicy::First => lo,
        GatePolicy::Safest => {
            // gateway plaza shares one security band; spread by name hash
            let hash = name_seed(region);
            SectorIndex(lo.0 + (hash % (hi.0 - lo.0 + 1) as u64) as i32)
        }
        GatePolicy::Random => {
            let mut rng = ChaCha8Rng::seed_from_u64(name_seed(region));
            SectorIndex(rng.random_range(lo.0..=hi.0))
        }
    }
}

fn name_seed(region: &RegionName) -> u64 {
    region
        .0
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
            (acc ^ b as u64).wrapping_mul(0x100_0000_01b3)
        })
}

/// provision: pending -> active. Creates the shard, runs migrations,
/// generates the galaxy, assigns the Nexus gate, registers globally.
/// Idempotent by region name.
pub async fn provision_region(
    db: &DbClient,
    fabric: &EventFabric,
    name: &RegionName,
    display_name: &str,
    owner: Option<crate::models::AccountId>,
    config: RegionConfig,
) -> Result<Region> {
    if name.is_nexus() {
        return Err(Error::validation("region", "the hub cannot be reprovisioned"));
    }
    config.validate()?;

    let existing = {
        let mut conn = db.conn().await?;
        match global::get_region(&mut conn, name).await {
            Ok(region) => Some(region.data),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        }
    };
    if let Some(region) = existing {
        // replayed provision observes the existing record
        return Ok(region);
    }

    let now = Utc::now();
    let seed = name_seed(name);
    let gate = pick_gate_sector(name, CONFIG.nexus_gate_sector_policy);
    let region = Region {
        name: name.clone(),
        display_name: display_name.to_string(),
        owner,
        status: RegionStatus::Pending,
        config: config.clone(),
        galaxy_seed: seed,
        nexus_gate_sector: Some(gate),
        evacuation_deadline: None,
        created_at: now,
        updated_at: now,
    };
    {
        let mut conn = db.conn().await?;
        global::insert_region(&mut conn, &region).await?;
    }

    db.open_region_shard(name).await?;
    let generated = galaxy::generate(seed, &config);
    {
        let mut conn = db.region_conn(name).await?;
        regional::insert_sectors(&mut conn, &generated.sectors).await?;
        for planet in &generated.planets {
            regional::insert_planet(&mut conn, planet).await?;
        }
        for station in &generated.stations {
            regional::insert_station(&mut conn, station).await?;
        }
    }

    let mut active = region;
    retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let mut stored = global::get_region(&mut conn, name).await?;
        stored.data.transition(RegionStatus::Active, Utc::now())?;
        global::update_region(&mut conn, &stored.data, stored.version).await?;
        Ok(())
    })
    .await?;
    active.status = RegionStatus::Active;

    {
        let mut conn = db.conn().await?;
        global::insert_audit(
            &mut conn,
            None,
            "region.provisioned",
            serde_json::json!({ "region": name.to_string(), "sectors": config.sector_count }),
            None,
        )
        .await?;
    }
    fabric
        .publish(&DomainEvent::RegionLifecycle {
            region: name.clone(),
            status: "active".to_string(),
        })
        .await
        .ok();
    info!("Region {} provisioned ({} sectors)", name, config.sector_count);
    Ok(active)
}

/// suspend: active -> suspended. Entry and new travel are blocked; reads
/// continue to work.
pub async fn suspend_region(db: &DbClient, fabric: &EventFabric, name: &RegionName) -> Result<()> {
    set_status(db, fabric, name, RegionStatus::Suspended).await
}

pub async fn resume_region(db: &DbClient, fabric: &EventFabric, name: &RegionName) -> Result<()> {
    set_status(db, fabric, name, RegionStatus::Active).await
}

/// terminate: opens the 30-day evacuation window and broadcasts the
/// notice; the scheduler archives the shard once the window closes.
pub async fn terminate_region(db: &DbClient, fabric: &EventFabric, name: &RegionName) -> Result<()> {
    set_status(db, fabric, name, RegionStatus::Terminated).await?;
    evacuation_notice(db, fabric, name).await
}

/// Inbox notice to every resident-and-up member: thirty days to move
/// assets out through inter-region travel.
async fn evacuation_notice(db: &DbClient, fabric: &EventFabric, name: &RegionName) -> Result<()> {
    let now = Utc::now();
    let recipients: Vec<_> = {
        let mut conn = db.conn().await?;
        global::list_members_of_region(&mut conn, name)
            .await?
            .into_iter()
            .filter(|m| m.may_receive_region_broadcasts())
            .map(|m| m.player_id)
            .collect()
    };
    let message = crate::models::Message {
        id: crate::models::MessageId::new(),
        // system-authored
        author: crate::models::AccountId(uuid::Uuid::nil()),
        audience: crate::models::Audience::Region(name.clone()),
        subject: "Region termination notice".to_string(),
        body: format!(
            "Region {} is shutting down. You have thirty days to transfer \
             your ships and assets through the Nexus gate.",
            name
        ),
        priority: crate::models::Priority::Urgent,
        attachments: vec![],
        coordinates: None,
        expires_at: None,
        requires_confirmation: true,
        parent: None,
        created_at: now,
    };
    if db.has_region_shard(name) {
        let mut conn = db.region_conn(name).await?;
        regional::insert_message(&mut conn, &message, &recipients).await?;
    }
    fabric
        .publish(&DomainEvent::RegionBroadcast {
            message: message.id,
            region: name.clone(),
        })
        .await
        .ok();
    Ok(())
}

async fn set_status(
    db: &DbClient,
    fabric: &EventFabric,
    name: &RegionName,
    to: RegionStatus,
) -> Result<()> {
    if name.is_nexus() {
        return Err(Error::validation("region", "the hub has no lifecycle"));
    }
    retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let mut stored = global::get_region(&mut conn, name).await?;
        if stored.data.status == to {
            return Ok(());
        }
        stored.data.transition(to, Utc::now())?;
        global::update_region(&mut conn, &stored.data, stored.version).await?;
        global::insert_audit(
            &mut conn,
            None,
            "region.lifecycle",
            serde_json::json!({ "region": name.to_string(), "status": to.to_string() }),
            None,
        )
        .await?;
        Ok(())
    })
    .await?;
    fabric
        .publish(&DomainEvent::RegionLifecycle {
            region: name.clone(),
            status: to.to_string(),
        })
        .await
        .ok();
    Ok(())
}

/// Evacuation-window closure, driven by the scheduler: archive and
/// de-reference the shard.
pub async fn archive_if_window_closed(db: &DbClient, name: &RegionName) -> Result<bool> {
    let region = {
        let mut conn = db.conn().await?;
        global::get_region(&mut conn, name).await?.data
    };
    let deadline = match (region.status, region.evacuation_deadline) {
        (RegionStatus::Terminated, Some(deadline)) => deadline,
        _ => return Ok(false),
    };
    if Utc::now() < deadline {
        return Ok(false);
    }
    db.close_region_shard(name);
    let mut conn = db.conn().await?;
    global::insert_audit(
        &mut conn,
        None,
        "region.archived",
        serde_json::json!({ "region": name.to_string() }),
        None,
    )
    .await?;
    info!("Region {} archived after evacuation window", name);
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_name_seed_deterministic() {
        let a = RegionName::new("mining-co").unwrap();
        assert_eq!(name_seed(&a), name_seed(&a));
        let b = RegionName::new("agri-belt").unwrap();
        assert_ne!(name_seed(&a), name_seed(&b));
    }

    #[test]
    fn test_gate_pick_in_plaza() {
        let (lo, hi) = nexus::gateway_plaza_range();
        for name in ["mining-co", "agri-belt", "fringe-worlds"] {
            let region = RegionName::new(name).unwrap();
            for policy in [GatePolicy::First, GatePolicy::Safest, GatePolicy::Random] {
                let gate = pick_gate_sector(&region, policy);
                assert!(gate >= lo && gate <= hi, "{:?} out of plaza", gate);
            }
        }
    }
}
