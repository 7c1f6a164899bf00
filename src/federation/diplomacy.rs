//! Treaties between regions. Creation requires the governing authority
//! on each side: the governor under autocracy, a passed policy under
//! democracy. Active treaties bend travel costs, trade bonuses, and
//! combat legality.

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::database::{global, retry_conflict, DbClient};
use crate::error::{Error, Result};
use crate::models::{
    GovernanceType, PlayerId, RegionName, Treaty, TreatyId, TreatyKind, TreatyStatus,
};

/// Evidence that the signer speaks for the region.
pub enum Authority {
    /// The region's governor account acting directly (autocracy/council).
    Governor(PlayerId),
    /// A passed policy id authorizing the treaty (democracy).
    PassedPolicy(crate::models::PolicyId),
}

/// Governance check for one side. The caller resolves the concrete
/// governor/policy facts; this enforces which kind of authority the
/// governance type demands.
pub fn authority_matches(governance: GovernanceType, authority: &Authority) -> bool {
    match governance {
        GovernanceType::Autocracy | GovernanceType::Council | GovernanceType::GalacticCouncil => {
            matches!(authority, Authority::Governor(_))
        }
        GovernanceType::Democracy => matches!(authority, Authority::PassedPolicy(_)),
    }
}

pub async fn propose_treaty(
    db: &DbClient,
    region_a: &RegionName,
    region_b: &RegionName,
    kind: TreatyKind,
    terms: Value,
) -> Result<Treaty> {
    if region_a == region_b {
        return Err(Error::validation("regions", "a treaty needs two regions"));
    }
    // both must exist and not be terminated
    {
        let mut conn = db.conn().await?;
        for name in [region_a, region_b] {
            let region = global::get_region(&mut conn, name).await?.data;
            if region.status == crate::models::RegionStatus::Terminated {
                return Err(Error::validation("regions", "terminated region"));
            }
        }
    }
    let now = Utc::now();
    let treaty = Treaty {
        id: TreatyId::new(),
        region_a: region_a.clone(),
        region_b: region_b.clone(),
        kind,
        terms,
        status: TreatyStatus::Active,
        signed_a: false,
        signed_b: false,
        expires_at: None,
        created_at: now,
        updated_at: now,
    };
    let mut conn = db.conn().await?;
    global::insert_treaty(&mut conn, &treaty).await?;
    Ok(treaty)
}

/// Sign for one region after verifying the authority fits its
/// governance. The treaty takes force when both sides have signed.
pub async fn sign_treaty(
    db: &DbClient,
    treaty_id: TreatyId,
    region: &RegionName,
    authority: Authority,
) -> Result<Treaty> {
    let governance = {
        let mut conn = db.conn().await?;
        global::get_region(&mut conn, region).await?.data.config.governance_type
    };
    if !authority_matches(governance, &authority) {
        return Err(Error::InsufficientPermissions);
    }
    let treaty = retry_conflict(|| async {
        let mut conn = db.conn().await?;
        let mut stored = global::get_treaty(&mut conn, treaty_id).await?;
        stored.data.sign(region, Utc::now())?;
        global::update_treaty(&mut conn, &stored.data, stored.version).await?;
        global::insert_audit(
            &mut conn,
            None,
            "treaty.signed",
            serde_json::json!({ "treaty": treaty_id.to_string(), "region": region.to_string() }),
            None,
        )
        .await?;
        Ok(stored.data)
    })
    .await?;
    if treaty.is_in_force(Utc::now()) {
        info!("treaty {} now in force", treaty.id);
    }
    Ok(treaty)
}

/// Effective travel-cost multiplier between two regions: the best
/// in-force treaty wins.
pub async fn travel_cost_factor(
    db: &DbClient,
    a: &RegionName,
    b: &RegionName,
) -> Result<f64> {
    let now = Utc::now();
    let mut conn = db.conn().await?;
    let factor = global::treaties_touching(&mut conn, a)
        .await?
        .into_iter()
        .filter(|t| t.links(a, b) && t.is_in_force(now))
        .map(|t| t.travel_cost_factor())
        .fold(1.0_f64, f64::min);
    Ok(factor)
}

pub async fn trade_bonus_factor(db: &DbClient, a: &RegionName, b: &RegionName) -> Result<f64> {
    let now = Utc::now();
    let mut conn = db.conn().await?;
    let factor = global::treaties_touching(&mut conn, a)
        .await?
        .into_iter()
        .filter(|t| t.links(a, b) && t.is_in_force(now))
        .map(|t| t.trade_bonus_factor())
        .fold(1.0_f64, f64::max);
    Ok(factor)
}

/// Combat between pilots homed in these regions is treaty-illegal when a
/// non-aggression or mutual-defense treaty is in force.
pub async fn combat_forbidden(db: &DbClient, a: &RegionName, b: &RegionName) -> Result<bool> {
    if a == b {
        return Ok(false);
    }
    let now = Utc::now();
    let mut conn = db.conn().await?;
    let forbidden = global::treaties_touching(&mut conn, a)
        .await?
        .into_iter()
        .any(|t| t.links(a, b) && t.is_in_force(now) && t.forbids_combat());
    Ok(forbidden)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_authority_per_governance() {
        let governor = Authority::Governor(PlayerId::new());
        let policy = Authority::PassedPolicy(crate::models::PolicyId::new());
        assert!(authority_matches(GovernanceType::Autocracy, &governor));
        assert!(!authority_matches(GovernanceType::Autocracy, &policy));
        assert!(authority_matches(GovernanceType::Democracy, &policy));
        assert!(!authority_matches(GovernanceType::Democracy, &governor));
        assert!(authority_matches(GovernanceType::Council, &governor));
    }
}
