//! Repository operations against the global shard: accounts, players,
//! regions, memberships, treaties, travels, audit, webhook dedup, durable
//! events. All functions take an open connection so callers can compose
//! them inside one transaction.

use chrono::{DateTime, Utc};
use diesel::BoolExpressionMethods as _;
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::SelectableHelper as _;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl as _;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Account, AccountId, DomainEvent, Membership, OAuthProvider, Player, PlayerId, Region,
    RegionName, RegionStatus, Role, Scope, Travel, TravelId, TravelState, Treaty, TreatyId,
    TreatyStatus,
};
use crate::schema::*;

use super::db_models::*;
use super::{decode, encode, Versioned};

// ---- accounts ----

fn account_from_row(row: AccountRow) -> Result<Account> {
    Ok(Account {
        id: AccountId(row.id),
        handle: row.handle,
        email: row.email,
        credential_hash: row.credential_hash,
        role: match row.role.as_str() {
            "administrator" => Role::Administrator,
            _ => Role::Player,
        },
        mfa_enabled: row.mfa_enabled,
        mfa_secret: row.mfa_secret,
        backup_code_hashes: decode(row.backup_codes)?,
        oauth_bindings: decode(row.oauth_bindings)?,
        disabled: row.disabled,
        deleted_at: row.deleted_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub async fn insert_account(conn: &mut AsyncPgConnection, account: &Account) -> Result<()> {
    let inserted = diesel::insert_into(accounts::table)
        .values((
            accounts::id.eq(account.id.0),
            accounts::handle.eq(&account.handle),
            accounts::email.eq(&account.email),
            accounts::credential_hash.eq(&account.credential_hash),
            accounts::role.eq(account.role.to_string()),
            accounts::mfa_enabled.eq(account.mfa_enabled),
            accounts::mfa_secret.eq(&account.mfa_secret),
            accounts::backup_codes.eq(encode(&account.backup_code_hashes)?),
            accounts::oauth_bindings.eq(encode(&account.oauth_bindings)?),
            accounts::disabled.eq(account.disabled),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("handle already registered"));
    }
    Ok(())
}

pub async fn get_account(conn: &mut AsyncPgConnection, id: AccountId) -> Result<Account> {
    let row: AccountRow = accounts::table
        .filter(accounts::id.eq(id.0))
        .select(AccountRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("account"))?;
    account_from_row(row)
}

pub async fn get_account_by_handle(
    conn: &mut AsyncPgConnection,
    handle: &str,
) -> Result<Option<Account>> {
    let row: Option<AccountRow> = accounts::table
        .filter(accounts::handle.eq(handle))
        .select(AccountRow::as_select())
        .first(conn)
        .await
        .optional()?;
    row.map(account_from_row).transpose()
}

pub async fn get_account_by_binding(
    conn: &mut AsyncPgConnection,
    provider: OAuthProvider,
    provider_account_id: &str,
) -> Result<Option<Account>> {
    // Bindings are a small JSONB list per account; containment does the
    // lookup without a join table.
    let needle = serde_json::json!([{
        "provider": provider.as_str(),
        "providerAccountId": provider_account_id,
    }]);
    let row: Option<AccountRow> = diesel::sql_query(
        "SELECT * FROM accounts WHERE oauth_bindings @> $1 AND deleted_at IS NULL LIMIT 1",
    )
    .bind::<diesel::sql_types::Jsonb, _>(needle)
    .get_result(conn)
    .await
    .optional()?;
    row.map(account_from_row).transpose()
}

pub async fn list_disabled_accounts(conn: &mut AsyncPgConnection) -> Result<Vec<Account>> {
    let rows: Vec<AccountRow> = accounts::table
        .filter(accounts::disabled.eq(true))
        .order(accounts::updated_at.desc())
        .limit(200)
        .select(AccountRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(account_from_row).collect()
}

pub async fn update_account(conn: &mut AsyncPgConnection, account: &Account) -> Result<()> {
    let updated = diesel::update(accounts::table.filter(accounts::id.eq(account.id.0)))
        .set((
            accounts::email.eq(&account.email),
            accounts::credential_hash.eq(&account.credential_hash),
            accounts::mfa_enabled.eq(account.mfa_enabled),
            accounts::mfa_secret.eq(&account.mfa_secret),
            accounts::backup_codes.eq(encode(&account.backup_code_hashes)?),
            accounts::oauth_bindings.eq(encode(&account.oauth_bindings)?),
            accounts::disabled.eq(account.disabled),
            accounts::deleted_at.eq(account.deleted_at),
            accounts::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(Error::NotFound("account"));
    }
    Ok(())
}

// ---- refresh tokens ----

pub async fn insert_refresh_token(
    conn: &mut AsyncPgConnection,
    token: &NewRefreshToken<'_>,
) -> Result<()> {
    diesel::insert_into(refresh_tokens::table)
        .values(token)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_refresh_token_by_hash(
    conn: &mut AsyncPgConnection,
    token_hash: &str,
) -> Result<Option<RefreshTokenRow>> {
    let row = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(token_hash))
        .select(RefreshTokenRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(row)
}

pub async fn mark_refresh_token_used(conn: &mut AsyncPgConnection, id: Uuid) -> Result<()> {
    diesel::update(refresh_tokens::table.filter(refresh_tokens::id.eq(id)))
        .set(refresh_tokens::used.eq(true))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_active_refresh_tokens(
    conn: &mut AsyncPgConnection,
    account: AccountId,
) -> Result<Vec<RefreshTokenRow>> {
    let rows = refresh_tokens::table
        .filter(refresh_tokens::account_id.eq(account.0))
        .filter(refresh_tokens::revoked.eq(false))
        .filter(refresh_tokens::used.eq(false))
        .filter(refresh_tokens::expires_at.gt(Utc::now()))
        .order(refresh_tokens::created_at.desc())
        .select(RefreshTokenRow::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Token-reuse response: kill the whole chain.
pub async fn revoke_token_family(conn: &mut AsyncPgConnection, family: Uuid) -> Result<usize> {
    let revoked = diesel::update(refresh_tokens::table.filter(refresh_tokens::family.eq(family)))
        .set(refresh_tokens::revoked.eq(true))
        .execute(conn)
        .await?;
    Ok(revoked)
}

pub async fn revoke_account_tokens(conn: &mut AsyncPgConnection, account: AccountId) -> Result<usize> {
    let revoked =
        diesel::update(refresh_tokens::table.filter(refresh_tokens::account_id.eq(account.0)))
            .set(refresh_tokens::revoked.eq(true))
            .execute(conn)
            .await?;
    Ok(revoked)
}

// ---- players ----

pub async fn insert_player(conn: &mut AsyncPgConnection, player: &Player) -> Result<()> {
    let inserted = diesel::insert_into(players::table)
        .values((
            players::id.eq(player.id.0),
            players::account_id.eq(player.account_id.0),
            players::callsign.eq(&player.callsign),
            players::data.eq(encode(player)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("player already exists for account"));
    }
    Ok(())
}

pub async fn get_player(conn: &mut AsyncPgConnection, id: PlayerId) -> Result<Versioned<Player>> {
    let row: PlayerRow = players::table
        .filter(players::id.eq(id.0))
        .select(PlayerRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("player"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn get_player_by_account(
    conn: &mut AsyncPgConnection,
    account: AccountId,
) -> Result<Option<Versioned<Player>>> {
    let row: Option<PlayerRow> = players::table
        .filter(players::account_id.eq(account.0))
        .select(PlayerRow::as_select())
        .first(conn)
        .await
        .optional()?;
    match row {
        Some(row) => Ok(Some(Versioned {
            data: decode(row.data)?,
            version: row.version,
        })),
        None => Ok(None),
    }
}

pub async fn update_player(
    conn: &mut AsyncPgConnection,
    player: &Player,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        players::table
            .filter(players::id.eq(player.id.0))
            .filter(players::version.eq(expected_version)),
    )
    .set((
        players::data.eq(encode(player)?),
        players::version.eq(expected_version + 1),
        players::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("player modified concurrently"));
    }
    Ok(())
}

// ---- regions ----

pub async fn insert_region(conn: &mut AsyncPgConnection, region: &Region) -> Result<()> {
    let inserted = diesel::insert_into(regions::table)
        .values((
            regions::name.eq(region.name.to_string()),
            regions::status.eq(region.status.to_string()),
            regions::data.eq(encode(region)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("region name taken"));
    }
    Ok(())
}

pub async fn get_region(
    conn: &mut AsyncPgConnection,
    name: &RegionName,
) -> Result<Versioned<Region>> {
    let row: RegionRow = regions::table
        .filter(regions::name.eq(name.to_string()))
        .select(RegionRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("region"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_region(
    conn: &mut AsyncPgConnection,
    region: &Region,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        regions::table
            .filter(regions::name.eq(region.name.to_string()))
            .filter(regions::version.eq(expected_version)),
    )
    .set((
        regions::status.eq(region.status.to_string()),
        regions::data.eq(encode(region)?),
        regions::version.eq(expected_version + 1),
        regions::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("region modified concurrently"));
    }
    Ok(())
}

pub async fn list_regions(
    conn: &mut AsyncPgConnection,
    status: Option<RegionStatus>,
) -> Result<Vec<Region>> {
    let rows: Vec<RegionRow> = match status {
        Some(status) => {
            regions::table
                .filter(regions::status.eq(status.to_string()))
                .order(regions::name.asc())
                .select(RegionRow::as_select())
                .load(conn)
                .await?
        }
        None => {
            regions::table
                .order(regions::name.asc())
                .select(RegionRow::as_select())
                .load(conn)
                .await?
        }
    };
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- memberships ----

pub async fn get_membership(
    conn: &mut AsyncPgConnection,
    player: PlayerId,
    region: &RegionName,
) -> Result<Option<Versioned<Membership>>> {
    let row: Option<MembershipRow> = memberships::table
        .filter(memberships::player_id.eq(player.0))
        .filter(memberships::region.eq(region.to_string()))
        .select(MembershipRow::as_select())
        .first(conn)
        .await
        .optional()?;
    match row {
        Some(row) => Ok(Some(Versioned {
            data: decode(row.data)?,
            version: row.version,
        })),
        None => Ok(None),
    }
}

pub async fn insert_membership(conn: &mut AsyncPgConnection, membership: &Membership) -> Result<()> {
    let inserted = diesel::insert_into(memberships::table)
        .values((
            memberships::player_id.eq(membership.player_id.0),
            memberships::region.eq(membership.region.to_string()),
            memberships::data.eq(encode(membership)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(Error::Conflict("membership exists"));
    }
    Ok(())
}

pub async fn update_membership(
    conn: &mut AsyncPgConnection,
    membership: &Membership,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        memberships::table
            .filter(memberships::player_id.eq(membership.player_id.0))
            .filter(memberships::region.eq(membership.region.to_string()))
            .filter(memberships::version.eq(expected_version)),
    )
    .set((
        memberships::data.eq(encode(membership)?),
        memberships::version.eq(expected_version + 1),
        memberships::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("membership modified concurrently"));
    }
    Ok(())
}

pub async fn list_memberships_for_player(
    conn: &mut AsyncPgConnection,
    player: PlayerId,
) -> Result<Vec<Membership>> {
    let rows: Vec<MembershipRow> = memberships::table
        .filter(memberships::player_id.eq(player.0))
        .select(MembershipRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

pub async fn list_members_of_region(
    conn: &mut AsyncPgConnection,
    region: &RegionName,
) -> Result<Vec<Membership>> {
    let rows: Vec<MembershipRow> = memberships::table
        .filter(memberships::region.eq(region.to_string()))
        .select(MembershipRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- treaties ----

pub async fn insert_treaty(conn: &mut AsyncPgConnection, treaty: &Treaty) -> Result<()> {
    diesel::insert_into(treaties::table)
        .values((
            treaties::id.eq(treaty.id.0),
            treaties::region_a.eq(treaty.region_a.to_string()),
            treaties::region_b.eq(treaty.region_b.to_string()),
            treaties::status.eq(status_str(treaty.status)),
            treaties::data.eq(encode(treaty)?),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

fn status_str(status: TreatyStatus) -> &'static str {
    match status {
        TreatyStatus::Active => "active",
        TreatyStatus::Suspended => "suspended",
        TreatyStatus::Terminated => "terminated",
        TreatyStatus::Expired => "expired",
    }
}

pub async fn get_treaty(conn: &mut AsyncPgConnection, id: TreatyId) -> Result<Versioned<Treaty>> {
    let row: TreatyRow = treaties::table
        .filter(treaties::id.eq(id.0))
        .select(TreatyRow::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(Error::NotFound("treaty"))?;
    Ok(Versioned {
        data: decode(row.data)?,
        version: row.version,
    })
}

pub async fn update_treaty(
    conn: &mut AsyncPgConnection,
    treaty: &Treaty,
    expected_version: i32,
) -> Result<()> {
    let updated = diesel::update(
        treaties::table
            .filter(treaties::id.eq(treaty.id.0))
            .filter(treaties::version.eq(expected_version)),
    )
    .set((
        treaties::status.eq(status_str(treaty.status)),
        treaties::data.eq(encode(treaty)?),
        treaties::version.eq(expected_version + 1),
        treaties::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(Error::Conflict("treaty modified concurrently"));
    }
    Ok(())
}

pub async fn treaties_touching(
    conn: &mut AsyncPgConnection,
    region: &RegionName,
) -> Result<Vec<Treaty>> {
    let name = region.to_string();
    let rows: Vec<TreatyRow> = treaties::table
        .filter(
            treaties::region_a
                .eq(&name)
                .or(treaties::region_b.eq(&name)),
        )
        .select(TreatyRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- travels ----

pub async fn insert_travel(conn: &mut AsyncPgConnection, travel: &Travel) -> Result<bool> {
    // Idempotent by travel id: a replayed insert is a no-op and the caller
    // reads back the existing record.
    let inserted = diesel::insert_into(travels::table)
        .values((
            travels::id.eq(travel.id.0),
            travels::player_id.eq(travel.player.0),
            travels::source.eq(travel.source.to_string()),
            travels::destination.eq(travel.destination.to_string()),
            travels::state.eq(travel_state_str(travel.state)),
            travels::data.eq(encode(travel)?),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(inserted == 1)
}

fn travel_state_str(state: TravelState) -> &'static str {
    match state {
        TravelState::InTransit => "in-transit",
        TravelState::Completed => "completed",
        TravelState::Failed => "failed",
        TravelState::Cancelled => "cancelled",
    }
}

pub async fn get_travel(conn: &mut AsyncPgConnection, id: TravelId) -> Result<Option<Travel>> {
    let row: Option<TravelRow> = travels::table
        .filter(travels::id.eq(id.0))
        .select(TravelRow::as_select())
        .first(conn)
        .await
        .optional()?;
    row.map(|r| decode(r.data)).transpose()
}

pub async fn update_travel(conn: &mut AsyncPgConnection, travel: &Travel) -> Result<()> {
    let updated = diesel::update(travels::table.filter(travels::id.eq(travel.id.0)))
        .set((
            travels::state.eq(travel_state_str(travel.state)),
            travels::data.eq(encode(travel)?),
            travels::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(Error::NotFound("travel"));
    }
    Ok(())
}

pub async fn list_stale_travels(
    conn: &mut AsyncPgConnection,
    older_than: DateTime<Utc>,
) -> Result<Vec<Travel>> {
    let rows: Vec<TravelRow> = travels::table
        .filter(travels::state.eq("in-transit"))
        .filter(travels::updated_at.lt(older_than))
        .select(TravelRow::as_select())
        .load(conn)
        .await?;
    rows.into_iter().map(|r| decode(r.data)).collect()
}

// ---- bounties ----

pub async fn insert_bounty(
    conn: &mut AsyncPgConnection,
    region: &RegionName,
    target: PlayerId,
    poster: PlayerId,
    amount: i64,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    diesel::insert_into(bounties::table)
        .values((
            bounties::id.eq(id),
            bounties::region.eq(region.to_string()),
            bounties::target.eq(target.0),
            bounties::poster.eq(poster.0),
            bounties::amount.eq(amount),
            bounties::status.eq("open"),
        ))
        .execute(conn)
        .await?;
    Ok(id)
}

pub async fn list_open_bounties(
    conn: &mut AsyncPgConnection,
    region: &RegionName,
) -> Result<Vec<BountyRow>> {
    let rows = bounties::table
        .filter(bounties::region.eq(region.to_string()))
        .filter(bounties::status.eq("open"))
        .order(bounties::amount.desc())
        .select(BountyRow::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

pub async fn bounty_total_on(conn: &mut AsyncPgConnection, target: PlayerId) -> Result<i64> {
    let rows: Vec<i64> = bounties::table
        .filter(bounties::target.eq(target.0))
        .filter(bounties::status.eq("open"))
        .select(bounties::amount)
        .load(conn)
        .await?;
    Ok(rows.into_iter().sum())
}

// ---- audit ----

pub async fn insert_audit(
    conn: &mut AsyncPgConnection,
    account: Option<AccountId>,
    action: &str,
    detail: Value,
    request_id: Option<&str>,
) -> Result<()> {
    diesel::insert_into(audit_log::table)
        .values((
            audit_log::account_id.eq(account.map(|a| a.0)),
            audit_log::action.eq(action),
            audit_log::detail.eq(detail),
            audit_log::request_id.eq(request_id),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

// ---- webhook dedup ----

/// Records the delivery id; returns false when it was already seen within
/// the retention window (replay).
pub async fn try_record_delivery(
    conn: &mut AsyncPgConnection,
    delivery_id: &str,
    event_type: &str,
) -> Result<bool> {
    let inserted = diesel::insert_into(webhook_deliveries::table)
        .values((
            webhook_deliveries::delivery_id.eq(delivery_id),
            webhook_deliveries::event_type.eq(event_type),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(inserted == 1)
}

pub async fn prune_deliveries(
    conn: &mut AsyncPgConnection,
    older_than: DateTime<Utc>,
) -> Result<usize> {
    let pruned = diesel::delete(
        webhook_deliveries::table.filter(webhook_deliveries::received_at.lt(older_than)),
    )
    .execute(conn)
    .await?;
    Ok(pruned)
}

// ---- durable events ----

pub async fn insert_durable_event(
    conn: &mut AsyncPgConnection,
    scope: &Scope,
    event: &DomainEvent,
) -> Result<i64> {
    let event_type = event
        .payload()
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown")
        .to_string();
    let seq: i64 = diesel::insert_into(durable_events::table)
        .values((
            durable_events::scope.eq(scope.wire_name()),
            durable_events::event_type.eq(event_type),
            durable_events::payload.eq(event.payload()),
        ))
        .returning(durable_events::seq)
        .get_result(conn)
        .await?;
    Ok(seq)
}

/// Replay durable events for one scope, strictly after the cursor, in
/// sequence order.
pub async fn replay_durable_events(
    conn: &mut AsyncPgConnection,
    scope: &Scope,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<DurableEventRow>> {
    let rows: Vec<DurableEventRow> = durable_events::table
        .filter(durable_events::scope.eq(scope.wire_name()))
        .filter(durable_events::seq.gt(after_seq))
        .order(durable_events::seq.asc())
        .limit(limit)
        .select(DurableEventRow::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}
