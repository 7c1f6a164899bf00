use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable, QueryableByName, Selectable};
use serde_json::Value;
use uuid::Uuid;

// ---- global shard ----

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccountRow {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub credential_hash: String,
    pub role: String,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub backup_codes: Value,
    pub oauth_bindings: Value,
    pub disabled: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RefreshTokenRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub family: Uuid,
    pub token_hash: String,
    pub device_fingerprint: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewRefreshToken<'a> {
    pub id: Uuid,
    pub account_id: Uuid,
    pub family: Uuid,
    pub token_hash: &'a str,
    pub device_fingerprint: &'a str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::players)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlayerRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub callsign: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::regions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RegionRow {
    pub name: String,
    pub status: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::memberships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MembershipRow {
    pub player_id: Uuid,
    pub region: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::treaties)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TreatyRow {
    pub id: Uuid,
    pub region_a: String,
    pub region_b: String,
    pub status: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::travels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TravelRow {
    pub id: Uuid,
    pub player_id: Uuid,
    pub source: String,
    pub destination: String,
    pub state: String,
    pub data: Value,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::durable_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DurableEventRow {
    pub seq: i64,
    pub scope: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::bounties)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BountyRow {
    pub id: Uuid,
    pub region: String,
    pub target: Uuid,
    pub poster: Uuid,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ---- region shards ----

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::sectors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SectorRow {
    pub sector_index: i32,
    pub sector_type: String,
    pub district: Option<String>,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::warp_links)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WarpLinkRow {
    pub from_sector: i32,
    pub to_sector: i32,
    pub data: Value,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::ships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShipRow {
    pub id: Uuid,
    pub pilot: Uuid,
    pub sector_index: i32,
    pub reserved: bool,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::planets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlanetRow {
    pub id: Uuid,
    pub sector_index: i32,
    pub owner: Option<Uuid>,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::stations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StationRow {
    pub id: Uuid,
    pub sector_index: i32,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::combats)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CombatRow {
    pub id: Uuid,
    pub sector_index: i32,
    pub state: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::message_recipients)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageReceiptRow {
    pub message_id: Uuid,
    pub recipient: Uuid,
    pub read_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::teams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TeamRow {
    pub id: Uuid,
    pub name: String,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::policies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PolicyRow {
    pub id: Uuid,
    pub status: String,
    pub closes_at: DateTime<Utc>,
    pub data: Value,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::region_schema::elections)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ElectionRow {
    pub id: Uuid,
    pub status: String,
    pub closes_at: DateTime<Utc>,
    pub data: Value,
    pub version: i32,
}
