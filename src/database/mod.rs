pub mod db_models;
pub mod global;
pub mod regional;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use diesel::sql_types::{Integer, Text};
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::QueryableByName;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl as _;
use diesel_async::SimpleAsyncConnection as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::RegionName;
use crate::schema::generic_lookup;
use crate::util::backoff_delay;

/// Numbered migration scripts, applied in order; each shard tracks its own
/// applied set in `schema_migrations`.
const GLOBAL_MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("../../migrations/global/0001_init.sql")),
    (2, include_str!("../../migrations/global/0002_bounties.sql")),
];

const REGION_MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("../../migrations/region/0001_init.sql")),
    (2, include_str!("../../migrations/region/0002_policy_votes.sql")),
    (3, include_str!("../../migrations/region/0003_contracts.sql")),
];

/// Which physical shard a transaction binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardScope {
    Global,
    Region(RegionName),
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Error {
        use diesel::result::DatabaseErrorKind;
        use diesel::result::Error as DieselError;
        match e {
            DieselError::NotFound => Error::NotFound("row"),
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                Error::Conflict("serialization failure")
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                Error::Conflict("unique violation")
            }
            other => Error::Unavailable(other.to_string()),
        }
    }
}

/// Retry an operation that may fail on optimistic-concurrency or
/// serialization conflicts, with capped exponential backoff. The closure
/// must begin its own transaction so each attempt sees a fresh snapshot.
pub async fn retry_conflict<T, Fut, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 4;
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable_conflict() && attempt + 1 < MAX_ATTEMPTS => {
                debug!("conflict on attempt {}, retrying", attempt);
                tokio::time::sleep(backoff_delay(attempt, Duration::from_secs(1))).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// An aggregate together with the version column that guards its next
/// optimistic-concurrency update.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub data: T,
    pub version: i32,
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Unavailable(format!("corrupt aggregate: {}", e)))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Unavailable(format!("encode aggregate: {}", e)))
}

#[derive(Clone)]
pub struct DbClient {
    global: Pool<AsyncPgConnection>,
    regions: Arc<DashMap<RegionName, Pool<AsyncPgConnection>>>,
    database_url: String,
}

impl DbClient {
    /// Connect to the global shard and apply its pending migrations.
    /// Region shard pools are registered lazily as regions are opened.
    pub async fn connect() -> Result<DbClient> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| Error::Unavailable("DATABASE_URL not set".into()))?;
        let db = DbClient {
            global: build_pool(&database_url, None)?,
            regions: Arc::new(DashMap::new()),
            database_url,
        };
        // Check the connection before anything else touches it.
        {
            let mut conn = db.conn().await?;
            #[derive(QueryableByName)]
            struct Ret {
                #[diesel(sql_type = Integer)]
                value: i32,
            }
            let result: Vec<Ret> = diesel::sql_query("SELECT 1 as value")
                .load(&mut conn)
                .await?;
            if result.len() != 1 || result[0].value != 1 {
                return Err(Error::Unavailable("connection check failed".into()));
            }
        }
        db.apply_migrations(ShardScope::Global).await?;
        info!("Connected to global shard");
        Ok(db)
    }

    pub async fn conn(&self) -> Result<Object<AsyncPgConnection>> {
        self.global
            .get()
            .await
            .map_err(|e| Error::Unavailable(format!("global pool: {}", e)))
    }

    /// Connection bound to a region shard's schema. The shard must have
    /// been opened (provisioned or re-opened at startup) first.
    pub async fn region_conn(&self, region: &RegionName) -> Result<Object<AsyncPgConnection>> {
        let pool = self
            .regions
            .get(region)
            .ok_or(Error::NotFound("region shard"))?
            .clone();
        pool.get()
            .await
            .map_err(|e| Error::Unavailable(format!("region pool {}: {}", region, e)))
    }

    pub async fn conn_for(&self, scope: &ShardScope) -> Result<Object<AsyncPgConnection>> {
        match scope {
            ShardScope::Global => self.conn().await,
            ShardScope::Region(name) => self.region_conn(name).await,
        }
    }

    pub fn has_region_shard(&self, region: &RegionName) -> bool {
        self.regions.contains_key(region)
    }

    /// Create the shard schema if needed, run its pending migrations, and
    /// register its pool. Idempotent by region name.
    pub async fn open_region_shard(&self, region: &RegionName) -> Result<()> {
        let schema = region.schema_name();
        {
            let mut conn = self.conn().await?;
            conn.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
                .await?;
        }
        let pool = build_pool(&self.database_url, Some(&schema))?;
        self.regions.insert(region.clone(), pool);
        self.apply_migrations(ShardScope::Region(region.clone())).await?;
        // The shard names itself; provisioning fills the rest.
        {
            let mut conn = self.region_conn(region).await?;
            let applied: Vec<i32> = REGION_MIGRATIONS.iter().map(|(v, _)| *v).collect();
            diesel::sql_query(
                "INSERT INTO region_meta (region, applied_versions) VALUES ($1, $2)
                 ON CONFLICT (region) DO UPDATE SET applied_versions = $2, updated_at = now()",
            )
            .bind::<Text, _>(region.to_string())
            .bind::<diesel::sql_types::Jsonb, _>(serde_json::to_value(&applied).unwrap_or(Value::Null))
            .execute(&mut conn)
            .await?;
        }
        info!("Opened region shard {}", region);
        Ok(())
    }

    /// Drop the in-process pool for a terminated region. The schema is
    /// left behind for archival.
    pub fn close_region_shard(&self, region: &RegionName) {
        self.regions.remove(region);
    }

    async fn apply_migrations(&self, scope: ShardScope) -> Result<()> {
        let scripts = match &scope {
            ShardScope::Global => GLOBAL_MIGRATIONS,
            ShardScope::Region(_) => REGION_MIGRATIONS,
        };
        let mut conn = self.conn_for(&scope).await?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .await?;

        #[derive(QueryableByName)]
        struct Applied {
            #[diesel(sql_type = Integer)]
            version: i32,
        }
        let applied: Vec<Applied> = diesel::sql_query("SELECT version FROM schema_migrations")
            .load(&mut conn)
            .await?;
        let applied: Vec<i32> = applied.into_iter().map(|a| a.version).collect();

        for (version, script) in scripts {
            if applied.contains(version) {
                continue;
            }
            debug!("applying migration {} to {:?}", version, scope);
            conn.batch_execute(script).await?;
            diesel::sql_query("INSERT INTO schema_migrations (version) VALUES ($1)")
                .bind::<Integer, _>(*version)
                .execute(&mut conn)
                .await?;
        }
        Ok(())
    }

    // Small singleton state, keyed JSON. Used for provisioner bookkeeping
    // and operator flags.
    pub async fn get_value<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Sized + DeserializeOwned,
    {
        debug!("db get: {}", key);
        use diesel::OptionalExtension as _;
        let value_opt: Option<Value> = generic_lookup::table
            .select(generic_lookup::value)
            .filter(generic_lookup::key.eq(key))
            .first(&mut self.conn().await?)
            .await
            .optional()?;
        match value_opt {
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|e| Error::Unavailable(format!("corrupt value at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub async fn set_value<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        debug!("db set: {}", key);
        let value: Value = serde_json::to_value(value)
            .map_err(|e| Error::Unavailable(format!("serialize {}: {}", key, e)))?;
        diesel::insert_into(generic_lookup::table)
            .values((
                generic_lookup::key.eq(key),
                generic_lookup::value.eq(&value),
            ))
            .on_conflict(generic_lookup::key)
            .do_update()
            .set(generic_lookup::value.eq(&value))
            .execute(&mut self.conn().await?)
            .await?;
        Ok(())
    }
}

fn build_pool(database_url: &str, schema: Option<&str>) -> Result<Pool<AsyncPgConnection>> {
    let url = match schema {
        Some(schema) => format!(
            "{}?options=-c%20search_path%3D{}",
            database_url, schema
        ),
        None => database_url.to_string(),
    };
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    Pool::builder(manager)
        .max_size(5)
        .build()
        .map_err(|e| Error::Unavailable(format!("pool build: {}", e)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_migration_numbering_monotonic() {
        for scripts in [GLOBAL_MIGRATIONS, REGION_MIGRATIONS] {
            for pair in scripts.windows(2) {
                assert!(pair[0].0 < pair[1].0);
            }
        }
    }

    #[tokio::test]
    async fn test_retry_conflict_gives_up() {
        let mut calls = 0u32;
        let result: Result<()> = retry_conflict(|| {
            calls += 1;
            async { Err(Error::Conflict("hot aggregate")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_retry_conflict_passes_through_other_errors() {
        let mut calls = 0u32;
        let result: Result<()> = retry_conflict(|| {
            calls += 1;
            async { Err(Error::NotFound("ship")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
