use sectorwars::config::CONFIG;
use sectorwars::database::DbClient;
use sectorwars::engine::advisory::AdvisoryEngine;
use sectorwars::fabric::EventFabric;
use sectorwars::federation;
use sectorwars::models::RegionStatus;
use sectorwars::scheduler;
use sectorwars::security::SecurityEnvelope;
use sectorwars::web_api_server::WebApiServer;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sectorwars=debug".into()),
        )
        .init();

    info!("Starting sectorwars core ({:?})", CONFIG.environment);

    let db = DbClient::connect().await.expect("global shard unreachable");

    // Hub first, then re-open every member region's shard so routing and
    // schedulers come back after a restart.
    federation::ensure_nexus(&db).await.expect("nexus bootstrap failed");
    {
        let mut conn = db.conn().await.expect("global shard unreachable");
        let regions = sectorwars::database::global::list_regions(&mut conn, None)
            .await
            .expect("region listing failed");
        drop(conn);
        for region in regions {
            if region.status == RegionStatus::Active || region.status == RegionStatus::Suspended {
                db.open_region_shard(&region.name)
                    .await
                    .expect("region shard reopen failed");
            }
        }
    }

    let fabric = EventFabric::new(&db);
    let security = SecurityEnvelope::new();
    let advisory = AdvisoryEngine::new();

    scheduler::spawn(db.clone(), fabric.clone());

    let server = WebApiServer::new(&db, &fabric, &security, &advisory);
    server.run().await.expect("server exited");
}
