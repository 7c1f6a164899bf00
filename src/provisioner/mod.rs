//! Subscription-lifecycle webhook ingestion and the orchestrator callout
//! that stands up a region's containers. Webhooks are authenticated by an
//! HMAC-SHA256 shared-secret signature and deduplicated by delivery id.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::CONFIG;
use crate::database::{global, DbClient};
use crate::error::{Error, Result};
use crate::fabric::EventFabric;
use crate::federation;
use crate::models::{RegionConfig, RegionName};
use crate::util::{backoff_delay, ct_eq, to_hex};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const DELIVERY_HEADER: &str = "x-webhook-delivery";

const ORCHESTRATOR_RETRIES: u32 = 5;
const ORCHESTRATOR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event: SubscriptionEvent,
    pub region: RegionName,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub config: Option<RegionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SubscriptionEvent {
    #[serde(rename = "subscription-started")]
    Started,
    #[serde(rename = "subscription-cancelled")]
    Cancelled,
    #[serde(rename = "subscription-expired-grace-passed")]
    ExpiredGracePassed,
}

/// Constant-time check of the hex HMAC-SHA256 signature over the raw
/// body.
pub fn verify_signature(body: &[u8], signature_hex: &str) -> bool {
    let mut mac = match Hmac::<Sha256>::new_from_slice(CONFIG.webhook_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = to_hex(&mac.finalize().into_bytes());
    ct_eq(expected.as_bytes(), signature_hex.trim().as_bytes())
}

pub fn sign_body(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(CONFIG.webhook_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    to_hex(&mac.finalize().into_bytes())
}

/// Handle one verified webhook delivery. Replays (same delivery id) are
/// no-ops; each event maps to one region lifecycle transition.
pub async fn handle_event(
    db: &DbClient,
    fabric: &EventFabric,
    delivery_id: &str,
    event: WebhookEvent,
) -> Result<()> {
    let event_name = match event.event {
        SubscriptionEvent::Started => "subscription-started",
        SubscriptionEvent::Cancelled => "subscription-cancelled",
        SubscriptionEvent::ExpiredGracePassed => "subscription-expired-grace-passed",
    };
    {
        let mut conn = db.conn().await?;
        if !global::try_record_delivery(&mut conn, delivery_id, event_name).await? {
            info!("webhook delivery {} replayed, ignoring", delivery_id);
            return Ok(());
        }
    }

    match event.event {
        SubscriptionEvent::Started => {
            let config = event.config.unwrap_or_default();
            if let Err(e) = call_orchestrator(&event.region).await {
                // Stay pending; an operator reads the audit trail.
                error!("orchestrator failed for {}: {}", event.region, e);
                let mut conn = db.conn().await?;
                global::insert_audit(
                    &mut conn,
                    None,
                    "provisioner.orchestrator_failed",
                    serde_json::json!({ "region": event.region.to_string(), "error": e.to_string() }),
                    Some(delivery_id),
                )
                .await?;
                return Err(e);
            }
            let display_name = event
                .display_name
                .unwrap_or_else(|| event.region.to_string());
            federation::provision_region(db, fabric, &event.region, &display_name, None, config)
                .await?;
        }
        SubscriptionEvent::Cancelled => {
            federation::suspend_region(db, fabric, &event.region).await?;
        }
        SubscriptionEvent::ExpiredGracePassed => {
            federation::terminate_region(db, fabric, &event.region).await?;
        }
    }
    Ok(())
}

/// Ask the orchestrator to create the region's containers (database,
/// worker, cache, storage). Idempotent by region name on the
/// orchestrator side; retried with capped backoff here.
async fn call_orchestrator(region: &RegionName) -> Result<()> {
    let endpoint = match &CONFIG.region_provisioner_endpoint {
        Some(endpoint) => endpoint.clone(),
        None => {
            // Single-process deployments run without an orchestrator; the
            // shard lives in the shared server.
            info!("no orchestrator configured, provisioning {} in-process", region);
            return Ok(());
        }
    };
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "region": region.to_string(),
        "template": "region-standard",
        "containers": ["database", "worker", "cache", "storage"],
    });
    let mut last_error = String::new();
    for attempt in 0..ORCHESTRATOR_RETRIES {
        match client
            .post(&endpoint)
            .timeout(ORCHESTRATOR_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                last_error = format!("orchestrator status {}", response.status());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }
        warn!(
            "orchestrator attempt {} for {} failed: {}",
            attempt, region, last_error
        );
        tokio::time::sleep(backoff_delay(attempt, Duration::from_secs(30))).await;
    }
    Err(Error::Unavailable(format!(
        "orchestrator unreachable: {}",
        last_error
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"event":"subscription-started","region":"mining-co"}"#;
        let signature = sign_body(body);
        assert!(verify_signature(body, &signature));
        assert!(verify_signature(body, &format!(" {} ", signature)));
        assert!(!verify_signature(body, "deadbeef"));
        assert!(!verify_signature(b"tampered", &signature));
    }

    #[test]
    fn test_event_deserialization() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"subscription-started","region":"mining-co","displayName":"Mining Co"}"#,
        )
        .unwrap();
        assert_eq!(event.event, SubscriptionEvent::Started);
        assert_eq!(event.region.to_string(), "mining-co");
        assert!(event.config.is_none());

        let cancelled: WebhookEvent =
            serde_json::from_str(r#"{"event":"subscription-cancelled","region":"mining-co"}"#)
                .unwrap();
        assert_eq!(cancelled.event, SubscriptionEvent::Cancelled);
    }

    #[test]
    fn test_bad_region_name_rejected_at_parse() {
        let result = serde_json::from_str::<WebhookEvent>(
            r#"{"event":"subscription-started","region":"Bad Name!"}"#,
        );
        assert!(result.is_err());
    }
}
