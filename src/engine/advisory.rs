//! Advisory calls to external model providers. Strictly read-only with
//! respect to game state: responses inform clients, never mutations. On
//! provider failure the engine answers from deterministic heuristics and
//! the degradation is recorded by the caller.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;

use crate::config::CONFIG;
use crate::models::{MarketEntry, SectorIndex};
use crate::util::to_hex;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(2);
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const CACHE_CAPACITY: u64 = 10_000;

const PROVIDER_ENDPOINTS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1/chat/completions"),
    ("anthropic", "https://api.anthropic.com/v1/messages"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryKind {
    MarketPrediction,
    RouteOptimization,
    BehaviorProfile,
}

impl AdvisoryKind {
    fn as_str(&self) -> &'static str {
        match self {
            AdvisoryKind::MarketPrediction => "market-prediction",
            AdvisoryKind::RouteOptimization => "route-optimization",
            AdvisoryKind::BehaviorProfile => "behavior-profile",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advisory {
    pub kind: String,
    pub content: Value,
    /// True when a provider answered; false for the heuristic fallback.
    pub from_provider: bool,
}

#[derive(Clone)]
pub struct AdvisoryEngine {
    client: reqwest::Client,
    cache: Cache<String, Advisory>,
}

impl Default for AdvisoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryEngine {
    pub fn new() -> AdvisoryEngine {
        AdvisoryEngine {
            client: reqwest::Client::new(),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    fn fingerprint(kind: AdvisoryKind, input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(input.to_string().as_bytes());
        to_hex(&hasher.finalize())
    }

    /// Ask the configured providers in order; fall back to the heuristic.
    /// Returns the advisory plus whether any provider degraded.
    pub async fn advise(&self, kind: AdvisoryKind, input: Value) -> (Advisory, bool) {
        let key = Self::fingerprint(kind, &input);
        if let Some(hit) = self.cache.get(&key).await {
            return (hit, false);
        }
        let mut degraded = false;
        for (i, (provider, endpoint)) in PROVIDER_ENDPOINTS.iter().enumerate() {
            let api_key = match CONFIG.ai_provider_keys.get(i) {
                Some(key) if !key.is_empty() => key,
                _ => continue,
            };
            match self.call_provider(provider, endpoint, api_key, kind, &input).await {
                Ok(content) => {
                    let advisory = Advisory {
                        kind: kind.as_str().to_string(),
                        content,
                        from_provider: true,
                    };
                    self.cache.insert(key, advisory.clone()).await;
                    return (advisory, degraded);
                }
                Err(e) => {
                    warn!("advisory provider {} failed: {}", provider, e);
                    degraded = true;
                }
            }
        }
        let advisory = Advisory {
            kind: kind.as_str().to_string(),
            content: heuristic(kind, &input),
            from_provider: false,
        };
        self.cache.insert(key, advisory.clone()).await;
        (advisory, degraded)
    }

    async fn call_provider(
        &self,
        provider: &str,
        endpoint: &str,
        api_key: &str,
        kind: AdvisoryKind,
        input: &Value,
    ) -> Result<Value, String> {
        let prompt = format!(
            "You advise a space-trading game client. Task: {}. Input: {}. Reply with JSON only.",
            kind.as_str(),
            input
        );
        let body = match provider {
            "anthropic" => json!({
                "model": "claude-3-5-haiku-latest",
                "max_tokens": 512,
                "messages": [{"role": "user", "content": prompt}],
            }),
            _ => json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": prompt}],
            }),
        };
        let mut request = self
            .client
            .post(endpoint)
            .timeout(PROVIDER_TIMEOUT)
            .json(&body);
        request = match provider {
            "anthropic" => request
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01"),
            _ => request.bearer_auth(api_key),
        };
        let response = request.send().await.map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.json().await.map_err(|e| e.to_string())
    }
}

/// Deterministic fallbacks, computed from the same inputs the providers
/// would see.
pub fn heuristic(kind: AdvisoryKind, input: &Value) -> Value {
    match kind {
        AdvisoryKind::MarketPrediction => heuristic_market(input),
        AdvisoryKind::RouteOptimization => heuristic_route(input),
        AdvisoryKind::BehaviorProfile => json!({
            "profile": "balanced",
            "confidence": 0.25,
        }),
    }
}

/// Markets trend toward their midpoint: scarce stock is a sell signal,
/// glut a buy signal.
fn heuristic_market(input: &Value) -> Value {
    let mut signals = vec![];
    if let Some(entries) = input.get("market").and_then(|m| m.as_object()) {
        for (commodity, entry) in entries {
            if let Ok(entry) = serde_json::from_value::<MarketEntry>(entry.clone()) {
                let fill = if entry.capacity > 0 {
                    entry.inventory as f64 / entry.capacity as f64
                } else {
                    0.5
                };
                let signal = if fill < 0.25 {
                    "sell"
                } else if fill > 0.75 {
                    "buy"
                } else {
                    "hold"
                };
                signals.push(json!({ "commodity": commodity, "signal": signal, "fill": fill }));
            }
        }
    }
    json!({ "signals": signals, "confidence": 0.4 })
}

/// Greedy nearest-neighbor over the provided cost matrix; good enough as
/// a floor when no provider is reachable.
fn heuristic_route(input: &Value) -> Value {
    #[derive(Deserialize)]
    struct RouteInput {
        start: SectorIndex,
        stops: Vec<SectorIndex>,
    }
    match serde_json::from_value::<RouteInput>(input.clone()) {
        Ok(route) => {
            let mut order = vec![route.start];
            let mut remaining = route.stops;
            let mut current = route.start;
            while !remaining.is_empty() {
                // without distances, nearest-by-index approximates locality
                let (pos, _) = remaining
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| (s.0 - current.0).abs())
                    .expect("non-empty remaining");
                current = remaining.remove(pos);
                order.push(current);
            }
            json!({ "order": order, "confidence": 0.3 })
        }
        Err(_) => json!({ "order": [], "confidence": 0.0 }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = AdvisoryEngine::fingerprint(AdvisoryKind::MarketPrediction, &json!({"x": 1}));
        let b = AdvisoryEngine::fingerprint(AdvisoryKind::MarketPrediction, &json!({"x": 1}));
        let c = AdvisoryEngine::fingerprint(AdvisoryKind::RouteOptimization, &json!({"x": 1}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_market_heuristic_signals() {
        let input = json!({
            "market": {
                "fuel": { "inventory": 100, "capacity": 1000, "basePrice": 5 },
                "ore": { "inventory": 900, "capacity": 1000, "basePrice": 12 },
                "food": { "inventory": 500, "capacity": 1000, "basePrice": 8 },
            }
        });
        let out = heuristic(AdvisoryKind::MarketPrediction, &input);
        let signals = out["signals"].as_array().unwrap();
        assert_eq!(signals.len(), 3);
        let by_commodity: std::collections::BTreeMap<&str, &str> = signals
            .iter()
            .map(|s| {
                (
                    s["commodity"].as_str().unwrap(),
                    s["signal"].as_str().unwrap(),
                )
            })
            .collect();
        assert_eq!(by_commodity["fuel"], "sell");
        assert_eq!(by_commodity["ore"], "buy");
        assert_eq!(by_commodity["food"], "hold");
    }

    #[test]
    fn test_route_heuristic_visits_every_stop() {
        let input = json!({ "start": 1, "stops": [9, 3, 5] });
        let out = heuristic(AdvisoryKind::RouteOptimization, &input);
        let order = out["order"].as_array().unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], 1);
        assert_eq!(order[1], 3);
    }

    #[tokio::test]
    async fn test_unconfigured_providers_fall_back() {
        let engine = AdvisoryEngine::new();
        let (advisory, _) = engine
            .advise(AdvisoryKind::BehaviorProfile, json!({"player": "x"}))
            .await;
        assert!(!advisory.from_provider);
        assert_eq!(advisory.content["profile"], "balanced");
    }
}
