use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

#[derive(Debug)]
pub struct Config {
    pub environment: Environment,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub secure_cookies: bool,
    pub rate_limit_default: u32,
    pub ws_outbound_high_water: usize,
    pub region_provisioner_endpoint: Option<String>,
    pub nexus_gate_sector_policy: GatePolicy,
    pub ai_provider_keys: Vec<String>,
    pub oauth_github: Option<OAuthCredentials>,
    pub oauth_google: Option<OAuthCredentials>,
    pub oauth_steam: Option<OAuthCredentials>,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// How a freshly provisioned region picks its Nexus gate sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePolicy {
    /// First sector of the region.
    First,
    /// Highest-security sector.
    Safest,
    /// Seed-deterministic pick.
    Random,
}

fn env_opt(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => None,
        Ok(val) => Some(val),
        Err(_) => None,
    }
}

fn oauth_pair(provider: &str) -> Option<OAuthCredentials> {
    let client_id = env_opt(&format!("CLIENT_ID_{}", provider))?;
    let client_secret = env_opt(&format!("CLIENT_SECRET_{}", provider))?;
    Some(OAuthCredentials {
        client_id,
        client_secret,
    })
}

lazy_static! {
    pub static ref CONFIG: Config = {
        let environment = match env_opt("ENVIRONMENT").as_deref() {
            Some("production") => Environment::Production,
            Some("test") => Environment::Test,
            _ => Environment::Development,
        };
        let jwt_secret = match environment {
            Environment::Production => {
                std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in production")
            }
            _ => env_opt("JWT_SECRET").unwrap_or_else(|| "dev-signing-key".to_string()),
        };
        let webhook_secret =
            env_opt("WEBHOOK_SECRET").unwrap_or_else(|| "dev-webhook-secret".to_string());
        let secure_cookies = match env_opt("SECURE_COOKIES") {
            Some(val) => val == "1" || val == "true",
            None => environment == Environment::Production,
        };
        let rate_limit_default = env_opt("RATE_LIMIT_DEFAULT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);
        let ws_outbound_high_water = env_opt("WS_OUTBOUND_HIGH_WATER")
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);
        let nexus_gate_sector_policy = match env_opt("NEXUS_GATE_SECTOR_POLICY").as_deref() {
            Some("first") => GatePolicy::First,
            Some("random") => GatePolicy::Random,
            _ => GatePolicy::Safest,
        };
        let ai_provider_keys = env_opt("AI_PROVIDER_KEYS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        Config {
            environment,
            jwt_secret,
            webhook_secret,
            secure_cookies,
            rate_limit_default,
            ws_outbound_high_water,
            region_provisioner_endpoint: env_opt("REGION_PROVISIONER_ENDPOINT"),
            nexus_gate_sector_policy,
            ai_provider_keys,
            oauth_github: oauth_pair("GITHUB"),
            oauth_google: oauth_pair("GOOGLE"),
            oauth_steam: oauth_pair("STEAM"),
        }
    };
}
