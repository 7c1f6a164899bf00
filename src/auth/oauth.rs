//! Authorization-code exchange against the three supported external
//! providers. The core stores only the provider account id and display
//! name; token material is used once and dropped.

use serde::Deserialize;
use std::time::Duration;

use crate::config::{OAuthCredentials, CONFIG};
use crate::error::{Error, Result};
use crate::models::OAuthProvider;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub provider: OAuthProvider,
    pub provider_account_id: String,
    pub display_name: String,
}

struct ProviderEndpoints {
    token_url: &'static str,
    profile_url: &'static str,
}

fn endpoints(provider: OAuthProvider) -> ProviderEndpoints {
    match provider {
        OAuthProvider::Github => ProviderEndpoints {
            token_url: "https://github.com/login/oauth/access_token",
            profile_url: "https://api.github.com/user",
        },
        OAuthProvider::Google => ProviderEndpoints {
            token_url: "https://oauth2.googleapis.com/token",
            profile_url: "https://www.googleapis.com/oauth2/v2/userinfo",
        },
        OAuthProvider::Steam => ProviderEndpoints {
            token_url: "https://steamcommunity.com/oauth/token",
            profile_url: "https://api.steampowered.com/ISteamUser/GetPlayerSummaries/v2",
        },
    }
}

fn credentials(provider: OAuthProvider) -> Result<OAuthCredentials> {
    let creds = match provider {
        OAuthProvider::Github => CONFIG.oauth_github.clone(),
        OAuthProvider::Google => CONFIG.oauth_google.clone(),
        OAuthProvider::Steam => CONFIG.oauth_steam.clone(),
    };
    creds.ok_or_else(|| Error::Unavailable(format!("provider {} not configured", provider.as_str())))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(alias = "login", alias = "name", alias = "personaname")]
    display_name: Option<String>,
    #[serde(alias = "steamid")]
    id: serde_json::Value,
}

/// Exchange the authorization code and fetch the provider profile.
pub async fn exchange_code(
    client: &reqwest::Client,
    provider: OAuthProvider,
    code: &str,
    redirect_uri: &str,
) -> Result<ProviderIdentity> {
    let creds = credentials(provider)?;
    let endpoints = endpoints(provider);

    let token: TokenResponse = client
        .post(endpoints.token_url)
        .timeout(EXCHANGE_TIMEOUT)
        .header("Accept", "application/json")
        .form(&[
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Unavailable(format!("provider token exchange: {}", e)))?
        .error_for_status()
        .map_err(|_| Error::InvalidCredential)?
        .json()
        .await
        .map_err(|e| Error::Unavailable(format!("provider token body: {}", e)))?;

    let profile: Profile = client
        .get(endpoints.profile_url)
        .timeout(EXCHANGE_TIMEOUT)
        .bearer_auth(&token.access_token)
        .header("User-Agent", "sectorwars")
        .send()
        .await
        .map_err(|e| Error::Unavailable(format!("provider profile: {}", e)))?
        .error_for_status()
        .map_err(|_| Error::InvalidCredential)?
        .json()
        .await
        .map_err(|e| Error::Unavailable(format!("provider profile body: {}", e)))?;

    let provider_account_id = match &profile.id {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Err(Error::Unavailable("provider profile missing id".into())),
    };
    Ok(ProviderIdentity {
        provider,
        provider_account_id,
        display_name: profile.display_name.unwrap_or_else(|| "pilot".to_string()),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_profile_id_shapes() {
        let github: Profile = serde_json::from_str(r#"{"login": "octocat", "id": 583231}"#).unwrap();
        assert_eq!(github.display_name.as_deref(), Some("octocat"));
        assert!(matches!(github.id, serde_json::Value::Number(_)));

        let steam: Profile =
            serde_json::from_str(r#"{"personaname": "gaben", "steamid": "7656119"}"#).unwrap();
        assert_eq!(steam.display_name.as_deref(), Some("gaben"));
    }

    #[test]
    fn test_every_provider_has_endpoints() {
        for provider in [
            OAuthProvider::Github,
            OAuthProvider::Google,
            OAuthProvider::Steam,
        ] {
            let e = endpoints(provider);
            assert!(e.token_url.starts_with("https://"));
            assert!(e.profile_url.starts_with("https://"));
        }
    }
}
