use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "player")]
    Player,
    #[serde(rename = "administrator")]
    Administrator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Player => write!(f, "player"),
            Role::Administrator => write!(f, "administrator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthProvider {
    #[serde(rename = "github")]
    Github,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "steam")]
    Steam,
}

impl OAuthProvider {
    pub fn from_str(s: &str) -> Option<OAuthProvider> {
        match s {
            "github" => Some(OAuthProvider::Github),
            "google" => Some(OAuthProvider::Google),
            "steam" => Some(OAuthProvider::Steam),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Github => "github",
            OAuthProvider::Google => "google",
            OAuthProvider::Steam => "steam",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthBinding {
    pub provider: OAuthProvider,
    pub provider_account_id: String,
    pub display_name: String,
}

/// Authentication principal. The credential hash never leaves the auth
/// module; this struct is the persisted aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub handle: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub role: Role,
    pub mfa_enabled: bool,
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    #[serde(skip_serializing)]
    pub backup_code_hashes: Vec<String>,
    pub oauth_bindings: Vec<OAuthBinding>,
    pub disabled: bool,
    /// Soft delete; tombstoned accounts keep their audit chain.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        !self.disabled && self.deleted_at.is_none()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }

    pub fn binding_for(&self, provider: OAuthProvider) -> Option<&OAuthBinding> {
        self.oauth_bindings.iter().find(|b| b.provider == provider)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_role_serialisation() {
        assert_eq!(serde_json::to_string(&Role::Player).unwrap(), "\"player\"");
        let role: Role = serde_json::from_str("\"administrator\"").unwrap();
        assert_eq!(role, Role::Administrator);
    }

    #[test]
    fn test_provider_roundtrip() {
        for p in [
            OAuthProvider::Github,
            OAuthProvider::Google,
            OAuthProvider::Steam,
        ] {
            assert_eq!(OAuthProvider::from_str(p.as_str()), Some(p));
        }
        assert_eq!(OAuthProvider::from_str("gitlab"), None);
    }
}
