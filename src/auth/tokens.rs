use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::CONFIG;
use crate::error::{Error, Result};
use crate::models::{AccountId, Role};

/// Access tokens are short-lived; refresh handles longevity.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
/// A second-factor challenge has five minutes to complete.
pub const CHALLENGE_TOKEN_TTL_SECS: i64 = 5 * 60;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

pub const SCOPE_FULL: &str = "full";
pub const SCOPE_MFA_CHALLENGE: &str = "mfa-challenge";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

impl Claims {
    pub fn account_id(&self) -> Result<AccountId> {
        let uuid = self
            .sub
            .parse()
            .map_err(|_| Error::AuthenticationRequired)?;
        Ok(AccountId(uuid))
    }

    pub fn role(&self) -> Role {
        match self.role.as_str() {
            "administrator" => Role::Administrator,
            _ => Role::Player,
        }
    }
}

fn issue(account: AccountId, role: Role, scope: &str, ttl_secs: i64) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: account.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + ttl_secs,
        scope: scope.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(CONFIG.jwt_secret.as_bytes()),
    )
    .map_err(|e| Error::Unavailable(format!("token signing: {}", e)))
}

pub fn issue_access_token(account: AccountId, role: Role) -> Result<String> {
    issue(account, role, SCOPE_FULL, ACCESS_TOKEN_TTL_SECS)
}

pub fn issue_challenge_token(account: AccountId, role: Role) -> Result<String> {
    issue(account, role, SCOPE_MFA_CHALLENGE, CHALLENGE_TOKEN_TTL_SECS)
}

pub fn verify_token(token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(CONFIG.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| Error::AuthenticationRequired)?;
    Ok(data.claims)
}

/// Full-scope check for request authorization; challenge tokens only pass
/// the second-factor endpoint.
pub fn verify_access_token(token: &str) -> Result<Claims> {
    let claims = verify_token(token)?;
    if claims.scope != SCOPE_FULL {
        return Err(Error::AuthenticationRequired);
    }
    Ok(claims)
}

pub fn verify_challenge_token(token: &str) -> Result<Claims> {
    let claims = verify_token(token)?;
    if claims.scope != SCOPE_MFA_CHALLENGE {
        return Err(Error::AuthenticationRequired);
    }
    Ok(claims)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_access_token_roundtrip() {
        let account = AccountId::new();
        let token = issue_access_token(account, Role::Player).unwrap();
        let claims = verify_access_token(&token).unwrap();
        assert_eq!(claims.account_id().unwrap(), account);
        assert_eq!(claims.role(), Role::Player);
        assert_eq!(claims.scope, SCOPE_FULL);
    }

    #[test]
    fn test_challenge_token_is_not_an_access_token() {
        let token = issue_challenge_token(AccountId::new(), Role::Player).unwrap();
        assert!(verify_access_token(&token).is_err());
        assert!(verify_challenge_token(&token).is_ok());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_access_token("not-a-token").is_err());
    }
}
