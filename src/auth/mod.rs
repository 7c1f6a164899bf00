pub mod mfa;
pub mod oauth;
pub mod tokens;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::AsyncConnection as _;
use lazy_static::lazy_static;
use rand::RngCore as _;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::database::db_models::NewRefreshToken;
use crate::database::{global, regional, DbClient};
use crate::error::{Error, Result};
use crate::models::{
    Account, AccountId, HullClass, InsuranceTier, Membership, MembershipType, OAuthProvider,
    Player, PlayerId, RegionName, Role, SectorIndex, Ship, ShipId,
};
use crate::util::to_hex;

lazy_static! {
    static ref HANDLE_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{3,20}$").expect("Invalid handle regex");
}

const MIN_CREDENTIAL_LEN: usize = 8;
const MAX_CREDENTIAL_LEN: usize = 128;
const STARTING_CREDITS: i64 = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Tokens(TokenPair),
    SecondFactorRequired { challenge_token: String },
}

pub fn hash_credential(credential: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(credential.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Unavailable(format!("credential hashing: {}", e)))
}

pub fn verify_credential(credential: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(credential.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn validate_registration(handle: &str, email: &str, credential: &str) -> Result<()> {
    if !HANDLE_RE.is_match(handle) {
        return Err(Error::validation(
            "handle",
            "3-20 characters, alphanumerics, dash, underscore",
        ));
    }
    if !email.contains('@') || email.len() > 254 {
        return Err(Error::validation("email", "not a valid address"));
    }
    if credential.len() < MIN_CREDENTIAL_LEN {
        return Err(Error::validation("credential", "too short"));
    }
    if credential.len() > MAX_CREDENTIAL_LEN {
        return Err(Error::validation("credential", "too long"));
    }
    Ok(())
}

fn starter_ship(pilot: PlayerId) -> Ship {
    Ship {
        id: ShipId::new(),
        name: "Surplus Scout".to_string(),
        pilot,
        shared_with_team: None,
        hull_class: HullClass::Scout,
        sector: SectorIndex(1),
        condition: 1.0,
        shield: 20,
        max_shield: 20,
        fuel: 60,
        max_fuel: 60,
        cargo_capacity: 40,
        cargo: Default::default(),
        insurance: InsuranceTier::None,
        modification_slots: 1,
        modifications: vec![],
        maintenance_debt: 0,
    }
}

/// Register a new account. The player persona lands in the Central Nexus
/// with a resident membership and a surplus scout.
pub async fn register(
    db: &DbClient,
    handle: &str,
    email: &str,
    credential: &str,
) -> Result<(Account, Player)> {
    validate_registration(handle, email, credential)?;
    let now = Utc::now();
    let account = Account {
        id: AccountId::new(),
        handle: handle.to_string(),
        email: email.to_string(),
        credential_hash: hash_credential(credential)?,
        role: Role::Player,
        mfa_enabled: false,
        mfa_secret: None,
        backup_code_hashes: vec![],
        oauth_bindings: vec![],
        disabled: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    let player = Player {
        id: PlayerId::new(),
        account_id: account.id,
        callsign: handle.to_ascii_uppercase(),
        current_region: RegionName::nexus(),
        current_sector: SectorIndex(1),
        current_ship: None,
        credits: STARTING_CREDITS,
        faction_reputation: Default::default(),
        created_at: now,
        updated_at: now,
    };
    let ship = starter_ship(player.id);
    let mut player = player;
    player.current_ship = Some(ship.id);

    let membership = Membership {
        player_id: player.id,
        region: RegionName::nexus(),
        membership_type: MembershipType::Resident,
        reputation: 0,
        voting_weight: 1.0,
        visit_count: 1,
        last_visit: now,
        created_at: now,
        updated_at: now,
    };

    {
        let mut conn = db.conn().await?;
        let account = &account;
        let player = &player;
        let membership = &membership;
        conn.transaction::<(), Error, _>(|conn| {
            async move {
                global::insert_account(conn, account).await?;
                global::insert_player(conn, player).await?;
                global::insert_membership(conn, membership).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
    }
    {
        let mut conn = db.region_conn(&RegionName::nexus()).await?;
        regional::insert_ship(&mut conn, &ship).await?;
    }
    Ok((account, player))
}

fn new_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn token_hash(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

async fn issue_token_pair(
    db: &DbClient,
    account: &Account,
    family: Uuid,
    fingerprint: &str,
) -> Result<TokenPair> {
    let refresh_token = new_opaque_token();
    let hash = token_hash(&refresh_token);
    let row = NewRefreshToken {
        id: Uuid::new_v4(),
        account_id: account.id.0,
        family,
        token_hash: &hash,
        device_fingerprint: fingerprint,
        expires_at: Utc::now() + Duration::days(tokens::REFRESH_TOKEN_TTL_DAYS),
    };
    let mut conn = db.conn().await?;
    global::insert_refresh_token(&mut conn, &row).await?;
    Ok(TokenPair {
        access_token: tokens::issue_access_token(account.id, account.role)?,
        refresh_token,
        expires_in: tokens::ACCESS_TOKEN_TTL_SECS,
    })
}

pub async fn login(
    db: &DbClient,
    handle: &str,
    credential: &str,
    fingerprint: &str,
) -> Result<LoginOutcome> {
    let account = {
        let mut conn = db.conn().await?;
        global::get_account_by_handle(&mut conn, handle).await?
    };
    let account = match account {
        Some(account) => account,
        None => {
            // Burn a verification anyway so a missing handle costs the
            // same as a wrong credential.
            let _ = verify_credential(credential, "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
            return Err(Error::InvalidCredential);
        }
    };
    if !account.is_active() {
        return Err(Error::AccountDisabled);
    }
    if !verify_credential(credential, &account.credential_hash) {
        return Err(Error::InvalidCredential);
    }
    if account.mfa_enabled {
        let challenge_token = tokens::issue_challenge_token(account.id, account.role)?;
        return Ok(LoginOutcome::SecondFactorRequired { challenge_token });
    }
    let pair = issue_token_pair(db, &account, Uuid::new_v4(), fingerprint).await?;
    Ok(LoginOutcome::Tokens(pair))
}

/// Exchange a valid second-factor code (TOTP or backup) plus the
/// challenge token for a full pair.
pub async fn complete_challenge(
    db: &DbClient,
    challenge_token: &str,
    code: &str,
    fingerprint: &str,
) -> Result<TokenPair> {
    let claims = tokens::verify_challenge_token(challenge_token)?;
    let account_id = claims.account_id()?;
    let mut account = {
        let mut conn = db.conn().await?;
        global::get_account(&mut conn, account_id).await?
    };
    if !account.is_active() {
        return Err(Error::AccountDisabled);
    }
    let secret = account
        .mfa_secret
        .clone()
        .ok_or(Error::SecondFactorInvalid)?;
    let now = Utc::now().timestamp();
    if !mfa::verify_totp(&secret, code, now)? {
        match mfa::consume_backup_code(&account.backup_code_hashes, code) {
            Some(remaining) => {
                account.backup_code_hashes = remaining;
                let mut conn = db.conn().await?;
                global::update_account(&mut conn, &account).await?;
            }
            None => return Err(Error::SecondFactorInvalid),
        }
    }
    issue_token_pair(db, &account, Uuid::new_v4(), fingerprint).await
}

/// Single-use rotating refresh. Reuse of a spent token revokes the whole
/// family; a fingerprint mismatch does the same.
pub async fn rotate_refresh(
    db: &DbClient,
    refresh_token: &str,
    fingerprint: &str,
) -> Result<TokenPair> {
    let hash = token_hash(refresh_token);
    let mut conn = db.conn().await?;
    let row = global::get_refresh_token_by_hash(&mut conn, &hash)
        .await?
        .ok_or(Error::AuthenticationRequired)?;
    if row.revoked || row.expires_at < Utc::now() {
        return Err(Error::AuthenticationRequired);
    }
    if row.used {
        warn!("refresh token reuse for account {}", row.account_id);
        global::revoke_token_family(&mut conn, row.family).await?;
        global::insert_audit(
            &mut conn,
            Some(AccountId(row.account_id)),
            "auth.refresh_reuse",
            serde_json::json!({ "family": row.family }),
            None,
        )
        .await?;
        return Err(Error::AuthenticationRequired);
    }
    if row.device_fingerprint != fingerprint {
        global::revoke_token_family(&mut conn, row.family).await?;
        return Err(Error::AuthenticationRequired);
    }
    global::mark_refresh_token_used(&mut conn, row.id).await?;
    let account = global::get_account(&mut conn, AccountId(row.account_id)).await?;
    drop(conn);
    if !account.is_active() {
        return Err(Error::AccountDisabled);
    }
    issue_token_pair(db, &account, row.family, fingerprint).await
}

/// Begin TOTP enrollment; returns the secret and fresh backup codes. The
/// factor arms only after `verify_enrollment` sees a valid code.
pub async fn enroll_mfa(db: &DbClient, account_id: AccountId) -> Result<(String, Vec<String>)> {
    let mut conn = db.conn().await?;
    let mut account = global::get_account(&mut conn, account_id).await?;
    let secret = mfa::generate_secret();
    let backup_codes = mfa::generate_backup_codes(8);
    account.mfa_secret = Some(secret.clone());
    account.backup_code_hashes = backup_codes.iter().map(|c| mfa::hash_backup_code(c)).collect();
    account.mfa_enabled = false;
    global::update_account(&mut conn, &account).await?;
    Ok((secret, backup_codes))
}

pub async fn verify_enrollment(db: &DbClient, account_id: AccountId, code: &str) -> Result<()> {
    let mut conn = db.conn().await?;
    let mut account = global::get_account(&mut conn, account_id).await?;
    let secret = account.mfa_secret.clone().ok_or(Error::SecondFactorInvalid)?;
    if !mfa::verify_totp(&secret, code, Utc::now().timestamp())? {
        return Err(Error::SecondFactorInvalid);
    }
    account.mfa_enabled = true;
    global::update_account(&mut conn, &account).await?;
    Ok(())
}

/// Credential change revokes every outstanding session.
pub async fn change_credential(
    db: &DbClient,
    account_id: AccountId,
    current: &str,
    new_credential: &str,
) -> Result<()> {
    if new_credential.len() < MIN_CREDENTIAL_LEN || new_credential.len() > MAX_CREDENTIAL_LEN {
        return Err(Error::validation("credential", "length out of bounds"));
    }
    let mut conn = db.conn().await?;
    let mut account = global::get_account(&mut conn, account_id).await?;
    if !verify_credential(current, &account.credential_hash) {
        return Err(Error::InvalidCredential);
    }
    account.credential_hash = hash_credential(new_credential)?;
    global::update_account(&mut conn, &account).await?;
    global::revoke_account_tokens(&mut conn, account_id).await?;
    Ok(())
}

pub async fn revoke_sessions(db: &DbClient, account_id: AccountId) -> Result<usize> {
    let mut conn = db.conn().await?;
    global::revoke_account_tokens(&mut conn, account_id).await
}

/// Sign in (or sign up) through an external provider. First bind creates
/// a player-role account named after the provider profile.
pub async fn oauth_signin(
    db: &DbClient,
    client: &reqwest::Client,
    provider: OAuthProvider,
    code: &str,
    redirect_uri: &str,
    fingerprint: &str,
) -> Result<TokenPair> {
    let identity = oauth::exchange_code(client, provider, code, redirect_uri).await?;
    let existing = {
        let mut conn = db.conn().await?;
        global::get_account_by_binding(&mut conn, provider, &identity.provider_account_id).await?
    };
    let account = match existing {
        Some(account) => {
            if !account.is_active() {
                return Err(Error::AccountDisabled);
            }
            account
        }
        None => {
            // Derive a unique handle from the display name.
            let base: String = identity
                .display_name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(12)
                .collect();
            let base = if base.len() < 3 { "pilot".to_string() } else { base };
            let mut suffix = [0u8; 2];
            rand::rng().fill_bytes(&mut suffix);
            let handle = format!("{}-{}", base, to_hex(&suffix));
            let random_credential = new_opaque_token();
            let (mut account, _player) =
                register(db, &handle, &format!("{}@external.invalid", handle), &random_credential)
                    .await?;
            account.oauth_bindings.push(crate::models::OAuthBinding {
                provider,
                provider_account_id: identity.provider_account_id.clone(),
                display_name: identity.display_name.clone(),
            });
            let mut conn = db.conn().await?;
            global::update_account(&mut conn, &account).await?;
            account
        }
    };
    issue_token_pair(db, &account, Uuid::new_v4(), fingerprint).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_credential_hash_verify() {
        let hash = hash_credential("S3cret!pass").unwrap();
        assert!(verify_credential("S3cret!pass", &hash));
        assert!(!verify_credential("wrong", &hash));
        assert!(!verify_credential("S3cret!pass", "garbage-hash"));
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration("Alex", "a@x", "S3cret!pass").is_ok());
        assert!(validate_registration("ab", "a@x", "S3cret!pass").is_err());
        assert!(validate_registration("Alex", "nope", "S3cret!pass").is_err());
        assert!(validate_registration("Alex", "a@x", "short").is_err());
        assert!(validate_registration("bad handle!", "a@x", "S3cret!pass").is_err());
    }

    #[test]
    fn test_opaque_tokens_unique() {
        assert_ne!(new_opaque_token(), new_opaque_token());
    }
}
