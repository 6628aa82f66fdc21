use anyhow::anyhow;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use inkwell_db::Database;
use inkwell_types::api::Claims;

use crate::error::AppError;

pub const SESSION_COOKIE: &str = "inkwell_session";

/// Who is making the current request.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    User(SessionUser),
}

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
    sid_hash: String,
}

impl Identity {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Self::User(user) => Some(user),
            Self::Anonymous => None,
        }
    }

    /// The logged-in user, or `AppError::Permission` for anonymous callers.
    pub fn require_user(&self) -> Result<&SessionUser, AppError> {
        self.user().ok_or(AppError::Permission)
    }
}

/// Issues, resolves and revokes login sessions.
///
/// The cookie carries an HS256 JWT whose `sid` claim names a row in the
/// `sessions` table (stored as its SHA-256). A valid signature alone is not
/// enough: the row must still exist, so logout takes effect immediately.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
    cookie_secure: bool,
}

impl SessionManager {
    pub fn new(secret: &[u8], ttl_secs: i64, cookie_secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
            cookie_secure,
        }
    }

    /// Create a session row for the user and return the signed cookie value.
    pub fn issue(&self, db: &Database, user_id: Uuid, username: &str) -> Result<String, AppError> {
        let sid = new_session_id();
        db.create_session(&hash_sid(&sid), &user_id.to_string(), self.ttl_secs)?;

        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            sid,
            exp: (chrono::Utc::now() + chrono::Duration::seconds(self.ttl_secs)).timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| anyhow!("failed to sign session token: {}", e))?;
        Ok(token)
    }

    /// Resolve a cookie value. Anything short of a live session is anonymous.
    pub fn resolve(&self, db: &Database, token: &str) -> Result<Identity, AppError> {
        let claims = match decode::<Claims>(token, &self.decoding, &Validation::default()) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("Rejected session token: {}", e);
                return Ok(Identity::Anonymous);
            }
        };

        let sid_hash = hash_sid(&claims.sid);
        let Some(user) = db.get_session_user(&sid_hash)? else {
            debug!("Session for {} is revoked or expired", claims.username);
            return Ok(Identity::Anonymous);
        };

        if user.id != claims.sub.to_string() {
            warn!("Session row owner does not match token subject {}", claims.sub);
            return Ok(Identity::Anonymous);
        }

        Ok(Identity::User(SessionUser {
            id: claims.sub,
            username: user.username,
            sid_hash,
        }))
    }

    /// Delete the caller's session row. Returns false for anonymous callers.
    pub fn revoke(&self, db: &Database, identity: &Identity) -> Result<bool, AppError> {
        match identity {
            Identity::User(user) => Ok(db.delete_session(&user.sid_hash)?),
            Identity::Anonymous => Ok(false),
        }
    }

    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, "")).path("/").build()
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_sid(sid: &str) -> String {
    hex::encode(Sha256::digest(sid.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, SessionManager, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.create_user(&user_id.to_string(), "alice", "hash").unwrap();
        (db, SessionManager::new(b"test-secret", 3600, false), user_id)
    }

    #[test]
    fn issued_token_resolves_to_user() {
        let (db, sessions, user_id) = setup();
        let token = sessions.issue(&db, user_id, "alice").unwrap();

        let identity = sessions.resolve(&db, &token).unwrap();
        let user = identity.require_user().unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn revoked_token_resolves_to_anonymous() {
        let (db, sessions, user_id) = setup();
        let token = sessions.issue(&db, user_id, "alice").unwrap();
        let identity = sessions.resolve(&db, &token).unwrap();

        assert!(sessions.revoke(&db, &identity).unwrap());
        assert!(sessions.resolve(&db, &token).unwrap().user().is_none());
        assert!(!sessions.revoke(&db, &Identity::Anonymous).unwrap());
    }

    #[test]
    fn token_signed_with_other_secret_is_anonymous() {
        let (db, sessions, user_id) = setup();
        let token = sessions.issue(&db, user_id, "alice").unwrap();

        let other = SessionManager::new(b"another-secret", 3600, false);
        assert!(other.resolve(&db, &token).unwrap().user().is_none());
        assert!(sessions.resolve(&db, "garbage").unwrap().user().is_none());
    }

    #[test]
    fn anonymous_cannot_pass_require_user() {
        assert!(matches!(
            Identity::Anonymous.require_user(),
            Err(AppError::Permission)
        ));
    }

    #[test]
    fn session_ids_are_stored_hashed() {
        let sid = new_session_id();
        let hashed = hash_sid(&sid);
        assert_ne!(sid, hashed);
        assert_eq!(hashed.len(), 64);
    }

    #[test]
    fn cookie_is_http_only_and_lax() {
        let sessions = SessionManager::new(b"s", 60, true);
        let cookie = sessions.cookie("tok".into());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
