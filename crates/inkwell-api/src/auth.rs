use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};
use uuid::Uuid;

use inkwell_db::{Database, is_unique_violation};
use inkwell_types::api::{AuthResponse, LoginRequest, SignupRequest};
use inkwell_types::models::User;

use crate::convert;
use crate::error::{AppError, blocking};
use crate::extract::{Json, Path};
use crate::password::{hash_password, verify_against_dummy, verify_password};
use crate::session::Identity;
use crate::state::AppState;
use crate::validate;

// -- Service --

/// Create an account. The stored password is an Argon2id hash.
pub fn register_user(db: &Database, username: &str, password: &str) -> Result<User, AppError> {
    let username = validate::username(username)?;
    validate::password(password)?;

    if db.get_user_by_username(&username)?.is_some() {
        return Err(AppError::UsernameTaken);
    }

    let password_hash = hash_password(password)?;
    let user_id = Uuid::new_v4().to_string();

    // A concurrent signup can still win the race; the UNIQUE constraint decides.
    db.create_user(&user_id, &username, &password_hash)
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::UsernameTaken
            } else {
                AppError::Internal(e)
            }
        })?;

    let row = db
        .get_user_by_id(&user_id)?
        .ok_or(AppError::NotFound("user"))?;
    info!("User {} signed up", row.username);
    Ok(convert::user(&row))
}

/// Check credentials. Unknown usernames and wrong passwords are
/// indistinguishable to the caller.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<User, AppError> {
    let Some(row) = db.get_user_by_username(username)? else {
        verify_against_dummy(password);
        warn!("Login failed for unknown user");
        return Err(AppError::Authentication);
    };

    if !verify_password(&row.password, password) {
        warn!("Login failed for {}", row.username);
        return Err(AppError::Authentication);
    }

    Ok(convert::user(&row))
}

/// Create `username` if it does not exist yet. Returns true when created.
pub fn ensure_user(db: &Database, username: &str, password: &str) -> Result<bool, AppError> {
    match register_user(db, username, password) {
        Ok(_) => Ok(true),
        Err(AppError::UsernameTaken) => Ok(false),
        Err(e) => Err(e),
    }
}

// -- Handlers --

/// POST /auth/signup: creates the account and logs it in.
pub async fn signup(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let worker = state.clone();
    let (user, token) = blocking(move || {
        let user = register_user(&worker.db, &req.username, &req.password)?;
        worker.sessions.revoke(&worker.db, &identity)?;
        let token = worker.sessions.issue(&worker.db, user.id, &user.username)?;
        Ok((user, token))
    })
    .await?;

    let jar = jar.add(state.sessions.cookie(token));
    Ok((StatusCode::CREATED, jar, Json(AuthResponse { user })))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let worker = state.clone();
    let (user, token) = blocking(move || {
        let user = authenticate(&worker.db, &req.username, &req.password)?;
        worker.sessions.revoke(&worker.db, &identity)?;
        let token = worker.sessions.issue(&worker.db, user.id, &user.username)?;
        Ok((user, token))
    })
    .await?;

    info!("User {} logged in", user.username);
    let jar = jar.add(state.sessions.cookie(token));
    Ok((StatusCode::OK, jar, Json(AuthResponse { user })))
}

/// POST /auth/logout: always succeeds; revokes the session if there is one.
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let worker = state.clone();
    let username = identity.user().map(|u| u.username.clone());
    let revoked = blocking(move || worker.sessions.revoke(&worker.db, &identity)).await?;

    if let (true, Some(username)) = (revoked, username) {
        info!("User {} logged out", username);
    }

    let jar = jar.remove(state.sessions.removal_cookie());
    Ok((StatusCode::NO_CONTENT, jar))
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.require_user()?.id.to_string();
    let row = blocking(move || Ok(state.db.get_user_by_id(&user_id)?))
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(convert::user(&row)))
}

/// GET /users/{username}
pub async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let row = blocking(move || Ok(state.db.get_user_by_username(&username)?))
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(convert::user(&row)))
}

/// DELETE /account: removes the caller and everything they own.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let user = identity.require_user()?;
    let worker = state.clone();
    let user_id = user.id.to_string();
    let removed = blocking(move || Ok(worker.db.delete_user(&user_id)?))
        .await?
        .ok_or(AppError::NotFound("user"))?;

    if let Some(pic) = removed.profile_pic.as_deref() {
        if let Err(e) = state.uploads.delete_url(pic).await {
            warn!("Failed to delete picture of removed account: {}", e);
        }
    }

    info!("User {} deleted their account", removed.username);
    let jar = jar.remove(state.sessions.removal_cookie());
    Ok((StatusCode::NO_CONTENT, jar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_then_login() {
        let db = Database::open_in_memory().unwrap();
        let user = register_user(&db, "alice", "p@ss1").unwrap();
        assert_eq!(user.username, "alice");

        let stored = db.get_user_by_username("alice").unwrap().unwrap();
        assert_ne!(stored.password, "p@ss1");

        assert!(matches!(
            authenticate(&db, "alice", "wrong").unwrap_err(),
            AppError::Authentication
        ));
        assert_eq!(authenticate(&db, "alice", "p@ss1").unwrap().id, user.id);
    }

    #[test]
    fn unknown_user_looks_like_bad_password() {
        let db = Database::open_in_memory().unwrap();
        let err = authenticate(&db, "nobody", "whatever").unwrap_err();
        assert!(matches!(err, AppError::Authentication));
        assert_eq!(err.to_string(), AppError::Authentication.to_string());
    }

    #[test]
    fn duplicate_signup_conflicts() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, "alice", "p@ss1").unwrap();
        assert!(matches!(
            register_user(&db, "alice", "other").unwrap_err(),
            AppError::UsernameTaken
        ));
    }

    #[test]
    fn signup_validates_input() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            register_user(&db, "a", "p@ss1").unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            register_user(&db, "alice", "abc").unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(ensure_user(&db, "admin", "admin123").unwrap());
        assert!(!ensure_user(&db, "admin", "different").unwrap());
        assert!(authenticate(&db, "admin", "admin123").is_ok());
    }
}
