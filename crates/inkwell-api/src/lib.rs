pub mod auth;
pub mod comments;
pub mod convert;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod password;
pub mod posts;
pub mod reactions;
pub mod routes;
pub mod session;
pub mod state;
pub mod uploads;
pub mod validate;

pub use error::AppError;
pub use routes::router;
pub use state::{AppState, AppStateInner};

#[cfg(test)]
pub(crate) mod test_support {
    use inkwell_db::Database;

    use crate::session::{Identity, SessionManager};

    /// Create `username` and return a resolved, logged-in identity.
    pub fn login(db: &Database, username: &str) -> Identity {
        let user = crate::auth::register_user(db, username, "p@ss1").unwrap();
        let sessions = SessionManager::new(b"test-secret", 3600, false);
        let token = sessions.issue(db, user.id, &user.username).unwrap();
        sessions.resolve(db, &token).unwrap()
    }
}
