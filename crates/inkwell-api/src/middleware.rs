use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::error::{AppError, blocking};
use crate::session::{Identity, SESSION_COOKIE};
use crate::state::AppState;

/// Resolve the session cookie into an `Identity` request extension.
///
/// Runs on every route: handlers decide for themselves whether an anonymous
/// caller is acceptable.
pub async fn resolve_identity(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        Some(token) if !token.is_empty() => {
            let state = state.clone();
            blocking(move || state.sessions.resolve(&state.db, &token)).await?
        }
        _ => Identity::Anonymous,
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
