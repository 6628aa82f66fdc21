use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::services::ServeDir;

use crate::middleware::resolve_identity;
use crate::state::AppState;
use crate::{auth, comments, posts, reactions, uploads};

/// Build the full application router. Every route sees the caller's
/// `Identity`; uploaded files are served read-only under `/uploads`.
pub fn router(state: AppState) -> Router {
    // Leave headroom so oversized uploads reach the handler's own check.
    let upload_limit = state.uploads.max_bytes() + 64 * 1024;

    let api = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users/{username}", get(auth::profile))
        .route("/account", delete(auth::delete_account))
        .route("/posts", get(posts::list).post(posts::create))
        .route(
            "/posts/{post_id}",
            get(posts::show).put(posts::update).delete(posts::remove),
        )
        .route("/posts/{post_id}/comments", post(comments::create))
        .route("/comments/{comment_id}", delete(comments::remove))
        .route("/posts/{post_id}/reactions", post(reactions::toggle))
        .route(
            "/profile/picture",
            put(uploads::upload_profile_picture).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), resolve_identity))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .nest_service("/uploads", ServeDir::new(state.uploads.dir()))
        .merge(api)
}

async fn health() -> &'static str {
    "ok"
}
