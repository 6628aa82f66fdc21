use axum::{
    Extension,
    extract::State,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use inkwell_db::Database;
use inkwell_db::models::ReactionChange;
use inkwell_types::api::{ToggleReactionRequest, ToggleReactionResponse};
use inkwell_types::models::ReactionOutcome;

use crate::error::{AppError, blocking};
use crate::extract::{Json, Path};
use crate::posts::load_post;
use crate::session::Identity;
use crate::state::AppState;
use crate::validate;

/// Toggle the caller's reaction on a post. A user holds at most one reaction
/// per post: the same emoji again removes it, a different one replaces it.
pub fn toggle_reaction(
    db: &Database,
    identity: &Identity,
    post_id: Uuid,
    req: ToggleReactionRequest,
) -> Result<ToggleReactionResponse, AppError> {
    let user = identity.require_user()?;
    let emoji = validate::emoji(&req.emoji)?;

    let post_id = post_id.to_string();
    if db.get_post(&post_id)?.is_none() {
        return Err(AppError::NotFound("post"));
    }

    let change = db.toggle_reaction(&post_id, &user.id.to_string(), &emoji)?;
    debug!("{} reaction {:?} on post {}: {:?}", user.username, emoji, post_id, change);

    let (outcome, active) = match change {
        ReactionChange::Added => (ReactionOutcome::Added, Some(emoji)),
        ReactionChange::Replaced { .. } => (ReactionOutcome::Replaced, Some(emoji)),
        ReactionChange::Removed => (ReactionOutcome::Removed, None),
    };

    let post = load_post(db, &post_id)?;
    Ok(ToggleReactionResponse {
        outcome,
        emoji: active,
        reactions: post.reactions,
    })
}

/// POST /posts/{post_id}/reactions
pub async fn toggle(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = blocking(move || toggle_reaction(&state.db, &identity, post_id, req)).await?;
    Ok(Json(result))
}
