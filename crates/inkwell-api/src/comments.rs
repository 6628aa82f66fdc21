use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use inkwell_db::Database;
use inkwell_types::api::CreateCommentRequest;
use inkwell_types::models::Comment;

use crate::convert;
use crate::error::{AppError, blocking};
use crate::extract::{Json, Path};
use crate::session::Identity;
use crate::state::AppState;
use crate::validate;

pub fn add_comment(
    db: &Database,
    identity: &Identity,
    post_id: Uuid,
    req: CreateCommentRequest,
) -> Result<Comment, AppError> {
    let user = identity.require_user()?;
    let body = validate::comment_body(&req.body)?;

    let post_id = post_id.to_string();
    if db.get_post(&post_id)?.is_none() {
        return Err(AppError::NotFound("post"));
    }

    let comment_id = Uuid::new_v4().to_string();
    db.insert_comment(&comment_id, &post_id, &user.id.to_string(), &body)?;
    info!("Comment {} on post {} by {}", comment_id, post_id, user.username);

    let row = db
        .get_comment(&comment_id)?
        .ok_or(AppError::NotFound("comment"))?;
    Ok(convert::comment(row))
}

/// The comment's author or the owner of the post it sits under may delete it.
pub fn delete_comment(db: &Database, identity: &Identity, comment_id: Uuid) -> Result<(), AppError> {
    let user = identity.require_user()?;
    let row = db
        .get_comment(&comment_id.to_string())?
        .ok_or(AppError::NotFound("comment"))?;

    let caller = user.id.to_string();
    if row.user_id != caller && row.post_owner_id != caller {
        warn!("{} tried to delete comment {} by {}", user.username, row.id, row.author_username);
        return Err(AppError::Forbidden("comment"));
    }

    if !db.delete_comment(&row.id)? {
        return Err(AppError::NotFound("comment"));
    }
    info!("Comment {} deleted by {}", row.id, user.username);
    Ok(())
}

/// POST /posts/{post_id}/comments
pub async fn create(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let comment = blocking(move || add_comment(&state.db, &identity, post_id, req)).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// DELETE /comments/{comment_id}
pub async fn remove(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, AppError> {
    blocking(move || delete_comment(&state.db, &identity, comment_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::{create_post, get_post};
    use crate::test_support::login;
    use inkwell_types::api::CreatePostRequest;

    fn comment(body: &str) -> CreateCommentRequest {
        CreateCommentRequest { body: body.into() }
    }

    fn setup() -> (Database, Identity, Identity, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let post = create_post(
            &db,
            &alice,
            CreatePostRequest {
                title: "t".into(),
                body: "b".into(),
            },
        )
        .unwrap();
        (db, alice, bob, post.id)
    }

    #[test]
    fn comment_requires_login_and_existing_post() {
        let (db, _, bob, post_id) = setup();
        assert!(matches!(
            add_comment(&db, &Identity::Anonymous, post_id, comment("hi")).unwrap_err(),
            AppError::Permission
        ));
        assert!(matches!(
            add_comment(&db, &bob, Uuid::new_v4(), comment("hi")).unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            add_comment(&db, &bob, post_id, comment("  ")).unwrap_err(),
            AppError::Validation(_)
        ));

        let c = add_comment(&db, &bob, post_id, comment("nice post")).unwrap();
        assert_eq!(c.author.username, "bob");
        assert_eq!(c.post_id, post_id);

        let detail = get_post(&db, &bob, post_id).unwrap();
        assert_eq!(detail.post.comment_count, 1);
        assert_eq!(detail.comments[0].body, "nice post");
    }

    #[test]
    fn comment_owner_can_delete() {
        let (db, _, bob, post_id) = setup();
        let c = add_comment(&db, &bob, post_id, comment("mine")).unwrap();
        delete_comment(&db, &bob, c.id).unwrap();
        assert!(matches!(
            delete_comment(&db, &bob, c.id).unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn post_owner_can_delete_any_comment() {
        let (db, alice, bob, post_id) = setup();
        let c = add_comment(&db, &bob, post_id, comment("rude")).unwrap();
        delete_comment(&db, &alice, c.id).unwrap();
    }

    #[test]
    fn third_party_cannot_delete() {
        let (db, alice, bob, post_id) = setup();
        let carol = login(&db, "carol");
        let c = add_comment(&db, &bob, post_id, comment("hello")).unwrap();
        assert!(matches!(
            delete_comment(&db, &carol, c.id).unwrap_err(),
            AppError::Forbidden(_)
        ));

        // Commenter cannot remove the post owner's comment either.
        let own = add_comment(&db, &alice, post_id, comment("thanks")).unwrap();
        assert!(matches!(
            delete_comment(&db, &bob, own.id).unwrap_err(),
            AppError::Forbidden(_)
        ));
    }
}
