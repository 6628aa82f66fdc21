use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use inkwell_db::models::PostRow;
use inkwell_db::{Database, TIMESTAMP_FORMAT};
use inkwell_types::api::{CreatePostRequest, PostDetail, UpdatePostRequest};
use inkwell_types::models::Post;

use crate::convert;
use crate::error::{AppError, blocking};
use crate::extract::{Json, Path, Query};
use crate::session::{Identity, SessionUser};
use crate::state::AppState;
use crate::validate;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PostListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: pass the `created_at` and `id` of the last post on the
    /// previous page to fetch the next one.
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    20
}

// -- Service --

pub fn create_post(db: &Database, identity: &Identity, req: CreatePostRequest) -> Result<Post, AppError> {
    let user = identity.require_user()?;
    let title = validate::title(&req.title)?;
    let body = validate::post_body(&req.body)?;

    let post_id = Uuid::new_v4().to_string();
    db.insert_post(&post_id, &user.id.to_string(), &title, &body)?;
    info!("Post {} created by {}", post_id, user.username);

    load_post(db, &post_id)
}

pub fn edit_post(
    db: &Database,
    identity: &Identity,
    post_id: Uuid,
    req: UpdatePostRequest,
) -> Result<Post, AppError> {
    let user = identity.require_user()?;
    let row = owned_post(db, user, post_id)?;
    let title = validate::title(&req.title)?;
    let body = validate::post_body(&req.body)?;

    if !db.update_post(&row.id, &title, &body)? {
        return Err(AppError::NotFound("post"));
    }
    info!("Post {} edited by {}", row.id, user.username);

    load_post(db, &row.id)
}

/// Comments and reactions on the post are removed with it.
pub fn delete_post(db: &Database, identity: &Identity, post_id: Uuid) -> Result<(), AppError> {
    let user = identity.require_user()?;
    let row = owned_post(db, user, post_id)?;

    if !db.delete_post(&row.id)? {
        return Err(AppError::NotFound("post"));
    }
    info!("Post {} deleted by {}", row.id, user.username);
    Ok(())
}

pub fn list_posts(db: &Database, query: &PostListQuery) -> Result<Vec<Post>, AppError> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let before_ts = query.before.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string());
    let before_id = query.before_id.map(|id| id.to_string());
    let before = before_ts
        .as_deref()
        .map(|ts| (ts, before_id.as_deref()));

    let rows = db.list_posts(limit, before)?;
    let post_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut reactions = convert::group_reactions(&db.get_reactions_for_posts(&post_ids)?);

    Ok(rows
        .into_iter()
        .map(|row| {
            let groups = reactions.remove(&row.id).unwrap_or_default();
            convert::post(row, groups)
        })
        .collect())
}

pub fn get_post(db: &Database, identity: &Identity, post_id: Uuid) -> Result<PostDetail, AppError> {
    let id = post_id.to_string();
    let post = load_post(db, &id)?;
    let comments = db
        .get_comments_for_post(&id)?
        .into_iter()
        .map(convert::comment)
        .collect();
    let my_reaction = match identity.user() {
        Some(user) => db.get_user_reaction(&id, &user.id.to_string())?,
        None => None,
    };

    Ok(PostDetail {
        post,
        comments,
        my_reaction,
    })
}

pub(crate) fn load_post(db: &Database, id: &str) -> Result<Post, AppError> {
    let row = db.get_post(id)?.ok_or(AppError::NotFound("post"))?;
    let mut reactions = convert::group_reactions(&db.get_reactions_for_posts(&[row.id.clone()])?);
    let groups = reactions.remove(&row.id).unwrap_or_default();
    Ok(convert::post(row, groups))
}

fn owned_post(db: &Database, user: &SessionUser, post_id: Uuid) -> Result<PostRow, AppError> {
    let row = db
        .get_post(&post_id.to_string())?
        .ok_or(AppError::NotFound("post"))?;

    if row.user_id != user.id.to_string() {
        warn!("{} tried to modify post {} owned by {}", user.username, row.id, row.author_username);
        return Err(AppError::Forbidden("post"));
    }
    Ok(row)
}

// -- Handlers --

/// GET /posts: newest first, paginated by `before` and `before_id`.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let posts = blocking(move || list_posts(&state.db, &query)).await?;
    Ok(Json(posts))
}

/// POST /posts
pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let post = blocking(move || create_post(&state.db, &identity, req)).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /posts/{post_id}: the post with its comments and reactions.
pub async fn show(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let detail = blocking(move || get_post(&state.db, &identity, post_id)).await?;
    Ok(Json(detail))
}

/// PUT /posts/{post_id}
pub async fn update(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let post = blocking(move || edit_post(&state.db, &identity, post_id, req)).await?;
    Ok(Json(post))
}

/// DELETE /posts/{post_id}
pub async fn remove(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, AppError> {
    blocking(move || delete_post(&state.db, &identity, post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
