//! Database row types. These map directly to SQLite rows and stay distinct
//! from the inkwell-types API models to keep the store layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub profile_pic: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub author_username: String,
    pub author_profile_pic: Option<String>,
    pub title: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub comment_count: i64,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    /// Owner of the parent post; they may delete any comment under it.
    pub post_owner_id: String,
    pub user_id: String,
    pub author_username: String,
    pub author_profile_pic: Option<String>,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub post_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Result of toggling a user's reaction on a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Replaced { previous: String },
    Removed,
}
