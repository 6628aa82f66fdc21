//! Mapping from store rows to wire models.
//!
//! Rows keep ids and timestamps as TEXT. A value that fails to parse is
//! logged and replaced with a default rather than failing the whole request.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use inkwell_db::models::{CommentRow, PostRow, ReactionRow, UserRow};
use inkwell_types::models::{
    Author, Comment, DEFAULT_PROFILE_PIC, Post, ReactionGroup, User,
};

pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') carry no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn profile_pic(stored: Option<&str>) -> String {
    stored.unwrap_or(DEFAULT_PROFILE_PIC).to_string()
}

pub fn user(row: &UserRow) -> User {
    User {
        id: parse_id(&row.id, "user"),
        username: row.username.clone(),
        profile_pic: profile_pic(row.profile_pic.as_deref()),
        created_at: parse_timestamp(&row.created_at),
    }
}

pub fn post(row: PostRow, reactions: Vec<ReactionGroup>) -> Post {
    Post {
        id: parse_id(&row.id, "post"),
        author: Author {
            id: parse_id(&row.user_id, "user"),
            username: row.author_username,
            profile_pic: profile_pic(row.author_profile_pic.as_deref()),
        },
        title: row.title,
        body: row.body,
        created_at: parse_timestamp(&row.created_at),
        updated_at: row.updated_at.as_deref().map(parse_timestamp),
        comment_count: row.comment_count.max(0) as u64,
        reactions,
    }
}

pub fn comment(row: CommentRow) -> Comment {
    Comment {
        id: parse_id(&row.id, "comment"),
        post_id: parse_id(&row.post_id, "post"),
        author: Author {
            id: parse_id(&row.user_id, "user"),
            username: row.author_username,
            profile_pic: profile_pic(row.author_profile_pic.as_deref()),
        },
        body: row.body,
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Group reaction rows by post, then by emoji. Groups are ordered by count
/// (highest first), ties broken by emoji so output is stable.
pub fn group_reactions(rows: &[ReactionRow]) -> HashMap<String, Vec<ReactionGroup>> {
    let mut by_post: HashMap<String, BTreeMap<String, Vec<Uuid>>> = HashMap::new();
    for r in rows {
        by_post
            .entry(r.post_id.clone())
            .or_default()
            .entry(r.emoji.clone())
            .or_default()
            .push(parse_id(&r.user_id, "user"));
    }

    by_post
        .into_iter()
        .map(|(post_id, emoji_map)| {
            let mut groups: Vec<ReactionGroup> = emoji_map
                .into_iter()
                .map(|(emoji, user_ids)| ReactionGroup {
                    emoji,
                    count: user_ids.len(),
                    user_ids,
                })
                .collect();
            groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.emoji.cmp(&b.emoji)));
            (post_id, groups)
        })
        .collect()
}
