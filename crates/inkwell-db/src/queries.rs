use crate::Database;
use crate::models::{CommentRow, PostRow, ReactionChange, ReactionRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

const POST_COLUMNS: &str = "p.id, p.user_id, u.username, u.profile_pic, p.title, p.body, p.created_at, p.updated_at,
     (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)";

const COMMENT_COLUMNS: &str =
    "c.id, c.post_id, p.user_id, c.user_id, u.username, u.profile_pic, c.body, c.created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Point the user at a new profile picture.
    ///
    /// Returns `None` when the user does not exist (nothing was updated),
    /// otherwise `Some` of the previous reference.
    pub fn set_profile_pic(&self, user_id: &str, profile_pic: &str) -> Result<Option<Option<String>>> {
        self.with_tx(|conn| {
            let previous: Option<Option<String>> = conn
                .query_row("SELECT profile_pic FROM users WHERE id = ?1", [user_id], |row| row.get(0))
                .optional()?;
            let n = conn.execute(
                "UPDATE users SET profile_pic = ?2 WHERE id = ?1",
                (user_id, profile_pic),
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(previous)
        })
    }

    /// Remove a user and, through cascades, everything they own.
    /// Returns the deleted row so callers can clean up the profile picture.
    pub fn delete_user(&self, user_id: &str) -> Result<Option<UserRow>> {
        self.with_tx(|conn| {
            let user = query_user(conn, "id", user_id)?;
            if user.is_some() {
                conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            }
            Ok(user)
        })
    }

    // -- Sessions --

    pub fn create_session(&self, id_hash: &str, user_id: &str, ttl_secs: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id_hash, user_id, expires_at)
                 VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?3 || ' seconds'))",
                params![id_hash, user_id, format!("{:+}", ttl_secs)],
            )?;
            Ok(())
        })
    }

    /// The user owning an unexpired session, if any.
    pub fn get_session_user(&self, id_hash: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT u.id, u.username, u.password, u.profile_pic, u.created_at
                 FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.id_hash = ?1
                   AND s.expires_at > strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                [id_hash],
                user_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn delete_session(&self, id_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE id_hash = ?1", [id_hash])?;
            Ok(n > 0)
        })
    }

    pub fn delete_expired_sessions(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                [],
            )?;
            Ok(n)
        })
    }

    // -- Posts --

    pub fn insert_post(&self, id: &str, user_id: &str, title: &str, body: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, title, body) VALUES (?1, ?2, ?3, ?4)",
                (id, user_id, title, body),
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS}
                 FROM posts p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.id = ?1"
            );
            conn.query_row(&sql, [id], post_from_row)
                .optional()
                .map_err(Into::into)
        })
    }

    /// Newest posts first.
    ///
    /// `before` is an exclusive `(created_at, post id)` cursor taken from the
    /// last row of the previous page. Posts sharing that timestamp are ordered
    /// by insertion, so the id places the cursor among them. Without an id
    /// only strictly older posts are returned.
    pub fn list_posts(&self, limit: u32, before: Option<(&str, Option<&str>)>) -> Result<Vec<PostRow>> {
        let (before_ts, before_id) = match before {
            Some((ts, id)) => (Some(ts), id),
            None => (None, None),
        };

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS}
                 FROM posts p
                 JOIN users u ON u.id = p.user_id
                 WHERE ?1 IS NULL
                    OR p.created_at < ?1
                    OR (p.created_at = ?1
                        AND p.rowid < COALESCE((SELECT rowid FROM posts WHERE id = ?2), -1))
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![before_ts, before_id, limit], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no such post exists.
    pub fn update_post(&self, id: &str, title: &str, body: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE posts
                 SET title = ?2, body = ?3, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                (id, title, body),
            )?;
            Ok(n > 0)
        })
    }

    /// Comments and reactions go with the post (ON DELETE CASCADE).
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, id: &str, post_id: &str, user_id: &str, body: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, user_id, body) VALUES (?1, ?2, ?3, ?4)",
                (id, post_id, user_id, body),
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLUMNS}
                 FROM comments c
                 JOIN posts p ON p.id = c.post_id
                 JOIN users u ON u.id = c.user_id
                 WHERE c.id = ?1"
            );
            conn.query_row(&sql, [id], comment_from_row)
                .optional()
                .map_err(Into::into)
        })
    }

    /// Oldest comment first.
    pub fn get_comments_for_post(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLUMNS}
                 FROM comments c
                 JOIN posts p ON p.id = c.post_id
                 JOIN users u ON u.id = c.user_id
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at ASC, c.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Reactions --

    /// Toggle a user's reaction on a post. The same emoji again removes it,
    /// a different emoji replaces it, and no prior reaction inserts one.
    pub fn toggle_reaction(&self, post_id: &str, user_id: &str, emoji: &str) -> Result<ReactionChange> {
        self.with_tx(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT emoji FROM reactions WHERE post_id = ?1 AND user_id = ?2",
                    (post_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(current) if current == emoji => {
                    conn.execute(
                        "DELETE FROM reactions WHERE post_id = ?1 AND user_id = ?2",
                        (post_id, user_id),
                    )?;
                    Ok(ReactionChange::Removed)
                }
                Some(previous) => {
                    conn.execute(
                        "UPDATE reactions
                         SET emoji = ?3, created_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE post_id = ?1 AND user_id = ?2",
                        (post_id, user_id, emoji),
                    )?;
                    Ok(ReactionChange::Replaced { previous })
                }
                None => {
                    conn.execute(
                        "INSERT INTO reactions (post_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                        (post_id, user_id, emoji),
                    )?;
                    Ok(ReactionChange::Added)
                }
            }
        })
    }

    pub fn get_user_reaction(&self, post_id: &str, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT emoji FROM reactions WHERE post_id = ?1 AND user_id = ?2",
                (post_id, user_id),
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Batch-fetch reactions for a set of post IDs, oldest first.
    pub fn get_reactions_for_posts(&self, post_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT post_id, user_id, emoji, created_at FROM reactions
                 WHERE post_id IN ({})
                 ORDER BY created_at ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(post_ids.iter()), |row| {
                    Ok(ReactionRow {
                        post_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, profile_pic, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn.query_row(&sql, [value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        author_username: row.get(2)?,
        author_profile_pic: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        comment_count: row.get(8)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        post_owner_id: row.get(2)?,
        user_id: row.get(3)?,
        author_username: row.get(4)?,
        author_profile_pic: row.get(5)?,
        body: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;
    use uuid::Uuid;

    fn id() -> String {
        Uuid::new_v4().to_string()
    }

    fn db_with_user(name: &str) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let uid = id();
        db.create_user(&uid, name, "hash").unwrap();
        (db, uid)
    }

    #[test]
    fn duplicate_username_is_unique_violation() {
        let (db, _) = db_with_user("alice");
        let err = db.create_user(&id(), "alice", "other").unwrap_err();
        assert!(is_unique_violation(&err));

        // Usernames are case-sensitive.
        db.create_user(&id(), "Alice", "other").unwrap();
    }

    #[test]
    fn deleting_post_cascades_to_comments_and_reactions() {
        let (db, alice) = db_with_user("alice");
        let bob = id();
        db.create_user(&bob, "bob", "hash").unwrap();

        let post = id();
        db.insert_post(&post, &alice, "Hello", "World").unwrap();
        db.insert_comment(&id(), &post, &bob, "nice").unwrap();
        db.toggle_reaction(&post, &bob, "🔥").unwrap();

        assert_eq!(db.get_comments_for_post(&post).unwrap().len(), 1);
        assert_eq!(db.get_reactions_for_posts(&[post.clone()]).unwrap().len(), 1);

        assert!(db.delete_post(&post).unwrap());
        assert!(db.get_post(&post).unwrap().is_none());
        assert!(db.get_comments_for_post(&post).unwrap().is_empty());
        assert!(db.get_reactions_for_posts(&[post.clone()]).unwrap().is_empty());
        assert!(!db.delete_post(&post).unwrap());
    }

    #[test]
    fn toggle_reaction_adds_replaces_and_removes() {
        let (db, alice) = db_with_user("alice");
        let post = id();
        db.insert_post(&post, &alice, "t", "b").unwrap();

        assert_eq!(db.toggle_reaction(&post, &alice, "👍").unwrap(), ReactionChange::Added);
        assert_eq!(
            db.toggle_reaction(&post, &alice, "❤️").unwrap(),
            ReactionChange::Replaced { previous: "👍".into() }
        );
        assert_eq!(db.get_user_reaction(&post, &alice).unwrap().as_deref(), Some("❤️"));
        assert_eq!(db.get_reactions_for_posts(&[post.clone()]).unwrap().len(), 1);

        assert_eq!(db.toggle_reaction(&post, &alice, "❤️").unwrap(), ReactionChange::Removed);
        assert!(db.get_user_reaction(&post, &alice).unwrap().is_none());
    }

    #[test]
    fn reaction_on_missing_post_fails() {
        let (db, alice) = db_with_user("alice");
        assert!(db.toggle_reaction(&id(), &alice, "👍").is_err());
    }

    #[test]
    fn list_posts_newest_first_with_cursor() {
        let (db, alice) = db_with_user("alice");
        let first = id();
        let second = id();
        db.insert_post(&first, &alice, "first", "b").unwrap();
        db.insert_post(&second, &alice, "second", "b").unwrap();
        db.insert_comment(&id(), &first, &alice, "c1").unwrap();
        db.insert_comment(&id(), &first, &alice, "c2").unwrap();

        let rows = db.list_posts(10, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[1].id, first);
        assert_eq!(rows[1].comment_count, 2);
        assert_eq!(rows[0].author_username, "alice");

        let limited = db.list_posts(1, None).unwrap();
        assert_eq!(limited.len(), 1);

        let older = db.list_posts(10, Some(("0000-01-01T00:00:00.000Z", None))).unwrap();
        assert!(older.is_empty());
    }

    #[test]
    fn cursor_pages_through_posts_sharing_a_timestamp() {
        let (db, alice) = db_with_user("alice");
        let ids: Vec<String> = (0..12).map(|_| id()).collect();
        for (i, post) in ids.iter().enumerate() {
            db.insert_post(post, &alice, &format!("p{}", i), "b").unwrap();
        }
        // Force every post into the same millisecond.
        db.with_conn(|conn| {
            conn.execute("UPDATE posts SET created_at = '2026-01-01T00:00:00.000Z'", [])?;
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<(String, String)> = None;
        loop {
            let before = cursor.as_ref().map(|(ts, id)| (ts.as_str(), Some(id.as_str())));
            let page = db.list_posts(5, before).unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some((last.created_at.clone(), last.id.clone()));
            seen.extend(page.into_iter().map(|r| r.id));
        }

        let newest_first: Vec<String> = ids.into_iter().rev().collect();
        assert_eq!(seen, newest_first);

        // Without an id the cursor is strict on the timestamp alone.
        let strict = db.list_posts(5, Some(("2026-01-01T00:00:00.000Z", None))).unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn update_post_sets_updated_at() {
        let (db, alice) = db_with_user("alice");
        let post = id();
        db.insert_post(&post, &alice, "t", "b").unwrap();
        assert!(db.get_post(&post).unwrap().unwrap().updated_at.is_none());

        assert!(db.update_post(&post, "t2", "b2").unwrap());
        let row = db.get_post(&post).unwrap().unwrap();
        assert_eq!(row.title, "t2");
        assert_eq!(row.body, "b2");
        assert!(row.updated_at.is_some());

        assert!(!db.update_post(&id(), "x", "y").unwrap());
    }

    #[test]
    fn comment_row_carries_post_owner() {
        let (db, alice) = db_with_user("alice");
        let bob = id();
        db.create_user(&bob, "bob", "hash").unwrap();
        let post = id();
        let comment = id();
        db.insert_post(&post, &alice, "t", "b").unwrap();
        db.insert_comment(&comment, &post, &bob, "hi").unwrap();

        let row = db.get_comment(&comment).unwrap().unwrap();
        assert_eq!(row.post_owner_id, alice);
        assert_eq!(row.user_id, bob);
        assert_eq!(row.author_username, "bob");

        assert!(db.delete_comment(&comment).unwrap());
        assert!(db.get_comment(&comment).unwrap().is_none());
    }

    #[test]
    fn sessions_expire_and_are_pruned() {
        let (db, alice) = db_with_user("alice");
        db.create_session("live", &alice, 3600).unwrap();
        db.create_session("stale", &alice, -60).unwrap();

        assert_eq!(db.get_session_user("live").unwrap().unwrap().username, "alice");
        assert!(db.get_session_user("stale").unwrap().is_none());

        assert_eq!(db.delete_expired_sessions().unwrap(), 1);
        assert!(db.delete_session("live").unwrap());
        assert!(db.get_session_user("live").unwrap().is_none());
    }

    #[test]
    fn deleting_user_cascades_everything() {
        let (db, alice) = db_with_user("alice");
        let bob = id();
        db.create_user(&bob, "bob", "hash").unwrap();
        let post = id();
        db.insert_post(&post, &alice, "t", "b").unwrap();
        db.insert_comment(&id(), &post, &bob, "hi").unwrap();
        db.create_session("s", &alice, 3600).unwrap();
        db.set_profile_pic(&alice, "/uploads/a.png").unwrap();

        let removed = db.delete_user(&alice).unwrap().unwrap();
        assert_eq!(removed.profile_pic.as_deref(), Some("/uploads/a.png"));
        assert!(db.get_post(&post).unwrap().is_none());
        assert!(db.get_session_user("s").unwrap().is_none());
        assert!(db.get_user_by_id(&bob).unwrap().is_some());
        assert!(db.delete_user(&alice).unwrap().is_none());
    }

    #[test]
    fn set_profile_pic_returns_previous() {
        let (db, alice) = db_with_user("alice");
        assert_eq!(db.set_profile_pic(&alice, "/uploads/1.png").unwrap(), Some(None));
        assert_eq!(
            db.set_profile_pic(&alice, "/uploads/2.png").unwrap(),
            Some(Some("/uploads/1.png".to_string()))
        );
        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.profile_pic.as_deref(), Some("/uploads/2.png"));
    }

    #[test]
    fn set_profile_pic_on_missing_user_updates_nothing() {
        let (db, _) = db_with_user("alice");
        assert_eq!(db.set_profile_pic(&id(), "/uploads/x.png").unwrap(), None);
    }
}
