//! Input rules for user-supplied text. Each function returns the value to
//! store (trimmed where trimming applies) or an `AppError::Validation`.

use crate::error::AppError;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 4;
pub const PASSWORD_MAX: usize = 128;
pub const TITLE_MAX: usize = 200;
pub const POST_BODY_MAX: usize = 20_000;
pub const COMMENT_MAX: usize = 2_000;
pub const EMOJI_MAX: usize = 10;

pub fn username(raw: &str) -> Result<String, AppError> {
    let len = raw.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(AppError::validation(format!(
            "username must be {}-{} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !raw
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::validation(
            "username may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(raw.to_string())
}

/// Passwords are stored hashed exactly as typed; only length is checked.
pub fn password(raw: &str) -> Result<(), AppError> {
    let len = raw.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(AppError::validation(format!(
            "password must be {}-{} characters",
            PASSWORD_MIN, PASSWORD_MAX
        )));
    }
    if raw.trim().is_empty() {
        return Err(AppError::validation("password cannot be blank"));
    }
    Ok(())
}

pub fn title(raw: &str) -> Result<String, AppError> {
    required_text("title", raw, TITLE_MAX)
}

pub fn post_body(raw: &str) -> Result<String, AppError> {
    required_text("body", raw, POST_BODY_MAX)
}

pub fn comment_body(raw: &str) -> Result<String, AppError> {
    required_text("comment", raw, COMMENT_MAX)
}

/// An emoji: short, no whitespace or control characters, and at least one
/// non-ASCII character so plain words are rejected.
pub fn emoji(raw: &str) -> Result<String, AppError> {
    let emoji = raw.trim();
    let len = emoji.chars().count();
    if len == 0 || len > EMOJI_MAX {
        return Err(AppError::validation(format!(
            "emoji must be 1-{} characters",
            EMOJI_MAX
        )));
    }
    if emoji.chars().any(|c| c.is_whitespace() || c.is_control()) || emoji.is_ascii() {
        return Err(AppError::validation("not an emoji"));
    }
    Ok(emoji.to_string())
}

fn required_text(field: &str, raw: &str, max: usize) -> Result<String, AppError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::validation(format!("{} cannot be empty", field)));
    }
    if text.chars().count() > max {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(text.to_string())
}
