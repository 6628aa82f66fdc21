use std::path::{Path, PathBuf};

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use inkwell_types::api::ProfilePictureResponse;

use crate::error::{AppError, blocking};
use crate::session::Identity;
use crate::state::AppState;

/// URL prefix under which stored uploads are served.
pub const UPLOAD_URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// Detect the image format from magic bytes. The client's Content-Type is
/// not trusted.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageKind::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else {
        None
    }
}

/// On-disk storage for uploaded profile pictures.
///
/// Each upload is a flat file `{dir}/{uuid}.{ext}`, served at
/// `/uploads/{uuid}.{ext}`.
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub async fn new(dir: PathBuf, max_bytes: usize) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Write a new upload and return its public URL.
    pub async fn save(&self, bytes: &[u8], kind: ImageKind) -> anyhow::Result<String> {
        let file_name = format!("{}.{}", Uuid::new_v4(), kind.extension());
        let path = self.file_path(&file_name);

        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(format!("{}{}", UPLOAD_URL_PREFIX, file_name))
    }

    /// Delete the file behind an upload URL. URLs that do not point into
    /// this store (the default avatar, external links) are ignored.
    pub async fn delete_url(&self, url: &str) -> anyhow::Result<()> {
        let Some(file_name) = local_file_name(url) else {
            return Ok(());
        };

        let path = self.file_path(file_name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted upload {}", file_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Upload {} already gone", file_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The file name behind a `/uploads/...` URL, rejecting anything that could
/// escape the upload directory.
fn local_file_name(url: &str) -> Option<&str> {
    let name = url.strip_prefix(UPLOAD_URL_PREFIX)?;
    let safe = !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'));
    safe.then_some(name)
}

/// Validate and store a new profile picture for the caller, then drop the
/// previous upload. Returns the new picture URL.
pub async fn replace_profile_picture(
    state: &AppState,
    identity: &Identity,
    bytes: &[u8],
) -> Result<String, AppError> {
    let user = identity.require_user()?;

    if bytes.is_empty() {
        return Err(AppError::validation("upload is empty"));
    }
    if bytes.len() > state.uploads.max_bytes() {
        return Err(AppError::PayloadTooLarge {
            limit: state.uploads.max_bytes(),
        });
    }
    let kind = sniff_image(bytes).ok_or(AppError::UnsupportedMedia)?;

    let url = state.uploads.save(bytes, kind).await?;

    let db_state = state.clone();
    let uid = user.id.to_string();
    let new_url = url.clone();
    let previous = blocking(move || Ok(db_state.db.set_profile_pic(&uid, &new_url)?)).await;

    let previous = match previous {
        Ok(Some(previous)) => previous,
        // The account vanished between the session check and the update.
        Ok(None) => {
            discard_upload(state, &url).await;
            return Err(AppError::NotFound("user"));
        }
        Err(e) => {
            discard_upload(state, &url).await;
            return Err(e);
        }
    };

    if let Some(old) = previous {
        if let Err(e) = state.uploads.delete_url(&old).await {
            warn!("Failed to delete previous picture {}: {}", old, e);
        }
    }

    info!("{} uploaded profile picture {} ({} bytes)", user.username, url, bytes.len());
    Ok(url)
}

async fn discard_upload(state: &AppState, url: &str) {
    if let Err(e) = state.uploads.delete_url(url).await {
        error!("Failed to remove orphaned upload {}: {}", url, e);
    }
}

/// PUT /profile/picture: raw image bytes as the request body.
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge {
                limit: state.uploads.max_bytes(),
            }
        } else {
            AppError::Validation(rejection.body_text())
        }
    })?;

    let profile_pic = replace_profile_picture(&state, &identity, &bytes).await?;
    Ok(Json(ProfilePictureResponse { profile_pic }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_image(b"\x89PNG\r\n\x1a\n...."), Some(ImageKind::Png));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(sniff_image(b"GIF89a...."), Some(ImageKind::Gif));
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageKind::Webp));
        assert_eq!(sniff_image(b"<svg></svg>"), None);
        assert_eq!(sniff_image(b""), None);
    }

    #[test]
    fn only_plain_upload_names_are_local() {
        assert_eq!(local_file_name("/uploads/abc-123.png"), Some("abc-123.png"));
        assert_eq!(local_file_name("/uploads/../secret"), None);
        assert_eq!(local_file_name("/uploads/a/b.png"), None);
        assert_eq!(local_file_name("/uploads/"), None);
        assert_eq!(local_file_name("https://i.pravatar.cc/150?img=3"), None);
    }

    #[tokio::test]
    async fn save_and_delete_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!("inkwell-uploads-{}", Uuid::new_v4()));
        let store = UploadStore::new(dir.clone(), 1024).await.unwrap();

        let url = store.save(b"\x89PNG\r\n\x1a\nxx", ImageKind::Png).await.unwrap();
        assert!(url.starts_with(UPLOAD_URL_PREFIX));
        assert!(url.ends_with(".png"));

        let path = store.file_path(local_file_name(&url).unwrap());
        assert!(path.exists());

        store.delete_url(&url).await.unwrap();
        assert!(!path.exists());
        // Second delete is a no-op.
        store.delete_url(&url).await.unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn upload_for_vanished_account_leaves_no_file() {
        use std::sync::Arc;

        use inkwell_db::Database;

        use crate::session::SessionManager;
        use crate::state::AppStateInner;
        use crate::test_support::login;

        let dir = std::env::temp_dir().join(format!("inkwell-uploads-{}", Uuid::new_v4()));
        let db = Database::open_in_memory().unwrap();
        let alice = login(&db, "alice");
        let state: AppState = Arc::new(AppStateInner {
            db,
            sessions: SessionManager::new(b"test-secret", 3600, false),
            uploads: UploadStore::new(dir.clone(), 1024).await.unwrap(),
        });

        let user_id = alice.require_user().unwrap().id.to_string();
        state.db.delete_user(&user_id).unwrap();

        let err = replace_profile_picture(&state, &alice, b"\x89PNG\r\n\x1a\nxx")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(dir);
    }
}
