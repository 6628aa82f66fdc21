use std::sync::Arc;

use inkwell_db::Database;

use crate::session::SessionManager;
use crate::uploads::UploadStore;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler needs, built once at startup and passed explicitly.
pub struct AppStateInner {
    pub db: Database,
    pub sessions: SessionManager,
    pub uploads: UploadStore,
}
