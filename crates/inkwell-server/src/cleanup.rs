use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use inkwell_api::AppStateInner;

/// Background task that prunes expired session rows.
pub async fn run_cleanup_loop(state: Arc<AppStateInner>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let worker = state.clone();
        match tokio::task::spawn_blocking(move || worker.db.delete_expired_sessions()).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Cleanup: pruned {} expired sessions", count);
                }
            }
            Ok(Err(e)) => warn!("Cleanup error: {}", e),
            Err(e) => warn!("Cleanup task panicked: {}", e),
        }
    }
}
