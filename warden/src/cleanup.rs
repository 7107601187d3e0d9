//! Background purge of expired refresh-token ledger rows.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::auth::{AuthError, RefreshTokenRepository};

/// Start the background cleanup task. The first pass runs immediately.
pub fn spawn_token_cleanup(
    repo: Arc<dyn RefreshTokenRepository>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            // Failures are retried on the next tick
            if let Err(e) = run_token_cleanup(repo.as_ref()).await {
                error!(error = %e, "Failed to clean up expired refresh tokens");
            }
        }
    })
}

/// Delete every ledger row whose expiry has passed.
///
/// Revoked rows that have not expired yet are kept: reuse detection depends on them.
// TODO: bound revoked-but-unexpired rows with an audit retention window once one is agreed.
pub async fn run_token_cleanup(repo: &dyn RefreshTokenRepository) -> Result<usize, AuthError> {
    debug!("Running refresh token cleanup");

    let deleted = repo.delete_expired(Utc::now()).await?;
    if deleted > 0 {
        info!(tokens_deleted = deleted, "Expired refresh tokens cleaned");
    }
    Ok(deleted)
}
