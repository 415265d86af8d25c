//! The finalize waiter and the token file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use super::Refresher;

/// Delay before the second finalize attempt; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Total elapsed time budget for finalization.
const MAX_ELAPSED: Duration = Duration::from_secs(3 * 60);

/// Polls `/finalize` until the flow is verified, then rotates the token
/// file and tears the flow's callback servers down.
///
/// On failure the servers are torn down too and the previous token file is
/// left in place.
pub(crate) async fn complete(refresher: Arc<Refresher>, id: String) {
    let deadline = Instant::now() + MAX_ELAPSED;
    let mut delay = INITIAL_BACKOFF;

    let token = loop {
        match refresher.api.finalize(&id).await {
            Ok(token) => break Some(token),
            Err(err) if err.is_retryable() && Instant::now() + delay < deadline => {
                tracing::warn!(flow = %id, next = ?delay, error = %err, "finalization not yet complete");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                tracing::error!(flow = %id, error = %err, "failed to get identity token");
                break None;
            }
        }
    };

    refresher.teardown(&id).await;

    let Some(token) = token else { return };
    if let Err(err) = write_token(&refresher.token_path, &token).await {
        tracing::error!(flow = %id, path = %refresher.token_path.display(), error = %err, "unable to write token to file");
        return;
    }

    refresher.notify_issued();
    tracing::info!(flow = %id, "new token issued");
}

/// Atomically replaces the token file: write `<path>.tmp`, fsync, rename.
/// The parent directory is created with mode 0755.
pub(crate) async fn write_token(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_parent(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(token.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

#[cfg(unix)]
fn create_parent(parent: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(parent)
}

#[cfg(not(unix))]
fn create_parent(parent: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(parent)
}
