//! Resumable dump download
//!
//! The destination file doubles as the resume marker: its current length is
//! the byte offset requested on the next attempt. A 200 answer restarts the
//! file from scratch, a 206 appends, a 416 means there is nothing left.

use crate::refresh::error::RefreshResult;
use crate::refresh::source::{DumpBody, DumpSource, RangeOutcome};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Result of one download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    /// Offset the attempt started from
    pub resumed_from: u64,
    /// Bytes received during this attempt
    pub received: u64,
    /// Final size of the destination file
    pub total: u64,
}

/// Fetch `url` into `dest`, resuming from whatever `dest` already holds
pub async fn download(
    source: &dyn DumpSource,
    url: &str,
    dest: &Path,
    progress_every: Duration,
) -> RefreshResult<DownloadStats> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let existing = match fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if existing > 0 {
        tracing::info!(offset = existing, "resuming dump download");
    } else {
        tracing::info!(url, "starting dump download");
    }

    let (body, resumed_from) = match source.open_dump(url, existing).await? {
        RangeOutcome::AlreadyComplete => {
            tracing::info!(bytes = existing, "dump download already complete");
            return Ok(DownloadStats {
                resumed_from: existing,
                received: 0,
                total: existing,
            });
        }
        RangeOutcome::Partial(body) => (body, existing),
        RangeOutcome::Full(body) => {
            if existing > 0 {
                tracing::warn!(
                    discarded = existing,
                    "server ignored range request, restarting download"
                );
            }
            (body, 0)
        }
    };

    let received = write_body(body, dest, resumed_from, progress_every).await?;
    let total = resumed_from + received;
    tracing::info!(bytes = total, received, "dump download finished");

    Ok(DownloadStats {
        resumed_from,
        received,
        total,
    })
}

async fn write_body(
    mut body: Box<dyn DumpBody>,
    dest: &Path,
    offset: u64,
    progress_every: Duration,
) -> RefreshResult<u64> {
    let mut file = if offset == 0 {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dest)
            .await?
    } else {
        OpenOptions::new().append(true).open(dest).await?
    };

    let mut received = 0u64;
    let mut last_log = Instant::now();

    let result = async {
        while let Some(chunk) = body.next_chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if last_log.elapsed() >= progress_every {
                tracing::debug!(bytes = offset + received, "dump download progress");
                last_log = Instant::now();
            }
        }
        RefreshResult::Ok(())
    }
    .await;

    // Whatever arrived stays on disk so the next attempt can resume from it
    file.flush().await?;
    file.sync_all().await?;
    result?;

    Ok(received)
}
