use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::report::Reporter;

/// Stream `url` into `dest`, returning the number of bytes written.
///
/// The body goes to `<dest>.part` first and is renamed into place only once
/// every byte arrived, so an interrupted transfer never looks like a finished
/// archive. Nothing is retried.
pub async fn download_asset(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    token: Option<&str>,
    reporter: &Reporter,
) -> Result<u64> {
    let part = part_path(dest);
    let result = stream_to(client, url, &part, token, reporter).await;

    match result {
        Ok(written) => {
            fs::rename(&part, dest).await.map_err(|e| UpdateError::DownloadIncomplete {
                url: url.to_string(),
                reason: format!("failed to move download into place: {e}"),
            })?;
            info!("Downloaded {} bytes to {}", written, dest.display());
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&part).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial download {}: {}", part.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

async fn stream_to(
    client: &reqwest::Client,
    url: &str,
    part: &Path,
    token: Option<&str>,
    reporter: &Reporter,
) -> Result<u64> {
    let incomplete = |reason: String| UpdateError::DownloadIncomplete {
        url: url.to_string(),
        reason,
    };

    let mut request = client.get(url).header(ACCEPT, "application/octet-stream");
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| {
        reporter.error(&format!("Can not download update: {e}"));
        incomplete(e.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        reporter.error("Can not download update from update server.");
        return Err(incomplete(format!("server answered {status}")));
    }

    let total = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    debug!("Downloading {} ({:?} bytes)", url, total);

    if let Some(parent) = part.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| incomplete(format!("failed to create {}: {e}", parent.display())))?;
    }
    let mut file = File::create(part)
        .await
        .map_err(|e| incomplete(format!("failed to create {}: {e}", part.display())))?;

    let pb = reporter.download_bar(total);
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            pb.abandon();
            reporter.error(&format!("Download interrupted: {e}"));
            incomplete(e.to_string())
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| incomplete(format!("failed to write {}: {e}", part.display())))?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush()
        .await
        .map_err(|e| incomplete(format!("failed to flush {}: {e}", part.display())))?;

    if let Some(total) = total {
        if downloaded < total {
            pb.abandon();
            return Err(incomplete(format!("received {downloaded} of {total} bytes")));
        }
    }

    pb.finish_and_clear();
    Ok(downloaded)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/dl/tool-linux.tar.gz")),
            Path::new("/tmp/dl/tool-linux.tar.gz.part")
        );
    }
}
