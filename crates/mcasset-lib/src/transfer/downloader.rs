use crate::error::TransferError;
use crate::progress::{LineProgress, ProgressReporter};
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Instant;
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

/// Download a file to a path with progress reporting.
///
/// Any existing file at `path` is overwritten. On failure the destination may
/// be left partially written; callers own cleanup. Returns the number of bytes
/// written.
pub async fn download_to_path(
    client: &Client,
    url: &str,
    path: &Path,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<u64, TransferError> {
    log::debug!("Downloading: {} -> {:?}", url, path);

    match reporter {
        Some(reporter) => stream_to_file(client, url, path, reporter).await,
        None => {
            let line = LineProgress::new("Downloaded");
            let written = stream_to_file(client, url, path, &line).await;
            line.done();
            written
        }
    }
}

/// GET a small document into memory. Error bodies are drained and attached
/// the same way as for file transfers.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>, TransferError> {
    log::debug!("Downloading JSON (reused client): {}", url);
    let request_err = |source| TransferError::Request {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(request_err)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::warn!("HTTP {} from {}: {}", status, url, body);
        return Err(TransferError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }

    let bytes = response.bytes().await.map_err(request_err)?;
    Ok(bytes.to_vec())
}

async fn stream_to_file(
    client: &Client,
    url: &str,
    path: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<u64, TransferError> {
    let start = Instant::now();
    let io_err = |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| TransferError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        // Surface whatever the server said about the failure
        let body = response.text().await.unwrap_or_default();
        log::error!("HTTP error {} for {}: {}", status, url, body);
        return Err(TransferError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }

    // Content-Length is informational only
    let total_size = response.content_length();
    log::debug!("Download size: {:?} bytes", total_size);

    if let Some(parent) = path.parent() {
        create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = File::create(path).await.map_err(io_err)?;
    let mut downloaded: u64 = 0;
    let mut chunk_count: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(source) => {
                log::error!(
                    "Transfer of {} broke off after {} bytes: {}",
                    url,
                    downloaded,
                    source
                );
                return Err(TransferError::Request {
                    url: url.to_string(),
                    source,
                });
            }
        };
        file.write_all(&chunk).await.map_err(io_err)?;

        downloaded += chunk.len() as u64;
        chunk_count += 1;
        reporter.update_bytes(downloaded, total_size);
    }
    file.flush().await.map_err(io_err)?;

    let secs = start.elapsed().as_secs_f64();
    let throughput = (downloaded as f64 / 1024.0 / 1024.0) / secs.max(0.001); // MB/s
    log::debug!(
        "Download stats: url={}, size={} bytes, chunks={}, time={:.2}s, throughput={:.2} MB/s",
        url,
        downloaded,
        chunk_count,
        secs,
        throughput
    );

    Ok(downloaded)
}
