//! HTTP transport with resume support.
//!
//! Each transfer runs on its own worker thread with a blocking reqwest
//! client:
//! - Mirrors are tried in order until one succeeds
//! - Partial data goes to `{destination}.downloading`; a `{destination}.resume`
//!   record remembers what the partial file belongs to so a later attempt can
//!   continue with an HTTP Range request
//! - The SHA-256 is verified before the file is renamed into place
//! - Cancellation is checked before every write and between chunks. A
//!   cancelled transfer removes whatever it wrote, finished file included

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checksum::{verify_checksum, ChecksumError};
use super::{TransferFailure, TransferHandle, TransferJob, TransferOutcome, TransferReporter, Transport};
use crate::local::{downloading_path, resume_path};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Read/write chunk size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// What a partial `.downloading` file belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeRecord {
    url: String,
    total_size: u64,
    sha256: Option<String>,
}

/// Transport fetching region files over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    verify_checksums: bool,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            verify_checksums: true,
        }
    }

    /// Enables or disables SHA-256 verification of finished files.
    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one transfer to completion on the calling thread.
    fn transfer(
        &self,
        job: &TransferJob,
        reporter: &TransferReporter,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        // Built here so the blocking client never lives on an async runtime thread.
        let client = match Client::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(e) => return TransferOutcome::Failed(TransferFailure::Network(e.to_string())),
        };

        let mut last_failure = TransferFailure::Network("no mirror configured".to_string());
        for url in &job.urls {
            if cancel.is_cancelled() {
                return TransferOutcome::Failed(TransferFailure::Cancelled);
            }
            let result = self.fetch(&client, url, job, reporter, cancel);
            // The owner may have deleted the files before this attempt wrote
            // them, so the attempt cleans up after itself.
            if cancel.is_cancelled() {
                discard_files(&job.destination);
                debug!(country_id = %job.country_id, "Transfer cancelled");
                return TransferOutcome::Failed(TransferFailure::Cancelled);
            }
            match result {
                Ok(()) => return TransferOutcome::Completed,
                Err(failure @ (TransferFailure::Network(_) | TransferFailure::FileNotFound)) => {
                    warn!(
                        country_id = %job.country_id,
                        url = %url,
                        error = %failure,
                        "Mirror failed, trying next"
                    );
                    last_failure = failure;
                }
                Err(failure) => return TransferOutcome::Failed(failure),
            }
        }
        TransferOutcome::Failed(last_failure)
    }

    fn fetch(
        &self,
        client: &Client,
        url: &str,
        job: &TransferJob,
        reporter: &TransferReporter,
        cancel: &CancellationToken,
    ) -> Result<(), TransferFailure> {
        let partial = downloading_path(&job.destination);
        let record_path = resume_path(&job.destination);

        let (total_size, supports_range) = query_file_info(client, url, job.expected_size)?;
        let record = ResumeRecord {
            url: url.to_string(),
            total_size,
            sha256: job.sha256.clone(),
        };

        check_cancelled(cancel)?;
        let mut start_byte = resumable_bytes(&partial, &record_path, &record, supports_range);
        if start_byte == 0 {
            write_resume_record(&record_path, &record)?;
        }

        let mut request = client.get(url);
        if start_byte > 0 {
            debug!(country_id = %job.country_id, start_byte, "Resuming download");
            request = request.header("Range", format!("bytes={}-", start_byte));
        }
        let mut response = request.send().map_err(network_failure)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransferFailure::FileNotFound);
        }
        if !status.is_success() {
            return Err(TransferFailure::Network(format!(
                "GET {} failed with status {}",
                url, status
            )));
        }
        if start_byte > 0 && status != StatusCode::PARTIAL_CONTENT {
            // Server ignored the range; start over.
            start_byte = 0;
        }

        check_cancelled(cancel)?;
        let file = open_partial(&partial, start_byte)?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start_byte;
        reporter.progress(downloaded, total_size);

        loop {
            check_cancelled(cancel)?;
            let n = response
                .read(&mut buffer)
                .map_err(|e| TransferFailure::Network(format!("read error: {}", e)))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).map_err(write_failure)?;
            downloaded += n as u64;
            reporter.progress(downloaded, total_size.max(downloaded));
        }

        writer.flush().map_err(write_failure)?;
        drop(writer);

        if self.verify_checksums {
            if let Some(expected) = &job.sha256 {
                match verify_checksum(&partial, expected) {
                    Ok(()) => {}
                    Err(ChecksumError::Mismatch {
                        expected, actual, ..
                    }) => {
                        remove_quietly(&partial);
                        remove_quietly(&record_path);
                        return Err(TransferFailure::IntegrityMismatch { expected, actual });
                    }
                    Err(e) => return Err(TransferFailure::Io(e.to_string())),
                }
            }
        }

        check_cancelled(cancel)?;
        fs::rename(&partial, &job.destination).map_err(write_failure)?;
        remove_quietly(&record_path);
        info!(
            country_id = %job.country_id,
            kind = ?job.kind,
            bytes = downloaded,
            "Download complete"
        );
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn start(&self, job: TransferJob, reporter: TransferReporter) -> TransferHandle {
        let cancel = CancellationToken::new();
        let handle = TransferHandle::new(cancel.clone());
        let worker = self.clone();
        let fallback = reporter.clone();

        let spawned = thread::Builder::new()
            .name(format!("transfer-{}", job.country_id))
            .spawn(move || {
                let outcome = worker.transfer(&job, &reporter, &cancel);
                reporter.finish(outcome);
            });

        if let Err(e) = spawned {
            warn!(country_id = fallback.country_id(), error = %e, "Failed to spawn transfer thread");
            fallback.finish(TransferOutcome::Failed(TransferFailure::Io(e.to_string())));
        }
        handle
    }
}

/// HEAD request: total size and range support.
fn query_file_info(
    client: &Client,
    url: &str,
    expected_size: u64,
) -> Result<(u64, bool), TransferFailure> {
    let response = client.head(url).send().map_err(network_failure)?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(TransferFailure::FileNotFound);
    }
    if !status.is_success() {
        return Err(TransferFailure::Network(format!(
            "HEAD {} failed with status {}",
            url, status
        )));
    }

    let total_size = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(expected_size);

    let supports_range = response
        .headers()
        .get("accept-ranges")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "bytes")
        .unwrap_or(false);

    Ok((total_size, supports_range))
}

/// Bytes of a partial file that can be kept, or zero to start over.
fn resumable_bytes(
    partial: &Path,
    record_path: &Path,
    record: &ResumeRecord,
    supports_range: bool,
) -> u64 {
    if !supports_range {
        return 0;
    }
    let existing = fs::metadata(partial).map(|m| m.len()).unwrap_or(0);
    if existing == 0 || existing >= record.total_size {
        return 0;
    }
    let stored: Option<ResumeRecord> = fs::read_to_string(record_path)
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok());
    match stored {
        Some(stored) if stored == *record => existing,
        _ => 0,
    }
}

fn write_resume_record(path: &Path, record: &ResumeRecord) -> Result<(), TransferFailure> {
    let json =
        serde_json::to_string(record).map_err(|e| TransferFailure::Io(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_failure)?;
    }
    fs::write(path, json).map_err(write_failure)
}

fn open_partial(partial: &Path, start_byte: u64) -> Result<File, TransferFailure> {
    if start_byte > 0 {
        OpenOptions::new()
            .append(true)
            .open(partial)
            .map_err(write_failure)
    } else {
        File::create(partial).map_err(write_failure)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), TransferFailure> {
    if cancel.is_cancelled() {
        Err(TransferFailure::Cancelled)
    } else {
        Ok(())
    }
}

/// Removes the partial file, its resume record and the finished file.
fn discard_files(destination: &Path) {
    remove_quietly(&downloading_path(destination));
    remove_quietly(&resume_path(destination));
    remove_quietly(destination);
}

fn network_failure(e: reqwest::Error) -> TransferFailure {
    TransferFailure::Network(e.to_string())
}

fn write_failure(e: io::Error) -> TransferFailure {
    if e.raw_os_error() == Some(libc::ENOSPC) {
        TransferFailure::OutOfDiskSpace
    } else {
        TransferFailure::Io(e.to_string())
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}
