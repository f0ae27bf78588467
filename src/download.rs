// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! HTTP client for the static model artifact host.
//!
//! The host answers a metadata-only `HEAD` with an opaque freshness header
//! and a `GET` with the raw model bytes. Nothing else is spoken.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::{InferenceError, Result};
use crate::inference::InferenceConfig;
use crate::logging::is_verbose;

/// Response header carrying the artifact's content version.
pub const VERSION_HEADER: &str = "x-repo-commit";

/// Progress bar width in characters.
const BAR_WIDTH: usize = 12;

/// Update the progress line at most every 100ms.
const MIN_UPDATE_INTERVAL: f64 = 0.1;

/// Remote side of the model cache.
pub trait ModelHost: Send + Sync {
    /// Metadata-only request. `Ok(None)` means the host answered without a
    /// version tag.
    ///
    /// # Errors
    ///
    /// Any transport or status failure.
    fn head(&self, url: &str) -> Result<Option<String>>;

    /// Full body download.
    ///
    /// # Errors
    ///
    /// Any transport or status failure.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Format bytes as human-readable string (e.g., "10.4MB").
fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.1}GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes / KB)
    } else {
        format!("{bytes:.0}B")
    }
}

/// Generate progress bar string.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn generate_bar(progress: f64, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let mut bar = "━".repeat(filled);
    bar.push_str(&"─".repeat(width - filled));
    bar
}

/// Blocking `ureq` client for the artifact host.
#[derive(Debug, Clone)]
pub struct HttpModelHost {
    /// Agent used for full downloads. Follows redirects to the CDN.
    agent: ureq::Agent,
    /// Agent used for freshness checks. Never follows redirects, so the
    /// version header is read from the hub's own response.
    head_agent: ureq::Agent,
}

impl HttpModelHost {
    /// Create a client with the configured timeouts.
    #[must_use]
    pub fn new(config: &InferenceConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout))
            .timeout_recv_body(Some(config.read_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(agent);
        let head_agent = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout))
            .timeout_global(Some(config.connect_timeout))
            .max_redirects(0)
            .max_redirects_will_error(false)
            .build();
        let head_agent = ureq::Agent::new_with_config(head_agent);
        Self { agent, head_agent }
    }
}

/// Map a `ureq` failure to a readable message.
fn describe(url: &str, err: &ureq::Error) -> String {
    match err {
        ureq::Error::Timeout(_) => format!("Connection timed out while requesting {url}"),
        ureq::Error::StatusCode(code) => format!("{url} answered with HTTP {code}"),
        ureq::Error::Io(io_err) => format!("Network error requesting {url}: {io_err}"),
        _ => format!("Failed to request {url}: {err}"),
    }
}

impl ModelHost for HttpModelHost {
    fn head(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .head_agent
            .head(url)
            .call()
            .map_err(|e| InferenceError::FreshnessCheckFailed(describe(url, &e)))?;

        Ok(response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }

    #[allow(clippy::cast_precision_loss)]
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| InferenceError::ArtifactUnavailable(describe(url, &e)))?;

        let total_size: u64 = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut reader = response.into_body().into_reader();
        let mut bytes = Vec::with_capacity(usize::try_from(total_size).unwrap_or(0));
        let mut buffer = [0u8; 65536];
        let start_time = Instant::now();
        let mut last_update = start_time;
        let show_progress = is_verbose();

        loop {
            let read = reader.read(&mut buffer).map_err(|e| {
                InferenceError::ArtifactUnavailable(format!("Failed to read from network: {e}"))
            })?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..read]);

            if show_progress
                && last_update.elapsed() >= Duration::from_secs_f64(MIN_UPDATE_INTERVAL)
            {
                last_update = Instant::now();
                print_progress(url, bytes.len() as u64, total_size, false);
            }
        }

        if show_progress {
            print_progress(url, bytes.len() as u64, total_size, true);
        }

        if total_size > 0 && bytes.len() as u64 != total_size {
            return Err(InferenceError::ArtifactUnavailable(format!(
                "Truncated download of {url}: got {} of {} bytes",
                bytes.len(),
                total_size
            )));
        }

        Ok(bytes)
    }
}

/// Render a single, overwriting progress line on stderr.
#[allow(clippy::cast_precision_loss)]
fn print_progress(url: &str, downloaded: u64, total: u64, done: bool) {
    let desc = format!("Downloading {url}");
    if total > 0 {
        let progress = downloaded as f64 / total as f64;
        eprint!(
            "\r\x1b[K{desc}: {:>3.0}% {} {}/{}",
            progress * 100.0,
            generate_bar(progress, BAR_WIDTH),
            format_bytes(downloaded as f64),
            format_bytes(total as f64),
        );
    } else {
        eprint!("\r\x1b[K{desc}: {}", format_bytes(downloaded as f64));
    }
    if done {
        eprintln!();
    }
    std::io::stderr().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500.0), "500B");
        assert_eq!(format_bytes(1024.0), "1.0KB");
        assert_eq!(format_bytes(1_048_576.0), "1.0MB");
        assert_eq!(format_bytes(1_073_741_824.0), "1.0GB");
    }

    #[test]
    fn test_generate_bar() {
        assert_eq!(generate_bar(0.0, 10), "──────────");
        assert_eq!(generate_bar(1.0, 10), "━━━━━━━━━━");
        assert_eq!(generate_bar(0.5, 10), "━━━━━─────");
        assert_eq!(generate_bar(2.0, 4), "━━━━");
    }

    #[test]
    fn test_unreachable_host_fails_freshness_check() {
        let config = InferenceConfig::new()
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        let host = HttpModelHost::new(&config);
        // Port 9 on loopback (discard) is closed on test machines.
        let result = host.head("http://127.0.0.1:9/org/repo/resolve/main/model.onnx");
        assert!(matches!(
            result,
            Err(InferenceError::FreshnessCheckFailed(_))
        ));
    }
}
