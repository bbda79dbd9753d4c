//! Stream playability probing
//!
//! A quick download measures throughput first; when that is inconclusive
//! ffmpeg is asked to demux a few seconds. The whole probe is bounded by the
//! caller's time budget.

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::models::{ProbeMethod, ProbeMetrics, ProbeReport};

/// Throughput (MB/s) above which a download counts as alive
const MIN_THROUGHPUT_MBPS: f64 = 0.05;

/// Stop downloading after this many bytes
const DOWNLOAD_CAP: u64 = 512 * 1024;

/// Longest download sample
const DOWNLOAD_WINDOW: Duration = Duration::from_secs(3);

/// Checks whether a resolved URL actually plays
pub trait StreamProber: Send + Sync + 'static {
    fn probe(
        &self,
        url: &str,
        headers: &[(String, String)],
        budget: Duration,
    ) -> impl Future<Output = ProbeReport> + Send;
}

/// Download sample with ffmpeg fallback
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
    ffmpeg: String,
}

impl HttpProbe {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            ffmpeg: "ffmpeg".to_string(),
        }
    }

    /// Read the stream for a short window and measure throughput
    async fn sample_download(&self, url: &str, headers: &[(String, String)]) -> ProbeMetrics {
        let started = Instant::now();
        let mut bytes_read = 0u64;

        let mut request = self.http.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Ok(mut response) = request.send().await {
            if response.status().is_success() {
                // Partial data still counts when the stream errors midway
                while let Ok(Some(chunk)) = response.chunk().await {
                    bytes_read += chunk.len() as u64;
                    if started.elapsed() > DOWNLOAD_WINDOW || bytes_read > DOWNLOAD_CAP {
                        break;
                    }
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let throughput_mbps = if elapsed > 0.0 {
            (bytes_read as f64 / (1024.0 * 1024.0)) / elapsed
        } else {
            0.0
        };
        ProbeMetrics {
            method: ProbeMethod::Download,
            bytes_read,
            throughput_mbps,
        }
    }

    /// Let ffmpeg demux a few seconds; any detected stream means alive
    async fn ffmpeg_detects_stream(
        &self,
        binary: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> bool {
        let mut cmd = Command::new(binary);
        cmd.args(["-analyzeduration", "20000000"])
            .args(["-probesize", "20000000"])
            .args(["-err_detect", "ignore_err"])
            .args(["-t", "5"]);
        if !headers.is_empty() {
            let header_block: String = headers
                .iter()
                .map(|(k, v)| format!("{}: {}\r\n", k, v))
                .collect();
            cmd.arg("-headers").arg(header_block);
        }
        cmd.args(["-i", url, "-f", "null", "-"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.output().await {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                stderr_reports_stream(&stderr)
            }
            Err(e) => {
                debug!(error = %e, "ffmpeg unavailable");
                false
            }
        }
    }

    async fn run(&self, url: &str, headers: &[(String, String)]) -> ProbeReport {
        let metrics = self.sample_download(url, headers).await;
        if metrics.throughput_mbps > MIN_THROUGHPUT_MBPS {
            return ProbeReport::playable(
                format!("Speed: {:.2} MB/s", metrics.throughput_mbps),
                Some(metrics),
            );
        }

        if self.ffmpeg_detects_stream(&self.ffmpeg, url, headers).await {
            return ProbeReport::playable(
                "Verified with FFmpeg",
                Some(ProbeMetrics {
                    method: ProbeMethod::Ffmpeg,
                    ..metrics
                }),
            );
        }

        ProbeReport::unplayable("Stream unreachable", Some(metrics))
    }
}

impl StreamProber for HttpProbe {
    async fn probe(
        &self,
        url: &str,
        headers: &[(String, String)],
        budget: Duration,
    ) -> ProbeReport {
        match tokio::time::timeout(budget, self.run(url, headers)).await {
            Ok(report) => report,
            Err(_) => ProbeReport::unplayable(
                format!("probe exceeded {}s budget", budget.as_secs()),
                None,
            ),
        }
    }
}

fn stderr_reports_stream(stderr: &str) -> bool {
    stderr.contains("Video:") || stderr.contains("Audio:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_detection() {
        assert!(stderr_reports_stream(
            "Stream #0:0: Video: h264 (High), yuv420p, 1920x1080"
        ));
        assert!(stderr_reports_stream("Stream #0:1: Audio: aac, 48000 Hz"));
        assert!(!stderr_reports_stream("Connection refused"));
    }
}
