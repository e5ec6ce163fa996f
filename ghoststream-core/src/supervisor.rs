//! Encoder Supervisor (spec §4.6): owns the `ffmpeg` child process for one
//! run — spawns it, drains its pipes concurrently, parses progress from
//! stderr, watches for stalls, and escalates through three cancellation
//! steps if asked to stop.
//!
//! Grounded on `ferrex-server/src/stream/transcoding/worker.rs`'s
//! `monitor_ffmpeg_progress_with_errors`/`parse_ffmpeg_progress`/
//! `extract_value`/`kill_process` (stderr progress parsing, SIGTERM via
//! `nix::sys::signal::kill`).

use crate::job::ProgressSample;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum RunOutcome {
    Success,
    /// Raw stderr tail, for [`crate::classify::to_ghost_error`] to categorize.
    Failed { stderr_tail: String },
    Cancelled,
    Stalled,
}

pub struct SupervisorConfig {
    pub stall_deadline: Duration,
    pub stderr_tail_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { stall_deadline: Duration::from_secs(120), stderr_tail_lines: 100 }
    }
}

/// Runs one encoder invocation to completion (or cancellation/stall),
/// reporting progress samples on `progress_tx` as it goes.
pub async fn run(
    encoder_path: &str,
    args: &[String],
    duration_secs: Option<f64>,
    cancel: CancellationToken,
    progress_tx: mpsc::Sender<ProgressSample>,
    config: SupervisorConfig,
) -> anyhow::Result<RunOutcome> {
    let mut child = Command::new(encoder_path)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child.stderr.take().expect("stderr was piped");
    let last_progress = std::sync::Arc::new(parking_lot::Mutex::new(Instant::now()));
    let tail = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<String>::with_capacity(config.stderr_tail_lines)));

    let drain_handle = {
        let last_progress = last_progress.clone();
        let tail = tail.clone();
        let tail_cap = config.stderr_tail_lines;
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if line.contains("frame=") {
                    *last_progress.lock() = Instant::now();
                    if let Some(sample) = parse_progress_line(&line, duration_secs) {
                        let _ = progress_tx.send(sample).await;
                    }
                } else {
                    debug!(ffmpeg = %line, "stderr");
                }
                let mut tail = tail.lock();
                tail.push(line);
                if tail.len() > tail_cap {
                    tail.remove(0);
                }
            }
        })
    };

    let stall_deadline = config.stall_deadline;
    let watchdog = {
        let last_progress = last_progress.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if cancel.is_cancelled() {
                    return false;
                }
                if last_progress.lock().elapsed() > stall_deadline {
                    return true;
                }
            }
        })
    };

    let outcome = tokio::select! {
        status = child.wait() => {
            drain_handle.abort();
            watchdog.abort();
            let status = status?;
            if status.success() {
                RunOutcome::Success
            } else {
                RunOutcome::Failed { stderr_tail: format!("[EXIT {}] {}", status.code().unwrap_or(-1), tail.lock().join("\n")) }
            }
        }
        stalled = watchdog => {
            drain_handle.abort();
            if stalled.unwrap_or(false) {
                escalate_cancel(&mut child).await;
                RunOutcome::Failed { stderr_tail: format!("[STALLED] {}", tail.lock().join("\n")) }
            } else {
                RunOutcome::Cancelled
            }
        }
        _ = cancel.cancelled() => {
            drain_handle.abort();
            watchdog.abort();
            escalate_cancel(&mut child).await;
            RunOutcome::Cancelled
        }
    };

    Ok(outcome)
}

/// Three-step escalation: interrupt, give it time to flush a clean HLS
/// trailer, then terminate, then kill outright if it still won't die.
async fn escalate_cancel(child: &mut Child) {
    let pid = match child.id() {
        Some(pid) => pid,
        None => return,
    };

    send_signal(pid, Signal::Interrupt);
    if wait_for_exit(child, Duration::from_secs(5)).await {
        return;
    }

    send_signal(pid, Signal::Terminate);
    if wait_for_exit(child, Duration::from_secs(3)).await {
        return;
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

enum Signal {
    Interrupt,
    Terminate,
}

fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal as NixSignal};
        use nix::unistd::Pid;
        let nix_signal = match signal {
            Signal::Interrupt => NixSignal::SIGINT,
            Signal::Terminate => NixSignal::SIGTERM,
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), nix_signal) {
            warn!(pid, error = %e, "failed to signal encoder process");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}

async fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, child.wait()).await.is_ok()
}

fn parse_progress_line(line: &str, duration_secs: Option<f64>) -> Option<ProgressSample> {
    let current_time_secs = extract_value(line, "time=")
        .and_then(parse_time_to_seconds)
        .unwrap_or(0.0);

    let percent = match duration_secs {
        Some(total) if total > 0.0 => ((current_time_secs / total) * 100.0).min(99.9) as f32,
        _ => 0.0,
    };

    let mut sample = ProgressSample { percent, current_time_secs, ..Default::default() };

    if let Some(s) = extract_value(line, "frame=") {
        sample.frame = s.trim().parse().ok();
    }
    if let Some(s) = extract_value(line, "fps=") {
        sample.fps = s.trim().parse().ok();
    }
    if let Some(s) = extract_value(line, "bitrate=") {
        let cleaned = s.trim();
        if cleaned != "N/A" && !cleaned.is_empty() {
            sample.bitrate = Some(cleaned.to_string());
        }
    }
    if let Some(s) = extract_value(line, "speed=") {
        let cleaned = s.trim().trim_end_matches(['x', 'X', ' ']);
        sample.speed = cleaned.parse().ok();
        if let (Some(speed), Some(total)) = (sample.speed, duration_secs) {
            if speed > 0.0 && current_time_secs < total {
                sample.eta_secs = Some(((total - current_time_secs) / speed as f64) as u64);
            }
        }
    }

    Some(sample)
}

/// Pulls the value following `key=` up to the next whitespace-delimited
/// `key=` token, tolerating ffmpeg's irregular padding around `=`.
fn extract_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest.char_indices().find_map(|(idx, ch)| {
        if !ch.is_whitespace() {
            return None;
        }
        let remaining = rest[idx..].trim_start();
        let looks_like_key = remaining
            .find(|c: char| c.is_whitespace() || c == '=')
            .is_some_and(|p| remaining[..p].contains('='));
        looks_like_key.then_some(idx)
    });
    Some(match end {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    })
}

fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_time_value_between_keys() {
        let line = "frame= 1234 fps= 30.0 q=28.0 size=12345kB time=00:00:41.36 bitrate= 244.8kbits/s speed=1.23x";
        assert_eq!(extract_value(line, "time="), Some("00:00:41.36"));
        assert_eq!(extract_value(line, "frame="), Some("1234"));
    }

    #[test]
    fn parses_hms_time_to_seconds() {
        assert_eq!(parse_time_to_seconds("00:00:41.36"), Some(41.36));
        assert_eq!(parse_time_to_seconds("01:00:00.00"), Some(3600.0));
    }

    #[test]
    fn progress_clamps_below_100_while_running() {
        let line = "frame= 1234 fps= 30.0 time=00:01:00.00 bitrate=500kbits/s speed=2.0x";
        let sample = parse_progress_line(line, Some(60.0)).unwrap();
        assert!(sample.percent <= 99.9);
    }

    #[test]
    fn missing_bitrate_is_not_a_string() {
        let line = "frame= 1 fps=0.0 time=00:00:00.00 bitrate=N/A speed=0x";
        let sample = parse_progress_line(line, Some(10.0)).unwrap();
        assert!(sample.bitrate.is_none());
    }
}
