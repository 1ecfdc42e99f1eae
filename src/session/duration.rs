//! # Duration Resolution
//!
//! Determines the final render duration for a session. The order is fixed
//! and explicit duration always wins:
//!
//! 1. Caller supplied a finite duration → clamp to the documented range,
//!    music presence is irrelevant.
//! 2. Music file present → probe its length with the external probe
//!    executable, round to the nearest second, clamp. Any probe failure
//!    (spawn error, non-zero exit, unparseable output) falls back to the
//!    default.
//! 3. Neither → the default (1800 s).
//!
//! Probe failures are recovered here and logged; they never surface to the
//! HTTP caller. The resolver always completes before the signal graph is
//! built, so a render plan can never carry an unresolved duration.

use crate::session::params::{DEFAULT_DURATION_SEC, DURATION_SEC_RANGE};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolves session durations, probing uploaded media through the configured
/// probe executable. The executable path is construction data — business
/// logic never reads it from the environment.
#[derive(Debug, Clone)]
pub struct DurationResolver {
    ffprobe_path: PathBuf,
}

/// Why a probe attempt produced no usable duration. Internal only; every
/// variant folds into the fallback default.
#[derive(Debug)]
enum ProbeError {
    Spawn(std::io::Error),
    Exit { code: Option<i32>, stderr: String },
    Unparseable(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Spawn(e) => write!(f, "probe process failed to start: {}", e),
            ProbeError::Exit { code, stderr } => {
                write!(f, "probe exited with status {:?}: {}", code, stderr.trim())
            }
            ProbeError::Unparseable(out) => {
                write!(f, "probe output was not a duration: {:?}", out.trim())
            }
        }
    }
}

impl DurationResolver {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Resolve the final duration in seconds.
    ///
    /// `requested` is `Some` only when the caller sent a parseable finite
    /// number; a non-numeric duration arrives as `None` and auto-resolves,
    /// exactly like an absent one.
    pub async fn resolve(&self, requested: Option<f64>, music: Option<&Path>) -> f64 {
        if let Some(seconds) = requested {
            return clamp_duration(seconds);
        }

        if let Some(path) = music {
            match self.probe_seconds(path).await {
                Ok(seconds) => {
                    let resolved = clamp_duration(seconds.round());
                    debug!(
                        probed_sec = seconds,
                        resolved_sec = resolved,
                        "resolved duration from music upload"
                    );
                    return resolved;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        fallback_sec = DEFAULT_DURATION_SEC,
                        "duration probe failed, using default"
                    );
                }
            }
        }

        DEFAULT_DURATION_SEC
    }

    /// Ask the probe executable for a file's duration in seconds.
    async fn probe_seconds(&self, media: &Path) -> Result<f64, ProbeError> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(media)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ProbeError::Unparseable(stdout.into_owned()))
    }
}

/// Clamp a duration into the documented range.
fn clamp_duration(seconds: f64) -> f64 {
    seconds.clamp(DURATION_SEC_RANGE.0, DURATION_SEC_RANGE.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_without_probe() -> DurationResolver {
        // A path that cannot exist; any probe attempt must fall back.
        DurationResolver::new("/nonexistent/ffprobe-for-tests")
    }

    #[test]
    fn clamp_respects_both_boundaries() {
        assert_eq!(clamp_duration(5.0), 60.0);
        assert_eq!(clamp_duration(45.0), 60.0);
        assert_eq!(clamp_duration(600.0), 600.0);
        assert_eq!(clamp_duration(999_999.0), 7200.0);
    }

    #[tokio::test]
    async fn explicit_duration_wins_over_music() {
        // The probe path is bogus, so this only passes if no probe runs.
        let resolver = resolver_without_probe();
        let music = PathBuf::from("/tmp/whatever.mp3");
        assert_eq!(resolver.resolve(Some(600.0), Some(&music)).await, 600.0);
    }

    #[tokio::test]
    async fn explicit_duration_is_clamped_not_probed() {
        let resolver = resolver_without_probe();
        assert_eq!(resolver.resolve(Some(5.0), None).await, 60.0);
        assert_eq!(resolver.resolve(Some(100_000.0), None).await, 7200.0);
    }

    #[tokio::test]
    async fn no_duration_no_music_uses_default() {
        let resolver = resolver_without_probe();
        assert_eq!(resolver.resolve(None, None).await, DEFAULT_DURATION_SEC);
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_default() {
        let resolver = resolver_without_probe();
        let music = PathBuf::from("/tmp/track.mp3");
        assert_eq!(resolver.resolve(None, Some(&music)).await, DEFAULT_DURATION_SEC);
    }
}
