//! # Render Orchestration
//!
//! Owns the lifecycle of the external renderer process for one session:
//! `Idle → Spawned → Streaming → {Completed | Aborted | Failed}`.
//!
//! ## Lifecycle Contract:
//! - The renderer's stdout is piped into the HTTP body chunk by chunk; a
//!   two-hour render is never buffered in memory.
//! - Spawn failure and exit-before-first-byte surface as 500s with the
//!   captured stderr. Once body bytes have gone out, a failing renderer can
//!   only terminate the connection.
//! - Cleanup — kill the process if still running, delete the temp upload,
//!   release the active-render gauge — runs on every exit path and is
//!   idempotent: dropping the body stream (client disconnect) triggers the
//!   same single cleanup as normal completion.

use crate::config::RendererConfig;
use crate::error::AppError;
use crate::session::graph::{RenderPlan, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::state::AppState;
use actix_web::web::Bytes;
use futures_util::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Body chunk size. Matches a typical pipe buffer so the renderer is never
/// far ahead of the client.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Upper bound on retained stderr diagnostics. The pipe keeps draining past
/// this so the renderer cannot block on a full stderr buffer.
const STDERR_CAPTURE_BYTES: usize = 16 * 1024;

/// A music upload saved to disk for the lifetime of one request.
///
/// Deletion is idempotent and guaranteed: either an explicit `remove` call or
/// the drop at the end of the request releases the file, never both.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    released: bool,
}

impl TempUpload {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Repeat calls are no-ops.
    pub fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temp upload"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp upload"),
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Single-shot cleanup for one render session. Kills the renderer if it is
/// still running, releases the temp upload, and returns the active-render
/// gauge. Runs at most once no matter how many termination signals arrive.
struct CleanupGuard {
    child: Option<Child>,
    upload: Option<TempUpload>,
    state: AppState,
    done: bool,
}

impl CleanupGuard {
    fn run(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(status = ?status.code(), "renderer already exited before cleanup")
                }
                _ => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill renderer process");
                    }
                }
            }
        }

        if let Some(upload) = self.upload.as_mut() {
            upload.remove();
        }

        self.state.decrement_active_renders();
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

/// Spawns renderer processes. Executable path comes in at construction time
/// from the renderer configuration.
#[derive(Debug, Clone)]
pub struct RenderOrchestrator {
    ffmpeg_path: PathBuf,
}

impl RenderOrchestrator {
    pub fn new(renderer: &RendererConfig) -> Self {
        Self {
            ffmpeg_path: PathBuf::from(&renderer.ffmpeg_path),
        }
    }

    /// Launch the renderer for a plan and wait for its first output.
    ///
    /// Returns the streaming body once the renderer has produced bytes. The
    /// temp upload (if any) is owned by the session's cleanup guard from this
    /// point on; every error path below releases it before returning.
    pub async fn start(
        &self,
        plan: RenderPlan,
        upload: Option<TempUpload>,
        state: AppState,
    ) -> Result<RenderStream, AppError> {
        state.increment_active_renders();
        let mut guard = CleanupGuard {
            child: None,
            upload,
            state,
            done: false,
        };

        let args = renderer_args(&plan);
        debug!(renderer = %self.ffmpeg_path.display(), ?args, "spawning renderer");

        let spawned = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                // Guard drop releases the upload and the gauge.
                return Err(AppError::RenderSpawn(format!(
                    "failed to start renderer '{}': {}",
                    self.ffmpeg_path.display(),
                    e
                )));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        guard.child = Some(child);

        let mut stdout = stdout
            .ok_or_else(|| AppError::Internal("renderer stdout was not captured".to_string()))?;
        let stderr_task = spawn_stderr_collector(stderr);

        // First output or death, whichever comes first. The renderer closes
        // stdout only on exit, so a zero-byte read means it is done.
        let mut first = vec![0u8; STREAM_CHUNK_BYTES];
        let n = match stdout.read(&mut first).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "renderer output read failed before streaming");
                if let Some(child) = guard.child.as_mut() {
                    let _ = child.start_kill();
                }
                0
            }
        };

        if n == 0 {
            let status = match guard.child.as_mut() {
                Some(child) => child.wait().await.ok(),
                None => None,
            };
            let detail = stderr_task.await.unwrap_or_default();
            let code = status.and_then(|s| s.code());
            guard.run();
            return Err(AppError::RenderExit { status: code, detail });
        }

        first.truncate(n);
        Ok(RenderStream {
            stdout: Some(stdout),
            pending: Some(Bytes::from(first)),
            bytes_streamed: n as u64,
            stderr_task: Some(stderr_task),
            guard,
        })
    }
}

/// Build the renderer argument list for a plan.
///
/// Input order is load-bearing: when music is present it is input 0 (with the
/// infinite-loop instruction attached) and the synthetic tone source is input
/// 1, matching the stream labels inside the filter graph.
pub fn renderer_args(plan: &RenderPlan) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    if let Some(music) = &plan.music_input {
        if plan.loop_music {
            args.push("-stream_loop".to_string());
            args.push("-1".to_string());
        }
        args.push("-i".to_string());
        args.push(music.display().to_string());
    }

    args.push("-f".to_string());
    args.push("lavfi".to_string());
    args.push("-i".to_string());
    args.push(plan.tone_source.clone());

    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());
    args.push("-map".to_string());
    args.push("[out]".to_string());

    args.push("-f".to_string());
    args.push("wav".to_string());
    args.push("-c:a".to_string());
    args.push("pcm_s24le".to_string());
    args.push("-ar".to_string());
    args.push(OUTPUT_SAMPLE_RATE.to_string());
    args.push("-ac".to_string());
    args.push(OUTPUT_CHANNELS.to_string());
    args.push("pipe:1".to_string());

    args
}

/// Drain the renderer's stderr, retaining a bounded prefix for diagnostics.
fn spawn_stderr_collector(
    stderr: Option<tokio::process::ChildStderr>,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut text = String::new();
        let Some(mut stderr) = stderr else {
            return text;
        };

        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if text.len() < STDERR_CAPTURE_BYTES {
                        let take = n.min(STDERR_CAPTURE_BYTES - text.len());
                        text.push_str(&String::from_utf8_lossy(&buf[..take]));
                    }
                }
            }
        }
        text
    })
}

/// Streaming HTTP body fed by the renderer's stdout.
///
/// Dropping this stream is the cancellation signal: the cleanup guard kills
/// the renderer and releases the upload whether the drop came from client
/// disconnect, a response error, or normal exhaustion.
pub struct RenderStream {
    stdout: Option<tokio::process::ChildStdout>,
    pending: Option<Bytes>,
    bytes_streamed: u64,
    stderr_task: Option<JoinHandle<String>>,
    guard: CleanupGuard,
}

impl RenderStream {
    /// End of output: reap the process in the background for status logging,
    /// then run cleanup. After this the stream only yields `None`.
    fn finish(&mut self) {
        self.stdout = None;

        if let Some(mut child) = self.guard.child.take() {
            let stderr_task = self.stderr_task.take();
            let bytes_streamed = self.bytes_streamed;
            tokio::spawn(async move {
                let status = child.wait().await;
                match status {
                    Ok(s) if s.success() => {
                        debug!(bytes_streamed, "renderer completed")
                    }
                    Ok(s) => {
                        let detail = match stderr_task {
                            Some(task) => task.await.unwrap_or_default(),
                            None => String::new(),
                        };
                        // Bytes already went out; the connection just ends.
                        warn!(
                            status = ?s.code(),
                            bytes_streamed,
                            stderr = %detail.trim(),
                            "renderer exited non-zero mid-stream"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to reap renderer process"),
                }
            });
        }

        self.guard.run();
    }
}

impl Stream for RenderStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.pending.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }

        let Some(stdout) = this.stdout.as_mut() else {
            return Poll::Ready(None);
        };

        let mut buf = [0u8; STREAM_CHUNK_BYTES];
        let mut read_buf = ReadBuf::new(&mut buf);
        match Pin::new(stdout).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    this.finish();
                    Poll::Ready(None)
                } else {
                    this.bytes_streamed += filled.len() as u64;
                    Poll::Ready(Some(Ok(Bytes::copy_from_slice(filled))))
                }
            }
            Poll::Ready(Err(e)) => {
                warn!(error = %e, "renderer output read failed mid-stream");
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::graph::build_render_plan;
    use crate::session::params::RawSessionRequest;
    use futures_util::StreamExt;

    fn tone_plan() -> RenderPlan {
        build_render_plan(&RawSessionRequest::new().resolve(600.0))
    }

    fn music_plan(path: &str) -> RenderPlan {
        let mut raw = RawSessionRequest::new();
        raw.set_music(PathBuf::from(path));
        build_render_plan(&raw.resolve(600.0))
    }

    fn scratch_upload() -> TempUpload {
        let path = std::env::temp_dir().join(format!("upload-{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"not really audio").unwrap();
        TempUpload::new(path)
    }

    fn orchestrator(path: &str) -> RenderOrchestrator {
        let mut config = AppConfig::default();
        config.renderer.ffmpeg_path = path.to_string();
        RenderOrchestrator::new(&config.renderer)
    }

    #[test]
    fn tone_only_args_have_single_synthetic_input() {
        let args = renderer_args(&tone_plan());

        assert!(!args.contains(&"-stream_loop".to_string()));
        let lavfi = args.iter().position(|a| a == "lavfi").unwrap();
        assert!(args[lavfi + 2].starts_with("aevalsrc="));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn music_args_loop_the_music_input_first() {
        let args = renderer_args(&music_plan("/tmp/bed.mp3"));

        let loop_flag = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_flag + 1], "-1");
        assert_eq!(args[loop_flag + 2], "-i");
        assert_eq!(args[loop_flag + 3], "/tmp/bed.mp3");

        // The synthetic tone input comes after the music input.
        let lavfi = args.iter().position(|a| a == "lavfi").unwrap();
        assert!(lavfi > loop_flag);
    }

    #[test]
    fn output_format_flags_are_fixed() {
        let args = renderer_args(&tone_plan());
        let joined = args.join(" ");

        assert!(joined.contains("-f wav"));
        assert!(joined.contains("-c:a pcm_s24le"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-ac 2"));
        assert!(joined.ends_with("pipe:1"));
    }

    #[test]
    fn temp_upload_removal_is_idempotent() {
        let mut upload = scratch_upload();
        let path = upload.path().to_path_buf();
        assert!(path.exists());

        upload.remove();
        assert!(!path.exists());
        // Second removal must be a silent no-op.
        upload.remove();
        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_guard_runs_exactly_once() {
        let state = AppState::new(AppConfig::default());
        state.increment_active_renders();
        state.increment_active_renders();

        let upload = scratch_upload();
        let path = upload.path().to_path_buf();
        let mut guard = CleanupGuard {
            child: None,
            upload: Some(upload),
            state: state.clone(),
            done: false,
        };

        guard.run();
        guard.run();
        drop(guard);

        assert!(!path.exists());
        // Two increments, one guard: exactly one decrement happened.
        assert_eq!(state.get_metrics_snapshot().active_renders, 1);
    }

    #[tokio::test]
    async fn missing_renderer_surfaces_spawn_failure_and_cleans_up() {
        let state = AppState::new(AppConfig::default());
        let upload = scratch_upload();
        let path = upload.path().to_path_buf();

        let result = orchestrator("/nonexistent/renderer-for-tests")
            .start(tone_plan(), Some(upload), state.clone())
            .await;

        match result {
            Err(AppError::RenderSpawn(msg)) => assert!(msg.contains("renderer-for-tests")),
            other => panic!("expected RenderSpawn, got {:?}", other.map(|_| "stream")),
        }
        assert!(!path.exists());
        assert_eq!(state.get_metrics_snapshot().active_renders, 0);
    }

    #[tokio::test]
    async fn renderer_exit_without_output_surfaces_exit_failure() {
        let state = AppState::new(AppConfig::default());
        let upload = scratch_upload();
        let path = upload.path().to_path_buf();

        // `false` accepts any arguments, writes nothing, exits 1.
        let result = orchestrator("false")
            .start(tone_plan(), Some(upload), state.clone())
            .await;

        match result {
            Err(AppError::RenderExit { status, .. }) => assert_eq!(status, Some(1)),
            other => panic!("expected RenderExit, got {:?}", other.map(|_| "stream")),
        }
        assert!(!path.exists());
        assert_eq!(state.get_metrics_snapshot().active_renders, 0);
    }

    #[tokio::test]
    async fn streamed_output_releases_resources_on_exhaustion() {
        let state = AppState::new(AppConfig::default());
        let upload = scratch_upload();
        let path = upload.path().to_path_buf();

        // `echo` prints its arguments and exits 0: a tiny stand-in renderer
        // that exercises the full Spawned → Streaming → Completed path.
        let mut stream = orchestrator("echo")
            .start(tone_plan(), Some(upload), state.clone())
            .await
            .expect("echo should stream its arguments");

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }

        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("pipe:1"));
        assert!(!path.exists());
        assert_eq!(state.get_metrics_snapshot().active_renders, 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_mid_flight_cleans_up() {
        let state = AppState::new(AppConfig::default());
        let upload = scratch_upload();
        let path = upload.path().to_path_buf();

        // `yes` streams forever; dropping the body is the only way it ends.
        let mut stream = orchestrator("yes")
            .start(tone_plan(), Some(upload), state.clone())
            .await
            .expect("yes should produce output");

        let first = stream.next().await.expect("first chunk").unwrap();
        assert!(!first.is_empty());
        drop(stream);

        assert!(!path.exists());
        assert_eq!(state.get_metrics_snapshot().active_renders, 0);
    }
}
