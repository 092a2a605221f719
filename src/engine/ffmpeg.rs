//! # FFmpeg Backend
//!
//! Engine di transcodifica basato sul binario `ffmpeg` esterno.
//!
//! ## Responsabilità:
//! - Risoluzione e verifica del binario (`ffmpeg -version`) durante il load
//! - Directory di staging privata (`TempDir`) usata come filesystem virtuale
//! - Esecuzione asincrona con `tokio::process` e `kill_on_drop`
//! - Progresso calcolato da `-progress pipe:1` (`out_time_us`) rispetto alla durata dell'input
//! - Inoltro delle righe di stderr come log

use super::backend::{EngineBackend, EngineObserver};
use super::locate::ToolLocator;
use crate::error::CompressionError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;

struct LoadedFfmpeg {
    binary: PathBuf,
    staging: TempDir,
}

/// Transcoding engine backed by an external ffmpeg process
pub struct FfmpegBackend {
    locator: ToolLocator,
    loaded: OnceLock<LoadedFfmpeg>,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self {
            locator: ToolLocator::new(ffmpeg_path),
            loaded: OnceLock::new(),
        }
    }

    fn loaded(&self) -> Result<&LoadedFfmpeg, CompressionError> {
        self.loaded
            .get()
            .ok_or_else(|| CompressionError::EngineRun("ffmpeg engine is not loaded".to_string()))
    }

    fn staged_path(&self, name: &str) -> Result<PathBuf, CompressionError> {
        Ok(self.loaded()?.staging.path().join(name))
    }
}

#[async_trait]
impl EngineBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn load(&self) -> Result<(), CompressionError> {
        if self.loaded.get().is_some() {
            return Ok(());
        }

        let binary = self.locator.resolve("ffmpeg").ok_or_else(|| {
            CompressionError::EngineLoad("ffmpeg is required for video compression".to_string())
        })?;

        let output = Command::new(&binary)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                CompressionError::EngineLoad(format!("Failed to execute {}: {}", binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(CompressionError::EngineLoad(format!(
                "{} -version failed: {}",
                binary.display(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Loaded {}", version.lines().next().unwrap_or("ffmpeg"));

        let staging = tempfile::Builder::new()
            .prefix("media-offload-")
            .tempdir()
            .map_err(|e| CompressionError::EngineLoad(format!("Failed to create staging directory: {}", e)))?;
        debug!("Engine staging directory: {}", staging.path().display());

        // A concurrent load that won the race keeps its own staging directory
        let _ = self.loaded.set(LoadedFfmpeg { binary, staging });
        Ok(())
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), CompressionError> {
        let path = self.staged_path(name)?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| CompressionError::EngineRun(format!("Failed to stage {}: {}", name, e)))
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, CompressionError> {
        let path = self.staged_path(name)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| CompressionError::EngineRun(format!("Failed to read {}: {}", name, e)))
    }

    async fn remove_file(&self, name: &str) -> Result<(), CompressionError> {
        let path = self.staged_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CompressionError::EngineRun(format!("Failed to remove {}: {}", name, e))),
        }
    }

    async fn exec(
        &self,
        args: &[String],
        observer: Arc<dyn EngineObserver>,
    ) -> Result<(), CompressionError> {
        let loaded = self.loaded()?;
        run_ffmpeg(&loaded.binary, loaded.staging.path(), args, observer).await
    }
}

async fn run_ffmpeg(
    binary: &Path,
    staging: &Path,
    args: &[String],
    observer: Arc<dyn EngineObserver>,
) -> Result<(), CompressionError> {
    let mut cmd = Command::new(binary);
    cmd.current_dir(staging)
        .args(["-hide_banner", "-nostdin", "-nostats", "-y", "-progress", "pipe:1"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start_time = std::time::Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| CompressionError::EngineRun(format!("Failed to execute {}: {}", binary.display(), e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CompressionError::EngineRun("ffmpeg stdout unavailable".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CompressionError::EngineRun("ffmpeg stderr unavailable".to_string()))?;

    let duration_us = AtomicU64::new(0);
    let tail = Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES));

    let read_stderr = for_each_line(stderr, |line| {
        if let Some(us) = parse_duration_us(&line) {
            // First Duration line belongs to the input
            let _ = duration_us.compare_exchange(0, us, Ordering::SeqCst, Ordering::SeqCst);
        }
        observer.on_log(&line);
        let mut tail = tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    });

    let read_stdout = for_each_line(stdout, |line| {
        if line.trim() == "progress=end" {
            observer.on_progress(1.0);
        } else if let Some(ratio) = parse_progress(&line, duration_us.load(Ordering::SeqCst)) {
            observer.on_progress(ratio);
        }
    });

    let (_, _, status) = tokio::join!(read_stderr, read_stdout, child.wait());
    let status = status.map_err(|e| CompressionError::EngineRun(format!("Failed to wait for ffmpeg: {}", e)))?;

    if !status.success() {
        let tail: Vec<String> = tail.into_inner().into_iter().collect();
        return Err(CompressionError::EngineRun(format!(
            "ffmpeg exited with {} after {:.1}s: {}",
            status,
            start_time.elapsed().as_secs_f64(),
            tail.join("\n")
        )));
    }

    debug!("ffmpeg finished in {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Feed every line of `reader` to `on_line` until EOF.
///
/// Lines are decoded lossily: metadata tags echoed by ffmpeg are not always UTF-8,
/// and the pipe must be drained to the end or ffmpeg dies on its next write.
async fn for_each_line<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\r', '\n']).to_string());
            }
            Err(e) => {
                warn!("Failed to read ffmpeg output: {}", e);
                break;
            }
        }
    }
}

/// Parse `Duration: HH:MM:SS.ff` from an ffmpeg stderr line, in microseconds
fn parse_duration_us(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let timestamp = rest.trim_start().split(',').next()?.trim();
    let mut parts = timestamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    if total > 0.0 {
        Some((total * 1_000_000.0) as u64)
    } else {
        None
    }
}

/// Parse an `out_time_us=` progress line into a ratio of `duration_us`
fn parse_progress(line: &str, duration_us: u64) -> Option<f64> {
    if duration_us == 0 {
        return None;
    }
    let value = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    let out_us: i64 = value.trim().parse().ok()?;
    Some((out_us.max(0) as f64 / duration_us as f64).min(1.0))
}
