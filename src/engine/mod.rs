//! # Transcoding Engine Adapter
//!
//! Wrapper del ciclo di vita di una singola istanza di engine, condivisa da
//! tutti i job dello stesso contesto di esecuzione.
//!
//! ## Responsabilità:
//! - Load lazy e idempotente: chiamate concorrenti durante `Loading` attendono lo stesso load
//! - Retry limitato dopo un load fallito (default: un retry), poi il fallimento resta in cache
//! - Timeout sul load
//! - Staging di input/output nel filesystem virtuale dell'engine, un job alla volta
//! - Cleanup garantito dei file di staging su ogni percorso di uscita
//!   (successo, errore, cancellazione); i fallimenti di cleanup sono solo loggati
//! - Installazione degli handler di progresso/log del job subito prima del run,
//!   rimossi alla fine così nessun evento tardivo raggiunge un job precedente
//!
//! ## Ciclo di vita:
//! ```text
//! Unloaded → Loading → Ready
//!                    ↘ Failed → (retry) Loading
//! ```

pub mod backend;
pub mod ffmpeg;
pub mod locate;

pub use backend::{BackendFactory, EngineBackend, EngineObserver};
pub use ffmpeg::FfmpegBackend;

use crate::config::Config;
use crate::error::CompressionError;
use crate::events::{clamp_ratio, ProgressSink};
use crate::profile::EncodingProfile;
use crate::protocol::JobId;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

/// Fixed name of the engine's output file
pub const OUTPUT_NAME: &str = "output.mp4";

/// Lifecycle of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

type LoadFuture = Shared<BoxFuture<'static, Result<(), CompressionError>>>;

enum LoadSlot {
    Unloaded,
    Loading(LoadFuture),
    Ready,
    Failed(CompressionError),
}

struct LoadState {
    slot: LoadSlot,
    failures: u32,
    /// Bumped on every new load attempt so a stale attempt never overwrites a newer one
    attempt: u64,
}

/// Shared transcoding engine of one execution context
pub struct TranscodingEngine {
    backend: Arc<dyn EngineBackend>,
    load: Mutex<LoadState>,
    handlers: Arc<HandlerSlot>,
    lease: Arc<tokio::sync::Mutex<()>>,
    load_timeout: Duration,
    load_retries: u32,
}

impl TranscodingEngine {
    pub fn new(backend: Arc<dyn EngineBackend>, load_timeout: Duration, load_retries: u32) -> Self {
        Self {
            backend,
            load: Mutex::new(LoadState {
                slot: LoadSlot::Unloaded,
                failures: 0,
                attempt: 0,
            }),
            handlers: Arc::new(HandlerSlot::default()),
            lease: Arc::new(tokio::sync::Mutex::new(())),
            load_timeout,
            load_retries,
        }
    }

    pub fn from_config(backend: Arc<dyn EngineBackend>, config: &Config) -> Self {
        Self::new(backend, config.engine_load_timeout(), config.engine_load_retries)
    }

    pub fn status(&self) -> EngineStatus {
        match self.load.lock().slot {
            LoadSlot::Unloaded => EngineStatus::Unloaded,
            LoadSlot::Loading(_) => EngineStatus::Loading,
            LoadSlot::Ready => EngineStatus::Ready,
            LoadSlot::Failed(_) => EngineStatus::Failed,
        }
    }

    /// Make sure the engine is loaded, sharing any load already in flight
    pub async fn ensure_loaded(&self) -> Result<(), CompressionError> {
        let (pending, attempt) = {
            let mut state = self.load.lock();
            match &state.slot {
                LoadSlot::Ready => return Ok(()),
                LoadSlot::Loading(pending) => (pending.clone(), state.attempt),
                LoadSlot::Failed(error) if state.failures > self.load_retries => {
                    debug!("Engine load failed {} times, not retrying", state.failures);
                    return Err(error.clone());
                }
                LoadSlot::Unloaded | LoadSlot::Failed(_) => {
                    if state.failures > 0 {
                        info!("Retrying transcoding engine load (attempt {})", state.failures + 1);
                    }
                    state.attempt += 1;
                    let pending = self.start_load();
                    state.slot = LoadSlot::Loading(pending.clone());
                    (pending, state.attempt)
                }
            }
        };

        let result = pending.await;

        let mut state = self.load.lock();
        if state.attempt == attempt && matches!(state.slot, LoadSlot::Loading(_)) {
            match &result {
                Ok(()) => {
                    info!("Transcoding engine ready ({})", self.backend.name());
                    state.slot = LoadSlot::Ready;
                }
                Err(e) => {
                    error!("Transcoding engine failed to load: {}", e);
                    state.failures += 1;
                    state.slot = LoadSlot::Failed(e.clone());
                }
            }
        }
        result
    }

    fn start_load(&self) -> LoadFuture {
        let backend = Arc::clone(&self.backend);
        let limit = self.load_timeout;
        async move {
            info!("Loading transcoding engine ({})...", backend.name());
            match tokio::time::timeout(limit, backend.load()).await {
                Ok(result) => result,
                Err(_) => Err(CompressionError::timeout("Transcoding engine load", limit)),
            }
        }
        .boxed()
        .shared()
    }

    /// Transcode `input` with `profile`.
    ///
    /// Only one job uses the engine's file namespace at a time; the staged
    /// input and output are removed whatever the outcome.
    pub async fn run_job(
        &self,
        job_id: JobId,
        input: Bytes,
        input_name: &str,
        profile: &EncodingProfile,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Bytes, CompressionError> {
        self.ensure_loaded().await?;

        let lease = Arc::clone(&self.lease).lock_owned().await;
        let staged_input = staging_name(input_name);
        let args = profile.to_args(&staged_input, OUTPUT_NAME);

        let staging = StagingGuard {
            backend: Arc::clone(&self.backend),
            job_id,
            names: vec![staged_input.clone(), OUTPUT_NAME.to_string()],
            lease: Some(lease),
        };
        let handlers = self.handlers.install(job_id, Arc::clone(&sink));

        info!(
            "Job {}: compressing {} ({} bytes, {:?} tier)",
            job_id,
            input_name,
            input.len(),
            profile.tier
        );
        sink.log(job_id, format!("Running engine command: {}", args.join(" ")));

        let outcome = self.execute(&staged_input, input, &args).await;

        drop(handlers);
        staging.release().await;

        match &outcome {
            Ok(output) => {
                sink.log(job_id, format!("Engine finished, output is {} bytes", output.len()));
                info!("Job {}: engine produced {} bytes", job_id, output.len());
            }
            Err(e) => error!("Job {}: engine run failed: {}", job_id, e),
        }
        outcome
    }

    async fn execute(&self, staged_input: &str, input: Bytes, args: &[String]) -> Result<Bytes, CompressionError> {
        self.backend.write_file(staged_input, input).await?;
        let observer: Arc<dyn EngineObserver> = Arc::clone(&self.handlers) as Arc<dyn EngineObserver>;
        self.backend.exec(args, observer).await?;
        self.backend.read_file(OUTPUT_NAME).await
    }
}

/// File name the input is staged under: the last path component of
/// `input_name`, never colliding with the output or looking like a flag.
fn staging_name(input_name: &str) -> String {
    let base = Path::new(input_name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "input".to_string());

    if base == OUTPUT_NAME || base.starts_with('-') {
        format!("input-{}", base)
    } else {
        base
    }
}

struct InstalledHandlers {
    job_id: JobId,
    sink: Arc<dyn ProgressSink>,
}

/// The engine's single progress/log handler slot
#[derive(Default)]
pub(crate) struct HandlerSlot {
    current: Mutex<Option<InstalledHandlers>>,
}

impl HandlerSlot {
    fn install(&self, job_id: JobId, sink: Arc<dyn ProgressSink>) -> HandlerGuard<'_> {
        let previous = self.current.lock().replace(InstalledHandlers { job_id, sink });
        if let Some(previous) = previous {
            warn!("Replacing stale engine handlers of job {}", previous.job_id);
        }
        HandlerGuard { slot: self }
    }

    fn current(&self) -> Option<(JobId, Arc<dyn ProgressSink>)> {
        self.current
            .lock()
            .as_ref()
            .map(|h| (h.job_id, Arc::clone(&h.sink)))
    }
}

impl EngineObserver for HandlerSlot {
    fn on_progress(&self, ratio: f64) {
        if let Some((job_id, sink)) = self.current() {
            sink.progress(job_id, clamp_ratio(ratio));
        }
    }

    fn on_log(&self, line: &str) {
        if let Some((job_id, sink)) = self.current() {
            sink.log(job_id, format!("[engine] {}", line));
        }
    }
}

struct HandlerGuard<'a> {
    slot: &'a HandlerSlot,
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.slot.current.lock().take();
    }
}

/// Owns the staged files and the engine lease until they are cleaned up
struct StagingGuard {
    backend: Arc<dyn EngineBackend>,
    job_id: JobId,
    names: Vec<String>,
    lease: Option<OwnedMutexGuard<()>>,
}

impl StagingGuard {
    async fn release(mut self) {
        let lease = self.lease.take();
        remove_staged(&self.backend, self.job_id, &self.names).await;
        drop(lease);
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        // Only reached with a lease when the run was cancelled mid-flight
        let Some(lease) = self.lease.take() else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let names = std::mem::take(&mut self.names);
        let job_id = self.job_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_staged(&backend, job_id, &names).await;
                    drop(lease);
                });
            }
            Err(_) => warn!("Job {}: no runtime to clean up staged files {:?}", job_id, names),
        }
    }
}

async fn remove_staged(backend: &Arc<dyn EngineBackend>, job_id: JobId, names: &[String]) {
    for name in names {
        if let Err(e) = backend.remove_file(name).await {
            warn!("Job {}: failed to clean up staged file {}: {}", job_id, name, e);
        }
    }
    debug!("Job {}: staged files cleaned up", job_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MB;
    use crate::media::MediaKind;
    use crate::profile;
    use crate::testing::{RecordingSink, ScriptedBackend};
    use tokio_test::{assert_err, assert_ok};

    fn engine(backend: Arc<ScriptedBackend>) -> TranscodingEngine {
        TranscodingEngine::new(backend, Duration::from_secs(5), 1)
    }

    #[test]
    fn test_staging_name() {
        assert_eq!(staging_name("clip.mp4"), "clip.mp4");
        assert_eq!(staging_name("../../etc/clip.mov"), "clip.mov");
        assert_eq!(staging_name("output.mp4"), "input-output.mp4");
        assert_eq!(staging_name("-y.mp4"), "input--y.mp4");
        assert_eq!(staging_name(""), "input");
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_attempt() {
        let backend = Arc::new(ScriptedBackend::new().with_load_delay(Duration::from_millis(50)));
        let engine = engine(backend.clone());

        let (a, b) = tokio::join!(engine.ensure_loaded(), engine.ensure_loaded());
        assert_ok!(a);
        assert_ok!(b);
        assert_eq!(backend.load_calls(), 1);
        assert_eq!(engine.status(), EngineStatus::Ready);

        assert_ok!(engine.ensure_loaded().await);
        assert_eq!(backend.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_failure() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_load_delay(Duration::from_millis(20))
                .failing_loads(5),
        );
        let engine = engine(backend.clone());

        let (a, b) = tokio::join!(engine.ensure_loaded(), engine.ensure_loaded());
        assert_eq!(a, b);
        assert!(matches!(a, Err(CompressionError::EngineLoad(_))));
        assert_eq!(backend.load_calls(), 1);
        assert_eq!(engine.status(), EngineStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_load_retries_once_then_stays_failed() {
        let backend = Arc::new(ScriptedBackend::new().failing_loads(5));
        let engine = engine(backend.clone());

        assert_err!(engine.ensure_loaded().await);
        assert_err!(engine.ensure_loaded().await);
        assert_err!(engine.ensure_loaded().await);
        assert_eq!(backend.load_calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_load_failure_recovers() {
        let backend = Arc::new(ScriptedBackend::new().failing_loads(1));
        let engine = engine(backend.clone());

        assert_err!(engine.ensure_loaded().await);
        assert_ok!(engine.ensure_loaded().await);
        assert_eq!(engine.status(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let backend = Arc::new(ScriptedBackend::new().with_load_delay(Duration::from_secs(60)));
        let engine = TranscodingEngine::new(backend, Duration::from_millis(20), 0);

        let err = engine.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, CompressionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_job_stages_runs_and_cleans_up() {
        let backend = Arc::new(ScriptedBackend::new().with_output(b"small".to_vec()));
        let engine = engine(backend.clone());
        let sink = Arc::new(RecordingSink::default());
        let profile = profile::select(30 * MB, MediaKind::Video);

        let output = engine
            .run_job(JobId(7), Bytes::from_static(b"big input"), "clip.mp4", &profile, sink.clone())
            .await
            .unwrap();

        assert_eq!(&output[..], b"small");
        assert_eq!(backend.written(), vec!["clip.mp4".to_string()]);
        assert!(backend.staged_files().is_empty());
        let args = backend.last_args().unwrap();
        assert_eq!(args.first().map(String::as_str), Some("-i"));
        assert_eq!(args.last().map(String::as_str), Some(OUTPUT_NAME));
        assert!(sink.ratios(JobId(7)).contains(&1.0));
    }

    #[tokio::test]
    async fn test_failed_run_still_cleans_up() {
        let backend = Arc::new(ScriptedBackend::new().failing_exec("encoder exploded"));
        let engine = engine(backend.clone());
        let profile = profile::select(60 * MB, MediaKind::Video);

        let err = engine
            .run_job(JobId(1), Bytes::from_static(b"x"), "clip.mp4", &profile, Arc::new(RecordingSink::default()))
            .await
            .unwrap_err();

        assert_eq!(err, CompressionError::EngineRun("encoder exploded".to_string()));
        assert!(backend.staged_files().is_empty());
        assert!(backend.removed().contains(&"clip.mp4".to_string()));
        assert!(backend.removed().contains(&OUTPUT_NAME.to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_swallowed() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_output(b"ok".to_vec())
                .failing_removes(),
        );
        let engine = engine(backend.clone());
        let profile = profile::select(MB, MediaKind::Video);

        let output = engine
            .run_job(JobId(2), Bytes::from_static(b"x"), "a.mp4", &profile, Arc::new(RecordingSink::default()))
            .await;
        assert_eq!(output.unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_cancelled_run_cleans_up() {
        let backend = Arc::new(ScriptedBackend::new().with_exec_delay(Duration::from_secs(60)));
        let engine = Arc::new(engine(backend.clone()));
        let profile = profile::select(MB, MediaKind::Video);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .run_job(JobId(3), Bytes::from_static(b"x"), "a.mp4", &profile, Arc::new(RecordingSink::default()))
                    .await
            })
        };
        backend.wait_for_exec().await;
        assert_eq!(backend.staged_files(), vec!["a.mp4".to_string()]);

        task.abort();
        let _ = task.await;

        // Cleanup runs on a spawned task holding the lease; taking the lease waits for it
        let _lease = engine.lease.lock().await;
        assert!(backend.staged_files().is_empty());
    }

    #[tokio::test]
    async fn test_late_engine_events_do_not_reach_finished_job() {
        let backend = Arc::new(ScriptedBackend::new().with_output(b"out".to_vec()));
        let engine = engine(backend.clone());
        let profile = profile::select(MB, MediaKind::Video);
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());

        engine
            .run_job(JobId(10), Bytes::from_static(b"x"), "a.mp4", &profile, first.clone())
            .await
            .unwrap();
        let seen_by_first = first.ratios(JobId(10)).len();

        // The backend kept the observer; a late event must go nowhere
        backend.emit_late_progress(0.3);
        assert_eq!(first.ratios(JobId(10)).len(), seen_by_first);

        engine
            .run_job(JobId(11), Bytes::from_static(b"y"), "b.mp4", &profile, second.clone())
            .await
            .unwrap();
        assert_eq!(first.ratios(JobId(11)).len(), 0);
        assert!(!second.ratios(JobId(11)).is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_propagates_from_run_job() {
        let backend = Arc::new(ScriptedBackend::new().failing_loads(5));
        let engine = engine(backend.clone());
        let profile = profile::select(MB, MediaKind::Video);

        let err = engine
            .run_job(JobId(4), Bytes::from_static(b"x"), "a.mp4", &profile, Arc::new(RecordingSink::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, CompressionError::EngineLoad(_)));
        assert!(backend.written().is_empty());
    }
}
