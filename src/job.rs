//! # Compression Job State Machine
//!
//! Guida un singolo media attraverso validazione, conferma, routing ed esecuzione.
//!
//! ## Responsabilità:
//! - Validazione di dimensione massima e formato prima di toccare l'engine
//! - Conferma esplicita dell'utente per file grandi (immagini e video), con opzione "non chiedere più"
//! - Passthrough di immagini e video piccoli senza transcodifica
//! - Lettura del payload con timeout e selezione del profilo
//! - Mapping del progresso dell'engine nel range di compressione del job
//! - Evento terminale unico (`Finished`) per ogni job
//!
//! ## Stati:
//! ```text
//! Validating → (AwaitingUserConfirmation)? → Routing → Running → Succeeded
//!                          ↘ Succeeded (passthrough)           ↘ Failed
//!                                                              ↘ CancelledByUser
//! ```
//!
//! ## Utilizzo:
//! ```rust,ignore
//! let compressor = Compressor::from_config(config, factory);
//! let mut handle = compressor.submit(media);
//! while let Some(event) = handle.next_event().await {
//!     match event {
//!         JobEvent::ConfirmationRequired(request) => request.accept(false),
//!         JobEvent::Finished(outcome) => break,
//!         _ => {}
//!     }
//! }
//! ```

use crate::config::{CompressionPolicy, Config};
use crate::engine::BackendFactory;
use crate::error::CompressionError;
use crate::events::{clamp_ratio, ProgressSink};
use crate::media::{calculate_reduction, MediaFile, MediaKind};
use crate::profile::{self, EncodingProfile};
use crate::protocol::{JobId, MediaPayload};
use crate::router::ExecutionRouter;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Shown in a confirmation request when the media will be uploaded as is
const PASSTHROUGH_DESCRIPTION: &str = "no compression, uploaded as is";

/// States of a compression job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Validating,
    AwaitingUserConfirmation,
    Routing,
    Running,
    Succeeded,
    Failed,
    CancelledByUser,
}

/// Outcome of a successful job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    pub job_id: JobId,
    pub name: String,
    /// The compressed media, or the original payload when it passed through untouched
    #[serde(skip)]
    pub compressed_payload: Bytes,
    pub original_byte_size: u64,
    pub compressed_byte_size: u64,
    /// None when the payload passed through untouched
    pub profile_used: Option<EncodingProfile>,
}

impl CompressionResult {
    pub fn reduction_percent(&self) -> f64 {
        calculate_reduction(self.original_byte_size, self.compressed_byte_size)
    }

    pub fn was_compressed(&self) -> bool {
        self.profile_used.is_some()
    }
}

/// The user's answer to a `ConfirmationRequest`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Accept { dont_ask_again: bool },
    Reject,
}

/// Asks the user whether a large file may be compressed.
///
/// Dropping the request without answering rejects it.
#[derive(Debug)]
pub struct ConfirmationRequest {
    pub job_id: JobId,
    pub name: String,
    pub byte_size: u64,
    pub threshold: u64,
    /// What the job will do to the media once accepted
    pub tier_description: &'static str,
    reply: oneshot::Sender<ConfirmationDecision>,
}

impl ConfirmationRequest {
    pub fn accept(self, dont_ask_again: bool) {
        let _ = self.reply.send(ConfirmationDecision::Accept { dont_ask_again });
    }

    pub fn reject(self) {
        let _ = self.reply.send(ConfirmationDecision::Reject);
    }
}

/// Everything a job reports to the UI layer
#[derive(Debug)]
pub enum JobEvent {
    StateChanged(JobState),
    /// Overall job progress in `[0, 1]`
    Progress { ratio: f64 },
    Log { text: String },
    ConfirmationRequired(ConfirmationRequest),
    /// Always the last event of a job
    Finished(Result<CompressionResult, CompressionError>),
}

#[derive(Debug, Default)]
struct Journal {
    progress_ratio: f64,
    log_entries: Vec<String>,
}

/// Progress and log record of a job, fed by the engine and the router
struct JobJournal {
    job_id: JobId,
    events: mpsc::UnboundedSender<JobEvent>,
    range: (f64, f64),
    journal: Mutex<Journal>,
}

impl JobJournal {
    fn emit(&self, event: JobEvent) {
        // The UI may stop listening at any time; the job still runs to completion
        let _ = self.events.send(event);
    }

    /// Move overall progress forward; it never goes back
    fn advance_to(&self, overall: f64) {
        let overall = clamp_ratio(overall);
        let mut journal = self.journal.lock();
        if overall > journal.progress_ratio {
            journal.progress_ratio = overall;
            drop(journal);
            self.emit(JobEvent::Progress { ratio: overall });
        }
    }

    fn record_log(&self, text: String) {
        self.journal.lock().log_entries.push(text.clone());
        self.emit(JobEvent::Log { text });
    }
}

impl ProgressSink for JobJournal {
    fn progress(&self, job_id: JobId, ratio: f64) {
        if job_id != self.job_id {
            warn!("Job {}: dropping progress addressed to job {}", self.job_id, job_id);
            return;
        }
        let (start, end) = self.range;
        self.advance_to(start + clamp_ratio(ratio) * (end - start));
    }

    fn log(&self, job_id: JobId, text: String) {
        if job_id != self.job_id {
            warn!("Job {}: dropping log addressed to job {}", self.job_id, job_id);
            return;
        }
        self.record_log(text);
    }
}

/// Mutable record of one job, owned by its state machine
pub struct CompressionJob {
    pub id: JobId,
    pub input: MediaFile,
    pub profile: Option<EncodingProfile>,
    state: JobState,
    journal: Arc<JobJournal>,
}

impl CompressionJob {
    fn new(id: JobId, input: MediaFile, events: mpsc::UnboundedSender<JobEvent>, range: (f64, f64)) -> Self {
        Self {
            id,
            input,
            profile: None,
            state: JobState::Validating,
            journal: Arc::new(JobJournal {
                job_id: id,
                events,
                range,
                journal: Mutex::new(Journal::default()),
            }),
        }
    }

    pub fn progress_ratio(&self) -> f64 {
        self.journal.journal.lock().progress_ratio
    }

    pub fn log_entries(&self) -> Vec<String> {
        self.journal.journal.lock().log_entries.clone()
    }

    fn enter(&mut self, state: JobState) {
        debug!("Job {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
        self.journal.emit(JobEvent::StateChanged(state));
    }
}

/// Receiving end of a submitted job
pub struct JobHandle {
    job_id: JobId,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or None after `Finished` has been delivered
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Stop the job. It finishes with `CancelledByUser` and releases everything it holds.
    pub fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }

    /// Wait for the outcome, rejecting any confirmation request along the way
    pub async fn outcome(mut self) -> Result<CompressionResult, CompressionError> {
        while let Some(event) = self.events.recv().await {
            if let JobEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        Err(CompressionError::Delegation(format!("job {} ended without an outcome", self.job_id)))
    }
}

/// Runs compression jobs for the UI layer
#[derive(Clone)]
pub struct Compressor {
    config: Arc<Config>,
    policy: Arc<CompressionPolicy>,
    router: Arc<ExecutionRouter>,
}

impl Compressor {
    pub fn new(config: Config, policy: Arc<CompressionPolicy>, router: Arc<ExecutionRouter>) -> Self {
        Self {
            config: Arc::new(config),
            policy,
            router,
        }
    }

    pub fn from_config(config: Config, factory: BackendFactory) -> Self {
        let policy = Arc::new(CompressionPolicy::from(&config));
        let router = Arc::new(ExecutionRouter::from_config(&config, factory));
        Self::new(config, policy, router)
    }

    pub fn policy(&self) -> &Arc<CompressionPolicy> {
        &self.policy
    }

    pub fn router(&self) -> &Arc<ExecutionRouter> {
        &self.router
    }

    /// Start a job for `media` on the runtime
    pub fn submit(&self, media: MediaFile) -> JobHandle {
        let job_id = JobId::next();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let compressor = self.clone();

        tokio::spawn(async move {
            compressor.run(job_id, media, events_tx, cancel_rx).await;
        });

        JobHandle {
            job_id,
            events: events_rx,
            cancel_tx: Some(cancel_tx),
        }
    }

    async fn run(
        &self,
        job_id: JobId,
        media: MediaFile,
        events: mpsc::UnboundedSender<JobEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let range = (self.config.compression_progress_start, self.config.compression_progress_end);
        let mut job = CompressionJob::new(job_id, media, events, range);
        info!(
            "Job {}: started for {} ({} bytes, {})",
            job_id,
            job.input.name(),
            job.input.byte_size(),
            job.input.mime_type()
        );

        let outcome = tokio::select! {
            outcome = self.drive(&mut job) => outcome,
            Ok(()) = &mut cancel_rx => {
                warn!("Job {}: cancelled", job_id);
                Err(CompressionError::CancelledByUser)
            }
        };

        let final_state = match &outcome {
            Ok(result) => {
                info!(
                    "Job {}: succeeded, {} -> {} bytes ({:.1}% reduction)",
                    job_id,
                    result.original_byte_size,
                    result.compressed_byte_size,
                    result.reduction_percent()
                );
                JobState::Succeeded
            }
            Err(CompressionError::CancelledByUser) => {
                info!("Job {}: cancelled by user", job_id);
                JobState::CancelledByUser
            }
            Err(e) => {
                error!("Job {}: failed: {}", job_id, e);
                JobState::Failed
            }
        };
        job.enter(final_state);
        job.journal.emit(JobEvent::Finished(outcome));
    }

    async fn drive(&self, job: &mut CompressionJob) -> Result<CompressionResult, CompressionError> {
        job.enter(JobState::Validating);
        let kind = self.validate(&job.input)?;
        let byte_size = job.input.byte_size();
        let profile = profile::select(byte_size, kind);
        let transcode = kind == MediaKind::Video && byte_size > self.config.compress_threshold_bytes;

        if byte_size > self.config.confirm_threshold_bytes && self.policy.confirm_before_compress() {
            job.enter(JobState::AwaitingUserConfirmation);
            let plan = if transcode {
                profile.tier.description()
            } else {
                PASSTHROUGH_DESCRIPTION
            };
            self.confirm(job, plan).await?;
        }

        if !transcode {
            let bytes = self.read_payload(job).await?;
            job.journal.record_log(format!("{} needs no compression", job.input.name()));
            job.journal.advance_to(self.config.compression_progress_end);
            return Ok(self.result(job, bytes));
        }

        job.enter(JobState::Routing);
        job.journal.record_log(format!("Selected profile: {}", profile.tier.description()));
        job.profile = Some(profile.clone());
        let bytes = self.read_payload(job).await?;

        job.enter(JobState::Running);
        job.journal.advance_to(self.config.compression_progress_start);
        let payload = MediaPayload {
            bytes,
            name: job.input.name().to_string(),
            size: byte_size,
            mime_type: job.input.mime_type().to_string(),
            profile,
        };
        let sink: Arc<dyn ProgressSink> = Arc::clone(&job.journal) as Arc<dyn ProgressSink>;
        let output = self.router.run(job.id, payload, sink).await?;

        job.journal.advance_to(self.config.compression_progress_end);
        Ok(self.result(job, output))
    }

    async fn read_payload(&self, job: &CompressionJob) -> Result<Bytes, CompressionError> {
        job.input
            .read_bytes(self.config.read_timeout(), self.config.max_media_bytes)
            .await
    }

    fn validate(&self, media: &MediaFile) -> Result<MediaKind, CompressionError> {
        if media.byte_size() > self.config.max_media_bytes {
            return Err(CompressionError::FileTooLarge {
                size: media.byte_size(),
                limit: self.config.max_media_bytes,
            });
        }
        if !media.is_supported() {
            return Err(CompressionError::UnsupportedFormat(media.mime_type().to_string()));
        }
        media
            .kind()
            .ok_or_else(|| CompressionError::UnsupportedFormat(media.mime_type().to_string()))
    }

    async fn confirm(&self, job: &CompressionJob, plan: &'static str) -> Result<(), CompressionError> {
        let (reply, decision) = oneshot::channel();
        job.journal.emit(JobEvent::ConfirmationRequired(ConfirmationRequest {
            job_id: job.id,
            name: job.input.name().to_string(),
            byte_size: job.input.byte_size(),
            threshold: self.config.confirm_threshold_bytes,
            tier_description: plan,
            reply,
        }));

        match decision.await {
            Ok(ConfirmationDecision::Accept { dont_ask_again }) => {
                if dont_ask_again {
                    info!("Job {}: user opted out of future confirmations", job.id);
                    self.policy.opt_out_of_confirmation();
                }
                Ok(())
            }
            Ok(ConfirmationDecision::Reject) | Err(_) => Err(CompressionError::CancelledByUser),
        }
    }

    fn result(&self, job: &CompressionJob, payload: Bytes) -> CompressionResult {
        CompressionResult {
            job_id: job.id,
            name: job.input.name().to_string(),
            compressed_byte_size: payload.len() as u64,
            compressed_payload: payload,
            original_byte_size: job.input.byte_size(),
            profile_used: job.profile.clone(),
        }
    }
}
