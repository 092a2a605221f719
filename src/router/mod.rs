//! # Execution Context Router
//!
//! Decide dove gira ogni job di compressione e ne coordina l'esecuzione.
//!
//! ## Responsabilità:
//! - Placement: video oltre la soglia di offload (default 19 MiB) in un
//!   contesto in background dedicato, tutto il resto inline
//! - Un contesto fresco per job, mai riusato
//! - Servire le richieste `proxy_compress` del figlio con l'engine del contesto corrente
//! - Inoltrare progresso e log del figlio al sink del job
//! - Fermarsi al primo envelope terminale e terminare il contesto esattamente una volta
//!
//! ## Stati di un route:
//! ```text
//! Placed → Dispatched → (Proxied → AwaitingProxyResult)? → Completed | Failed
//! ```

pub mod background;
pub mod context;

pub use context::{BackgroundContext, ContextSpawner, TaskSpawner};

use crate::config::Config;
use crate::engine::{BackendFactory, TranscodingEngine};
use crate::error::CompressionError;
use crate::events::{clamp_ratio, ProgressSink};
use crate::media::MediaKind;
use crate::protocol::{serve_proxy_request, Envelope, JobId, MediaPayload};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Where a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inline,
    Background,
}

/// Background only for videos strictly larger than `offload_threshold`
pub fn decide(byte_size: u64, kind: MediaKind, offload_threshold: u64) -> Placement {
    if kind == MediaKind::Video && byte_size > offload_threshold {
        Placement::Background
    } else {
        Placement::Inline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Placed(Placement),
    Dispatched,
    Proxied,
    AwaitingProxyResult,
    Completed,
    Failed,
}

struct Route {
    job_id: JobId,
    state: RouteState,
}

impl Route {
    fn advance(&mut self, next: RouteState) {
        debug!("Job {}: route {:?} -> {:?}", self.job_id, self.state, next);
        self.state = next;
    }
}

/// Runs compression jobs inline or in background contexts
pub struct ExecutionRouter {
    engine: Arc<TranscodingEngine>,
    spawner: Arc<dyn ContextSpawner>,
    offload_threshold: u64,
}

impl ExecutionRouter {
    pub fn new(engine: Arc<TranscodingEngine>, spawner: Arc<dyn ContextSpawner>, offload_threshold: u64) -> Self {
        Self {
            engine,
            spawner,
            offload_threshold,
        }
    }

    /// Router with its own engine and tokio-task background contexts, both from `factory`
    pub fn from_config(config: &Config, factory: BackendFactory) -> Self {
        let engine = Arc::new(TranscodingEngine::from_config(factory(), config));
        let spawner = Arc::new(TaskSpawner::from_config(config, factory));
        Self::new(engine, spawner, config.offload_threshold_bytes)
    }

    pub fn placement(&self, byte_size: u64, kind: MediaKind) -> Placement {
        decide(byte_size, kind, self.offload_threshold)
    }

    /// Run one job to completion and return the compressed bytes.
    ///
    /// Dropping the returned future tears down any background context.
    pub async fn run(
        &self,
        job_id: JobId,
        payload: MediaPayload,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Bytes, CompressionError> {
        let kind = MediaKind::from_mime(&payload.mime_type)
            .ok_or_else(|| CompressionError::UnsupportedFormat(payload.mime_type.clone()))?;
        let placement = self.placement(payload.size, kind);
        let mut route = Route {
            job_id,
            state: RouteState::Placed(placement),
        };
        info!("Job {}: placed {:?} ({} bytes)", job_id, placement, payload.size);

        let outcome = match placement {
            Placement::Inline => {
                self.engine
                    .run_job(job_id, payload.bytes, &payload.name, &payload.profile, sink)
                    .await
            }
            Placement::Background => self.run_in_background(&mut route, payload, sink).await,
        };

        match &outcome {
            Ok(_) => route.advance(RouteState::Completed),
            Err(e) => {
                error!("Job {}: route failed: {}", job_id, e);
                route.advance(RouteState::Failed);
            }
        }
        outcome
    }

    async fn run_in_background(
        &self,
        route: &mut Route,
        payload: MediaPayload,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Bytes, CompressionError> {
        let job_id = route.job_id;
        let mut context = self.spawner.spawn(job_id);
        route.advance(RouteState::Dispatched);

        let outcome = match context.send(Envelope::CompressRequest { job_id, payload }) {
            Ok(()) => self.supervise(route, &mut context, sink).await,
            Err(e) => Err(e),
        };

        context.terminate();
        outcome
    }

    /// Read the child's envelopes until its terminal one
    async fn supervise(
        &self,
        route: &mut Route,
        context: &mut BackgroundContext,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Bytes, CompressionError> {
        let job_id = route.job_id;
        let mut proxied = false;

        loop {
            let Some(envelope) = context.recv().await else {
                return Err(CompressionError::Delegation(format!(
                    "background context for job {} exited without a result",
                    job_id
                )));
            };

            if envelope.job_id() != job_id {
                return Err(CompressionError::Delegation(format!(
                    "background context sent {} for job {} while running job {}",
                    envelope.kind(),
                    envelope.job_id(),
                    job_id
                )));
            }

            match envelope {
                Envelope::Progress { ratio, .. } => sink.progress(job_id, clamp_ratio(ratio)),
                Envelope::Log { text, .. } => sink.log(job_id, text),
                Envelope::ProxyCompress { payload, .. } => {
                    if proxied {
                        return Err(CompressionError::Delegation(format!(
                            "background context asked twice to proxy job {}",
                            job_id
                        )));
                    }
                    proxied = true;
                    route.advance(RouteState::Proxied);
                    serve_proxy_request(&self.engine, job_id, payload, &context.sender(), Arc::clone(&sink)).await?;
                    route.advance(RouteState::AwaitingProxyResult);
                }
                Envelope::CompressedResult { output, .. } => return Ok(output),
                Envelope::Error { error, .. } => return Err(error),
                Envelope::CompressRequest { .. } => {
                    return Err(CompressionError::Delegation(
                        "background context sent compress_request to its parent".to_string(),
                    ))
                }
            }
        }
    }
}
