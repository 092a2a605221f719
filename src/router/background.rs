//! # Background Context
//!
//! Corpo del contesto in background avviato per un singolo job video grande.
//!
//! ## Responsabilità:
//! - Attende il `compress_request` del padre
//! - Modalità `delegate`: chiede al padre di eseguire il job (`proxy_compress`)
//!   e inoltra la risposta come proprio envelope terminale
//! - Modalità `local`: esegue il job con un engine proprio, riportando
//!   progresso e log come envelope
//! - Un solo envelope terminale per job; poi il contesto termina

use crate::engine::TranscodingEngine;
use crate::error::CompressionError;
use crate::events::ProgressSink;
use crate::protocol::{ContextPort, Envelope, EnvelopeSink, JobId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a background context gets its transcoding from
pub enum ChildEngine {
    /// Ask the parent context to run the engine
    Delegate,
    /// A fresh engine owned by this context
    Local(TranscodingEngine),
}

/// Serve one job, then return
pub async fn serve(mut port: ContextPort, engine: ChildEngine) {
    let Some(first) = port.recv().await else {
        debug!("Background context closed before receiving a request");
        return;
    };

    let (job_id, payload) = match first {
        Envelope::CompressRequest { job_id, payload } => (job_id, payload),
        other => {
            warn!("Background context expected compress_request, got {}", other.kind());
            let _ = port.send(Envelope::Error {
                job_id: other.job_id(),
                error: CompressionError::Delegation(format!(
                    "background context expected compress_request, got {}",
                    other.kind()
                )),
            });
            return;
        }
    };

    info!("Job {}: background context received {} ({} bytes)", job_id, payload.name, payload.size);
    let original_size = payload.size;

    let terminal = match engine {
        ChildEngine::Local(engine) => {
            let sink: Arc<dyn ProgressSink> = Arc::new(EnvelopeSink::new(port.sender()));
            let outcome = engine
                .run_job(job_id, payload.bytes, &payload.name, &payload.profile, sink)
                .await;
            Envelope::terminal(job_id, original_size, outcome)
        }
        ChildEngine::Delegate => {
            if let Err(e) = port.send(Envelope::ProxyCompress { job_id, payload }) {
                warn!("Job {}: {}", job_id, e);
                return;
            }
            debug!("Job {}: waiting for proxied result", job_id);
            await_proxy_answer(&mut port, job_id, original_size).await
        }
    };

    debug!("Job {}: background context reporting {}", job_id, terminal.kind());
    let _ = port.send(terminal);
}

async fn await_proxy_answer(port: &mut ContextPort, job_id: JobId, original_size: u64) -> Envelope {
    loop {
        let Some(envelope) = port.recv().await else {
            return Envelope::Error {
                job_id,
                error: CompressionError::Delegation("parent context hung up before answering".to_string()),
            };
        };

        if envelope.job_id() != job_id {
            return Envelope::Error {
                job_id,
                error: CompressionError::Delegation(format!(
                    "proxied answer for job {} while waiting for job {}",
                    envelope.job_id(),
                    job_id
                )),
            };
        }

        match envelope {
            Envelope::Progress { .. } | Envelope::Log { .. } => continue,
            Envelope::CompressedResult { output, .. } => {
                return Envelope::CompressedResult { job_id, output, original_size }
            }
            terminal @ Envelope::Error { .. } => return terminal,
            other => {
                return Envelope::Error {
                    job_id,
                    error: CompressionError::Delegation(format!(
                        "unexpected {} while waiting for proxied result",
                        other.kind()
                    )),
                }
            }
        }
    }
}
