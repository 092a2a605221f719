//! # Delegation Protocol
//!
//! Scambio di messaggi tipizzato e asincrono tra un contesto in background e
//! il suo contesto padre.
//!
//! ## Tipi di messaggio:
//! | kind              | direzione         | campi                               |
//! |-------------------|-------------------|-------------------------------------|
//! | compress_request  | padre → figlio    | job_id, byte, nome, dimensione, tipo |
//! | proxy_compress    | figlio → padre    | job_id, byte, nome, dimensione, tipo |
//! | progress          | entrambe          | job_id, ratio                       |
//! | log               | entrambe          | job_id, text                        |
//! | compressed_result | entrambe          | job_id, output, original_size       |
//! | error             | entrambe          | job_id, errore tipizzato            |
//!
//! Un contesto che riceve `proxy_compress` esegue l'engine localmente e
//! risponde con esattamente un envelope terminale per quel job id.

use crate::engine::TranscodingEngine;
use crate::error::CompressionError;
use crate::events::ProgressSink;
use crate::profile::EncodingProfile;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identifier of one compression job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Raw media carried by `compress_request` and `proxy_compress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub bytes: Bytes,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Profile chosen by the requester, so both sides encode identically
    pub profile: EncodingProfile,
}

/// Wire record of the delegation protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    CompressRequest { job_id: JobId, payload: MediaPayload },
    ProxyCompress { job_id: JobId, payload: MediaPayload },
    Progress { job_id: JobId, ratio: f64 },
    Log { job_id: JobId, text: String },
    CompressedResult { job_id: JobId, output: Bytes, original_size: u64 },
    Error { job_id: JobId, error: CompressionError },
}

impl Envelope {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::CompressRequest { job_id, .. }
            | Self::ProxyCompress { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Log { job_id, .. }
            | Self::CompressedResult { job_id, .. }
            | Self::Error { job_id, .. } => *job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CompressRequest { .. } => "compress_request",
            Self::ProxyCompress { .. } => "proxy_compress",
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
            Self::CompressedResult { .. } => "compressed_result",
            Self::Error { .. } => "error",
        }
    }

    /// `compressed_result` and `error` end a job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CompressedResult { .. } | Self::Error { .. })
    }

    /// The single terminal envelope answering a job's outcome
    pub fn terminal(job_id: JobId, original_size: u64, outcome: Result<Bytes, CompressionError>) -> Self {
        match outcome {
            Ok(output) => Self::CompressedResult {
                job_id,
                output,
                original_size,
            },
            Err(error) => Self::Error { job_id, error },
        }
    }

    /// The job outcome carried by a terminal envelope, None for anything else
    pub fn into_outcome(self) -> Option<Result<Bytes, CompressionError>> {
        match self {
            Self::CompressedResult { output, .. } => Some(Ok(output)),
            Self::Error { error, .. } => Some(Err(error)),
            _ => None,
        }
    }
}

/// One end of a bidirectional envelope channel between two execution contexts
#[derive(Debug)]
pub struct ContextPort {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl ContextPort {
    /// Two connected ends: whatever one sends, the other receives
    pub fn pair() -> (ContextPort, ContextPort) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            ContextPort { tx: a_tx, rx: a_rx },
            ContextPort { tx: b_tx, rx: b_rx },
        )
    }

    /// Send to the other side. Fails with `Delegation` once the other side is gone.
    pub fn send(&self, envelope: Envelope) -> Result<(), CompressionError> {
        let kind = envelope.kind();
        let job_id = envelope.job_id();
        self.tx.send(envelope).map_err(|_| {
            CompressionError::Delegation(format!(
                "paired context is gone, cannot deliver {} for job {}",
                kind, job_id
            ))
        })
    }

    /// Next envelope, or None once the other side has hung up
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> EnvelopeSender {
        EnvelopeSender { tx: self.tx.clone() }
    }
}

/// Cloneable send half of a `ContextPort`
#[derive(Debug, Clone)]
pub struct EnvelopeSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EnvelopeSender {
    pub fn send(&self, envelope: Envelope) -> Result<(), CompressionError> {
        let kind = envelope.kind();
        self.tx
            .send(envelope)
            .map_err(|_| CompressionError::Delegation(format!("paired context is gone, dropped {}", kind)))
    }
}

/// Progress sink that forwards engine output to the paired context as envelopes
pub struct EnvelopeSink {
    sender: EnvelopeSender,
}

impl EnvelopeSink {
    pub fn new(sender: EnvelopeSender) -> Self {
        Self { sender }
    }
}

impl ProgressSink for EnvelopeSink {
    fn progress(&self, job_id: JobId, ratio: f64) {
        // Delivery is best effort: a vanished peer is noticed by whoever waits on it
        let _ = self.sender.send(Envelope::Progress { job_id, ratio });
    }

    fn log(&self, job_id: JobId, text: String) {
        let _ = self.sender.send(Envelope::Log { job_id, text });
    }
}

/// Serve a `proxy_compress` request: run the engine in this context and
/// answer with exactly one terminal envelope for `job_id`.
///
/// A failed run is not an error here: it travels back as an `error`
/// envelope. Only an undeliverable answer is reported.
pub async fn serve_proxy_request(
    engine: &TranscodingEngine,
    job_id: JobId,
    payload: MediaPayload,
    reply: &EnvelopeSender,
    sink: Arc<dyn ProgressSink>,
) -> Result<(), CompressionError> {
    info!("Job {}: serving delegated compression of {}", job_id, payload.name);
    let outcome = engine
        .run_job(job_id, payload.bytes, &payload.name, &payload.profile, sink)
        .await;
    let answer = Envelope::terminal(job_id, payload.size, outcome);
    debug!("Job {}: answering proxy request with {}", job_id, answer.kind());
    reply.send(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MB;
    use crate::media::MediaKind;
    use crate::profile;
    use crate::testing::{RecordingSink, ScriptedBackend};
    use std::time::Duration;

    fn payload(size: u64) -> MediaPayload {
        MediaPayload {
            bytes: Bytes::from_static(b"raw"),
            name: "clip.mp4".to_string(),
            size,
            mime_type: "video/mp4".to_string(),
            profile: profile::select(size, MediaKind::Video),
        }
    }

    async fn drain(port: &mut ContextPort) -> Vec<Envelope> {
        let mut received = Vec::new();
        while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(50), port.recv()).await {
            received.push(envelope);
        }
        received
    }

    #[tokio::test]
    async fn test_port_pair_is_bidirectional() {
        let (parent, mut child) = ContextPort::pair();
        parent
            .send(Envelope::Log { job_id: JobId(1), text: "hello".into() })
            .unwrap();
        let got = child.recv().await.unwrap();
        assert_eq!(got.kind(), "log");
        assert_eq!(got.job_id(), JobId(1));

        drop(child);
        let err = parent.send(Envelope::Progress { job_id: JobId(1), ratio: 0.1 }).unwrap_err();
        assert!(matches!(err, CompressionError::Delegation(_)));
    }

    #[test]
    fn test_terminal_classification() {
        let ok = Envelope::terminal(JobId(2), 10, Ok(Bytes::from_static(b"o")));
        let err = Envelope::terminal(JobId(2), 10, Err(CompressionError::EngineRun("x".into())));
        assert!(ok.is_terminal());
        assert!(err.is_terminal());
        assert!(!Envelope::Progress { job_id: JobId(2), ratio: 0.5 }.is_terminal());
        assert_eq!(ok.into_outcome(), Some(Ok(Bytes::from_static(b"o"))));
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::Progress { job_id: JobId(5), ratio: 0.25 };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["job_id"], 5);
        assert_eq!(json["ratio"], 0.25);
    }

    #[tokio::test]
    async fn test_proxy_request_answers_exactly_one_result() {
        let backend = Arc::new(ScriptedBackend::new().with_output(b"small".to_vec()));
        let engine = TranscodingEngine::new(backend, Duration::from_secs(5), 1);
        let (parent, mut child) = ContextPort::pair();
        let job = JobId(42);

        serve_proxy_request(&engine, job, payload(30 * MB), &parent.sender(), Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        let received = drain(&mut child).await;
        let terminals: Vec<_> = received.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(
            terminals[0],
            &Envelope::CompressedResult { job_id: job, output: Bytes::from_static(b"small"), original_size: 30 * MB }
        );
    }

    #[tokio::test]
    async fn test_proxy_request_answers_exactly_one_error() {
        let backend = Arc::new(ScriptedBackend::new().failing_exec("bad input"));
        let engine = TranscodingEngine::new(backend, Duration::from_secs(5), 1);
        let (parent, mut child) = ContextPort::pair();
        let job = JobId(43);

        serve_proxy_request(&engine, job, payload(MB), &parent.sender(), Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        let received = drain(&mut child).await;
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0],
            Envelope::Error { job_id: job, error: CompressionError::EngineRun("bad input".into()) }
        );
    }

    #[tokio::test]
    async fn test_envelope_sink_forwards_progress_and_logs() {
        let (parent, mut child) = ContextPort::pair();
        let sink = EnvelopeSink::new(parent.sender());
        sink.progress(JobId(9), 0.5);
        sink.log(JobId(9), "line".into());

        assert_eq!(child.recv().await.unwrap(), Envelope::Progress { job_id: JobId(9), ratio: 0.5 });
        assert_eq!(child.recv().await.unwrap(), Envelope::Log { job_id: JobId(9), text: "line".into() });
    }
}
