//! # Progress & Log Sinks
//!
//! Interfaccia stretta con cui engine e router riportano progresso e log.
//! Ogni livello decide dove inoltrare: il job li mappa nel suo range di
//! progresso, un contesto in background li impacchetta in envelope.

use crate::protocol::JobId;

/// Receives progress ratios and log lines for a job
pub trait ProgressSink: Send + Sync {
    /// `ratio` is in `[0, 1]`
    fn progress(&self, job_id: JobId, ratio: f64);

    fn log(&self, job_id: JobId, text: String);
}

/// Clamp an engine-reported ratio into `[0, 1]`; NaN counts as no progress
pub fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}
