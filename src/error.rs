//! # Error Types Module
//!
//! Questo modulo definisce la tassonomia degli errori di compressione.
//!
//! ## Responsabilità:
//! - Definisce `CompressionError` enum per categorizzare tutti gli esiti falliti di un job
//! - Fornisce messaggi di errore descrittivi e strutturati
//! - Integra con `thiserror` per `Display` e `std::error::Error`
//! - Serializzabile con `serde`, così un errore attraversa il protocollo di delega intatto
//!
//! ## Categorie di errori:
//! - `FileTooLarge`: supera il limite assoluto, nessun lavoro sull'engine
//! - `UnsupportedFormat`: mime type non supportato
//! - `PayloadRead`: impossibile leggere i byte del media
//! - `EngineLoad`: l'engine di transcodifica non si inizializza
//! - `EngineRun`: il comando di transcodifica fallisce dopo il load
//! - `Delegation`: messaggio malformato o fuori protocollo dal contesto accoppiato
//! - `CancelledByUser`: stato terminale non di errore
//! - `Timeout`: load o lettura oltre il limite
//!
//! ## Esempio:
//! ```rust,ignore
//! if file.byte_size() > config.max_media_bytes {
//!     return Err(CompressionError::FileTooLarge { size, limit });
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every way a compression job can end without a result
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CompressionError {
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read media payload: {0}")]
    PayloadRead(String),

    #[error("Transcoding engine failed to load: {0}")]
    EngineLoad(String),

    #[error("Transcoding failed: {0}")]
    EngineRun(String),

    #[error("Delegation protocol error: {0}")]
    Delegation(String),

    #[error("Compression cancelled by user")]
    CancelledByUser,

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },
}

impl CompressionError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether this outcome is a fault. A user cancellation is a normal terminal state.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::CancelledByUser)
    }

    /// Short stable name, used in JSON output and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileTooLarge { .. } => "file_too_large",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::PayloadRead(_) => "payload_read",
            Self::EngineLoad(_) => "engine_load",
            Self::EngineRun(_) => "engine_run",
            Self::Delegation(_) => "delegation",
            Self::CancelledByUser => "cancelled_by_user",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_fault() {
        assert!(!CompressionError::CancelledByUser.is_fault());
        assert!(CompressionError::EngineRun("boom".into()).is_fault());
    }

    #[test]
    fn test_timeout_message() {
        let err = CompressionError::timeout("Engine load", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Engine load timed out after 30s");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_error_survives_serialization() {
        let err = CompressionError::FileTooLarge { size: 200, limit: 100 };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"file_too_large\""));
        let back: CompressionError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
