//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per comunicazione con un'interfaccia esterna.
//!
//! ## Responsabilità:
//! - Emette una riga JSON per ogni evento di un job di compressione
//! - Fornisce interfaccia standardizzata per comunicazione inter-processo
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio del job (nome, dimensione, tipo)
//! - `state`: Transizione di stato del job
//! - `progress`: Progresso complessivo (0-100)
//! - `log`: Riga di log dell'engine
//! - `confirmation`: Il job attende conferma dell'utente
//! - `complete`: Job completato con dimensioni e riduzione
//! - `error`: Job fallito o annullato

use crate::error::CompressionError;
use crate::job::{CompressionResult, JobState};
use crate::media::MediaFile;
use crate::profile::Tier;
use serde::Serialize;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio del job
    Start {
        name: String,
        size: u64,
        mime_type: String,
    },

    /// Transizione di stato
    State { state: JobState },

    /// Progresso corrente
    Progress { percentage: f64 },

    /// Riga di log
    Log { text: String },

    /// Richiesta di conferma per file grandi
    Confirmation {
        name: String,
        size: u64,
        threshold: u64,
        tier_description: String,
    },

    /// Job completato
    Complete {
        name: String,
        output: Option<PathBuf>,
        original_size: u64,
        compressed_size: u64,
        reduction_percent: f64,
        tier: Option<Tier>,
    },

    /// Errore o annullamento
    Error {
        kind: String,
        message: String,
        cancelled: bool,
    },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Crea un messaggio di inizio
    pub fn start(media: &MediaFile) -> Self {
        Self::Start {
            name: media.name().to_string(),
            size: media.byte_size(),
            mime_type: media.mime_type().to_string(),
        }
    }

    /// Crea un messaggio di progresso da un ratio in `[0, 1]`
    pub fn progress(ratio: f64) -> Self {
        Self::Progress {
            percentage: (ratio.clamp(0.0, 1.0) * 1000.0).round() / 10.0,
        }
    }

    /// Crea un messaggio di completamento
    pub fn complete(result: &CompressionResult, output: Option<PathBuf>) -> Self {
        Self::Complete {
            name: result.name.clone(),
            output,
            original_size: result.original_byte_size,
            compressed_size: result.compressed_byte_size,
            reduction_percent: result.reduction_percent(),
            tier: result.profile_used.as_ref().map(|p| p.tier),
        }
    }

    /// Crea un messaggio di errore
    pub fn error(error: &CompressionError) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            cancelled: !error.is_fault(),
        }
    }
}
