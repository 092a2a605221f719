//! # Media Offload Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare del sottosistema di compressione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri layer UI
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione, validazione parametri e policy di conferma
//! - `error`: Tassonomia degli errori di compressione
//! - `media`: Handle immutabile del media e formati supportati
//! - `profile`: Selezione deterministica del profilo di encoding per dimensione
//! - `engine`: Adapter dell'engine di transcodifica (load, staging, esecuzione)
//! - `protocol`: Envelope e canali del protocollo di delega tra contesti
//! - `router`: Placement inline/background e coordinamento dei contesti
//! - `job`: State machine del job di compressione ed eventi verso la UI
//! - `preferences`: Persistenza dell'opzione "non chiedere più"
//! - `progress` / `json_output`: Output per terminale e per processi esterni
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use media_offload::{Compressor, Config, FfmpegBackend, MediaFile};
//!
//! let factory = Arc::new(|| Arc::new(FfmpegBackend::new(None)) as Arc<dyn EngineBackend>);
//! let compressor = Compressor::from_config(Config::default(), factory);
//! let outcome = compressor.submit(media).outcome().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod json_output;
pub mod media;
pub mod preferences;
pub mod profile;
pub mod progress;
pub mod protocol;
pub mod router;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BackgroundEngine, CompressionPolicy, Config};
pub use engine::{EngineBackend, FfmpegBackend, TranscodingEngine};
pub use error::CompressionError;
pub use job::{CompressionResult, Compressor, ConfirmationRequest, JobEvent, JobHandle, JobState};
pub use media::{MediaFile, MediaKind};
pub use profile::{EncodingProfile, Tier};
pub use protocol::{Envelope, JobId};
pub use router::{ExecutionRouter, Placement};
