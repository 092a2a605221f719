//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione del sottosistema di compressione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con soglie, timeout e politica di offload
//! - Fornisce validazione robusta dei parametri
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Espone `CompressionPolicy`, la parte della configurazione che l'utente può cambiare a runtime
//!
//! ## Parametri di configurazione:
//! - `max_media_bytes`: limite assoluto del file originale (default: 100MB)
//! - `confirm_threshold_bytes`: oltre questa soglia serve conferma utente (default: 20MB)
//! - `compress_threshold_bytes`: i video fino a questa soglia passano senza transcodifica (default: 20MB)
//! - `offload_threshold_bytes`: oltre questa soglia i video vanno in background (default: 19MB)
//! - `confirm_before_compress`: chiedere conferma per i file grandi (default: true)
//! - `engine_load_timeout_secs`: timeout caricamento engine (default: 30)
//! - `read_timeout_secs`: timeout lettura payload (default: 15)
//! - `engine_load_retries`: retry dopo un load fallito (default: 1)
//! - `background_engine`: `delegate` o `local` per i contesti in background
//! - `ffmpeg_path`: path esplicito del binario ffmpeg (default: None = ricerca automatica)
//! - `compression_progress_start` / `_end`: range del progresso dedicato alla compressione
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     offload_threshold_bytes: 10 * MB,
//!     background_engine: BackgroundEngine::Local,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const MB: u64 = 1024 * 1024;

/// Where a background execution context gets its transcoding engine from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundEngine {
    /// The background context cannot host the engine and proxies every job to its parent
    Delegate,
    /// The background context loads its own, fresh engine
    Local,
}

/// Configuration for the compression subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Absolute limit for the original media size
    pub max_media_bytes: u64,
    /// Files above this size need user confirmation before compression
    pub confirm_threshold_bytes: u64,
    /// Videos up to this size are uploaded untouched
    pub compress_threshold_bytes: u64,
    /// Videos above this size are compressed in a background context
    pub offload_threshold_bytes: u64,
    /// Ask for confirmation before compressing large files
    pub confirm_before_compress: bool,
    /// Bound on loading the transcoding engine
    pub engine_load_timeout_secs: u64,
    /// Bound on reading the media payload
    pub read_timeout_secs: u64,
    /// How many times a failed engine load may be retried
    pub engine_load_retries: u32,
    /// Engine capability of background contexts
    pub background_engine: BackgroundEngine,
    /// Explicit ffmpeg binary (None = resolve automatically)
    pub ffmpeg_path: Option<PathBuf>,
    /// Overall job progress when compression starts
    pub compression_progress_start: f64,
    /// Overall job progress when compression ends
    pub compression_progress_end: f64,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_media_bytes: 100 * MB,
            confirm_threshold_bytes: 20 * MB,
            compress_threshold_bytes: 20 * MB,
            offload_threshold_bytes: 19 * MB,
            confirm_before_compress: true,
            engine_load_timeout_secs: 30,
            read_timeout_secs: 15,
            engine_load_retries: 1,
            background_engine: BackgroundEngine::Delegate,
            ffmpeg_path: None,
            compression_progress_start: 0.20,
            compression_progress_end: 0.60,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_media_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum media size must be greater than 0"));
        }

        if self.confirm_threshold_bytes > self.max_media_bytes {
            return Err(anyhow::anyhow!(
                "Confirmation threshold must not exceed the maximum media size"
            ));
        }

        if self.compress_threshold_bytes > self.max_media_bytes {
            return Err(anyhow::anyhow!(
                "Compression threshold must not exceed the maximum media size"
            ));
        }

        if self.engine_load_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0 seconds"));
        }

        let (start, end) = (self.compression_progress_start, self.compression_progress_end);
        if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start > end {
            return Err(anyhow::anyhow!(
                "Compression progress range must satisfy 0.0 <= start <= end <= 1.0"
            ));
        }

        if let Some(ref ffmpeg) = self.ffmpeg_path {
            if !ffmpeg.exists() {
                return Err(anyhow::anyhow!("ffmpeg path does not exist: {}", ffmpeg.display()));
            }
        }

        Ok(())
    }

    pub fn engine_load_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_load_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Runtime policy shared between the job state machine and the UI layer.
///
/// The confirmation flag flips when the user picks "don't ask again".
#[derive(Debug)]
pub struct CompressionPolicy {
    confirm_before_compress: AtomicBool,
}

impl CompressionPolicy {
    pub fn new(confirm_before_compress: bool) -> Self {
        Self {
            confirm_before_compress: AtomicBool::new(confirm_before_compress),
        }
    }

    pub fn confirm_before_compress(&self) -> bool {
        self.confirm_before_compress.load(Ordering::SeqCst)
    }

    pub fn opt_out_of_confirmation(&self) {
        self.confirm_before_compress.store(false, Ordering::SeqCst);
    }
}

impl From<&Config> for CompressionPolicy {
    fn from(config: &Config) -> Self {
        Self::new(config.confirm_before_compress)
    }
}
