//! # User Preferences Module
//!
//! Questo modulo persiste le scelte dell'utente tra un'esecuzione e l'altra.
//!
//! ## Responsabilità:
//! - Ricorda l'opzione "non chiedere più" della conferma di compressione
//! - L'opt-out scade dopo 30 giorni, poi la conferma torna attiva
//! - Persistenza in `~/.media-offload/preferences.json`
//! - Un file corrotto o mancante vale come preferenze di default
//!
//! ## Esempio preferences file:
//! ```json
//! {
//!   "confirmation_opt_out_at": 1760572800
//! }
//! ```

use crate::config::Config;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info};

/// How long "don't ask again" lasts
pub const OPT_OUT_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Persisted user choices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Unix seconds of the last "don't ask again"
    pub confirmation_opt_out_at: Option<u64>,
}

impl Preferences {
    /// True while an opt-out recorded at most `OPT_OUT_EXPIRY` before `now` is in force
    pub fn confirmation_opted_out(&self, now: u64) -> bool {
        match self.confirmation_opt_out_at {
            Some(at) => now.saturating_sub(at) < OPT_OUT_EXPIRY.as_secs(),
            None => false,
        }
    }
}

/// Loads and saves `Preferences`
pub struct PreferencesStore {
    path: PathBuf,
    preferences: Preferences,
}

impl PreferencesStore {
    /// Open the store in the user's home directory
    pub async fn new() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(".media-offload");
        Self::open(dir.join("preferences.json")).await
    }

    /// Open the store at `path`, creating its directory if needed
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let preferences = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Preferences::default()
        };
        debug!("Loaded preferences from {}: {:?}", path.display(), preferences);

        Ok(Self { path, preferences })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.preferences)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Remember "don't ask again" from now on
    pub async fn record_opt_out(&mut self) -> Result<()> {
        self.preferences.confirmation_opt_out_at = Some(unix_now());
        info!("Compression confirmation disabled for {} days", OPT_OUT_EXPIRY.as_secs() / 86_400);
        self.save().await
    }

    /// Turn confirmation off in `config` while an opt-out is in force
    pub fn apply(&self, config: &mut Config) {
        if self.preferences.confirmation_opted_out(unix_now()) {
            debug!("Confirmation opt-out in force, not asking");
            config.confirm_before_compress = false;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
