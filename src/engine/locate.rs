//! # Engine Binary Resolver
//!
//! Trova il binario dell'engine di transcodifica in diversi ambienti:
//! - Path esplicito da configurazione
//! - Variabile d'ambiente `<TOOL>_PATH` (es. `FFMPEG_PATH`)
//! - Tool bundled nella directory `tools/<platform>/` (o `TOOLS_DIR`)
//! - Tool di sistema nel `PATH`

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolves external engine binaries
#[derive(Debug, Clone)]
pub struct ToolLocator {
    explicit: Option<PathBuf>,
    tools_dir: Option<PathBuf>,
}

impl ToolLocator {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            tools_dir: Self::detect_bundled_tools_dir(),
        }
    }

    fn detect_bundled_tools_dir() -> Option<PathBuf> {
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            debug!("Checking TOOLS_DIR environment variable: {:?}", tools_path);
            if tools_path.exists() {
                return Some(tools_path);
            }
        }

        let exe_path = env::current_exe().ok()?;
        let app_dir = exe_path.parent()?;
        let candidates = [app_dir.join("tools"), app_dir.join("resources").join("tools")];
        candidates.into_iter().find(|path| path.exists())
    }

    /// Resolve the path to `tool`, or None when it cannot be found anywhere
    pub fn resolve(&self, tool: &str) -> Option<PathBuf> {
        if let Some(ref explicit) = self.explicit {
            if explicit.exists() {
                debug!("Using configured {}: {:?}", tool, explicit);
                return Some(explicit.clone());
            }
            warn!("Configured {} path does not exist: {:?}", tool, explicit);
        }

        let env_key = format!("{}_PATH", tool.to_uppercase());
        if let Some(path) = env::var_os(&env_key).map(PathBuf::from) {
            if path.exists() {
                debug!("Using {} from {}: {:?}", tool, env_key, path);
                return Some(path);
            }
        }

        if let Some(ref tools_dir) = self.tools_dir {
            let bundled = Self::bundled_tool_path(tools_dir, tool);
            if bundled.exists() {
                debug!("Using bundled tool: {} -> {:?}", tool, bundled);
                return Some(bundled);
            }
        }

        match which::which(tool) {
            Ok(path) => {
                debug!("Using system tool: {} -> {:?}", tool, path);
                Some(path)
            }
            Err(_) => {
                warn!("Tool not found: {}", tool);
                None
            }
        }
    }

    fn bundled_tool_path(tools_dir: &Path, tool: &str) -> PathBuf {
        let platform = if cfg!(target_os = "macos") {
            "darwin"
        } else {
            env::consts::OS
        };
        let extension = if cfg!(target_os = "windows") { ".exe" } else { "" };
        let file_name = format!("{}{}", tool, extension);

        // tools/{platform}/{tool} or tools/{platform}/{tool}/{tool}
        let direct_path = tools_dir.join(platform).join(&file_name);
        if direct_path.exists() {
            return direct_path;
        }
        let subfolder_path = tools_dir.join(platform).join(tool).join(&file_name);
        if subfolder_path.exists() {
            return subfolder_path;
        }
        direct_path
    }
}
