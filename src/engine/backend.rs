//! Seam between the engine adapter and whatever actually transcodes.
//!
//! A backend owns a private file namespace (the engine's virtual
//! filesystem) and runs command-style argument lists against it.

use crate::error::CompressionError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Receives engine output while a command runs
pub trait EngineObserver: Send + Sync {
    fn on_progress(&self, ratio: f64);

    fn on_log(&self, line: &str);
}

#[async_trait]
pub trait EngineBackend: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Fetch/verify the engine and prepare its file namespace. May be slow.
    async fn load(&self) -> Result<(), CompressionError>;

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), CompressionError>;

    async fn read_file(&self, name: &str) -> Result<Bytes, CompressionError>;

    /// Removing a file that does not exist is not an error
    async fn remove_file(&self, name: &str) -> Result<(), CompressionError>;

    /// Run one command. Progress and log lines go to `observer` while it runs.
    async fn exec(
        &self,
        args: &[String],
        observer: Arc<dyn EngineObserver>,
    ) -> Result<(), CompressionError>;
}

/// Builds a fresh backend, used when a background context hosts its own engine
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn EngineBackend> + Send + Sync>;
