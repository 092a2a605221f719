//! Handle to a spawned background context and the seam that creates them.

use super::background::{self, ChildEngine};
use crate::config::{BackgroundEngine, Config};
use crate::engine::{BackendFactory, TranscodingEngine};
use crate::error::CompressionError;
use crate::protocol::{ContextPort, Envelope, EnvelopeSender, JobId};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Parent-side handle to one background context.
///
/// Terminating is idempotent; dropping the handle terminates the context.
pub struct BackgroundContext {
    port: ContextPort,
    task: Option<JoinHandle<()>>,
}

impl BackgroundContext {
    /// Start `body` as a new context on the runtime, connected to the returned handle
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(ContextPort) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (parent, child) = ContextPort::pair();
        let task = tokio::spawn(body(child));
        Self {
            port: parent,
            task: Some(task),
        }
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), CompressionError> {
        self.port.send(envelope)
    }

    pub fn sender(&self) -> EnvelopeSender {
        self.port.sender()
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.port.recv().await
    }

    /// Stop the context. Returns false when it was already terminated.
    pub fn terminate(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for BackgroundContext {
    fn drop(&mut self) {
        if self.terminate() {
            debug!("Background context terminated on drop");
        }
    }
}

/// Creates one fresh background context per job
pub trait ContextSpawner: Send + Sync {
    fn spawn(&self, job_id: JobId) -> BackgroundContext;
}

/// Spawns background contexts as tokio tasks
pub struct TaskSpawner {
    capability: BackgroundEngine,
    factory: BackendFactory,
    load_timeout: Duration,
    load_retries: u32,
}

impl TaskSpawner {
    pub fn new(capability: BackgroundEngine, factory: BackendFactory, load_timeout: Duration, load_retries: u32) -> Self {
        Self {
            capability,
            factory,
            load_timeout,
            load_retries,
        }
    }

    pub fn from_config(config: &Config, factory: BackendFactory) -> Self {
        Self::new(
            config.background_engine,
            factory,
            config.engine_load_timeout(),
            config.engine_load_retries,
        )
    }
}

impl ContextSpawner for TaskSpawner {
    fn spawn(&self, job_id: JobId) -> BackgroundContext {
        let engine = match self.capability {
            BackgroundEngine::Delegate => ChildEngine::Delegate,
            BackgroundEngine::Local => {
                ChildEngine::Local(TranscodingEngine::new((self.factory)(), self.load_timeout, self.load_retries))
            }
        };
        debug!("Job {}: spawning background context ({:?})", job_id, self.capability);
        BackgroundContext::spawn(move |port| background::serve(port, engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let mut context = BackgroundContext::spawn(move |_port| async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        assert!(!context.is_terminated());
        assert!(context.terminate());
        assert!(!context.terminate());
        assert!(context.is_terminated());
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_drop_terminates() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let context = BackgroundContext::spawn(move |_port| async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        drop(context);
        assert!(alive_rx.await.is_err());
    }
}
