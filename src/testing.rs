//! Test doubles shared by the unit tests: a scripted engine backend with an
//! in-memory file namespace, and a sink that records everything it sees.

use crate::engine::{EngineBackend, EngineObserver};
use crate::error::CompressionError;
use crate::events::ProgressSink;
use crate::protocol::JobId;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Script {
    load_delay: Duration,
    failing_loads: usize,
    output: Option<Vec<u8>>,
    exec_failure: Option<String>,
    exec_delay: Duration,
    failing_removes: bool,
}

#[derive(Default)]
struct Recorded {
    files: BTreeMap<String, Bytes>,
    written: Vec<String>,
    removed: Vec<String>,
    last_args: Option<Vec<String>>,
    last_observer: Option<Arc<dyn EngineObserver>>,
}

/// In-memory engine backend driven by a script
#[derive(Default)]
pub struct ScriptedBackend {
    script: Script,
    load_calls: AtomicUsize,
    exec_calls: AtomicUsize,
    recorded: Mutex<Recorded>,
    exec_started: Notify,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.script.load_delay = delay;
        self
    }

    /// The first `count` loads fail
    pub fn failing_loads(mut self, count: usize) -> Self {
        self.script.failing_loads = count;
        self
    }

    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.script.output = Some(output);
        self
    }

    /// Every run writes a partial output, then fails with `EngineRun(message)`
    pub fn failing_exec(mut self, message: &str) -> Self {
        self.script.exec_failure = Some(message.to_string());
        self
    }

    pub fn failing_removes(mut self) -> Self {
        self.script.failing_removes = true;
        self
    }

    /// Runs pause halfway for `delay`
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.script.exec_delay = delay;
        self
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> usize {
        self.exec_calls.load(Ordering::SeqCst)
    }

    /// Names of every file ever written, in order
    pub fn written(&self) -> Vec<String> {
        self.recorded.lock().written.clone()
    }

    /// Names of the files currently present, sorted
    pub fn staged_files(&self) -> Vec<String> {
        self.recorded.lock().files.keys().cloned().collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.recorded.lock().removed.clone()
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.recorded.lock().last_args.clone()
    }

    /// Resolves once a run has started
    pub async fn wait_for_exec(&self) {
        self.exec_started.notified().await;
    }

    /// Fire a progress event through the observer of the most recent run
    pub fn emit_late_progress(&self, ratio: f64) {
        let observer = self.recorded.lock().last_observer.clone();
        if let Some(observer) = observer {
            observer.on_progress(ratio);
        }
    }
}

#[async_trait]
impl EngineBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(&self) -> Result<(), CompressionError> {
        let call = self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.script.load_delay.is_zero() {
            tokio::time::sleep(self.script.load_delay).await;
        }
        if call < self.script.failing_loads {
            return Err(CompressionError::EngineLoad(format!("scripted load failure {}", call + 1)));
        }
        Ok(())
    }

    async fn write_file(&self, name: &str, data: Bytes) -> Result<(), CompressionError> {
        let mut recorded = self.recorded.lock();
        recorded.written.push(name.to_string());
        recorded.files.insert(name.to_string(), data);
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, CompressionError> {
        self.recorded
            .lock()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| CompressionError::EngineRun(format!("{} not found", name)))
    }

    async fn remove_file(&self, name: &str) -> Result<(), CompressionError> {
        let mut recorded = self.recorded.lock();
        recorded.removed.push(name.to_string());
        if self.script.failing_removes {
            return Err(CompressionError::EngineRun(format!("cannot remove {}", name)));
        }
        recorded.files.remove(name);
        Ok(())
    }

    async fn exec(
        &self,
        args: &[String],
        observer: Arc<dyn EngineObserver>,
    ) -> Result<(), CompressionError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut recorded = self.recorded.lock();
            recorded.last_args = Some(args.to_vec());
            recorded.last_observer = Some(Arc::clone(&observer));
        }
        self.exec_started.notify_one();

        observer.on_log("scripted engine started");
        observer.on_progress(0.5);
        if !self.script.exec_delay.is_zero() {
            tokio::time::sleep(self.script.exec_delay).await;
        }

        let output_name = args.last().cloned().unwrap_or_default();
        if let Some(message) = &self.script.exec_failure {
            self.recorded
                .lock()
                .files
                .insert(output_name, Bytes::from_static(b"partial"));
            return Err(CompressionError::EngineRun(message.clone()));
        }

        let output = self.script.output.clone().unwrap_or_else(|| b"compressed".to_vec());
        self.recorded.lock().files.insert(output_name, Bytes::from(output));
        observer.on_progress(1.0);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordedEvent {
    Progress(JobId, f64),
    Log(JobId, String),
}

/// Sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn ratios(&self, job_id: JobId) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Progress(id, ratio) if *id == job_id => Some(*ratio),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self, job_id: JobId) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Log(id, text) if *id == job_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn progress(&self, job_id: JobId, ratio: f64) {
        self.events.lock().push(RecordedEvent::Progress(job_id, ratio));
    }

    fn log(&self, job_id: JobId, text: String) {
        self.events.lock().push(RecordedEvent::Log(job_id, text));
    }
}
