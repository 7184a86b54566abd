use crate::{
    frame_store::{FrameRef, FrameStore},
    inference::{InferenceEngine, InferenceError, InferenceResult, ProcessEngine},
    pipeline::FramePipeline,
    server::SharedState,
    telemetry::Metrics,
};
use async_trait::async_trait;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Engine backed by `sh -c <script>`; the frame path is `$1`.
pub fn sh_engine(script: &str) -> Arc<dyn InferenceEngine> {
    Arc::new(ProcessEngine::new(
        "sh",
        vec!["-c".into(), script.into(), "engine".into()],
    ))
}

pub fn test_state(
    engine: Arc<dyn InferenceEngine>,
    scratch: &Path,
    max_payload_bytes: usize,
) -> SharedState {
    let pipeline = FramePipeline::new(FrameStore::new(scratch), engine, max_payload_bytes);
    SharedState::new(
        Arc::new(pipeline),
        Arc::new(Metrics::new().expect("metrics")),
    )
}

pub fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub struct CountingEngine {
    inner: Arc<dyn InferenceEngine>,
    calls: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: Arc<dyn InferenceEngine>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for CountingEngine {
    async fn infer(&self, frame: &FrameRef) -> Result<InferenceResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.infer(frame).await
    }
}
