use crate::{
    config::Config,
    decode::{decode_frame, DecodeError},
    frame_store::{FrameStore, StorageError},
    inference::{InferenceEngine, InferenceError, InferenceResult, ProcessEngine},
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::instrument;

/// Steps of one pipeline invocation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decoding,
    StoringFrame,
    Invoking,
    CleaningUp,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid frame payload: {0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("Inference did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Decode(_) => Stage::Decoding,
            PipelineError::Storage(_) => Stage::StoringFrame,
            PipelineError::Inference(_) | PipelineError::DeadlineExceeded(_) => Stage::Invoking,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "DecodeError",
            PipelineError::Storage(_) => "StorageError",
            PipelineError::Inference(InferenceError::Spawn { .. }) => "InferenceSpawnError",
            PipelineError::Inference(InferenceError::Io(_))
            | PipelineError::Inference(InferenceError::Process { .. }) => "InferenceProcessError",
            PipelineError::Inference(InferenceError::Parse { .. }) => "InferenceParseError",
            PipelineError::DeadlineExceeded(_) => "DeadlineExceeded",
        }
    }

    pub fn is_oversize(&self) -> bool {
        matches!(self, PipelineError::Decode(DecodeError::TooLarge { .. }))
    }
}

/// decode -> store -> infer -> cleanup for a single frame.
///
/// Built once at startup and shared by every transport. Invocations are
/// independent of each other; the only shared resource is the scratch
/// directory, where each invocation owns a uniquely named file.
pub struct FramePipeline {
    store: FrameStore,
    engine: Arc<dyn InferenceEngine>,
    max_frame_bytes: usize,
    deadline: Option<Duration>,
}

impl FramePipeline {
    pub fn new(store: FrameStore, engine: Arc<dyn InferenceEngine>, max_frame_bytes: usize) -> Self {
        Self {
            store,
            engine,
            max_frame_bytes,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let engine = ProcessEngine::new(config.engine.program.clone(), config.engine.args.clone());

        Self::new(
            FrameStore::new(config.scratch.dir.clone()),
            Arc::new(engine),
            config.pipeline.max_payload_bytes,
        )
        .with_deadline(config.pipeline.get_deadline())
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Runs one frame through the engine. The frame file never outlives this
    /// call, including when the deadline fires or the future is dropped.
    #[instrument(skip_all, fields(payload_len = payload.len()))]
    pub async fn process(&self, payload: &str) -> Result<InferenceResult, PipelineError> {
        match self.deadline {
            Some(deadline) => timeout(deadline, self.run(payload))
                .await
                .map_err(|_| PipelineError::DeadlineExceeded(deadline))?,
            None => self.run(payload).await,
        }
    }

    async fn run(&self, payload: &str) -> Result<InferenceResult, PipelineError> {
        tracing::debug!(stage = ?Stage::Decoding);
        let bytes = decode_frame(payload, self.max_frame_bytes)?;

        tracing::debug!(stage = ?Stage::StoringFrame, size = bytes.len());
        let frame = self.store.create(&bytes).await?;
        drop(bytes);

        tracing::debug!(stage = ?Stage::Invoking);
        let outcome = self.engine.infer(&frame).await;

        tracing::debug!(stage = ?Stage::CleaningUp);
        self.store.delete(frame).await;

        Ok(outcome?)
    }
}
