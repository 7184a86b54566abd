use crate::frame_store::FrameRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{io, process::Stdio};
use thiserror::Error;
use tokio::{io::AsyncReadExt, process::Command};
use tracing::instrument;

const SNIPPET_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to launch inference engine `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to read inference engine output: {0}")]
    Io(#[from] io::Error),
    #[error("Inference process exited with {}", describe_exit(.code))]
    Process { code: Option<i32> },
    #[error("Failed to parse inference result: {detail} (output: {snippet:?})")]
    Parse { detail: String, snippet: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".into(),
    }
}

/// Prediction document emitted by the engine. Fields beyond `prediction` and
/// `confidence` are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InferenceResult(Map<String, Value>);

impl InferenceResult {
    pub fn prediction(&self) -> Option<&str> {
        self.0.get("prediction").and_then(Value::as_str)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.0.get("confidence").and_then(Value::as_f64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Human readable one-liner, e.g. `Detected: cat (Confidence: 92.00%)`.
    pub fn summary(&self) -> String {
        let detected = self
            .prediction()
            .filter(|p| !p.is_empty())
            .unwrap_or("unknown object");
        let confidence = self
            .confidence()
            .map(|c| format!("{:.2}%", c * 100.0))
            .unwrap_or_else(|| "unknown".into());

        format!("Detected: {} (Confidence: {})", detected, confidence)
    }
}

impl From<Map<String, Value>> for InferenceResult {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<&[u8]> for InferenceResult {
    type Error = InferenceError;

    fn try_from(stdout: &[u8]) -> Result<Self, Self::Error> {
        let parse_error = |detail: String| InferenceError::Parse {
            detail,
            snippet: snippet(stdout),
        };

        match serde_json::from_slice::<Value>(stdout) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(parse_error(format!(
                "expected a JSON object, found {}",
                json_type(&other)
            ))),
            Err(e) => Err(parse_error(e.to_string())),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn snippet(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .trim()
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    async fn infer(&self, frame: &FrameRef) -> Result<InferenceResult, InferenceError>;
}

/// Runs the external engine as `<program> <args...> <frame path>`, one
/// process per frame.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl InferenceEngine for ProcessEngine {
    #[instrument(skip(self, frame), fields(program = %self.program, frame = ?frame.path()))]
    async fn infer(&self, frame: &FrameRef) -> Result<InferenceResult, InferenceError> {
        // kill_on_drop: a caller that drops this future (deadline, client gone)
        // takes the engine down with it.
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(frame.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InferenceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("engine stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("engine stderr was not captured"))?;

        let drain_stdout = async {
            let mut buffer = Vec::new();
            stdout.read_to_end(&mut buffer).await.map(|_| buffer)
        };
        let drain_stderr = async {
            let mut buffer = Vec::new();
            stderr.read_to_end(&mut buffer).await.map(|_| buffer)
        };

        let (output, diagnostics, status) =
            tokio::try_join!(drain_stdout, drain_stderr, child.wait())?;

        if !diagnostics.is_empty() {
            tracing::warn!(
                "Inference engine stderr: {}",
                String::from_utf8_lossy(&diagnostics).trim_end()
            );
        }

        if !status.success() {
            return Err(InferenceError::Process {
                code: status.code(),
            });
        }

        InferenceResult::try_from(output.as_slice())
    }
}
