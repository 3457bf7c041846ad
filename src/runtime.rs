//! Narrow contracts for the external ML runtimes.
//!
//! Pages never see a concrete runtime type. They hold a [`RuntimeFactory`]
//! and call the task-specific trait on whatever it produced, which is what
//! lets the tests swap in fakes that resolve on demand.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::LabsError;
use crate::types::{AdapterDetails, ClassificationResult};

/// A loaded runtime instance.
pub trait Runtime: Send + Sync + 'static {
    /// Release resources held outside Rust ownership (device memory,
    /// remote sessions). Called once when the page drops the instance.
    fn dispose(&self) {}
}

/// Creates runtime instances for a backend.
#[async_trait]
pub trait RuntimeFactory: Send + Sync + 'static {
    type Runtime: Runtime;

    async fn load(
        &self,
        backend: Backend,
        progress: &LoadProgress,
    ) -> Result<Self::Runtime, LabsError>;
}

#[async_trait]
pub trait ImageClassifier: Runtime {
    /// Classify the image at `image` (URL or local path). Results come back
    /// in the runtime's own order, best first.
    async fn classify(&self, image: &str) -> anyhow::Result<Vec<ClassificationResult>>;
}

#[async_trait]
pub trait TextEmbedder: Runtime {
    /// One vector per input, in input order.
    async fn embed(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// A single conversational turn sent to a chat runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Incremental text fragments, in generation order.
pub type FragmentStream = BoxStream<'static, anyhow::Result<String>>;

#[async_trait]
pub trait ChatEngine: Runtime {
    fn model(&self) -> &str;

    async fn stream_chat(&self, turns: Vec<ChatTurn>) -> anyhow::Result<FragmentStream>;
}

/// Device an ONNX session executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cuda,
    Cpu,
}

impl ExecutionProvider {
    /// Preference list for a backend, most preferred first.
    pub fn preferences(backend: Backend) -> Vec<ExecutionProvider> {
        match backend {
            Backend::Accelerated => vec![ExecutionProvider::Cuda, ExecutionProvider::Cpu],
            Backend::Fallback => vec![ExecutionProvider::Cpu],
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionProvider::Cuda => "cuda",
            ExecutionProvider::Cpu => "cpu",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub providers: Vec<ExecutionProvider>,
    /// Ask for outputs to stay in device memory instead of being copied back.
    pub prefer_device_outputs: bool,
}

/// A named dense `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn filled(name: impl Into<String>, shape: &[i64], value: f32) -> Self {
        let len = shape.iter().product::<i64>().max(0) as usize;
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            data: vec![value; len],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub provider: ExecutionProvider,
    pub outputs_on_device: bool,
}

#[async_trait]
pub trait TensorSession: Send + Sync {
    fn input_names(&self) -> Vec<String>;

    fn execution_provider(&self) -> ExecutionProvider;

    async fn run(&self, input: NamedTensor) -> anyhow::Result<RunSummary>;
}

#[async_trait]
pub trait TensorEngine: Runtime {
    /// Adapter prepared for this engine, if the backend is accelerated.
    fn accelerator(&self) -> Option<AdapterDetails>;

    /// Reason reported by the device after it was lost, if it was.
    fn device_lost(&self) -> Option<String>;

    fn providers(&self) -> Vec<ExecutionProvider>;

    async fn create_session(
        &self,
        model: Vec<u8>,
        options: SessionOptions,
    ) -> anyhow::Result<Box<dyn TensorSession>>;
}

/// Fetches model blobs by URL.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LabsError>;
}

/// Load progress sink handed to factories. Reports are dropped once the
/// load they belong to has been superseded.
#[derive(Clone)]
pub struct LoadProgress {
    sink: Arc<dyn Fn(Option<f32>, String) + Send + Sync>,
}

impl LoadProgress {
    pub fn new(sink: impl Fn(Option<f32>, String) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A sink that discards everything.
    pub fn silent() -> Self {
        Self::new(|_, _| {})
    }

    /// Record a fraction in `0.0..=1.0` together with a status line.
    pub fn report(&self, fraction: f32, text: impl Into<String>) {
        (self.sink)(Some(fraction.clamp(0.0, 1.0)), text.into());
    }

    /// Record a status line without moving the fraction.
    pub fn log(&self, text: impl Into<String>) {
        (self.sink)(None, text.into());
    }
}

impl fmt::Debug for LoadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadProgress").finish_non_exhaustive()
    }
}
