//! ONNX Runtime adapters: the MobileNet image classifier and the tensor
//! engine behind the benchmark page.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::imageops::FilterType;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider as _, ExecutionProviderDispatch,
};
use ort::memory::{AllocationDevice, AllocatorType, MemoryInfo, MemoryType};
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::LabsError;
use crate::fetch::{download, ModelCache};
use crate::gpu::{Accelerator, WgpuProbe};
use crate::runtime::{
    ExecutionProvider, ImageClassifier, LoadProgress, NamedTensor, RunSummary, Runtime,
    RuntimeFactory, SessionOptions, TensorEngine, TensorSession,
};
use crate::types::{AdapterDetails, ClassificationResult};

const INPUT_SIZE: u32 = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Build a session registering `providers` in order. CUDA is only registered
/// when ONNX Runtime reports it usable; the returned provider is the one the
/// session will actually run on.
fn build_session(model: &[u8], providers: &[ExecutionProvider]) -> Result<(Session, ExecutionProvider)> {
    let cuda = providers.contains(&ExecutionProvider::Cuda)
        && CUDAExecutionProvider::default().is_available().unwrap_or(false);
    let dispatch: Vec<ExecutionProviderDispatch> = providers
        .iter()
        .filter(|p| **p != ExecutionProvider::Cuda || cuda)
        .map(|p| match p {
            ExecutionProvider::Cuda => CUDAExecutionProvider::default().build(),
            ExecutionProvider::Cpu => CPUExecutionProvider::default().build(),
        })
        .collect();
    let session = Session::builder()?
        .with_execution_providers(dispatch)?
        .commit_from_memory(model)
        .context("failed to create ONNX session")?;
    let provider = if cuda {
        ExecutionProvider::Cuda
    } else {
        ExecutionProvider::Cpu
    };
    debug!(%provider, "session created");
    Ok((session, provider))
}

/// Resize to 224x224 and normalise with ImageNet statistics into NCHW order.
fn preprocess(bytes: &[u8]) -> Result<Vec<f32>> {
    let image = image::load_from_memory(bytes)
        .context("failed to decode image")?
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = (y * INPUT_SIZE + x) as usize;
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * plane + offset] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    Ok(data)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Pair probabilities with labels, best first.
fn rank(probabilities: &[f32], labels: &[String]) -> Vec<ClassificationResult> {
    let mut results: Vec<ClassificationResult> = probabilities
        .iter()
        .enumerate()
        .map(|(i, score)| ClassificationResult {
            label: labels.get(i).cloned().unwrap_or_else(|| format!("LABEL_{i}")),
            score: *score,
        })
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

#[derive(Deserialize)]
struct ModelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Labels ordered by class index.
fn parse_labels(config: &[u8]) -> Result<Vec<String>> {
    let config: ModelConfig = serde_json::from_slice(config).context("failed to parse config.json")?;
    let mut labels: Vec<(usize, String)> = config
        .id2label
        .into_iter()
        .filter_map(|(id, label)| id.parse().ok().map(|id| (id, label)))
        .collect();
    labels.sort_by_key(|(id, _)| *id);
    let mut ordered = Vec::with_capacity(labels.len());
    for (id, label) in labels {
        ordered.resize(id, String::new());
        ordered.push(label);
    }
    Ok(ordered)
}

/// Downloads `onnx/model.onnx` and `config.json` for a Hugging Face
/// image-classification repository into the model cache.
pub struct OrtClassifierFactory {
    client: reqwest::Client,
    cache: ModelCache,
    model_id: String,
}

impl OrtClassifierFactory {
    pub fn new(client: reqwest::Client, cache: ModelCache, model_id: impl Into<String>) -> Self {
        Self {
            client,
            cache,
            model_id: model_id.into(),
        }
    }

    fn file_url(&self, file: &str) -> String {
        format!("https://huggingface.co/{}/resolve/main/{file}", self.model_id)
    }
}

#[async_trait]
impl RuntimeFactory for OrtClassifierFactory {
    type Runtime = OrtClassifier;

    async fn load(&self, backend: Backend, progress: &LoadProgress) -> Result<OrtClassifier, LabsError> {
        let fetch = |file: &'static str| async move {
            let key = format!("{}/{file}", self.model_id);
            self.cache
                .get_or_download(&self.client, &key, &self.file_url(file))
                .await
        };

        progress.report(0.1, format!("Fetching {}", self.model_id));
        let model = fetch("onnx/model.onnx").await.map_err(LabsError::runtime_load)?;
        progress.report(0.6, "Fetching label map");
        let config = fetch("config.json").await.map_err(LabsError::runtime_load)?;
        let labels = parse_labels(&config).map_err(LabsError::runtime_load)?;

        progress.report(0.8, "Creating inference session");
        let providers = ExecutionProvider::preferences(backend);
        let (session, provider) = tokio::task::spawn_blocking(move || build_session(&model, &providers))
            .await
            .map_err(|e| LabsError::RuntimeLoad(e.to_string()))?
            .map_err(LabsError::runtime_load)?;
        progress.log(format!("Session running on {provider}"));
        info!(model = %self.model_id, %provider, labels = labels.len(), "classifier loaded");

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "pixel_values".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| LabsError::RuntimeLoad("model declares no outputs".to_string()))?;

        Ok(OrtClassifier {
            client: self.client.clone(),
            session: Arc::new(session),
            input_name,
            output_name,
            labels: Arc::new(labels),
        })
    }
}

/// A loaded image-classification session with its label table.
pub struct OrtClassifier {
    client: reqwest::Client,
    session: Arc<Session>,
    input_name: String,
    output_name: String,
    labels: Arc<Vec<String>>,
}

impl OrtClassifier {
    async fn image_bytes(&self, image: &str) -> Result<Vec<u8>> {
        if image.starts_with("http://") || image.starts_with("https://") {
            download(&self.client, image).await
        } else {
            let path = Path::new(image);
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read image {}", path.display()))
        }
    }
}

impl Runtime for OrtClassifier {}

#[async_trait]
impl ImageClassifier for OrtClassifier {
    async fn classify(&self, image: &str) -> Result<Vec<ClassificationResult>> {
        let bytes = self.image_bytes(image).await?;
        let session = self.session.clone();
        let labels = self.labels.clone();
        let input_name = self.input_name.clone();
        let output_name = self.output_name.clone();

        tokio::task::spawn_blocking(move || {
            let pixels = preprocess(&bytes)?;
            let input = Tensor::from_array(([1i64, 3, INPUT_SIZE as i64, INPUT_SIZE as i64], pixels))?;
            let outputs = session.run(ort::inputs![input_name.as_str() => input]?)?;
            let (_, logits) = outputs[output_name.as_str()].try_extract_raw_tensor::<f32>()?;
            Ok::<_, anyhow::Error>(rank(&softmax(logits), &labels))
        })
        .await?
    }
}

/// Prepares the accelerator for the accelerated backend; sessions are
/// created per run.
pub struct OrtEngineFactory {
    probe: Arc<WgpuProbe>,
}

impl OrtEngineFactory {
    pub fn new(probe: Arc<WgpuProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl RuntimeFactory for OrtEngineFactory {
    type Runtime = OrtEngine;

    async fn load(&self, backend: Backend, progress: &LoadProgress) -> Result<OrtEngine, LabsError> {
        let accelerator = match backend {
            Backend::Accelerated => {
                progress.report(0.2, "Requesting GPU adapter");
                let accelerator = Accelerator::prepare(&self.probe).await?;
                progress.log(format!("Adapter: {}", accelerator.details().summary()));
                progress.log(format!(
                    "shader-f16: {}",
                    if accelerator.shader_f16() { "supported" } else { "not supported" }
                ));
                Some(accelerator)
            }
            Backend::Fallback => None,
        };
        progress.report(1.0, "Runtime ready");
        Ok(OrtEngine {
            accelerator,
            providers: ExecutionProvider::preferences(backend),
        })
    }
}

/// Execution providers for one backend, plus the accelerator when there is one.
pub struct OrtEngine {
    accelerator: Option<Accelerator>,
    providers: Vec<ExecutionProvider>,
}

impl Runtime for OrtEngine {
    fn dispose(&self) {
        if let Some(accelerator) = &self.accelerator {
            accelerator.destroy();
        }
    }
}

#[async_trait]
impl TensorEngine for OrtEngine {
    fn accelerator(&self) -> Option<AdapterDetails> {
        self.accelerator.as_ref().map(|a| a.details().clone())
    }

    fn device_lost(&self) -> Option<String> {
        self.accelerator.as_ref().and_then(Accelerator::device_lost)
    }

    fn providers(&self) -> Vec<ExecutionProvider> {
        self.providers.clone()
    }

    async fn create_session(&self, model: Vec<u8>, options: SessionOptions) -> Result<Box<dyn TensorSession>> {
        let (session, provider) =
            tokio::task::spawn_blocking(move || build_session(&model, &options.providers)).await??;
        Ok(Box::new(OrtSession {
            session: Arc::new(session),
            provider,
            device_outputs: options.prefer_device_outputs && provider == ExecutionProvider::Cuda,
        }))
    }
}

/// A session built by [`OrtEngine`] for a single benchmark run.
pub struct OrtSession {
    session: Arc<Session>,
    provider: ExecutionProvider,
    /// Bind outputs to device memory through an IO binding.
    device_outputs: bool,
}

#[async_trait]
impl TensorSession for OrtSession {
    fn input_names(&self) -> Vec<String> {
        self.session.inputs.iter().map(|i| i.name.clone()).collect()
    }

    fn execution_provider(&self) -> ExecutionProvider {
        self.provider
    }

    async fn run(&self, input: NamedTensor) -> Result<RunSummary> {
        let session = self.session.clone();
        let device_outputs = self.device_outputs;
        let provider = self.provider;

        tokio::task::spawn_blocking(move || {
            let tensor = Tensor::from_array((input.shape, input.data))?;
            if device_outputs {
                let device = MemoryInfo::new(AllocationDevice::CUDA, 0, AllocatorType::Device, MemoryType::Default)?;
                let mut binding = session.create_binding()?;
                binding.bind_input(input.name.as_str(), &tensor)?;
                for output in &session.outputs {
                    binding.bind_output_to_device(output.name.as_str(), &device)?;
                }
                binding.run()?;
            } else {
                session.run(ort::inputs![input.name.as_str() => tensor]?)?;
            }
            Ok::<_, anyhow::Error>(RunSummary {
                provider,
                outputs_on_device: device_outputs,
            })
        })
        .await?
        .map_err(|e| anyhow!("inference failed: {e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let probs = softmax(&[1.0, 3.0, 2.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs[1] > probs[2] && probs[2] > probs[0]);
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rank_sorts_and_labels_by_index() {
        let labels = vec!["tench".to_string(), "goldfish".to_string()];
        let ranked = rank(&[0.2, 0.7, 0.1], &labels);
        let names: Vec<_> = ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(names, ["goldfish", "tench", "LABEL_2"]);
    }

    #[test]
    fn labels_follow_numeric_ids() {
        let config = br#"{"id2label": {"10": "ten", "2": "two", "0": "zero"}, "num_labels": 11}"#;
        let labels = parse_labels(config).unwrap();
        assert_eq!(labels.len(), 11);
        assert_eq!(labels[0], "zero");
        assert_eq!(labels[2], "two");
        assert_eq!(labels[10], "ten");
        assert_eq!(labels[5], "");
    }

    #[test]
    fn preprocess_emits_normalised_nchw() {
        let image = RgbImage::from_pixel(32, 16, Rgb([255, 0, 128]));
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();

        let data = preprocess(&png).unwrap();
        let plane = 224 * 224;
        assert_eq!(data.len(), 3 * plane);
        assert!((data[0] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((data[plane] - (0.0 - 0.456) / 0.224).abs() < 1e-4);
        assert!((data[2 * plane + plane - 1] - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-4);
    }

    #[test]
    fn undecodable_image_is_an_error() {
        let err = preprocess(b"not an image").unwrap_err();
        assert!(format!("{err:#}").contains("decode"));
    }
}
