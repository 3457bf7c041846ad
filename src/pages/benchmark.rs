use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::backend::Backend;
use crate::error::LabsError;
use crate::page::{PageController, PageStatus};
use crate::pages::Lifecycle;
use crate::runtime::{ModelSource, NamedTensor, RuntimeFactory, SessionOptions, TensorEngine};
use crate::types::{AdapterDetails, BenchmarkResult};

pub const DEFAULT_INPUT_NAME: &str = "pixel_values";
pub const INPUT_SHAPE: [i64; 4] = [1, 3, 224, 224];
const INPUT_FILL: f32 = 0.5;

/// Timings of every run since the page mounted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchmarkView {
    pub results: Vec<BenchmarkResult>,
}

/// Times single inferences of an ONNX model with device-resident outputs.
pub struct BenchmarkPage<F: RuntimeFactory, S> {
    controller: PageController<F, BenchmarkView>,
    source: Arc<S>,
    model_url: String,
}

impl<F, S> BenchmarkPage<F, S>
where
    F: RuntimeFactory,
    F::Runtime: TensorEngine,
    S: ModelSource + 'static,
{
    pub fn new(factory: F, backend: Backend, source: S, model_url: impl Into<String>) -> Self {
        Self {
            controller: PageController::new(factory, backend),
            source: Arc::new(source),
            model_url: model_url.into(),
        }
    }

    pub fn controller(&self) -> &PageController<F, BenchmarkView> {
        &self.controller
    }

    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.controller.view(|view| view.results.clone())
    }

    pub fn adapter(&self) -> Option<AdapterDetails> {
        self.controller.with_runtime(|engine| engine.accelerator()).flatten()
    }

    pub fn device_lost(&self) -> Option<String> {
        self.controller.with_runtime(|engine| engine.device_lost()).flatten()
    }

    /// Fetch the model, open a session and time one run.
    pub async fn run(&self) -> Result<Option<BenchmarkResult>, LabsError> {
        let source = self.source.clone();
        let url = self.model_url.clone();
        self.controller
            .act(move |engine, scope| async move {
                if let Some(reason) = engine.device_lost() {
                    return Err(LabsError::DeviceLost(reason));
                }
                let model = source.fetch(&url).await?;
                let session = engine
                    .create_session(
                        model,
                        SessionOptions {
                            providers: engine.providers(),
                            prefer_device_outputs: true,
                        },
                    )
                    .await
                    .map_err(LabsError::action)?;

                let input_name = session
                    .input_names()
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string());
                let input = NamedTensor::filled(input_name, &INPUT_SHAPE, INPUT_FILL);

                let start = Instant::now();
                let summary = session.run(input).await.map_err(LabsError::action)?;
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                let result = BenchmarkResult {
                    backend: summary.provider.to_string(),
                    elapsed_ms,
                    outputs_on_device: summary.outputs_on_device,
                };
                info!(provider = %result.backend, elapsed_ms, "benchmark run");
                scope.apply(|view| view.results.push(result.clone()));
                scope.log(format!(
                    "{}: {elapsed_ms:.2} ms, outputs on device: {}",
                    result.backend, result.outputs_on_device
                ));
                Ok(result)
            })
            .await
    }
}

#[async_trait]
impl<F, S> Lifecycle for BenchmarkPage<F, S>
where
    F: RuntimeFactory,
    F::Runtime: TensorEngine,
    S: ModelSource + 'static,
{
    async fn mount(&self, backend: Backend) {
        self.controller.mount(backend).await;
    }

    fn unmount(&self) {
        self.controller.unmount();
    }

    async fn set_backend(&self, backend: Backend) {
        self.controller.set_backend(backend).await;
    }

    fn status(&self) -> PageStatus {
        let mut status = self.controller.status();
        status.notice = self.device_lost().map(|reason| LabsError::DeviceLost(reason).to_string());
        status
    }
}
