use async_trait::async_trait;
use serde::Serialize;

use crate::backend::Backend;
use crate::error::LabsError;
use crate::page::{PageController, PageStatus};
use crate::pages::Lifecycle;
use crate::runtime::{ImageClassifier, RuntimeFactory};
use crate::types::ClassificationResult;

/// How many labels the page keeps from a run.
pub const MAX_RESULTS: usize = 5;

pub const FETCH_HINT: &str = "Could not fetch the image. This may be due to cross-origin restrictions on the host. Try another URL or host the image on a domain that allows cross-origin requests.";

/// Top labels for the last classified image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifierView {
    pub results: Vec<ClassificationResult>,
}

pub struct ClassifierPage<F: RuntimeFactory> {
    controller: PageController<F, ClassifierView>,
    sample_image: String,
}

impl<F> ClassifierPage<F>
where
    F: RuntimeFactory,
    F::Runtime: ImageClassifier,
{
    pub fn new(factory: F, backend: Backend, sample_image: impl Into<String>) -> Self {
        Self {
            controller: PageController::new(factory, backend),
            sample_image: sample_image.into(),
        }
    }

    pub fn controller(&self) -> &PageController<F, ClassifierView> {
        &self.controller
    }

    pub fn sample_image(&self) -> &str {
        &self.sample_image
    }

    pub fn results(&self) -> Vec<ClassificationResult> {
        self.controller.view(|view| view.results.clone())
    }

    /// Classify `image` (URL or local path; blank means the sample image)
    /// and keep the first five labels as returned.
    pub async fn classify(&self, image: &str) -> Result<Option<Vec<ClassificationResult>>, LabsError> {
        let image = match image.trim() {
            "" => self.sample_image.clone(),
            other => other.to_string(),
        };
        self.controller
            .act(move |runtime, scope| async move {
                let output = runtime.classify(&image).await.map_err(classify_error)?;
                let top: Vec<ClassificationResult> = output.into_iter().take(MAX_RESULTS).collect();
                scope.apply(|view| view.results = top.clone());
                Ok(top)
            })
            .await
    }
}

/// Fetch-style failures are usually the host refusing the request, so they
/// get the friendlier hint.
fn classify_error(err: anyhow::Error) -> LabsError {
    let message = format!("{err:#}");
    if message.to_lowercase().contains("fetch") {
        LabsError::Action(FETCH_HINT.to_string())
    } else {
        LabsError::Action(message)
    }
}

#[async_trait]
impl<F> Lifecycle for ClassifierPage<F>
where
    F: RuntimeFactory,
    F::Runtime: ImageClassifier,
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
        self.controller.status()
    }
}
