use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProviderDispatch};
use tracing::info;

use crate::backend::Backend;
use crate::documents::SAMPLE_DOCUMENTS;
use crate::error::LabsError;
use crate::index::CorpusIndex;
use crate::runtime::{LoadProgress, Runtime, RuntimeFactory, TextEmbedder};

/// Wraps the fastembed TextEmbedding model (bge-small-en-v1.5, 384 dims).
/// Model is downloaded and cached on first use (~33MB, one-time).
///
/// The inner `TextEmbedding` session sits behind a `Mutex` so concurrent
/// corpus and query embeddings are serialized through one ONNX session.
pub struct EmbeddingPipeline {
    model: Mutex<TextEmbedding>,
}

impl EmbeddingPipeline {
    /// Initialize the embedding model. Downloads on first run, cached afterwards.
    /// The accelerated backend registers the CUDA execution provider; ONNX
    /// Runtime falls back to CPU on its own when CUDA cannot be initialised.
    pub fn new(cache_dir: &Path, backend: Backend, show_progress: bool) -> Result<Self> {
        let providers: Vec<ExecutionProviderDispatch> = match backend {
            Backend::Accelerated => vec![CUDAExecutionProvider::default().build()],
            Backend::Fallback => Vec::new(),
        };
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_execution_providers(providers)
                .with_show_download_progress(show_progress),
        )?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }

    /// Embed a batch of texts. Returns one 384-dim vector per input text, in
    /// the same order.
    pub fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let model = self
            .model
            .lock()
            .map_err(|e| anyhow::anyhow!("model lock poisoned: {e}"))?;
        let results = model.embed(texts, None)?;
        Ok(results.into_iter().map(normalize).collect())
    }
}

/// L2-normalize a vector so cosine similarity == dot product. Zero vectors
/// are returned unchanged.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// A loaded pipeline. Inference runs on the blocking pool.
pub struct FastembedRuntime {
    pipeline: Arc<EmbeddingPipeline>,
}

impl Runtime for FastembedRuntime {}

#[async_trait]
impl TextEmbedder for FastembedRuntime {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.embed_batch(texts)).await?
    }
}

pub struct FastembedFactory {
    cache_dir: PathBuf,
}

impl FastembedFactory {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl RuntimeFactory for FastembedFactory {
    type Runtime = FastembedRuntime;

    async fn load(&self, backend: Backend, progress: &LoadProgress) -> Result<FastembedRuntime, LabsError> {
        progress.report(0.0, "Loading bge-small-en-v1.5");
        let cache_dir = self.cache_dir.clone();
        let pipeline = tokio::task::spawn_blocking(move || EmbeddingPipeline::new(&cache_dir, backend, false))
            .await
            .map_err(|e| LabsError::RuntimeLoad(e.to_string()))?
            .map_err(LabsError::runtime_load)?;
        progress.report(1.0, "Embedding model ready");
        Ok(FastembedRuntime {
            pipeline: Arc::new(pipeline),
        })
    }
}

/// An embedder together with the corpus vectors it produced.
pub struct CorpusRuntime<E> {
    pub embedder: E,
    pub index: CorpusIndex,
}

impl<E: Runtime> Runtime for CorpusRuntime<E> {
    fn dispose(&self) {
        self.embedder.dispose();
    }
}

/// Loads an embedder, then embeds the sample corpus once with it.
pub struct CorpusFactory<F> {
    embedder: F,
}

impl<F> CorpusFactory<F> {
    pub fn new(embedder: F) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl<F> RuntimeFactory for CorpusFactory<F>
where
    F: RuntimeFactory,
    F::Runtime: TextEmbedder,
{
    type Runtime = CorpusRuntime<F::Runtime>;

    async fn load(&self, backend: Backend, progress: &LoadProgress) -> Result<Self::Runtime, LabsError> {
        let embedder = self.embedder.load(backend, progress).await?;
        let texts = SAMPLE_DOCUMENTS.iter().map(|d| d.embedding_text()).collect();
        let vectors = match embedder.embed(texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                embedder.dispose();
                return Err(LabsError::runtime_load(err.context("failed to embed sample documents")));
            }
        };
        let entries = SAMPLE_DOCUMENTS
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| (doc.id.to_string(), vector))
            .collect::<Vec<_>>();
        info!(documents = entries.len(), "corpus embedded");
        progress.log(format!("Embedded {} documents", entries.len()));
        Ok(CorpusRuntime {
            embedder,
            index: CorpusIndex::new(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0]), [0.0, 0.0]);
    }
}
