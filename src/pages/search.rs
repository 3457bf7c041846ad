use async_trait::async_trait;
use serde::Serialize;

use crate::backend::Backend;
use crate::documents::find_document;
use crate::embeddings::CorpusFactory;
use crate::error::LabsError;
use crate::index::DEFAULT_TOP_K;
use crate::page::{PageController, PageStatus};
use crate::pages::Lifecycle;
use crate::runtime::{RuntimeFactory, TextEmbedder};
use crate::types::SearchResult;

pub const DEFAULT_QUERY: &str = "webgpu demos";

/// Results of the last search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchView {
    pub results: Vec<SearchResult>,
}

/// Embeds the sample corpus on every load and ranks it against queries.
pub struct SearchPage<F>
where
    F: RuntimeFactory,
    F::Runtime: TextEmbedder,
{
    controller: PageController<CorpusFactory<F>, SearchView>,
}

impl<F> SearchPage<F>
where
    F: RuntimeFactory,
    F::Runtime: TextEmbedder,
{
    pub fn new(embedder: F, backend: Backend) -> Self {
        Self {
            controller: PageController::new(CorpusFactory::new(embedder), backend),
        }
    }

    pub fn controller(&self) -> &PageController<CorpusFactory<F>, SearchView> {
        &self.controller
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.controller.view(|view| view.results.clone())
    }

    pub async fn search(&self, query: &str) -> Result<Option<Vec<SearchResult>>, LabsError> {
        let query = query.to_string();
        self.controller
            .act(move |runtime, scope| async move {
                let query_vector = runtime
                    .embedder
                    .embed(vec![query])
                    .await
                    .map_err(LabsError::action)?
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let results: Vec<SearchResult> = runtime
                    .index
                    .search(&query_vector, DEFAULT_TOP_K)
                    .into_iter()
                    .filter_map(|hit| {
                        find_document(&hit.id).map(|document| SearchResult {
                            document: *document,
                            score: hit.score,
                        })
                    })
                    .collect();
                scope.apply(|view| view.results = results.clone());
                Ok(results)
            })
            .await
    }
}

#[async_trait]
impl<F> Lifecycle for SearchPage<F>
where
    F: RuntimeFactory,
    F::Runtime: TextEmbedder,
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
