//! Navigation shell: one active page at a time plus the shared backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::backend::{Backend, BackendOption, BackendSelector};
use crate::error::LabsError;
use crate::page::PageStatus;
use crate::pages::Lifecycle;
use crate::routes::{nav_items, NavItem, Route};

/// Owns the pages and the backend selector; at most one page is mounted.
pub struct Shell {
    selector: BackendSelector,
    pages: HashMap<Route, Arc<dyn Lifecycle>>,
    active: Mutex<Option<Route>>,
}

impl Shell {
    pub fn new(selector: BackendSelector, pages: impl IntoIterator<Item = (Route, Arc<dyn Lifecycle>)>) -> Self {
        Self {
            selector,
            pages: pages.into_iter().collect(),
            active: Mutex::new(None),
        }
    }

    pub fn nav_items(&self) -> Vec<NavItem> {
        nav_items()
    }

    pub fn active(&self) -> Option<Route> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backend(&self) -> Backend {
        self.selector.current()
    }

    pub fn backend_options(&self) -> Vec<BackendOption> {
        self.selector.options()
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    fn page(&self, route: Route) -> Option<&Arc<dyn Lifecycle>> {
        self.pages.get(&route)
    }

    /// Unmount the current page and mount `route`. Resolves once the new
    /// page has finished loading, or once a later navigation superseded it.
    pub async fn navigate(&self, route: Route) {
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if *active == Some(route) {
                return;
            }
            active.replace(route)
        };
        info!(to = %route, from = ?previous.map(Route::path), "navigate");

        if let Some(page) = previous.and_then(|prev| self.page(prev)) {
            page.unmount();
        }
        let Some(page) = self.page(route) else {
            return;
        };
        let backend = self.selector.current();
        page.mount(backend).await;

        // A selection made before the page counted as mounted only recorded
        // the backend; catch up now.
        let current = self.selector.current();
        if current != backend && page.follows_backend() && self.active() == Some(route) {
            page.set_backend(current).await;
        }
    }

    /// Change the backend and reload the active page if it follows it.
    pub async fn select_backend(&self, backend: Backend) -> Result<bool, LabsError> {
        if !self.selector.select(backend)? {
            return Ok(false);
        }
        if let Some(page) = self.active().and_then(|route| self.page(route)) {
            if page.follows_backend() {
                page.set_backend(backend).await;
            }
        }
        Ok(true)
    }

    pub fn status(&self, route: Route) -> Option<PageStatus> {
        self.page(route).map(|page| page.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        follows: bool,
        mounted: AtomicBool,
        /// Holds `mount` open until the test releases it.
        gate: Option<(Notify, Notify)>,
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        async fn mount(&self, backend: Backend) {
            self.events.lock().unwrap().push(format!("mount {backend}"));
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            self.mounted.store(true, Ordering::SeqCst);
        }

        fn unmount(&self) {
            self.mounted.store(false, Ordering::SeqCst);
            self.events.lock().unwrap().push("unmount".to_string());
        }

        async fn set_backend(&self, backend: Backend) {
            let event = if self.mounted.load(Ordering::SeqCst) {
                format!("reload {backend}")
            } else {
                format!("record {backend}")
            };
            self.events.lock().unwrap().push(event);
        }

        fn follows_backend(&self) -> bool {
            self.follows
        }

        fn status(&self) -> PageStatus {
            PageStatus {
                state: PageState::Idle,
                backend: Backend::Fallback,
                mounted: false,
                error: None,
                progress: None,
                logs: self.events(),
                can_act: false,
                notice: None,
            }
        }
    }

    fn shell(gpu: bool) -> (Shell, Arc<Recorder>, Arc<Recorder>) {
        let search = Arc::new(Recorder {
            follows: true,
            ..Default::default()
        });
        let chat = Arc::new(Recorder::default());
        let shell = Shell::new(
            BackendSelector::new(gpu),
            [
                (Route::Embeddings, search.clone() as Arc<dyn Lifecycle>),
                (Route::Chat, chat.clone() as Arc<dyn Lifecycle>),
            ],
        );
        (shell, search, chat)
    }

    #[tokio::test]
    async fn navigation_unmounts_the_previous_page() {
        let (shell, search, chat) = shell(true);
        shell.navigate(Route::Embeddings).await;
        shell.navigate(Route::Embeddings).await;
        shell.navigate(Route::Chat).await;

        assert_eq!(shell.active(), Some(Route::Chat));
        assert_eq!(search.events(), ["mount accelerated", "unmount"]);
        assert_eq!(chat.events(), ["mount accelerated"]);
    }

    #[tokio::test]
    async fn backend_change_reloads_only_pages_that_follow_it() {
        let (shell, search, chat) = shell(true);
        shell.navigate(Route::Embeddings).await;
        assert!(shell.select_backend(Backend::Fallback).await.unwrap());
        assert!(!shell.select_backend(Backend::Fallback).await.unwrap());
        assert_eq!(search.events(), ["mount accelerated", "reload fallback"]);

        shell.navigate(Route::Chat).await;
        shell.select_backend(Backend::Accelerated).await.unwrap();
        assert_eq!(chat.events(), ["mount fallback"]);
    }

    #[tokio::test]
    async fn backend_chosen_while_mounting_is_applied_after_mount() {
        let page = Arc::new(Recorder {
            follows: true,
            gate: Some((Notify::new(), Notify::new())),
            ..Default::default()
        });
        let shell = Shell::new(
            BackendSelector::new(true),
            [(Route::Embeddings, page.clone() as Arc<dyn Lifecycle>)],
        );
        let (started, release) = page.gate.as_ref().unwrap();

        let select = async {
            started.notified().await;
            assert!(shell.select_backend(Backend::Fallback).await.unwrap());
            release.notify_one();
        };
        tokio::join!(shell.navigate(Route::Embeddings), select);

        assert_eq!(
            page.events(),
            ["mount accelerated", "record fallback", "reload fallback"]
        );
    }

    #[tokio::test]
    async fn unavailable_backend_is_rejected() {
        let (shell, search, _) = shell(false);
        shell.navigate(Route::Embeddings).await;
        assert!(matches!(
            shell.select_backend(Backend::Accelerated).await,
            Err(LabsError::BackendUnavailable(_))
        ));
        assert_eq!(search.events(), ["mount fallback"]);
    }

    #[tokio::test]
    async fn routes_without_a_page_are_still_tracked() {
        let (shell, search, _) = shell(true);
        shell.navigate(Route::Embeddings).await;
        shell.navigate(Route::Overview).await;
        assert_eq!(shell.active(), Some(Route::Overview));
        assert_eq!(search.events(), ["mount accelerated", "unmount"]);
        assert!(shell.status(Route::Overview).is_none());
    }
}
