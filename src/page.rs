//! Lifecycle shared by every runtime-backed page.
//!
//! ```text
//! Idle ──mount──▶ Loading ──ok──▶ Ready ──act──▶ Busy ──done──▶ Ready
//!                    │
//!                    └──err──▶ Failed
//! ```
//!
//! Every load owns a [`CancellationToken`]. Unmounting or switching backend
//! cancels it while holding the page lock, and every completion re-checks it
//! under the same lock, so a late result can never touch a page that has
//! moved on.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::LabsError;
use crate::runtime::{LoadProgress, Runtime, RuntimeFactory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum PageState {
    Idle,
    Loading,
    Ready,
    Busy,
    Failed(String),
}

/// Snapshot of a page for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct PageStatus {
    pub state: PageState,
    pub backend: Backend,
    pub mounted: bool,
    /// Inline error next to the triggering control.
    pub error: Option<String>,
    /// Load progress, 0.0 to 1.0.
    pub progress: Option<f32>,
    /// Load and runtime log lines.
    pub logs: Vec<String>,
    /// Whether the action control is enabled.
    pub can_act: bool,
    /// Passive page-specific notice, such as a lost device.
    pub notice: Option<String>,
}

struct PageInner<R, V> {
    state: PageState,
    backend: Backend,
    mounted: bool,
    runtime: Option<Arc<R>>,
    token: CancellationToken,
    error: Option<String>,
    progress: Option<f32>,
    logs: Vec<String>,
    view: V,
}

impl<R: Runtime, V> PageInner<R, V> {
    /// Cancel outstanding work and drop the loaded runtime.
    fn release(&mut self) {
        self.token.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.dispose();
        }
    }
}

fn lock_inner<R, V>(inner: &Mutex<PageInner<R, V>>) -> MutexGuard<'_, PageInner<R, V>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one page through its lifecycle. `V` is the page's view state
/// (results, messages); it is reset on unmount and kept across reloads.
pub struct PageController<F: RuntimeFactory, V> {
    factory: Arc<F>,
    inner: Arc<Mutex<PageInner<F::Runtime, V>>>,
}

impl<F: RuntimeFactory, V> Clone for PageController<F, V> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<F, V> PageController<F, V>
where
    F: RuntimeFactory,
    V: Default + Send + 'static,
{
    pub fn new(factory: F, backend: Backend) -> Self {
        Self {
            factory: Arc::new(factory),
            inner: Arc::new(Mutex::new(PageInner {
                state: PageState::Idle,
                backend,
                mounted: false,
                runtime: None,
                token: CancellationToken::new(),
                error: None,
                progress: None,
                logs: Vec::new(),
                view: V::default(),
            })),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn lock(&self) -> MutexGuard<'_, PageInner<F::Runtime, V>> {
        lock_inner(&self.inner)
    }

    pub fn state(&self) -> PageState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> PageStatus {
        let inner = self.lock();
        PageStatus {
            state: inner.state.clone(),
            backend: inner.backend,
            mounted: inner.mounted,
            error: inner.error.clone(),
            progress: inner.progress,
            logs: inner.logs.clone(),
            can_act: inner.state == PageState::Ready,
            notice: None,
        }
    }

    /// Read the view state.
    pub fn view<T>(&self, read: impl FnOnce(&V) -> T) -> T {
        read(&self.lock().view)
    }

    /// Edit the view and logs outside of an action. Rejected while busy.
    pub fn edit_view<T>(
        &self,
        edit: impl FnOnce(&mut V, &mut Vec<String>) -> T,
    ) -> Result<T, LabsError> {
        let mut inner = self.lock();
        if inner.state == PageState::Busy {
            return Err(LabsError::NotReady);
        }
        let inner = &mut *inner;
        Ok(edit(&mut inner.view, &mut inner.logs))
    }

    /// Borrow the loaded runtime, if any.
    pub fn with_runtime<T>(&self, read: impl FnOnce(&F::Runtime) -> T) -> Option<T> {
        let runtime = self.lock().runtime.clone()?;
        Some(read(&runtime))
    }

    pub async fn mount(&self, backend: Backend) {
        self.lock().mounted = true;
        self.load(backend).await;
    }

    /// Drop the runtime and view. Outstanding work is discarded when it
    /// resolves.
    pub fn unmount(&self) {
        let mut inner = self.lock();
        inner.release();
        inner.mounted = false;
        inner.state = PageState::Idle;
        inner.error = None;
        inner.progress = None;
        inner.logs.clear();
        inner.view = V::default();
        debug!("page unmounted");
    }

    /// Reload for `backend` if mounted and the backend actually changed.
    pub async fn set_backend(&self, backend: Backend) {
        {
            let mut inner = self.lock();
            if inner.backend == backend {
                return;
            }
            if !inner.mounted {
                inner.backend = backend;
                return;
            }
        }
        self.load(backend).await;
    }

    async fn load(&self, backend: Backend) {
        let token = {
            let mut inner = self.lock();
            inner.release();
            inner.token = CancellationToken::new();
            inner.backend = backend;
            inner.state = PageState::Loading;
            inner.error = None;
            inner.progress = Some(0.0);
            inner.token.clone()
        };

        let progress = {
            let inner = self.inner.clone();
            let token = token.clone();
            LoadProgress::new(move |fraction, text| {
                let mut inner = lock_inner(&inner);
                if token.is_cancelled() {
                    return;
                }
                match fraction {
                    Some(fraction) => {
                        inner.progress = Some(fraction);
                        inner
                            .logs
                            .push(format!("{}% | {text}", (fraction * 100.0).round() as u32));
                    }
                    None => inner.logs.push(text),
                }
            })
        };

        info!(%backend, "loading runtime");
        let result = self.factory.load(backend, &progress).await;

        let mut inner = self.lock();
        if token.is_cancelled() {
            if let Ok(runtime) = result {
                runtime.dispose();
            }
            debug!(%backend, "discarding superseded load");
            return;
        }
        match result {
            Ok(runtime) => {
                inner.runtime = Some(Arc::new(runtime));
                inner.state = PageState::Ready;
                inner.progress = Some(1.0);
                info!(%backend, "runtime ready");
            }
            Err(err) => {
                let message = err.to_string();
                warn!(%backend, "runtime load failed: {message}");
                inner.state = PageState::Failed(message.clone());
                inner.error = Some(message);
                inner.progress = None;
            }
        }
    }

    /// Run a user action against the loaded runtime.
    ///
    /// Only accepted in `Ready`. Returns `Ok(None)` when the page was
    /// unmounted or reloaded before the action finished; the result is then
    /// dropped without touching the page.
    pub async fn act<T, A, Fut>(&self, action: A) -> Result<Option<T>, LabsError>
    where
        A: FnOnce(Arc<F::Runtime>, ActionScope<F::Runtime, V>) -> Fut + Send,
        Fut: Future<Output = Result<T, LabsError>> + Send,
        T: Send,
    {
        let (runtime, token) = {
            let mut inner = self.lock();
            if inner.state != PageState::Ready {
                return Err(LabsError::NotReady);
            }
            let runtime = inner.runtime.clone().ok_or(LabsError::NotReady)?;
            inner.state = PageState::Busy;
            inner.error = None;
            (runtime, inner.token.clone())
        };

        let scope = ActionScope {
            inner: self.inner.clone(),
            token: token.clone(),
        };
        let result = action(runtime, scope).await;

        let mut inner = self.lock();
        if token.is_cancelled() {
            debug!("discarding result of superseded action");
            return Ok(None);
        }
        inner.state = PageState::Ready;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!("action failed: {err}");
                inner.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

/// Handle an in-flight action uses to publish into its page.
pub struct ActionScope<R, V> {
    inner: Arc<Mutex<PageInner<R, V>>>,
    token: CancellationToken,
}

impl<R, V> ActionScope<R, V> {
    /// Whether the page is still the one that started this action.
    pub fn is_current(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Apply `update` to the view unless the action has been superseded.
    pub fn apply<T>(&self, update: impl FnOnce(&mut V) -> T) -> Option<T> {
        let mut inner = lock_inner(&self.inner);
        if self.token.is_cancelled() {
            return None;
        }
        Some(update(&mut inner.view))
    }

    pub fn log(&self, line: impl Into<String>) -> bool {
        let mut inner = lock_inner(&self.inner);
        if self.token.is_cancelled() {
            return false;
        }
        inner.logs.push(line.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct Probe {
        backend: Backend,
        disposed: Arc<AtomicUsize>,
    }

    impl Runtime for Probe {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Loads only once the test hands out a permit.
    struct GatedFactory {
        gate: Arc<Semaphore>,
        disposed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Default for GatedFactory {
        fn default() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                disposed: Arc::default(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl RuntimeFactory for GatedFactory {
        type Runtime = Probe;

        async fn load(
            &self,
            backend: Backend,
            progress: &LoadProgress,
        ) -> Result<Probe, LabsError> {
            progress.report(0.5, "fetching weights");
            self.gate
                .acquire()
                .await
                .map_err(|e| LabsError::RuntimeLoad(e.to_string()))?
                .forget();
            if self.fail {
                return Err(LabsError::RuntimeLoad("weights missing".to_string()));
            }
            Ok(Probe {
                backend,
                disposed: self.disposed.clone(),
            })
        }
    }

    type Controller = PageController<GatedFactory, Vec<String>>;

    async fn wait_for(controller: &Controller, state: PageState) {
        for _ in 0..1000 {
            if controller.state() == state {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("page never reached {state:?}, stuck in {:?}", controller.state());
    }

    async fn ready_controller() -> Controller {
        let controller = Controller::new(GatedFactory::default(), Backend::Accelerated);
        controller.factory().gate.add_permits(1);
        controller.mount(Backend::Accelerated).await;
        assert_eq!(controller.state(), PageState::Ready);
        controller
    }

    #[tokio::test]
    async fn mount_loads_then_accepts_actions() {
        let controller = ready_controller().await;
        let status = controller.status();
        assert!(status.can_act);
        assert_eq!(status.progress, Some(1.0));
        assert_eq!(status.logs, ["50% | fetching weights"]);

        let out = controller
            .act(|runtime, scope| async move {
                scope.apply(|view: &mut Vec<String>| view.push(runtime.backend.to_string()));
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(out, Some(7));
        assert_eq!(controller.view(|v| v.clone()), ["accelerated"]);
        assert_eq!(controller.state(), PageState::Ready);
    }

    #[tokio::test]
    async fn actions_are_rejected_until_ready() {
        let controller = Controller::new(GatedFactory::default(), Backend::Fallback);
        let err = controller.act(|_, _| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, LabsError::NotReady));

        let loading = tokio::spawn({
            let controller = controller.clone();
            async move { controller.mount(Backend::Fallback).await }
        });
        wait_for(&controller, PageState::Loading).await;
        assert!(!controller.status().can_act);
        let err = controller.act(|_, _| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, LabsError::NotReady));

        controller.factory().gate.add_permits(1);
        loading.await.unwrap();
        assert_eq!(controller.state(), PageState::Ready);
    }

    #[tokio::test]
    async fn load_failure_is_reported_and_retried_on_backend_change() {
        let factory = GatedFactory {
            fail: true,
            ..Default::default()
        };
        factory.gate.add_permits(2);
        let controller = Controller::new(factory, Backend::Accelerated);
        controller.mount(Backend::Accelerated).await;

        let status = controller.status();
        assert_eq!(status.state, PageState::Failed("weights missing".to_string()));
        assert_eq!(status.error.as_deref(), Some("weights missing"));
        assert!(!status.can_act);

        controller.set_backend(Backend::Fallback).await;
        assert_eq!(controller.status().backend, Backend::Fallback);
        assert!(matches!(controller.state(), PageState::Failed(_)));
        assert_eq!(controller.factory().gate.available_permits(), 0);
    }

    #[tokio::test]
    async fn action_failure_returns_to_ready_with_inline_error() {
        let controller = ready_controller().await;
        let err = controller
            .act(|_, _| async { Err::<(), _>(LabsError::Action("inference exploded".into())) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "inference exploded");

        let status = controller.status();
        assert_eq!(status.state, PageState::Ready);
        assert_eq!(status.error.as_deref(), Some("inference exploded"));

        controller.act(|_, _| async { Ok(()) }).await.unwrap();
        assert_eq!(controller.status().error, None);
    }

    #[tokio::test]
    async fn backend_change_while_busy_reloads_and_drops_the_old_result() {
        let controller = ready_controller().await;
        let release_action = Arc::new(Semaphore::new(0));

        let action = tokio::spawn({
            let controller = controller.clone();
            let release = release_action.clone();
            async move {
                controller
                    .act(|_, scope| async move {
                        release.acquire().await.unwrap().forget();
                        scope.apply(|view: &mut Vec<String>| view.push("stale".into()));
                        Ok("old")
                    })
                    .await
            }
        });
        wait_for(&controller, PageState::Busy).await;

        let reload = tokio::spawn({
            let controller = controller.clone();
            async move { controller.set_backend(Backend::Fallback).await }
        });
        wait_for(&controller, PageState::Loading).await;
        assert_eq!(controller.factory().disposed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            controller.act(|_, _| async { Ok(()) }).await,
            Err(LabsError::NotReady)
        ));

        release_action.add_permits(1);
        assert_eq!(action.await.unwrap().unwrap(), None);
        assert_eq!(controller.state(), PageState::Loading);
        assert!(controller.view(|v| v.is_empty()));

        controller.factory().gate.add_permits(1);
        reload.await.unwrap();
        assert_eq!(controller.state(), PageState::Ready);
        assert_eq!(
            controller.with_runtime(|r| r.backend),
            Some(Backend::Fallback)
        );
    }

    #[tokio::test]
    async fn unmount_during_loading_ignores_late_runtime() {
        let controller = Controller::new(GatedFactory::default(), Backend::Accelerated);
        let mount = tokio::spawn({
            let controller = controller.clone();
            async move { controller.mount(Backend::Accelerated).await }
        });
        wait_for(&controller, PageState::Loading).await;

        controller.unmount();
        controller.factory().gate.add_permits(1);
        mount.await.unwrap();

        let status = controller.status();
        assert_eq!(status.state, PageState::Idle);
        assert!(!status.mounted);
        assert!(status.logs.is_empty());
        assert!(controller.with_runtime(|_| ()).is_none());
        // The late instance was released instead of being installed.
        assert_eq!(controller.factory().disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmount_during_busy_ignores_late_result_and_error() {
        for fails in [false, true] {
            let controller = ready_controller().await;
            let release = Arc::new(Semaphore::new(0));
            let action = tokio::spawn({
                let controller = controller.clone();
                let release = release.clone();
                async move {
                    controller
                        .act(|_, scope| async move {
                            release.acquire().await.unwrap().forget();
                            let applied = scope.apply(|view: &mut Vec<String>| view.push("late".into()));
                            assert!(applied.is_none());
                            assert!(!scope.log("late log"));
                            if fails {
                                Err(LabsError::Action("late failure".into()))
                            } else {
                                Ok(())
                            }
                        })
                        .await
                }
            });
            wait_for(&controller, PageState::Busy).await;

            controller.unmount();
            release.add_permits(1);
            assert!(matches!(action.await.unwrap(), Ok(None)));

            let status = controller.status();
            assert_eq!(status.state, PageState::Idle);
            assert_eq!(status.error, None);
            assert!(status.logs.is_empty());
            assert!(controller.view(|v| v.is_empty()));
        }
    }

    #[tokio::test]
    async fn same_backend_does_not_reload() {
        let controller = ready_controller().await;
        tokio::time::timeout(
            Duration::from_millis(200),
            controller.set_backend(Backend::Accelerated),
        )
        .await
        .expect("no reload expected");
        assert_eq!(controller.state(), PageState::Ready);
        assert_eq!(controller.factory().disposed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn edit_view_is_rejected_while_busy() {
        let controller = ready_controller().await;
        let release = Arc::new(Semaphore::new(0));
        let action = tokio::spawn({
            let controller = controller.clone();
            let release = release.clone();
            async move {
                controller
                    .act(|_, _| async move {
                        release.acquire().await.unwrap().forget();
                        Ok(())
                    })
                    .await
            }
        });
        wait_for(&controller, PageState::Busy).await;
        assert!(matches!(
            controller.edit_view(|view, _| view.clear()),
            Err(LabsError::NotReady)
        ));
        release.add_permits(1);
        action.await.unwrap().unwrap();
        assert!(controller.edit_view(|view, _| view.clear()).is_ok());
    }
}
