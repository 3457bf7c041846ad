use async_trait::async_trait;

use crate::backend::Backend;
use crate::page::{PageState, PageStatus};
use crate::pages::Lifecycle;
use crate::routes::{DemoTile, DEMO_TILES};

/// Static landing page.
pub struct OverviewPage;

impl OverviewPage {
    pub fn tiles(&self) -> &'static [DemoTile] {
        &DEMO_TILES
    }
}

#[async_trait]
impl Lifecycle for OverviewPage {
    async fn mount(&self, _backend: Backend) {}

    fn unmount(&self) {}

    async fn set_backend(&self, _backend: Backend) {}

    fn follows_backend(&self) -> bool {
        false
    }

    fn status(&self) -> PageStatus {
        PageStatus {
            state: PageState::Ready,
            backend: Backend::Fallback,
            mounted: true,
            error: None,
            progress: None,
            logs: Vec::new(),
            can_act: false,
            notice: None,
        }
    }
}
