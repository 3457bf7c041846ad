//! The demo pages. Each wraps a [`PageController`](crate::page::PageController)
//! around one runtime and adds the page's own computation.

pub mod benchmark;
pub mod capabilities;
pub mod chat;
pub mod classifier;
pub mod overview;
pub mod search;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::page::PageStatus;

pub use benchmark::BenchmarkPage;
pub use capabilities::CapabilitiesPage;
pub use chat::{ChatPage, DEFAULT_PROMPT};
pub use classifier::ClassifierPage;
pub use overview::OverviewPage;
pub use search::{SearchPage, DEFAULT_QUERY};

/// What the navigation shell needs from a page.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Mount and load for `backend`. Resolves once the load settles.
    async fn mount(&self, backend: Backend);

    fn unmount(&self);

    /// Reload for a new backend. Pages that ignore the backend do nothing.
    async fn set_backend(&self, backend: Backend);

    fn follows_backend(&self) -> bool {
        true
    }

    fn status(&self) -> PageStatus;
}
