use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::LabsError;
use crate::gpu::{probe_report, CapabilityProbe, CapabilityReport};
use crate::page::{PageController, PageStatus};
use crate::pages::Lifecycle;
use crate::runtime::{LoadProgress, Runtime, RuntimeFactory};

impl Runtime for CapabilityReport {}

/// "Loading" this page is one probe.
pub struct ProbeFactory<P: ?Sized> {
    probe: Arc<P>,
    cross_origin_isolated: bool,
}

impl<P: CapabilityProbe + ?Sized> ProbeFactory<P> {
    pub fn new(probe: Arc<P>, cross_origin_isolated: bool) -> Self {
        Self {
            probe,
            cross_origin_isolated,
        }
    }
}

#[async_trait]
impl<P: CapabilityProbe + ?Sized> RuntimeFactory for ProbeFactory<P> {
    type Runtime = CapabilityReport;

    async fn load(&self, _backend: Backend, progress: &LoadProgress) -> Result<CapabilityReport, LabsError> {
        let report = probe_report(self.probe.as_ref(), self.cross_origin_isolated).await;
        progress.report(1.0, "Probe complete");
        Ok(report)
    }
}

/// Probes once per mount; the report is read-only.
pub struct CapabilitiesPage<P: CapabilityProbe + ?Sized> {
    controller: PageController<ProbeFactory<P>, ()>,
}

impl<P: CapabilityProbe + ?Sized> CapabilitiesPage<P> {
    pub fn new(probe: Arc<P>, cross_origin_isolated: bool) -> Self {
        Self {
            controller: PageController::new(
                ProbeFactory::new(probe, cross_origin_isolated),
                Backend::Fallback,
            ),
        }
    }

    /// The report of the current mount, once the probe has finished.
    pub fn report(&self) -> Option<CapabilityReport> {
        self.controller.with_runtime(CapabilityReport::clone)
    }
}

#[async_trait]
impl<P: CapabilityProbe + ?Sized> Lifecycle for CapabilitiesPage<P> {
    async fn mount(&self, backend: Backend) {
        self.controller.mount(backend).await;
    }

    fn unmount(&self) {
        self.controller.unmount();
    }

    async fn set_backend(&self, _backend: Backend) {}

    fn follows_backend(&self) -> bool {
        false
    }

    fn status(&self) -> PageStatus {
        let mut status = self.controller.status();
        status.can_act = false;
        status
    }
}
