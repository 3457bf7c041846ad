//! GPU capability probing and accelerator preparation over wgpu.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::LabsError;
use crate::types::{AdapterDetails, AdapterLimits};

pub const API_MISSING: &str =
    "GPU API is missing. No compute-capable adapter is exposed in this context.";
pub const ADAPTER_MISSING: &str =
    "Adapter request returned nothing. Check GPU drivers and try again.";

/// Optional features reported on the capabilities page, by their WebGPU names.
const REPORTED_FEATURES: &[(wgpu::Features, &str)] = &[
    (wgpu::Features::DEPTH_CLIP_CONTROL, "depth-clip-control"),
    (wgpu::Features::DEPTH32FLOAT_STENCIL8, "depth32float-stencil8"),
    (wgpu::Features::TEXTURE_COMPRESSION_BC, "texture-compression-bc"),
    (wgpu::Features::TEXTURE_COMPRESSION_ETC2, "texture-compression-etc2"),
    (wgpu::Features::TEXTURE_COMPRESSION_ASTC, "texture-compression-astc"),
    (wgpu::Features::TIMESTAMP_QUERY, "timestamp-query"),
    (wgpu::Features::INDIRECT_FIRST_INSTANCE, "indirect-first-instance"),
    (wgpu::Features::SHADER_F16, "shader-f16"),
    (wgpu::Features::RG11B10UFLOAT_RENDERABLE, "rg11b10ufloat-renderable"),
    (wgpu::Features::BGRA8UNORM_STORAGE, "bgra8unorm-storage"),
    (wgpu::Features::FLOAT32_FILTERABLE, "float32-filterable"),
];

/// What the capabilities page renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub api_present: bool,
    pub cross_origin_isolated: bool,
    pub adapter: Option<AdapterDetails>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait CapabilityProbe: Send + Sync + 'static {
    /// Whether the host exposes any GPU adapter at all.
    fn api_present(&self) -> bool;

    /// Request the high-performance adapter and read its details.
    async fn adapter_details(&self) -> Result<AdapterDetails, LabsError>;
}

/// Run a single probe. Failures land in the report's error list.
pub async fn probe_report<P: CapabilityProbe + ?Sized>(probe: &P, cross_origin_isolated: bool) -> CapabilityReport {
    let mut report = CapabilityReport {
        api_present: probe.api_present(),
        cross_origin_isolated,
        ..Default::default()
    };
    if !report.api_present {
        report.errors.push(API_MISSING.to_string());
        return report;
    }
    match probe.adapter_details().await {
        Ok(details) => report.adapter = Some(details),
        Err(err) => report.errors.push(err.to_string()),
    }
    report
}

/// Isolation as a browser would compute it from the document's response headers.
pub fn isolated_by_headers(opener_policy: Option<&str>, embedder_policy: Option<&str>) -> bool {
    let opener = opener_policy.map(str::trim);
    let embedder = embedder_policy.map(str::trim);
    opener == Some("same-origin") && matches!(embedder, Some("require-corp" | "credentialless"))
}

pub struct WgpuProbe {
    instance: wgpu::Instance,
}

impl Default for WgpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuProbe {
    pub fn new() -> Self {
        Self {
            instance: wgpu::Instance::default(),
        }
    }

    async fn request_adapter(&self) -> Result<wgpu::Adapter, LabsError> {
        if !self.api_present() {
            return Err(LabsError::CapabilityAbsent(API_MISSING.to_string()));
        }
        self.instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| LabsError::AdapterUnavailable(ADAPTER_MISSING.to_string()))
    }
}

#[async_trait]
impl CapabilityProbe for WgpuProbe {
    fn api_present(&self) -> bool {
        !self.instance.enumerate_adapters(wgpu::Backends::all()).is_empty()
    }

    async fn adapter_details(&self) -> Result<AdapterDetails, LabsError> {
        let adapter = self.request_adapter().await?;
        Ok(adapter_details(&adapter))
    }
}

fn adapter_details(adapter: &wgpu::Adapter) -> AdapterDetails {
    let info = adapter.get_info();
    let limits = adapter.limits();
    let features = adapter.features();
    debug!(name = %info.name, backend = ?info.backend, "adapter found");

    let description = [info.driver.as_str(), info.driver_info.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    AdapterDetails {
        name: non_empty(info.name),
        vendor: (info.vendor != 0).then(|| format!("0x{:04x}", info.vendor)),
        architecture: Some(format!("{:?}", info.device_type)),
        description: non_empty(description),
        limits: AdapterLimits {
            max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
            max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
            max_compute_workgroup_size_z: limits.max_compute_workgroup_size_z,
            max_compute_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
            max_storage_buffer_binding_size: u64::from(limits.max_storage_buffer_binding_size),
        },
        features: feature_names(features),
    }
}

fn feature_names(features: wgpu::Features) -> Vec<String> {
    REPORTED_FEATURES
        .iter()
        .filter(|(flag, _)| features.contains(*flag))
        .map(|(_, name)| name.to_string())
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// A device opened for the benchmark page. The device stays alive for as
/// long as the page's runtime does.
pub struct Accelerator {
    details: AdapterDetails,
    shader_f16: bool,
    device: wgpu::Device,
    _queue: wgpu::Queue,
    lost: watch::Receiver<Option<String>>,
}

impl Accelerator {
    /// Request the adapter, enable `shader-f16` when offered, and open a
    /// device that reports loss into [`Accelerator::device_lost`].
    pub async fn prepare(probe: &WgpuProbe) -> Result<Self, LabsError> {
        let adapter = probe.request_adapter().await?;
        let details = adapter_details(&adapter);
        let shader_f16 = adapter.features().contains(wgpu::Features::SHADER_F16);
        let required_features = if shader_f16 {
            wgpu::Features::SHADER_F16
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("webgpu-labs benchmark"),
                    required_features,
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| LabsError::RuntimeLoad(format!("Failed to open GPU device: {e}")))?;

        let (lost_tx, lost) = watch::channel(None);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, "GPU device lost: {message}");
            let text = if message.is_empty() {
                format!("{reason:?}")
            } else {
                message
            };
            lost_tx.send_replace(Some(text));
        });

        info!(adapter = %details.summary(), shader_f16, "accelerator ready");
        Ok(Self {
            details,
            shader_f16,
            device,
            _queue: queue,
            lost,
        })
    }

    pub fn details(&self) -> &AdapterDetails {
        &self.details
    }

    pub fn shader_f16(&self) -> bool {
        self.shader_f16
    }

    pub fn device_lost(&self) -> Option<String> {
        self.lost.borrow().clone()
    }

    pub fn destroy(&self) {
        self.device.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        present: bool,
        adapter: Option<AdapterDetails>,
    }

    #[async_trait]
    impl CapabilityProbe for FixedProbe {
        fn api_present(&self) -> bool {
            self.present
        }

        async fn adapter_details(&self) -> Result<AdapterDetails, LabsError> {
            self.adapter
                .clone()
                .ok_or_else(|| LabsError::AdapterUnavailable(ADAPTER_MISSING.to_string()))
        }
    }

    #[tokio::test]
    async fn missing_api_is_reported_without_requesting_an_adapter() {
        let probe = FixedProbe {
            present: false,
            adapter: Some(AdapterDetails::default()),
        };
        let report = probe_report(&probe, true).await;
        assert!(!report.api_present);
        assert!(report.cross_origin_isolated);
        assert_eq!(report.adapter, None);
        assert_eq!(report.errors, [API_MISSING]);
    }

    #[tokio::test]
    async fn missing_adapter_is_reported() {
        let probe = FixedProbe {
            present: true,
            adapter: None,
        };
        let report = probe_report(&probe, false).await;
        assert!(report.api_present);
        assert_eq!(report.errors, [ADAPTER_MISSING]);
    }

    #[tokio::test]
    async fn adapter_details_pass_through() {
        let details = AdapterDetails {
            name: Some("Test GPU".to_string()),
            features: vec!["shader-f16".to_string()],
            ..Default::default()
        };
        let probe = FixedProbe {
            present: true,
            adapter: Some(details.clone()),
        };
        let report = probe_report(&probe, false).await;
        assert!(report.errors.is_empty());
        assert_eq!(report.adapter, Some(details));
    }

    #[test]
    fn feature_names_use_webgpu_spelling() {
        let names = feature_names(wgpu::Features::SHADER_F16 | wgpu::Features::TIMESTAMP_QUERY);
        assert_eq!(names, ["timestamp-query", "shader-f16"]);
        assert!(feature_names(wgpu::Features::empty()).is_empty());
    }

    #[test]
    fn isolation_needs_both_headers() {
        assert!(isolated_by_headers(Some("same-origin"), Some("require-corp")));
        assert!(isolated_by_headers(Some(" same-origin "), Some("credentialless")));
        assert!(!isolated_by_headers(Some("same-origin"), None));
        assert!(!isolated_by_headers(Some("unsafe-none"), Some("require-corp")));
        assert!(!isolated_by_headers(None, None));
    }
}
