use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::LabsError;

/// Execution mode a runtime is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// GPU execution.
    Accelerated,
    /// Portable CPU execution.
    Fallback,
}

impl Backend {
    /// Human-readable name shown in the backend picker.
    pub fn label(self) -> &'static str {
        match self {
            Backend::Accelerated => "GPU",
            Backend::Fallback => "CPU",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Accelerated => "accelerated",
            Backend::Fallback => "fallback",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accelerated" | "gpu" | "webgpu" => Ok(Backend::Accelerated),
            "fallback" | "cpu" | "wasm" => Ok(Backend::Fallback),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// One entry of the backend drop-down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendOption {
    pub value: Backend,
    pub label: String,
    pub disabled: bool,
}

/// Shared backend choice. Pages read the current value when they mount;
/// observers learn about changes through [`BackendSelector::subscribe`].
pub struct BackendSelector {
    accelerated_available: bool,
    tx: watch::Sender<Backend>,
}

impl BackendSelector {
    /// Defaults to the accelerated backend iff the GPU API was detected.
    pub fn new(accelerated_available: bool) -> Self {
        let initial = if accelerated_available {
            Backend::Accelerated
        } else {
            Backend::Fallback
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            accelerated_available,
            tx,
        }
    }

    /// The backend pages should load on right now.
    pub fn current(&self) -> Backend {
        *self.tx.borrow()
    }

    pub fn accelerated_available(&self) -> bool {
        self.accelerated_available
    }

    /// Picker entries; the accelerated one is disabled when no GPU was found.
    pub fn options(&self) -> Vec<BackendOption> {
        vec![
            BackendOption {
                value: Backend::Accelerated,
                label: if self.accelerated_available {
                    "GPU".to_string()
                } else {
                    "GPU (unavailable)".to_string()
                },
                disabled: !self.accelerated_available,
            },
            BackendOption {
                value: Backend::Fallback,
                label: "CPU fallback".to_string(),
                disabled: false,
            },
        ]
    }

    /// Set the backend. Returns whether the value changed.
    pub fn select(&self, backend: Backend) -> Result<bool, LabsError> {
        if backend == Backend::Accelerated && !self.accelerated_available {
            return Err(LabsError::BackendUnavailable(backend));
        }
        let changed = self.tx.send_if_modified(|current| {
            if *current == backend {
                false
            } else {
                *current = backend;
                true
            }
        });
        if changed {
            tracing::info!(%backend, "backend changed");
        }
        Ok(changed)
    }

    /// Watch for backend changes.
    pub fn subscribe(&self) -> watch::Receiver<Backend> {
        self.tx.subscribe()
    }
}
