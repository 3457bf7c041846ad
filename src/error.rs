use serde::Serialize;

use crate::backend::Backend;

/// Everything a page can surface to the user. Each variant renders as the
/// text shown inline next to the control that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum LabsError {
    /// The GPU API is not exposed by the host.
    #[error("{0}")]
    CapabilityAbsent(String),
    /// The API exists but no adapter handle could be obtained.
    #[error("{0}")]
    AdapterUnavailable(String),
    /// Model fetch or runtime initialisation failed.
    #[error("{0}")]
    RuntimeLoad(String),
    /// Inference, generation, or a network call made by an action failed.
    #[error("{0}")]
    Action(String),
    #[error("Device lost: {0}")]
    DeviceLost(String),
    #[error("{context}: {reason}")]
    Fetch { context: String, reason: String },
    #[error("page is not ready")]
    NotReady,
    #[error("backend {0} is unavailable on this host")]
    BackendUnavailable(Backend),
}

impl LabsError {
    /// Flatten an adapter error chain into a load failure.
    pub fn runtime_load(err: anyhow::Error) -> Self {
        LabsError::RuntimeLoad(format!("{err:#}"))
    }

    /// Flatten an adapter error chain into an action failure.
    pub fn action(err: anyhow::Error) -> Self {
        LabsError::Action(format!("{err:#}"))
    }
}

impl Serialize for LabsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_chains_are_flattened_into_one_line() {
        let err = anyhow::anyhow!("connection refused").context("failed to fetch model.onnx");
        assert_eq!(
            LabsError::runtime_load(err).to_string(),
            "failed to fetch model.onnx: connection refused"
        );
    }

    #[test]
    fn serializes_as_display_text() {
        let err = LabsError::Fetch {
            context: "Failed to fetch ONNX model".to_string(),
            reason: "404 Not Found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"Failed to fetch ONNX model: 404 Not Found\""
        );
    }
}
