use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gpu::isolated_by_headers;

pub const ENV_PREFIX: &str = "WEBGPU_LABS_";

pub const DEFAULT_CLASSIFIER_MODEL: &str = "onnx-community/mobilenetv4_conv_small.e2400_r224_in1k";
pub const DEFAULT_SAMPLE_IMAGE: &str =
    "https://huggingface.co/datasets/Xenova/transformers.js-docs/resolve/main/tiger.jpg";
pub const DEFAULT_BENCHMARK_MODEL: &str = "https://huggingface.co/onnx-community/mobilenetv4_conv_small.e2400_r224_in1k/resolve/main/onnx/model.onnx";
pub const DEFAULT_CHAT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_CHAT_MODEL: &str = "smollm2:1.7b";

/// Model ids, endpoints and host settings. Every field has a default, so an
/// empty or partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabsConfig {
    /// Where downloaded model files are kept between runs.
    pub cache_dir: PathBuf,
    /// Hugging Face repository holding `onnx/model.onnx` and `config.json`.
    pub classifier_model: String,
    pub sample_image_url: String,
    /// Base URL of an OpenAI-compatible server, including `/v1`.
    pub chat_base_url: String,
    pub chat_model: String,
    pub chat_api_key: Option<String>,
    pub benchmark_model_url: String,
    /// `Cross-Origin-Opener-Policy` the pages are served with.
    pub opener_policy: Option<String>,
    /// `Cross-Origin-Embedder-Policy` the pages are served with.
    pub embedder_policy: Option<String>,
}

impl Default for LabsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            sample_image_url: DEFAULT_SAMPLE_IMAGE.to_string(),
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            chat_api_key: None,
            benchmark_model_url: DEFAULT_BENCHMARK_MODEL.to_string(),
            opener_policy: Some("same-origin".to_string()),
            embedder_policy: Some("require-corp".to_string()),
        }
    }
}

impl LabsConfig {
    /// Read `path` if given, then apply `WEBGPU_LABS_*` overrides from the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Apply overrides looked up by full variable name. Empty values clear
    /// optional fields and are ignored for required ones.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(dir) = var("CACHE_DIR").filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        let required = [
            ("CLASSIFIER_MODEL", &mut self.classifier_model),
            ("SAMPLE_IMAGE_URL", &mut self.sample_image_url),
            ("CHAT_BASE_URL", &mut self.chat_base_url),
            ("CHAT_MODEL", &mut self.chat_model),
            ("BENCHMARK_MODEL_URL", &mut self.benchmark_model_url),
        ];
        for (name, field) in required {
            if let Some(value) = var(name).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
        let optional = [
            ("CHAT_API_KEY", &mut self.chat_api_key),
            ("OPENER_POLICY", &mut self.opener_policy),
            ("EMBEDDER_POLICY", &mut self.embedder_policy),
        ];
        for (name, field) in optional {
            if let Some(value) = var(name) {
                *field = (!value.is_empty()).then_some(value);
            }
        }
    }

    pub fn cross_origin_isolated(&self) -> bool {
        isolated_by_headers(self.opener_policy.as_deref(), self.embedder_policy.as_deref())
    }
}

fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("webgpu-labs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labs.json");
        std::fs::write(&path, r#"{ "chat_model": "llama3.2:1b" }"#).unwrap();

        let config = LabsConfig::from_file(&path).unwrap();
        assert_eq!(config.chat_model, "llama3.2:1b");
        assert_eq!(config.classifier_model, DEFAULT_CLASSIFIER_MODEL);
        assert_eq!(config.chat_base_url, DEFAULT_CHAT_BASE_URL);
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = LabsConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<String, String> = [
            ("WEBGPU_LABS_CHAT_BASE_URL", "http://127.0.0.1:8080/v1"),
            ("WEBGPU_LABS_CHAT_API_KEY", "secret"),
            ("WEBGPU_LABS_EMBEDDER_POLICY", ""),
            ("WEBGPU_LABS_CHAT_MODEL", ""),
            ("WEBGPU_LABS_CACHE_DIR", "/tmp/labs-cache"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = LabsConfig::default();
        config.apply_overrides(|key| env.get(key).cloned());

        assert_eq!(config.chat_base_url, "http://127.0.0.1:8080/v1");
        assert_eq!(config.chat_api_key.as_deref(), Some("secret"));
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.embedder_policy, None);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/labs-cache"));
        assert!(!config.cross_origin_isolated());
    }

    #[test]
    fn default_headers_isolate() {
        assert!(LabsConfig::default().cross_origin_isolated());
    }
}
