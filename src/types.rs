use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the static sample corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentItem {
    pub id: &'static str,
    pub title: &'static str,
    pub content: &'static str,
}

impl DocumentItem {
    /// Text handed to the embedding runtime for this document.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.title, self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub id: String,
    pub score: f32,
}

/// A ranked hit resolved back to its corpus document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: DocumentItem,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Execution provider the session actually ran on.
    pub backend: String,
    pub elapsed_ms: f64,
    pub outputs_on_device: bool,
}

/// The subset of adapter limits shown on the capabilities page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterLimits {
    pub max_compute_workgroup_size_x: u32,
    pub max_compute_workgroup_size_y: u32,
    pub max_compute_workgroup_size_z: u32,
    pub max_compute_workgroup_storage_size: u32,
    pub max_storage_buffer_binding_size: u64,
}

/// Host-reported adapter snapshot. Fields are passed through as reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterDetails {
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub architecture: Option<String>,
    pub description: Option<String>,
    pub limits: AdapterLimits,
    pub features: Vec<String>,
}

impl AdapterDetails {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// One-line description used in headings.
    pub fn summary(&self) -> String {
        let title = self
            .description
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("Unknown adapter");
        format!(
            "{title} (vendor {}, architecture {})",
            self.vendor.as_deref().unwrap_or("N/A"),
            self.architecture.as_deref().unwrap_or("N/A"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_description_then_name() {
        let mut details = AdapterDetails {
            name: Some("llvmpipe".to_string()),
            ..Default::default()
        };
        assert_eq!(
            details.summary(),
            "llvmpipe (vendor N/A, architecture N/A)"
        );

        details.description = Some("Mesa 24.0".to_string());
        details.vendor = Some("0x10005".to_string());
        assert_eq!(
            details.summary(),
            "Mesa 24.0 (vendor 0x10005, architecture N/A)"
        );
    }

    #[test]
    fn chat_messages_get_unique_ids() {
        let a = ChatMessage::user("hi");
        let b = ChatMessage::user("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.role, ChatRole::User);
    }
}
