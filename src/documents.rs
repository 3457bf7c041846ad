use crate::types::DocumentItem;

/// Corpus searched by the embeddings page. Embedded once per runtime load.
pub const SAMPLE_DOCUMENTS: &[DocumentItem] = &[
    DocumentItem {
        id: "webgpu",
        title: "WebGPU arrives",
        content: "WebGPU now ships across Chromium, Firefox Windows, and Safari 26. \
                  Native engines such as wgpu expose the same API on Vulkan, Metal, and DX12, \
                  unlocking compute shaders, storage buffers, and real GPU acceleration.",
    },
    DocumentItem {
        id: "transformers",
        title: "Ready-made pipelines",
        content: "Pipelines for image classification, embeddings, and speech recognition \
                  load a pretrained model and run it with a single device flag.",
    },
    DocumentItem {
        id: "onnx",
        title: "ONNX Runtime sessions",
        content: "ONNX Runtime offers GPU execution providers with IO binding \
                  to keep tensors on the device between runs.",
    },
    DocumentItem {
        id: "webllm",
        title: "Local chat models",
        content: "Quantized language models run on local hardware behind an \
                  OpenAI-compatible interface with streaming responses.",
    },
    DocumentItem {
        id: "isolation",
        title: "Cross-origin isolation",
        content: "When you need WASM threads as a fallback, enable COOP/COEP headers and \
                  ensure third-party assets are CORP-compliant to unlock SharedArrayBuffer.",
    },
];

pub fn find_document(id: &str) -> Option<&'static DocumentItem> {
    SAMPLE_DOCUMENTS.iter().find(|doc| doc.id == id)
}
