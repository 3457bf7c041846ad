use std::sync::Arc;

use serde::Serialize;
use tauri::Emitter;

use crate::backend::{Backend, BackendOption};
use crate::error::LabsError;
use crate::gpu::CapabilityReport;
use crate::page::PageStatus;
use crate::routes::{DemoTile, NavItem, Route};
use crate::types::{BenchmarkResult, ChatMessage, ClassificationResult, SearchResult};
use crate::AppState;

type LabsState<'a> = tauri::State<'a, Arc<AppState>>;

// ─── Navigation ────────────────────────────────────────────────────────────────

#[tauri::command]
pub fn list_routes(state: LabsState<'_>) -> Vec<NavItem> {
    state.shell.nav_items()
}

/// Switch pages. Resolves once the new page's runtime has loaded (or failed);
/// the frontend polls `page_status` meanwhile.
#[tauri::command]
pub async fn navigate(path: String, state: LabsState<'_>) -> Result<(), String> {
    let route: Route = path.parse()?;
    state.shell.navigate(route).await;
    Ok(())
}

#[tauri::command]
pub fn page_status(path: String, state: LabsState<'_>) -> Result<PageStatus, String> {
    let route: Route = path.parse()?;
    state
        .shell
        .status(route)
        .ok_or_else(|| format!("no page at {route}"))
}

#[tauri::command]
pub fn overview_tiles(state: LabsState<'_>) -> Vec<DemoTile> {
    state.overview.tiles().to_vec()
}

// ─── Backend ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BackendChoice {
    pub current: Backend,
    pub options: Vec<BackendOption>,
}

#[tauri::command]
pub fn backend_options(state: LabsState<'_>) -> BackendChoice {
    BackendChoice {
        current: state.shell.backend(),
        options: state.shell.backend_options(),
    }
}

/// Returns whether the backend changed. A change reloads the active page.
#[tauri::command]
pub async fn select_backend(backend: Backend, state: LabsState<'_>) -> Result<bool, LabsError> {
    state.shell.select_backend(backend).await
}

// ─── Page actions ──────────────────────────────────────────────────────────────

#[tauri::command]
pub fn probe_capabilities(state: LabsState<'_>) -> Option<CapabilityReport> {
    state.capabilities.report()
}

#[tauri::command]
pub async fn classify_image(
    image: String,
    state: LabsState<'_>,
) -> Result<Option<Vec<ClassificationResult>>, LabsError> {
    state.classifier.classify(&image).await
}

#[tauri::command]
pub async fn search_documents(
    query: String,
    state: LabsState<'_>,
) -> Result<Option<Vec<SearchResult>>, LabsError> {
    state.search.search(&query).await
}

/// Streams the reply as `chat-stream` events and returns the final message.
#[tauri::command]
pub async fn send_chat(
    message: String,
    state: LabsState<'_>,
    app: tauri::AppHandle,
) -> Result<Option<ChatMessage>, LabsError> {
    state
        .chat
        .send(&message, move |event| {
            let _ = app.emit("chat-stream", event);
        })
        .await
}

#[tauri::command]
pub fn reset_chat(state: LabsState<'_>) -> Result<(), LabsError> {
    state.chat.reset()
}

#[tauri::command]
pub async fn run_benchmark(state: LabsState<'_>) -> Result<Option<BenchmarkResult>, LabsError> {
    state.benchmark.run().await
}

/// Open an http(s) link in the system browser.
#[tauri::command]
pub async fn open_external_url(url: String) -> Result<(), String> {
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err("invalid_url".to_string());
    }
    open::that_detached(url).map_err(|e| e.to_string())
}
