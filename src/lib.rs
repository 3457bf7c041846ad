pub mod backend;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod fetch;
pub mod gpu;
pub mod index;
pub mod llm;
pub mod onnx;
pub mod page;
pub mod pages;
pub mod routes;
pub mod runtime;
pub mod shell;
pub mod types;

use std::sync::Arc;

use crate::backend::BackendSelector;
use crate::config::LabsConfig;
use crate::embeddings::FastembedFactory;
use crate::fetch::{HttpModelSource, ModelCache};
use crate::gpu::{CapabilityProbe, WgpuProbe};
use crate::llm::{OpenAiChatFactory, OpenAiConfig};
use crate::onnx::{OrtClassifierFactory, OrtEngineFactory};
use crate::pages::{
    BenchmarkPage, CapabilitiesPage, ChatPage, ClassifierPage, Lifecycle, OverviewPage, SearchPage,
};
use crate::routes::Route;
use crate::shell::Shell;

pub type Classifier = ClassifierPage<OrtClassifierFactory>;
pub type Search = SearchPage<FastembedFactory>;
pub type Chat = ChatPage<OpenAiChatFactory>;
pub type Benchmark = BenchmarkPage<OrtEngineFactory, HttpModelSource>;
pub type Capabilities = CapabilitiesPage<WgpuProbe>;

/// All pages plus the shell that mounts them. The shell holds the same pages
/// behind [`Lifecycle`]; the typed handles are for page actions.
pub struct AppState {
    pub config: LabsConfig,
    pub shell: Shell,
    pub overview: Arc<OverviewPage>,
    pub classifier: Arc<Classifier>,
    pub search: Arc<Search>,
    pub chat: Arc<Chat>,
    pub benchmark: Arc<Benchmark>,
    pub capabilities: Arc<Capabilities>,
}

impl AppState {
    /// Probe for a GPU once, pick the default backend, and wire every page to
    /// its runtime. Nothing is loaded until a page is mounted.
    pub fn new(config: LabsConfig, cross_origin_isolated: bool) -> Self {
        let probe = Arc::new(WgpuProbe::new());
        let selector = BackendSelector::new(probe.api_present());
        let backend = selector.current();
        let client = reqwest::Client::new();
        let cache = ModelCache::new(config.cache_dir.join("models"));

        let overview = Arc::new(OverviewPage);
        let classifier = Arc::new(ClassifierPage::new(
            OrtClassifierFactory::new(client.clone(), cache, config.classifier_model.clone()),
            backend,
            config.sample_image_url.clone(),
        ));
        let search = Arc::new(SearchPage::new(
            FastembedFactory::new(config.cache_dir.join("fastembed")),
            backend,
        ));
        let chat = Arc::new(ChatPage::new(
            OpenAiChatFactory::new(
                client.clone(),
                OpenAiConfig {
                    base_url: config.chat_base_url.clone(),
                    model: config.chat_model.clone(),
                    api_key: config.chat_api_key.clone(),
                },
            ),
            backend,
            config.chat_model.clone(),
        ));
        let benchmark = Arc::new(BenchmarkPage::new(
            OrtEngineFactory::new(probe.clone()),
            backend,
            HttpModelSource::new(client),
            config.benchmark_model_url.clone(),
        ));
        let capabilities = Arc::new(CapabilitiesPage::new(probe, cross_origin_isolated));

        let shell = Shell::new(
            selector,
            [
                (Route::Overview, overview.clone() as Arc<dyn Lifecycle>),
                (Route::ImageClassifier, classifier.clone() as Arc<dyn Lifecycle>),
                (Route::Embeddings, search.clone() as Arc<dyn Lifecycle>),
                (Route::Chat, chat.clone() as Arc<dyn Lifecycle>),
                (Route::Onnx, benchmark.clone() as Arc<dyn Lifecycle>),
                (Route::Capabilities, capabilities.clone() as Arc<dyn Lifecycle>),
            ],
        );

        Self {
            config,
            shell,
            overview,
            classifier,
            search,
            chat,
            benchmark,
            capabilities,
        }
    }
}

/// Install the global subscriber. Only WARN and above in release builds.
pub fn init_tracing() {
    #[cfg(debug_assertions)]
    let _ = tracing_subscriber::fmt().try_init();
    #[cfg(not(debug_assertions))]
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    init_tracing();
    tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![
            commands::list_routes,
            commands::navigate,
            commands::backend_options,
            commands::select_backend,
            commands::page_status,
            commands::probe_capabilities,
            commands::overview_tiles,
            commands::classify_image,
            commands::search_documents,
            commands::send_chat,
            commands::reset_chat,
            commands::run_benchmark,
            commands::open_external_url,
        ])
        .setup(|app| {
            // Set the window icon explicitly so the taskbar shows our icon on Linux.
            if let Some(window) = app.get_webview_window("main") {
                if let Some(icon) = app.default_window_icon() {
                    let _ = window.set_icon(icon.clone()).ok();
                }
            }
            let config_path = std::env::var_os("WEBGPU_LABS_CONFIG").map(std::path::PathBuf::from);
            let config = LabsConfig::load(config_path.as_deref())?;
            // The webview is served with the configured COOP/COEP headers.
            let isolated = config.cross_origin_isolated();
            app.manage(Arc::new(AppState::new(config, isolated)));
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
