use std::io::{stdout, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use webgpu_labs::backend::Backend;
use webgpu_labs::config::LabsConfig;
use webgpu_labs::page::PageState;
use webgpu_labs::pages::{DEFAULT_PROMPT, DEFAULT_QUERY};
use webgpu_labs::routes::Route;
use webgpu_labs::AppState;

#[derive(Parser)]
#[command(author, version, about = "Run the WebGPU Labs demos from a terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend to load the page on (accelerated or fallback)
    #[arg(long, global = true)]
    backend: Option<Backend>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the navigation entries
    Routes,
    /// Probe the GPU and print the capability report
    Capabilities,
    /// Classify an image URL or local file
    Classify {
        /// Image URL or path; the sample image when omitted
        image: Option<String>,
    },
    /// Semantic search over the sample documents
    Search {
        query: Option<String>,
    },
    /// Stream one chat reply
    Chat {
        /// The message to send
        message: Option<String>,
    },
    /// Time ONNX inference runs
    Bench {
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
}

/// Navigate to `route` and fail if its runtime did not load.
async fn open(state: &AppState, route: Route) -> Result<()> {
    state.shell.navigate(route).await;
    let Some(status) = state.shell.status(route) else {
        return Ok(());
    };
    for line in &status.logs {
        tracing::debug!("{line}");
    }
    if let PageState::Failed(message) = status.state {
        bail!("{} failed to load: {message}", route.label());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Commands::Routes = cli.command {
        for item in webgpu_labs::routes::nav_items() {
            println!("{:<20} {}", item.path, item.label);
        }
        return Ok(());
    }

    let config = LabsConfig::load(cli.config.as_deref())?;
    let isolated = config.cross_origin_isolated();
    let state = AppState::new(config, isolated);

    if let Some(backend) = cli.backend {
        state.shell.select_backend(backend).await?;
    }
    println!("Backend: {}", state.shell.backend().label());

    match cli.command {
        Commands::Routes => {}
        Commands::Capabilities => {
            open(&state, Route::Capabilities).await?;
            let Some(report) = state.capabilities.report() else {
                bail!("capability probe did not finish");
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Classify { image } => {
            open(&state, Route::ImageClassifier).await?;
            let image = image.unwrap_or_default();
            if let Some(results) = state.classifier.classify(&image).await? {
                for result in results {
                    println!("{:<40} {:.2}%", result.label, result.score * 100.0);
                }
            }
        }
        Commands::Search { query } => {
            open(&state, Route::Embeddings).await?;
            let query = query.unwrap_or_else(|| DEFAULT_QUERY.to_string());
            if let Some(results) = state.search.search(&query).await? {
                for result in results {
                    println!("{:.3}  {}", result.score, result.document.title);
                    println!("       {}", result.document.content);
                }
            }
        }
        Commands::Chat { message } => {
            open(&state, Route::Chat).await?;
            let message = message.unwrap_or_else(|| DEFAULT_PROMPT.to_string());
            state
                .chat
                .send(&message, |event| {
                    if event.done {
                        println!();
                    } else {
                        print!("{}", event.delta);
                        let _ = stdout().flush();
                    }
                })
                .await?;
        }
        Commands::Bench { runs } => {
            open(&state, Route::Onnx).await?;
            if let Some(adapter) = state.benchmark.adapter() {
                println!("Adapter: {}", adapter.summary());
            }
            for _ in 0..runs.max(1) {
                if let Some(result) = state.benchmark.run().await? {
                    println!(
                        "{}: {:.2} ms (outputs on device: {})",
                        result.backend, result.elapsed_ms, result.outputs_on_device
                    );
                }
            }
        }
    }

    Ok(())
}
