use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use seeclaw_locator::config::{load_config, load_config_from};
use seeclaw_locator::llm::registry::ProviderRegistry;
use seeclaw_locator::perception::screenshot::{PrimaryMonitorCapture, ScreenCapture, StaticCapture};
use seeclaw_locator::perception::types::Screenshot;
use seeclaw_locator::rag::index::{ElementRepository, InMemoryElementRepository};
use seeclaw_locator::{init_tracing, ElementLocator, LocatorError, LocatorResult, UiElement};

/// Locate a stored UI element on the current screen.
#[derive(Debug, Parser)]
#[command(name = "seeclaw-locate", version, about)]
struct Args {
    /// JSON file holding one element record.
    #[arg(long, conflicts_with = "store")]
    element: Option<PathBuf>,

    /// JSON file holding an array of element records; pick one with --query.
    #[arg(long, requires = "query")]
    store: Option<PathBuf>,

    /// Text description used to pick a record out of --store.
    #[arg(long)]
    query: Option<String>,

    /// Minimum similarity for --query.
    #[arg(long, default_value_t = 0.2)]
    min_score: f32,

    /// Values for the element's data-dependent attributes.
    #[arg(long, default_value = "")]
    test_data: String,

    /// Config file; defaults to the usual search locations.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use this image instead of capturing the primary monitor.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Display scale for --image.
    #[arg(long, default_value_t = 1.0)]
    scale: f64,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> LocatorResult<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

async fn run(args: Args) -> LocatorResult<()> {
    let config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let registry = ProviderRegistry::from_config(&config);

    let capture: Arc<dyn ScreenCapture> = match &args.image {
        Some(path) => {
            let img = image::open(path)?;
            Arc::new(StaticCapture::new(Screenshot::new(img, args.scale)))
        }
        None => Arc::new(PrimaryMonitorCapture),
    };
    let locator = ElementLocator::from_registry(&registry, config.locator.clone(), capture)?;

    let stop = locator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("ctrl-c received, interrupting");
            stop.trigger();
        }
    });

    let result = match (&args.element, &args.store, &args.query) {
        (Some(path), _, _) => {
            let element: UiElement = read_json(path)?;
            locator.locate(&element, &args.test_data).await?
        }
        (None, Some(path), Some(query)) => {
            let records: Vec<UiElement> = read_json(path)?;
            let repo = InMemoryElementRepository::default();
            for r in records {
                repo.insert(r).await?;
            }
            locator
                .locate_by_description(&repo, query, &args.test_data, args.min_score)
                .await?
        }
        _ => {
            return Err(LocatorError::InvalidInput(
                "pass --element, or --store together with --query".into(),
            ))
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let _ = dotenvy::dotenv();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "locate failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
