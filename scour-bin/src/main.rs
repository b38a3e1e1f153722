use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use scour_config::{ConfigLoader, loader};
use scour_search::{DomainTrustStore, RateLimitRegistry};
use scour_server::tasks::{SharedServices, TaskRegistry};
use scour_server::AppState;
use scour_vector::{LocalEmbedding, VectorStore};

/// Live search orchestrator — cited research reports over streaming SSE.
#[derive(Parser)]
#[command(name = "scour", version, about)]
struct Cli {
    /// Path to scour.toml (default: $SCOUR_CONFIG or ~/.scour/scour.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config file.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> scour_core::Result<()> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(listen = %config.server.listen, "scour starting");

    // Domain trust store and rate-limit registry are cheap and must exist.
    let trust = Arc::new(DomainTrustStore::new(config.trust.clone()));
    trust.ensure_schema()?;
    let rate_limits = Arc::new(RateLimitRegistry::new(
        config.search.rate_limit_file.clone(),
        config.search.default_ignore_secs,
    ));

    // The embedding model id comes from config, else the application
    // database. Without one, research tasks fail their pre-flight check but
    // the HTTP surface still comes up.
    let embedding_model = config.vector.embedding_model.clone().or_else(|| {
        config
            .credentials
            .app_db_path
            .as_deref()
            .and_then(scour_config::appdb::resolve_embedding_model)
    });

    let vector = match embedding_model {
        Some(model) => {
            match LocalEmbedding::connect(config.vector.embedding_endpoint.clone(), model).await {
                Ok(embedder) => match VectorStore::open(&config.vector, Arc::new(embedder)) {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        error!(error = %e, "vector store initialization failed");
                        None
                    }
                },
                Err(e) => {
                    error!(error = %e, "embedding model initialization failed");
                    None
                }
            }
        }
        None => {
            warn!("no embedding model configured; vector operations will be unavailable");
            None
        }
    };

    let base_credentials = loader::resolve_credentials(&config);
    let config = Arc::new(config);

    let state = Arc::new(AppState {
        registry: Arc::new(TaskRegistry::new()),
        shared: SharedServices {
            config,
            rate_limits,
            trust,
            vector,
            base_credentials,
            llm_backend_override: None,
        },
    });

    scour_server::serve(state).await
}
