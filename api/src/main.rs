mod api_handlers;
mod collection_client;
mod projection_cache;
mod request_logging;


use clap::{Parser, Subcommand};
use collection_client::CollectionClient;
use poem::{listener::TcpListener, middleware::Cors, EndpointExt, Route, Server};
use projection_cache::ProjectionCache;
use request_logging::RequestLogging;
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "api-server")]
#[command(about = "Document collection API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve,
}

/// Process configuration, read once at startup and handed down explicitly.
#[derive(Debug, Clone)]
struct Config {
    port: u16,
    collection_manager_url: String,
    projection_file: Option<String>,
    response_log_max_bytes: usize,
}

impl Config {
    fn from_env() -> Self {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);
        let collection_manager_url = env::var("COLLECTION_MANAGER_URL")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());
        let projection_file = env::var("PROJECTION_FILE").ok();
        let response_log_max_bytes = env::var("RESPONSE_LOG_MAX_BYTES")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        Self {
            port,
            collection_manager_url,
            projection_file,
            response_log_max_bytes,
        }
    }
}

struct AppContext {
    collection_client: Arc<CollectionClient>,
    projection_cache: Arc<ProjectionCache>,
}

fn setup_app_context(config: &Config) -> Result<AppContext, std::io::Error> {
    let collection_client = Arc::new(CollectionClient::new(&config.collection_manager_url));
    tracing::info!(
        "Collection client initialized for {}",
        config.collection_manager_url
    );

    let projection_cache = match &config.projection_file {
        Some(path) => match ProjectionCache::load(path) {
            Ok(cache) => {
                tracing::info!("Projection cache loaded from {}", path);
                Arc::new(cache)
            }
            Err(e) => {
                tracing::error!("Failed to load projection file {}: {}", path, e);
                return Err(std::io::Error::other(format!(
                    "Projection cache initialization failed: {}",
                    e
                )));
            }
        },
        None => Arc::new(ProjectionCache::empty()),
    };

    Ok(AppContext {
        collection_client,
        projection_cache,
    })
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let cli = Cli::parse();

    // Load .env file if it exists
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve => serve_command().await,
    }
}

async fn serve_command() -> Result<(), std::io::Error> {
    let config = Config::from_env();
    let addr = format!("0.0.0.0:{}", config.port);

    let ctx = setup_app_context(&config)?;

    tracing::info!("Starting collection API gateway on {}", addr);

    let app = Route::new()
        // Health check
        .at("/api/v1/health", poem::get(api_handlers::health))
        // Document CRUD
        .at(
            "/api/v1/docs",
            poem::post(api_handlers::insert_doc)
                .get(api_handlers::get_doc)
                .patch(api_handlers::update_doc)
                .delete(api_handlers::delete_doc),
        )
        .at(
            "/api/v1/docs/many",
            poem::post(api_handlers::insert_doc_list)
                .get(api_handlers::get_doc_list)
                .patch(api_handlers::update_doc_many)
                .delete(api_handlers::delete_doc_many),
        )
        // Distinct tag values
        .at("/api/v1/docs/tag", poem::get(api_handlers::get_doc_tag))
        .data(ctx.collection_client)
        .data(ctx.projection_cache)
        .with(RequestLogging::new(config.response_log_max_bytes))
        .with(Cors::new());

    Server::new(TcpListener::bind(&addr)).run(app).await
}
