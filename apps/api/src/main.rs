use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atscore::analysis::orchestrator::AnalysisDeps;
use atscore::analysis::throttle::RequestThrottle;
use atscore::blob::{HttpBlobDelivery, S3UrlSigner};
use atscore::config::Config;
use atscore::db::create_pool;
use atscore::extract::PdfTextExtractor;
use atscore::llm_client::{GeminiClient, GeminiSettings, RemoteAnalyzer};
use atscore::repo::PgRepository;
use atscore::routes::build_router;
use atscore::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AtScore API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize the remote analysis client; without a credential every
    // request takes the deterministic fallback path.
    let remote: Option<Arc<dyn RemoteAnalyzer>> = match GeminiSettings::from_config(&config) {
        Some(settings) => {
            info!("Remote analysis client initialized (model: {})", settings.model);
            Some(Arc::new(GeminiClient::new(settings)?))
        }
        None => {
            info!("GEMINI_API_KEY not set; analyses will use the keyword fallback");
            None
        }
    };

    let throttle = Arc::new(RequestThrottle::new(
        Duration::from_millis(config.throttle_window_ms),
        config.throttle_limit,
    ));

    let analysis = AnalysisDeps {
        repo: Arc::new(PgRepository::new(db)),
        delivery: Arc::new(HttpBlobDelivery::new()?),
        signer: Arc::new(S3UrlSigner::new(s3, config.s3_bucket.clone())),
        extractor: Arc::new(PdfTextExtractor),
        remote,
        max_file_bytes: config.max_file_bytes(),
    };

    // Build app state
    let state = AppState {
        config: config.clone(),
        throttle,
        analysis,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "atscore-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
