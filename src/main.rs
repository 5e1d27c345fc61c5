use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use marketbrief_backend::external::alphavantage::{AlphaVantageNewsApi, NewsSearchApi};
use marketbrief_backend::external::yahoo::YahooQuoteProvider;
use marketbrief_backend::logging::{init_logging, LoggingConfig};
use marketbrief_backend::services::cleaning_service::CleaningService;
use marketbrief_backend::services::fetch_service::MultiLayerFetcher;
use marketbrief_backend::services::job_scheduler_service::{JobSchedulerService, MonitorConfig};
use marketbrief_backend::services::llm_service::{LlmConfig, LlmService};
use marketbrief_backend::services::news_monitor::NewsMonitor;
use marketbrief_backend::services::notification_service::NotificationService;
use marketbrief_backend::services::pipeline_service::NewsPipeline;
use marketbrief_backend::services::price_monitor::PriceMonitor;
use marketbrief_backend::services::social_monitor::SocialMonitor;
use marketbrief_backend::services::source_registry::SourceRegistry;
use marketbrief_backend::{app, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    init_logging(LoggingConfig::from_env())?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    // Shared collaborators.
    let registry = Arc::new(SourceRegistry::from_env());
    let llm = Arc::new(LlmService::new(LlmConfig::from_env()));
    let notifier = Arc::new(NotificationService::new());

    let search_api: Option<Arc<dyn NewsSearchApi>> =
        match AlphaVantageNewsApi::from_env("AlphaVantage News") {
            Ok(api) => Some(Arc::new(api)),
            Err(_) => {
                tracing::info!("ALPHAVANTAGE_API_KEY not set; L3 search disabled");
                None
            }
        };

    // Personalization pipeline behind the feed endpoint.
    let pipeline = Arc::new(NewsPipeline::new(
        registry.clone(),
        MultiLayerFetcher::new(registry.clone(), search_api.clone()),
        CleaningService::from_env(),
        llm.clone(),
    ));

    // Monitor tasks on the cron scheduler.
    let price_monitor = Arc::new(PriceMonitor::new(
        pool.clone(),
        Arc::new(YahooQuoteProvider::new()),
        notifier.clone(),
        llm.clone(),
    ));
    let news_monitor = Arc::new(NewsMonitor::new(
        pool.clone(),
        Arc::new(MultiLayerFetcher::new(registry.clone(), search_api)),
        registry.clone(),
        notifier.clone(),
        llm.clone(),
    ));
    let social_monitor = Arc::new(SocialMonitor::new(
        pool.clone(),
        notifier.clone(),
        llm.clone(),
    ));

    let mut scheduler = JobSchedulerService::new(
        pool.clone(),
        price_monitor,
        news_monitor,
        social_monitor,
        notifier,
        llm,
        MonitorConfig::from_env(),
    )
    .await?;
    scheduler.start().await?;

    let state = state::AppState { pool, pipeline };
    let app = app::create_app(state);

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 marketbrief backend running at http://{}/", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
