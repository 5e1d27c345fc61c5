use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::db::price_queries;
use crate::errors::AppError;
use crate::services::alert_service;
use crate::services::llm_service::LlmService;
use crate::services::news_monitor::NewsMonitor;
use crate::services::notification_service::NotificationService;
use crate::services::price_monitor::PriceMonitor;
use crate::services::social_monitor::SocialMonitor;

const PRICE_POINT_RETENTION_DAYS: i64 = 7;

/// Shared context handed to every scheduled task.
#[derive(Clone)]
pub struct JobContext {
    pub pool: PgPool,
    pub price_monitor: Arc<PriceMonitor>,
    pub news_monitor: Arc<NewsMonitor>,
    pub social_monitor: Arc<SocialMonitor>,
    pub notifier: Arc<NotificationService>,
    pub llm: Arc<LlmService>,
    /// Non-reentrancy guard: a task whose name is present here is running,
    /// and a second trigger is a no-op.
    running: Arc<DashMap<&'static str, ()>>,
}

pub struct MonitorConfig {
    pub price_cron: String,
    pub news_cron: String,
    pub social_cron: String,
    pub cleanup_cron: String,
    pub enable_mock_notifications: bool,
}

impl MonitorConfig {
    /// Cron format: sec min hour day month weekday. The monitors default to
    /// hourly, staggered so they never start together; cleanup runs at
    /// midnight.
    pub fn from_env() -> Self {
        Self {
            price_cron: std::env::var("MONITOR_PRICE_CRON")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            news_cron: std::env::var("MONITOR_NEWS_CRON")
                .unwrap_or_else(|_| "0 10 * * * *".to_string()),
            social_cron: std::env::var("MONITOR_SOCIAL_CRON")
                .unwrap_or_else(|_| "0 20 * * * *".to_string()),
            cleanup_cron: std::env::var("CLEANUP_CRON")
                .unwrap_or_else(|_| "0 0 0 * * *".to_string()),
            enable_mock_notifications: std::env::var("ENABLE_MOCK_NOTIFICATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }
}

pub struct JobSchedulerService {
    scheduler: JobScheduler,
    context: JobContext,
    config: MonitorConfig,
}

impl JobSchedulerService {
    pub async fn new(
        pool: PgPool,
        price_monitor: Arc<PriceMonitor>,
        news_monitor: Arc<NewsMonitor>,
        social_monitor: Arc<SocialMonitor>,
        notifier: Arc<NotificationService>,
        llm: Arc<LlmService>,
        config: MonitorConfig,
    ) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        let context = JobContext {
            pool,
            price_monitor,
            news_monitor,
            social_monitor,
            notifier,
            llm,
            running: Arc::new(DashMap::new()),
        };

        Ok(Self {
            scheduler,
            context,
            config,
        })
    }

    /// Register and start every monitor task.
    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting monitor scheduler...");

        let price_cron = self.config.price_cron.clone();
        self.schedule_job(&price_cron, "monitor_price", run_price_monitor)
            .await?;

        let news_cron = self.config.news_cron.clone();
        self.schedule_job(&news_cron, "monitor_news", run_news_monitor)
            .await?;

        let social_cron = self.config.social_cron.clone();
        self.schedule_job(&social_cron, "monitor_social", run_social_monitor)
            .await?;

        let cleanup_cron = self.config.cleanup_cron.clone();
        self.schedule_job(&cleanup_cron, "daily_cleanup", run_daily_cleanup)
            .await?;

        if self.config.enable_mock_notifications {
            let mock_cron = self.config.price_cron.clone();
            self.schedule_job(&mock_cron, "mock_notifications", run_mock_notifications)
                .await?;
        }

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Monitor scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping monitor scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        Ok(())
    }

    async fn schedule_job<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        job_fn: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let context = self.context.clone();

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let job_fn = job_fn.clone();
            Box::pin(async move {
                run_guarded(job_name, context, job_fn).await;
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled {} [cron: {}]", job_name, schedule);
        Ok(())
    }
}

/// Run one task with the overlap guard held. Two runs of the same task never
/// overlap; a re-entrant trigger logs and returns.
async fn run_guarded<F, Fut>(job_name: &'static str, context: JobContext, job_fn: F)
where
    F: Fn(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<(), AppError>>,
{
    let running = context.running.clone();

    if running.insert(job_name, ()).is_some() {
        warn!("{} is still running, skipping this trigger", job_name);
        return;
    }

    info!("🏃 Starting job: {}", job_name);
    let started_at = Utc::now();

    let result = job_fn(context).await;

    let duration_ms = (Utc::now() - started_at).num_milliseconds();
    match result {
        Ok(()) => info!("✅ Job completed: {} ({}ms)", job_name, duration_ms),
        Err(e) => error!("❌ Job failed: {} - {} ({}ms)", job_name, e, duration_ms),
    }

    running.remove(job_name);
}

// ==============================================================================
// Job bodies
// ==============================================================================

async fn run_price_monitor(ctx: JobContext) -> Result<(), AppError> {
    ctx.price_monitor.run().await.map(|_| ())
}

async fn run_news_monitor(ctx: JobContext) -> Result<(), AppError> {
    ctx.news_monitor.run().await.map(|_| ())
}

async fn run_social_monitor(ctx: JobContext) -> Result<(), AppError> {
    ctx.social_monitor.run().await.map(|_| ())
}

/// Midnight housekeeping: expire old price points, flush pending digests,
/// drop stale LLM cache entries.
async fn run_daily_cleanup(ctx: JobContext) -> Result<(), AppError> {
    let deleted = price_queries::delete_older_than_days(&ctx.pool, PRICE_POINT_RETENTION_DAYS)
        .await
        .map_err(AppError::from)?;
    info!("🧹 Deleted {} price points older than {} days", deleted, PRICE_POINT_RETENTION_DAYS);

    let digests = alert_service::send_daily_digests(&ctx.pool, &ctx.notifier).await?;
    if digests > 0 {
        info!("📬 Sent {} daily digests", digests);
    }

    ctx.llm.cleanup().await;
    Ok(())
}

async fn run_mock_notifications(ctx: JobContext) -> Result<(), AppError> {
    let sent = alert_service::send_mock_alerts(&ctx.pool, &ctx.notifier, &ctx.llm).await?;
    info!("🔔 Sent {} mock notifications", sent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_blocks_reentry() {
        let running: DashMap<&'static str, ()> = DashMap::new();
        assert!(running.insert("monitor_price", ()).is_none());
        // Second trigger while running: insert reports the existing entry.
        assert!(running.insert("monitor_price", ()).is_some());
        running.remove("monitor_price");
        assert!(running.insert("monitor_price", ()).is_none());
    }

    #[test]
    fn test_config_defaults() {
        // Env-free construction picks the documented defaults.
        let config = MonitorConfig {
            price_cron: "0 0 * * * *".to_string(),
            news_cron: "0 10 * * * *".to_string(),
            social_cron: "0 20 * * * *".to_string(),
            cleanup_cron: "0 0 0 * * *".to_string(),
            enable_mock_notifications: false,
        };
        assert!(!config.enable_mock_notifications);
        assert!(config.cleanup_cron.starts_with("0 0 0"));
    }
}
