pub mod alert_service;
pub mod cleaning_service;
pub mod clustering_service;
pub mod content_hash;
pub mod event_detection;
pub mod feed_service;
pub mod fetch_service;
pub mod job_scheduler_service;
pub mod llm_service;
pub mod news_monitor;
pub mod notification_service;
pub mod pipeline_service;
pub mod price_monitor;
pub mod rate_limiter;
pub mod scoring_service;
pub mod social_monitor;
pub mod source_registry;
