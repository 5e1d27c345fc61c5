pub mod alert_queries;
pub mod holding_queries;
pub mod news_queries;
pub mod price_queries;
pub mod social_queries;
pub mod user_queries;
