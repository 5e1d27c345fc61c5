use sqlx::PgPool;
use std::sync::Arc;

use crate::services::pipeline_service::NewsPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub pipeline: Arc<NewsPipeline>,
}
