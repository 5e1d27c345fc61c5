use crate::models::SocialMention;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn insert_mention(
    pool: &PgPool,
    symbol: &str,
    mention_count: i32,
    subreddit: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    baseline_7day: Option<f64>,
) -> Result<SocialMention, sqlx::Error> {
    sqlx::query_as::<_, SocialMention>(
        r#"
        INSERT INTO social_mention (symbol, mention_count, subreddit, period_start, period_end, baseline_7day)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(symbol)
    .bind(mention_count)
    .bind(subreddit)
    .bind(period_start)
    .bind(period_end)
    .bind(baseline_7day)
    .fetch_one(pool)
    .await
}

/// Rolling hourly baseline: mean mention count for this symbol and forum over
/// the trailing week. None when there is no history yet.
pub async fn baseline_7day(
    pool: &PgPool,
    symbol: &str,
    subreddit: &str,
) -> Result<Option<f64>, sqlx::Error> {
    let (avg,): (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(mention_count)::double precision FROM social_mention
        WHERE symbol = $1 AND subreddit = $2
          AND period_start >= NOW() - interval '7 days'
        "#,
    )
    .bind(symbol)
    .bind(subreddit)
    .fetch_one(pool)
    .await?;

    Ok(avg)
}
