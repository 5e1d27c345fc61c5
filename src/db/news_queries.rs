use crate::models::NewsItemRecord;
use sqlx::PgPool;

/// Cache one headline. Returns false when the url (or hash) was already
/// cached, which doubles as the news monitor's dedup check.
pub async fn try_insert_news_item(
    pool: &PgPool,
    symbol: &str,
    title: &str,
    url: &str,
    source: &str,
    source_tier: i32,
    published_at: chrono::DateTime<chrono::Utc>,
    content_hash: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO news_item (symbol, title, url, source, source_tier, published_at, content_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(symbol)
    .bind(title)
    .bind(url)
    .bind(source)
    .bind(source_tier)
    .bind(published_at)
    .bind(content_hash)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn recent_for_symbol(
    pool: &PgPool,
    symbol: &str,
    hours: i64,
) -> Result<Vec<NewsItemRecord>, sqlx::Error> {
    sqlx::query_as::<_, NewsItemRecord>(
        r#"
        SELECT * FROM news_item
        WHERE symbol = $1 AND published_at >= NOW() - ($2 || ' hours')::interval
        ORDER BY published_at DESC
        "#,
    )
    .bind(symbol)
    .bind(hours.to_string())
    .fetch_all(pool)
    .await
}
