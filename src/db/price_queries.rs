use crate::models::PricePoint;
use sqlx::PgPool;

pub async fn insert_price_point(
    pool: &PgPool,
    symbol: &str,
    price: f64,
    change_percent: Option<f64>,
    volume: Option<i64>,
) -> Result<PricePoint, sqlx::Error> {
    sqlx::query_as::<_, PricePoint>(
        r#"
        INSERT INTO price_point (symbol, price, change_percent, volume)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(symbol)
    .bind(price)
    .bind(change_percent)
    .bind(volume)
    .fetch_one(pool)
    .await
}

/// Points for one symbol inside the trailing window, oldest first.
pub async fn window(
    pool: &PgPool,
    symbol: &str,
    minutes: i64,
) -> Result<Vec<PricePoint>, sqlx::Error> {
    sqlx::query_as::<_, PricePoint>(
        r#"
        SELECT * FROM price_point
        WHERE symbol = $1 AND ts >= NOW() - ($2 || ' minutes')::interval
        ORDER BY ts ASC
        "#,
    )
    .bind(symbol)
    .bind(minutes.to_string())
    .fetch_all(pool)
    .await
}

/// Retention pass: price points older than `days` are deleted.
pub async fn delete_older_than_days(pool: &PgPool, days: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM price_point WHERE ts < NOW() - ($1 || ' days')::interval",
    )
    .bind(days.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
