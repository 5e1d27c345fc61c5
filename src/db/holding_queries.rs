use crate::models::{AppUser, Holding};
use sqlx::PgPool;

pub async fn get_holdings(pool: &PgPool, user_id: &str) -> Result<Vec<Holding>, sqlx::Error> {
    sqlx::query_as::<_, Holding>(
        "SELECT * FROM holding WHERE user_id = $1 ORDER BY symbol",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Upsert by (user, symbol). Symbols are stored uppercase; callers normalize
/// before binding.
pub async fn upsert_holding(
    pool: &PgPool,
    user_id: &str,
    symbol: &str,
    name: Option<&str>,
    allocation: Option<f64>,
    note: Option<&str>,
) -> Result<Holding, sqlx::Error> {
    sqlx::query_as::<_, Holding>(
        r#"
        INSERT INTO holding (user_id, symbol, name, allocation, note)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, symbol) DO UPDATE
        SET name = COALESCE(EXCLUDED.name, holding.name),
            allocation = COALESCE(EXCLUDED.allocation, holding.allocation),
            note = COALESCE(EXCLUDED.note, holding.note)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(symbol)
    .bind(name)
    .bind(allocation)
    .bind(note)
    .fetch_one(pool)
    .await
}

pub async fn delete_holding(
    pool: &PgPool,
    user_id: &str,
    symbol: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM holding WHERE user_id = $1 AND symbol = $2")
        .bind(user_id)
        .bind(symbol)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Every distinct symbol held by any user; the monitor's work list.
pub async fn all_symbols(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT symbol FROM holding ORDER BY symbol")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}

/// Users holding a given symbol.
pub async fn holders_of(pool: &PgPool, symbol: &str) -> Result<Vec<AppUser>, sqlx::Error> {
    sqlx::query_as::<_, AppUser>(
        r#"
        SELECT u.* FROM app_user u
        JOIN holding h ON h.user_id = u.user_id
        WHERE h.symbol = $1
        ORDER BY u.user_id
        "#,
    )
    .bind(symbol)
    .fetch_all(pool)
    .await
}
