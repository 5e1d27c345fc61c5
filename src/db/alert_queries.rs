use crate::models::{AlertLog, DigestItem};
use sqlx::PgPool;

/// Outcome of attempting to record one alert for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this content hash already exists; the candidate converges
    /// onto the earlier delivery.
    Duplicate,
    /// The user's daily push budget is exhausted.
    OverBudget,
}

/// Check the daily budget and insert in one transaction. The unique index on
/// `content_hash` makes the dedup race-safe across concurrent monitor tasks.
/// The budget read is serialized with a per-user advisory lock held for the
/// rest of the transaction: without it, two monitors dispatching to the same
/// user around the same tick could both read count < max before either
/// commits and push the user past the daily cap.
pub async fn insert_within_budget(
    pool: &PgPool,
    user_id: &str,
    alert_type: &str,
    symbol: Option<&str>,
    content_hash: &str,
    title: &str,
    message: &str,
    url: Option<&str>,
    metadata: serde_json::Value,
    max_daily: i64,
) -> Result<InsertOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Released automatically at commit or rollback.
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM alert_log
        WHERE user_id = $1 AND sent_at >= date_trunc('day', NOW())
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if count >= max_daily {
        tx.rollback().await?;
        return Ok(InsertOutcome::OverBudget);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO alert_log (user_id, alert_type, symbol, content_hash, title, message, url, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (content_hash) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(alert_type)
    .bind(symbol)
    .bind(content_hash)
    .bind(title)
    .bind(message)
    .bind(url)
    .bind(metadata)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if result.rows_affected() == 0 {
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted)
    }
}

/// Has this hash been delivered already? Used to short-circuit before any
/// formatting work.
pub async fn hash_exists(pool: &PgPool, content_hash: &str) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM alert_log WHERE content_hash = $1)")
            .bind(content_hash)
            .fetch_one(pool)
            .await?;

    Ok(exists)
}

pub async fn recent_alerts(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<AlertLog>, sqlx::Error> {
    sqlx::query_as::<_, AlertLog>(
        r#"
        SELECT * FROM alert_log
        WHERE user_id = $1
        ORDER BY sent_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_today(pool: &PgPool, user_id: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM alert_log
        WHERE user_id = $1 AND sent_at >= date_trunc('day', NOW())
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

// ==============================================================================
// Digest bucket
// ==============================================================================

pub async fn insert_digest_item(
    pool: &PgPool,
    user_id: &str,
    symbol: Option<&str>,
    title: &str,
    message: &str,
) -> Result<DigestItem, sqlx::Error> {
    sqlx::query_as::<_, DigestItem>(
        r#"
        INSERT INTO digest_item (user_id, symbol, title, message)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(symbol)
    .bind(title)
    .bind(message)
    .fetch_one(pool)
    .await
}

pub async fn users_with_pending_digest(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT user_id FROM digest_item WHERE digested = FALSE ORDER BY user_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(u,)| u).collect())
}

pub async fn pending_digest_items(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<DigestItem>, sqlx::Error> {
    sqlx::query_as::<_, DigestItem>(
        r#"
        SELECT * FROM digest_item
        WHERE user_id = $1 AND digested = FALSE
        ORDER BY created_at
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn mark_digested(pool: &PgPool, user_id: &str) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE digest_item SET digested = TRUE WHERE user_id = $1 AND digested = FALSE")
            .bind(user_id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}
