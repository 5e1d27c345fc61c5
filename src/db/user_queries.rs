use crate::models::AppUser;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Register or refresh a user. Existing fields survive when the request
/// omits them.
pub async fn upsert_user(
    pool: &PgPool,
    user_id: &str,
    name: Option<&str>,
    push_token: Option<&str>,
) -> Result<AppUser, sqlx::Error> {
    let user = sqlx::query_as::<_, AppUser>(
        r#"
        INSERT INTO app_user (user_id, name, push_token)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET name = COALESCE(EXCLUDED.name, app_user.name),
            push_token = COALESCE(EXCLUDED.push_token, app_user.push_token),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(push_token)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn get_user(pool: &PgPool, user_id: &str) -> Result<Option<AppUser>, sqlx::Error> {
    sqlx::query_as::<_, AppUser>("SELECT * FROM app_user WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_all_users(pool: &PgPool) -> Result<Vec<AppUser>, sqlx::Error> {
    sqlx::query_as::<_, AppUser>("SELECT * FROM app_user ORDER BY created_at")
        .fetch_all(pool)
        .await
}

pub async fn update_push_token(
    pool: &PgPool,
    user_id: &str,
    push_token: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE app_user SET push_token = $2, updated_at = NOW() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(push_token)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Partial settings update; untouched fields keep their values.
pub async fn update_settings(
    pool: &PgPool,
    user_id: &str,
    notification_frequency: Option<&str>,
    notification_sensitivity: Option<&str>,
    weekly_summary: Option<bool>,
    mode: Option<&str>,
) -> Result<AppUser, sqlx::Error> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE app_user SET ");

    let mut separated = query_builder.separated(", ");
    let mut has_updates = false;

    if let Some(frequency) = notification_frequency {
        separated.push("notification_frequency = ");
        separated.push_bind_unseparated(frequency);
        has_updates = true;
    }

    if let Some(sensitivity) = notification_sensitivity {
        separated.push("notification_sensitivity = ");
        separated.push_bind_unseparated(sensitivity);
        has_updates = true;
    }

    if let Some(weekly) = weekly_summary {
        separated.push("weekly_summary = ");
        separated.push_bind_unseparated(weekly);
        has_updates = true;
    }

    if let Some(mode) = mode {
        separated.push("mode = ");
        separated.push_bind_unseparated(mode);
        has_updates = true;
    }

    if !has_updates {
        return sqlx::query_as::<_, AppUser>("SELECT * FROM app_user WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await;
    }

    query_builder.push(", updated_at = NOW() WHERE user_id = ");
    query_builder.push_bind(user_id);
    query_builder.push(" RETURNING *");

    query_builder
        .build_query_as::<AppUser>()
        .fetch_one(pool)
        .await
}
