use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::alert_queries::{self, InsertOutcome};
use crate::errors::AppError;
use crate::models::{AlertKind, AppUser};
use crate::services::content_hash;
use crate::services::llm_service::LlmService;
use crate::services::notification_service::NotificationService;

/// One alert candidate that already passed its threshold. The shared
/// dispatch path below walks it through dedup, budget, formatting, and
/// delivery; any stage can short-circuit to a recorded drop.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub user_id: String,
    pub kind: AlertKind,
    pub symbol: Option<String>,
    pub content_hash: String,
    pub title: String,
    /// Deterministic message used when the LLM is unavailable or violates
    /// the number-hygiene contract.
    pub fallback_message: String,
    /// Facts handed to the LLM; the rendered text may only contain numbers
    /// present here.
    pub llm_facts: String,
    pub url: Option<String>,
    pub metadata: serde_json::Value,
    /// Payload data for the push (alert_type, symbol, changePercent, ...).
    pub push_data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Budget exhausted; queued for the next daily digest.
    Digested,
    /// Dedup hit: an identical alert was already delivered.
    Duplicate,
}

/// Dedup -> budget -> format -> deliver. The alert_log insert and the budget
/// read share one transaction, and the unique hash index makes concurrent
/// writers converge on a single delivery.
pub async fn dispatch(
    pool: &PgPool,
    notifier: &NotificationService,
    llm: &LlmService,
    user: &AppUser,
    candidate: AlertCandidate,
) -> Result<DispatchOutcome, AppError> {
    // Cheap dedup probe before spending any formatting work.
    if alert_queries::hash_exists(pool, &candidate.content_hash).await? {
        info!(
            "Dedup hit for {} alert on {:?} (user {})",
            candidate.kind, candidate.symbol, candidate.user_id
        );
        return Ok(DispatchOutcome::Duplicate);
    }

    let message = format_message(llm, &candidate).await;

    let outcome = alert_queries::insert_within_budget(
        pool,
        &candidate.user_id,
        candidate.kind.as_str(),
        candidate.symbol.as_deref(),
        &candidate.content_hash,
        &candidate.title,
        &message,
        candidate.url.as_deref(),
        candidate.metadata.clone(),
        user.max_daily_pushes as i64,
    )
    .await?;

    match outcome {
        InsertOutcome::Duplicate => {
            info!("Dedup hit at insert for hash {}", candidate.content_hash);
            Ok(DispatchOutcome::Duplicate)
        }
        InsertOutcome::OverBudget => {
            info!(
                "Push budget exhausted for {}, routing to digest",
                candidate.user_id
            );
            alert_queries::insert_digest_item(
                pool,
                &candidate.user_id,
                candidate.symbol.as_deref(),
                &candidate.title,
                &message,
            )
            .await?;
            Ok(DispatchOutcome::Digested)
        }
        InsertOutcome::Inserted => {
            if let Err(e) = notifier
                .send_push(
                    user.push_token.as_deref(),
                    &candidate.title,
                    &message,
                    candidate.push_data.clone(),
                )
                .await
            {
                // The alert is logged either way; delivery retries would
                // violate the one-push-per-hash contract.
                warn!("Push delivery failed for {}: {}", candidate.user_id, e);
            }
            Ok(DispatchOutcome::Delivered)
        }
    }
}

/// Render the message through the LLM when available; its output is already
/// digit-checked, and any failure lands on the deterministic fallback.
async fn format_message(llm: &LlmService, candidate: &AlertCandidate) -> String {
    if llm.is_enabled() {
        match llm.write_alert_text(&candidate.llm_facts).await {
            Ok(text) if !text.is_empty() => return text,
            Ok(_) => {}
            Err(e) => info!("Alert text generation failed ({}), using template", e),
        }
    }
    candidate.fallback_message.clone()
}

// ==============================================================================
// Daily digest
// ==============================================================================

/// Emit at most one digest push per user summarising candidates the budget
/// suppressed. Runs from the daily cleanup task.
pub async fn send_daily_digests(
    pool: &PgPool,
    notifier: &NotificationService,
) -> Result<usize, AppError> {
    let user_ids = alert_queries::users_with_pending_digest(pool).await?;
    let mut sent = 0usize;

    for user_id in user_ids {
        let Some(user) = crate::db::user_queries::get_user(pool, &user_id).await? else {
            continue;
        };

        let items = alert_queries::pending_digest_items(pool, &user_id).await?;
        if items.is_empty() {
            continue;
        }

        let title = format!("While you were away: {} more alerts", items.len());
        let lines: Vec<String> = items
            .iter()
            .take(10)
            .map(|i| format!("- {}", i.title))
            .collect();
        let message = lines.join("\n");

        let hash = content_hash::digest_hash(&user_id, chrono::Utc::now());
        let outcome = alert_queries::insert_within_budget(
            pool,
            &user_id,
            AlertKind::Digest.as_str(),
            None,
            &hash,
            &title,
            &message,
            None,
            serde_json::json!({ "suppressed": items.len() }),
            user.max_daily_pushes as i64,
        )
        .await?;

        if outcome == InsertOutcome::Inserted {
            let _ = notifier
                .send_push(
                    user.push_token.as_deref(),
                    &title,
                    &message,
                    serde_json::json!({ "alert_type": "digest" }),
                )
                .await;
            sent += 1;
        }

        // Either delivered now or already digested today; stop re-queueing.
        alert_queries::mark_digested(pool, &user_id).await?;
    }

    Ok(sent)
}

// ==============================================================================
// Mock notifications
// ==============================================================================

/// Dev-only path behind ENABLE_MOCK_NOTIFICATIONS: one test alert per user,
/// deduped per hour like any other alert.
pub async fn send_mock_alerts(
    pool: &PgPool,
    notifier: &NotificationService,
    llm: &LlmService,
) -> Result<usize, AppError> {
    let users = crate::db::user_queries::get_all_users(pool).await?;
    let now = chrono::Utc::now();
    let mut sent = 0usize;

    for user in users {
        let candidate = AlertCandidate {
            user_id: user.user_id.clone(),
            kind: AlertKind::Mock,
            symbol: None,
            content_hash: content_hash::generic_hash(&user.user_id, "mock", "", now),
            title: "Test notification".to_string(),
            fallback_message: "This is a test alert from the monitor.".to_string(),
            llm_facts: "kind=mock test notification".to_string(),
            url: None,
            metadata: serde_json::json!({ "mock": true }),
            push_data: serde_json::json!({ "alert_type": "mock" }),
        };

        if dispatch(pool, notifier, llm, &user, candidate).await? == DispatchOutcome::Delivered {
            sent += 1;
        }
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertKind;

    #[test]
    fn test_candidate_carries_hash_and_fallback() {
        let candidate = AlertCandidate {
            user_id: "u1".to_string(),
            kind: AlertKind::Price,
            symbol: Some("AAPL".to_string()),
            content_hash: "abc".to_string(),
            title: "AAPL ↓ 2.1%".to_string(),
            fallback_message: "AAPL moved 2.1% in the last 15 minutes.".to_string(),
            llm_facts: "symbol=AAPL change=-2.1%".to_string(),
            url: None,
            metadata: serde_json::json!({}),
            push_data: serde_json::json!({ "alert_type": "price", "symbol": "AAPL" }),
        };
        assert_eq!(candidate.kind, AlertKind::Price);
        assert!(candidate.fallback_message.contains("2.1"));
    }

    #[tokio::test]
    async fn test_format_message_uses_fallback_without_llm() {
        let llm = LlmService::disabled();
        let candidate = AlertCandidate {
            user_id: "u1".to_string(),
            kind: AlertKind::Price,
            symbol: None,
            content_hash: "h".to_string(),
            title: "t".to_string(),
            fallback_message: "the fallback".to_string(),
            llm_facts: "facts".to_string(),
            url: None,
            metadata: serde_json::json!({}),
            push_data: serde_json::json!({}),
        };
        assert_eq!(format_message(&llm, &candidate).await, "the fallback");
    }
}
