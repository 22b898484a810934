use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::web::AppState;

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(state.pool_ref()).await {
                error!(?err, "session cleanup cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(pool: &PgPool) -> Result<()> {
    let sessions_removed = purge_expired_sessions(pool).await?;
    let tokens_removed = purge_stale_reset_tokens(pool).await?;

    if sessions_removed > 0 || tokens_removed > 0 {
        info!(sessions_removed, tokens_removed, "session cleanup completed");
    }

    Ok(())
}

async fn purge_expired_sessions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .context("failed to delete expired sessions")?;
    Ok(result.rows_affected())
}

/// Reset tokens are single use, so used ones go as soon as expired ones do.
async fn purge_stale_reset_tokens(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM password_reset_tokens WHERE used_at IS NOT NULL OR expires_at <= NOW()",
    )
    .execute(pool)
    .await
    .context("failed to delete stale password reset tokens")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use crate::test_support;

    async fn exists(pool: &PgPool, table: &str, id: Uuid) -> bool {
        sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)"))
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn purges_expired_sessions_and_stale_tokens() {
        let Some(pool) = test_support::pool().await else { return };
        let (user_id, _) = test_support::user(&pool, "student").await;
        let now = Utc::now();

        let expired_session = Uuid::new_v4();
        let live_session = Uuid::new_v4();
        for (id, expires_at) in [
            (expired_session, now - ChronoDuration::minutes(1)),
            (live_session, now + ChronoDuration::days(1)),
        ] {
            sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(user_id)
                .bind(expires_at)
                .execute(&pool)
                .await
                .unwrap();
        }

        let expired_token = Uuid::new_v4();
        let used_token = Uuid::new_v4();
        let live_token = Uuid::new_v4();
        for (id, expires_at, used) in [
            (expired_token, now - ChronoDuration::minutes(1), false),
            (used_token, now + ChronoDuration::days(3), true),
            (live_token, now + ChronoDuration::days(3), false),
        ] {
            sqlx::query(
                "INSERT INTO password_reset_tokens (id, user_id, expires_at, used_at)
                 VALUES ($1, $2, $3, CASE WHEN $4 THEN NOW() END)",
            )
            .bind(id)
            .bind(user_id)
            .bind(expires_at)
            .bind(used)
            .execute(&pool)
            .await
            .unwrap();
        }

        assert!(purge_expired_sessions(&pool).await.unwrap() >= 1);
        assert!(purge_stale_reset_tokens(&pool).await.unwrap() >= 2);

        assert!(!exists(&pool, "sessions", expired_session).await);
        assert!(exists(&pool, "sessions", live_session).await);
        assert!(!exists(&pool, "password_reset_tokens", expired_token).await);
        assert!(!exists(&pool, "password_reset_tokens", used_token).await);
        assert!(exists(&pool, "password_reset_tokens", live_token).await);
    }
}
