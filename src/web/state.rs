use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::PortalConfig,
    mailer::Mailer,
    web::{rate_limit::RateLimiters, uploads::UPLOAD_SUBDIRECTORIES},
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    config: Arc<PortalConfig>,
    mailer: Mailer,
    rate_limiters: Arc<RateLimiters>,
}

impl AppState {
    pub async fn new(config: PortalConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let mailer = Mailer::new(
            config.mail_provider.clone(),
            config.default_from_email.clone(),
        );
        let rate_limiters = RateLimiters::new(config.trust_proxy);

        Ok(Self {
            pool,
            config: Arc::new(config),
            mailer,
            rate_limiters: Arc::new(rate_limiters),
        })
    }

    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'admin')")
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if !has_admin {
            let username = &self.config.seed_admin_username;
            let password_hash = crate::web::auth::hash_password(&self.config.seed_admin_password)
                .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

            sqlx::query(
                "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1, $2, '', $3, 'admin')",
            )
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to insert seed admin user")?;

            info!(%username, "Seeded default admin user. Update its password promptly.");
        }

        Ok(())
    }

    /// Creates the media root and the per-field upload directories.
    pub async fn ensure_media_dirs(&self) -> Result<()> {
        let root = self.media_root();
        for subdir in UPLOAD_SUBDIRECTORIES {
            let dir = root.join(subdir);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create media directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn media_root(&self) -> &Path {
        &self.config.media_root
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.rate_limiters
    }
}
