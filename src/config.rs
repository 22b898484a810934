use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_FROM_EMAIL: &str = "noreply@student-portal.local";
const DEFAULT_SEED_ADMIN_USERNAME: &str = "admin";
const DEFAULT_SEED_ADMIN_PASSWORD: &str = "change-me";

/// Which transport the notification mailer uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailProvider {
    /// Messages are written to the log instead of being delivered.
    Log,
    SendGrid { api_key: String },
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub database_url: String,
    pub port: u16,
    pub media_root: PathBuf,
    pub public_base_url: String,
    pub default_from_email: String,
    pub mail_provider: MailProvider,
    pub seed_admin_username: String,
    pub seed_admin_password: String,
    pub trust_proxy: bool,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let mail_provider = parse_mail_provider(
            env_string("MAIL_PROVIDER").as_deref(),
            env_string("SENDGRID_API_KEY"),
        )?;

        Ok(Self {
            database_url,
            port: env_string("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            media_root: PathBuf::from(
                env_string("MEDIA_ROOT").unwrap_or_else(|| DEFAULT_MEDIA_ROOT.to_string()),
            ),
            public_base_url: env_string("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_from_email: env_string("DEFAULT_FROM_EMAIL")
                .unwrap_or_else(|| DEFAULT_FROM_EMAIL.to_string()),
            mail_provider,
            seed_admin_username: env_string("SEED_ADMIN_USERNAME")
                .unwrap_or_else(|| DEFAULT_SEED_ADMIN_USERNAME.to_string()),
            seed_admin_password: env_string("SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|| DEFAULT_SEED_ADMIN_PASSWORD.to_string()),
            trust_proxy: parse_flag(env_string("TRUST_PROXY").as_deref()),
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_mail_provider(raw: Option<&str>, api_key: Option<String>) -> Result<MailProvider> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        None | Some("log") => Ok(MailProvider::Log),
        Some("sendgrid") => match api_key {
            Some(api_key) => Ok(MailProvider::SendGrid { api_key }),
            None => bail!("MAIL_PROVIDER=sendgrid requires SENDGRID_API_KEY"),
        },
        Some(other) => bail!("unsupported MAIL_PROVIDER: {other}"),
    }
}

fn parse_flag(raw: Option<&str>) -> bool {
    let Some(value) = raw else {
        return false;
    };
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_provider_defaults_to_log() {
        assert_eq!(parse_mail_provider(None, None).unwrap(), MailProvider::Log);
        assert_eq!(
            parse_mail_provider(Some("LOG"), Some("key".into())).unwrap(),
            MailProvider::Log
        );
    }

    #[test]
    fn sendgrid_requires_api_key() {
        assert!(parse_mail_provider(Some("sendgrid"), None).is_err());
        assert_eq!(
            parse_mail_provider(Some("sendgrid"), Some("secret".into())).unwrap(),
            MailProvider::SendGrid {
                api_key: "secret".into()
            }
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(parse_mail_provider(Some("carrier-pigeon"), None).is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("yes")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(Some("False")));
        assert!(!parse_flag(None));
    }
}
