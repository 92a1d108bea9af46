use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context as _, Result};
use axum_extra::extract::cookie::Key;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use time::Duration;
use tracing::{info, warn};

/// Credentials for one identity provider.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub session_ttl: Duration,
    pub session_key: Key,
    pub secure_cookies: bool,
    pub bcrypt_cost: u32,
    pub public_url: String,
    pub admin_email: String,
    pub admin_name: String,
    pub admin_password: Option<String>,
    pub google: Option<OAuthClient>,
    pub microsoft: Option<OAuthClient>,
    pub microsoft_tenant_id: String,
    pub cdn_dir: PathBuf,
    pub cdn_public_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir: PathBuf = try_load("GAVEL_DATA_DIR", "./data")?;
        let session_ttl_hours: i64 = try_load("SESSION_TTL_HOURS", "24")?;
        if session_ttl_hours <= 0 {
            bail!("SESSION_TTL_HOURS must be positive, got {session_ttl_hours}");
        }

        Ok(Self {
            port: try_load("GAVEL_PORT", "3000")?,
            session_ttl: Duration::hours(session_ttl_hours),
            session_key: session_key()?,
            secure_cookies: try_load("SECURE_COOKIES", "false")?,
            bcrypt_cost: try_load("BCRYPT_COST", &bcrypt::DEFAULT_COST.to_string())?,
            public_url: try_load::<String>("PUBLIC_URL", "http://localhost:3000")?
                .trim_end_matches('/')
                .to_owned(),
            admin_email: try_load("ADMIN_EMAIL", "admin@umdfbla.org")?,
            admin_name: try_load("ADMIN_NAME", "Administrator")?,
            admin_password: optional("ADMIN_PASSWORD"),
            google: oauth_client("GOOGLE"),
            microsoft: oauth_client("MICROSOFT"),
            microsoft_tenant_id: try_load("MICROSOFT_TENANT_ID", "common")?,
            cdn_dir: optional("CDN_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("cdn")),
            cdn_public_url: try_load("CDN_PUBLIC_URL", "/cdn")?,
            data_dir,
        })
    }

    /// Where identity providers send users back to.
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.public_url)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let value = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_owned()
    });

    value
        .trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("Invalid {key} value: {err}"))
}

fn oauth_client(provider: &str) -> Option<OAuthClient> {
    let client_id = optional(&format!("{provider}_CLIENT_ID"));
    let client_secret = optional(&format!("{provider}_CLIENT_SECRET"));

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Some(OAuthClient {
            client_id,
            client_secret,
        }),
        (None, None) => {
            info!("{provider} sign-in is not configured");
            None
        }
        _ => {
            warn!("{provider} sign-in needs both a client id and a client secret, disabling it");
            None
        }
    }
}

fn session_key() -> Result<Key> {
    match optional("SESSION_SECRET") {
        Some(secret) => {
            let bytes = STANDARD
                .decode(secret.trim())
                .context("SESSION_SECRET must be base64")?;
            Key::try_from(bytes.as_slice())
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must decode to at least 64 bytes"))
        }
        None => {
            warn!("SESSION_SECRET not set, sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}
