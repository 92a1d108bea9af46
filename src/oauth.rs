//! Sign-in through Google and Microsoft accounts.
//!
//! Users are sent to the provider's authorization page with the provider's
//! name as the `state`; the provider sends them back to `/auth/callback`
//! with a code, which an [IdentityClient] trades for the user's profile.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, OAuthClient};
use crate::error::{GavelError, GavelResult};
use crate::models::user::ExternalProfile;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const MICROSOFT_USERINFO_URL: &str = "https://graph.microsoft.com/v1.0/me";
const SCOPE: &str = "openid email profile";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityProvider {
    Google,
    Microsoft,
}

impl fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentityProvider::Google => "google",
            IdentityProvider::Microsoft => "microsoft",
        })
    }
}

impl FromStr for IdentityProvider {
    type Err = GavelError;

    fn from_str(value: &str) -> GavelResult<Self> {
        match value {
            "google" => Ok(IdentityProvider::Google),
            "microsoft" => Ok(IdentityProvider::Microsoft),
            other => Err(GavelError::BadRequest(format!(
                "unknown identity provider {:?}",
                other
            ))),
        }
    }
}

impl IdentityProvider {
    fn client<'c>(&self, config: &'c Config) -> GavelResult<&'c OAuthClient> {
        let client = match self {
            IdentityProvider::Google => config.google.as_ref(),
            IdentityProvider::Microsoft => config.microsoft.as_ref(),
        };

        client.ok_or_else(|| {
            GavelError::IdentityProvider(format!("{} sign-in is not configured", self))
        })
    }

    fn microsoft_endpoint(config: &Config, endpoint: &str) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/{}",
            config.microsoft_tenant_id, endpoint
        )
    }

    /// The provider page that starts a sign-in.
    pub fn authorization_url(&self, config: &Config) -> GavelResult<String> {
        let client = self.client(config)?;
        let redirect_uri = config.oauth_redirect_uri();
        let state = self.to_string();

        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPE),
        ];
        let base = match self {
            IdentityProvider::Google => {
                params.push(("access_type", "offline"));
                params.push(("prompt", "consent"));
                GOOGLE_AUTH_URL.to_owned()
            }
            IdentityProvider::Microsoft => {
                params.push(("response_mode", "query"));
                Self::microsoft_endpoint(config, "authorize")
            }
        };
        params.push(("state", state.as_str()));

        Url::parse_with_params(&base, &params)
            .map(String::from)
            .map_err(|err| GavelError::Server(format!("invalid authorization url: {}", err)))
    }
}

/// Trades an authorization code for the signed-in user's profile.
#[async_trait::async_trait]
pub trait IdentityClient: Send + Sync {
    async fn exchange(&self, provider: IdentityProvider, code: &str)
        -> GavelResult<ExternalProfile>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleProfile {
    sub: String,
    name: String,
    email: String,
    picture: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MicrosoftProfile {
    id: String,
    display_name: String,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

impl From<GoogleProfile> for ExternalProfile {
    fn from(profile: GoogleProfile) -> Self {
        Self {
            subject: profile.sub,
            name: profile.name,
            email: profile.email,
            picture: profile.picture,
        }
    }
}

impl TryFrom<MicrosoftProfile> for ExternalProfile {
    type Error = GavelError;

    fn try_from(profile: MicrosoftProfile) -> GavelResult<Self> {
        let email = profile
            .mail
            .or(profile.user_principal_name)
            .ok_or_else(|| {
                GavelError::IdentityProvider("microsoft profile has no email".to_owned())
            })?;

        Ok(Self {
            subject: profile.id,
            name: profile.display_name,
            email,
            picture: None,
        })
    }
}

/// Talks to the real providers over HTTPS.
pub struct HttpIdentityClient {
    http: reqwest::Client,
    config: Config,
}

impl HttpIdentityClient {
    pub fn new(config: Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn provider_error(err: reqwest::Error) -> GavelError {
        GavelError::IdentityProvider(err.to_string())
    }

    async fn access_token(&self, provider: IdentityProvider, code: &str) -> GavelResult<String> {
        let client = provider.client(&self.config)?;
        let redirect_uri = self.config.oauth_redirect_uri();
        let mut form = vec![
            ("code", code),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token_url = match provider {
            IdentityProvider::Google => GOOGLE_TOKEN_URL.to_owned(),
            IdentityProvider::Microsoft => {
                form.push(("scope", SCOPE));
                IdentityProvider::microsoft_endpoint(&self.config, "token")
            }
        };

        let response: TokenResponse = self
            .http
            .post(token_url)
            .form(&form)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Self::provider_error)?
            .json()
            .await
            .map_err(Self::provider_error)?;

        Ok(response.access_token)
    }

    async fn profile<P: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> GavelResult<P> {
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Self::provider_error)?
            .json()
            .await
            .map_err(Self::provider_error)
    }
}

#[async_trait::async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn exchange(
        &self,
        provider: IdentityProvider,
        code: &str,
    ) -> GavelResult<ExternalProfile> {
        let token = self.access_token(provider, code).await?;
        debug!(%provider, "exchanged authorization code");

        match provider {
            IdentityProvider::Google => self
                .profile::<GoogleProfile>(GOOGLE_USERINFO_URL, &token)
                .await
                .map(ExternalProfile::from),
            IdentityProvider::Microsoft => self
                .profile::<MicrosoftProfile>(MICROSOFT_USERINFO_URL, &token)
                .await
                .and_then(ExternalProfile::try_from),
        }
    }
}
