use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::Json;
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{landing_page, AuthResponse, CurrentUser, LoginForm, SignupForm};
use crate::error::{GavelError, GavelResult};
use crate::guard::LOGIN_PATH;
use crate::models::user::User;
use crate::oauth::IdentityProvider;
use crate::session::Session;
use crate::state::AppState;

const AUTHENTICATION_FAILED: &str = "/auth/login?error=authentication_failed";

#[derive(Serialize)]
pub struct SignInOption {
    pub provider: String,
    pub url: String,
}

/// The identity providers that are configured, for the login and signup pages.
pub async fn sign_in_options(State(state): State<AppState>) -> Json<Vec<SignInOption>> {
    let options = [IdentityProvider::Google, IdentityProvider::Microsoft]
        .into_iter()
        .filter(|provider| provider.authorization_url(&state.config).is_ok())
        .map(|provider| SignInOption {
            url: format!("/auth/oauth/{}", provider),
            provider: provider.to_string(),
        })
        .collect();

    Json(options)
}

pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(form): Json<LoginForm>,
) -> GavelResult<(SignedCookieJar, Json<AuthResponse>)> {
    let user = crate::auth::login(&form, &state.hasher, &state.store).await?;
    let (jar, session) = state.sessions.start(&user, jar).await;
    info!(user = %user.id, "logged in");

    Ok((jar, Json(AuthResponse::for_session(session))))
}

pub async fn signup(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(form): Json<SignupForm>,
) -> GavelResult<(StatusCode, SignedCookieJar, Json<AuthResponse>)> {
    let user = crate::auth::signup(form, &state.hasher, &state.store).await?;
    let (jar, session) = state.sessions.start(&user, jar).await;
    info!(user = %user.id, "signed up");

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse::for_session(session)),
    ))
}

pub async fn session(CurrentUser(session): CurrentUser) -> Json<Session> {
    Json(session)
}

pub async fn logout(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    headers: HeaderMap,
) -> (SignedCookieJar, Redirect) {
    let jar = state.sessions.end(jar, &headers).await;

    (jar, Redirect::to(LOGIN_PATH))
}

pub async fn start_oauth(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> GavelResult<Redirect> {
    let provider: IdentityProvider = provider.parse()?;
    let url = provider.authorization_url(&state.config)?;

    Ok(Redirect::to(&url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

async fn finish_oauth(
    state: &AppState,
    code: &str,
    provider: Option<&str>,
) -> GavelResult<User> {
    let provider: IdentityProvider = provider.unwrap_or_default().parse()?;
    let profile = state.identity.exchange(provider, code).await?;
    let user = User::for_external_profile(profile, &state.store).await?;
    if !user.is_active() {
        return Err(GavelError::InvalidCredentials);
    }

    User::record_login(&user.id, None, &state.store).await
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> (SignedCookieJar, Redirect) {
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return (jar, Redirect::to(LOGIN_PATH));
    };

    match finish_oauth(&state, &code, params.state.as_deref()).await {
        Ok(user) => {
            let (jar, session) = state.sessions.start(&user, jar).await;
            info!(user = %user.id, "logged in through identity provider");
            (jar, Redirect::to(landing_page(&session.user)))
        }
        Err(err) => {
            warn!("identity provider sign-in failed: {}", err);
            (jar, Redirect::to(AUTHENTICATION_FAILED))
        }
    }
}
