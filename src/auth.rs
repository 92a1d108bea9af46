//! Authentication for the site.
//!
//! Passwords are checked here; sessions are handed out by the
//! [SessionStore](crate::session::SessionStore). Use the [CurrentUser]
//! extractor in handlers that need someone to be logged in.

use std::sync::OnceLock;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::SignedCookieJar;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GavelError, GavelResult};
use crate::models::permissions::can_administer;
use crate::models::user::{NewUser, User};
use crate::session::{Session, SessionUser};
use crate::state::AppState;
use crate::store::Store;
use crate::util::new_id;

/// Hashes and checks passwords with bcrypt.
#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

/// The outcome of checking a password against a stored one.
#[derive(Debug, PartialEq)]
pub enum Verification {
    Invalid,
    /// The password matched; `rehash` holds a bcrypt hash to store if the
    /// stored password predates hashing.
    Valid { rehash: Option<String> },
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    fn throwaway_hash(&self) -> &'static str {
        static THROWAWAY: OnceLock<String> = OnceLock::new();
        THROWAWAY.get_or_init(|| {
            bcrypt::hash(new_id(), self.cost).unwrap_or_else(|err| {
                warn!("failed to prepare throwaway hash: {}", err);
                String::new()
            })
        })
    }

    pub fn hash(&self, password: &str) -> GavelResult<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|err| GavelError::Server(format!("failed to hash password: {}", err)))
    }

    /// Checks `password` against a stored hash. An empty `stored` stands
    /// for an account without a password, or no account at all, and is
    /// checked against a throwaway hash so that it takes as long as a
    /// wrong password.
    pub fn verify(&self, password: &str, stored: &str) -> Verification {
        if stored.is_empty() {
            let _ = bcrypt::verify(password, self.throwaway_hash());
            return Verification::Invalid;
        }

        if stored.starts_with("$2") {
            return match bcrypt::verify(password, stored) {
                Ok(true) => Verification::Valid { rehash: None },
                Ok(false) => Verification::Invalid,
                Err(err) => {
                    warn!("unreadable password hash: {}", err);
                    Verification::Invalid
                }
            };
        }

        // stored before passwords were hashed
        if password != stored {
            return Verification::Invalid;
        }
        match self.hash(password) {
            Ok(hash) => Verification::Valid { rehash: Some(hash) },
            Err(err) => {
                warn!("failed to upgrade legacy password: {}", err);
                Verification::Valid { rehash: None }
            }
        }
    }
}

struct PasswordRequirement {
    description: &'static str,
    pattern: &'static str,
}

const PASSWORD_REQUIREMENTS: [PasswordRequirement; 5] = [
    PasswordRequirement {
        description: "At least 8 characters long",
        pattern: r"^.{8,}$",
    },
    PasswordRequirement {
        description: "Contains uppercase letter",
        pattern: r"[A-Z]",
    },
    PasswordRequirement {
        description: "Contains lowercase letter",
        pattern: r"[a-z]",
    },
    PasswordRequirement {
        description: "Contains number",
        pattern: r"[0-9]",
    },
    PasswordRequirement {
        description: "Contains special character",
        pattern: r#"[!@#$%^&*(),.?":{}|<>]"#,
    },
];

fn password_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PASSWORD_REQUIREMENTS
            .iter()
            .map(|requirement| {
                let pattern =
                    Regex::new(requirement.pattern).expect("password patterns are valid");
                (pattern, requirement.description)
            })
            .collect()
    })
}

/// The complexity requirements a password fails to meet.
pub fn unmet_password_requirements(password: &str) -> Vec<&'static str> {
    password_patterns()
        .iter()
        .filter(|(pattern, _)| !pattern.is_match(password))
        .map(|(_, description)| *description)
        .collect()
}

pub fn validate_email(email: &str) -> GavelResult<()> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let pattern = EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

    if pattern.is_match(email) {
        Ok(())
    } else {
        Err(GavelError::BadRequest(format!("{:?} is not a valid email", email)))
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// What a client gets back after logging in or signing up.
#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: SessionUser,
    pub redirect: &'static str,
}

impl AuthResponse {
    pub fn for_session(session: Session) -> Self {
        Self {
            token: session.token.to_string(),
            redirect: landing_page(&session.user),
            user: session.user,
        }
    }
}

/// Where a user lands after logging in.
pub fn landing_page(user: &SessionUser) -> &'static str {
    if can_administer(user) {
        "/admin/dashboard"
    } else {
        "/"
    }
}

/// Checks an email and password, stamping the login on success.
///
/// Unknown emails, wrong passwords and inactive accounts all fail the same way.
pub async fn login(form: &LoginForm, hasher: &PasswordHasher, store: &Store) -> GavelResult<User> {
    let user = User::with_email_opt(form.email.trim(), store).await;
    let stored = user.as_ref().map_or("", |user| user.password_hash.as_str());

    let rehash = match hasher.verify(&form.password, stored) {
        Verification::Valid { rehash } => rehash,
        Verification::Invalid => return Err(GavelError::InvalidCredentials),
    };
    let user = user.ok_or(GavelError::InvalidCredentials)?;
    if !user.is_active() {
        info!(user = %user.id, "refusing login for inactive account");
        return Err(GavelError::InvalidCredentials);
    }
    if rehash.is_some() {
        info!(user = %user.id, "upgrading legacy password to bcrypt");
    }

    User::record_login(&user.id, rehash, store).await
}

pub async fn signup(form: SignupForm, hasher: &PasswordHasher, store: &Store) -> GavelResult<User> {
    if [&form.name, &form.email, &form.password, &form.confirm_password]
        .iter()
        .any(|field| field.trim().is_empty())
    {
        return Err(GavelError::BadRequest("All fields are required".to_owned()));
    }
    if form.password != form.confirm_password {
        return Err(GavelError::BadRequest("Passwords do not match".to_owned()));
    }
    let unmet = unmet_password_requirements(&form.password);
    if !unmet.is_empty() {
        return Err(GavelError::BadRequest(format!(
            "Password does not meet complexity requirements: {}",
            unmet.join("; ")
        )));
    }

    let new_user = NewUser {
        name: form.name.trim().to_owned(),
        email: form.email.trim().to_owned(),
        password: Some(form.password),
        ..Default::default()
    };
    let user = User::create(new_user, hasher, None, store).await?;
    User::record_login(&user.id, None, store).await
}

/// The logged-in user making a request.
///
/// Rejects the request with 401 when there is no live session.
pub struct CurrentUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = GavelError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> GavelResult<Self> {
        let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        state
            .sessions
            .current(&jar, &parts.headers)
            .await
            .map(CurrentUser)
            .ok_or(GavelError::Unauthorized)
    }
}
