use async_graphql::ErrorExtensions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::models::permissions::Permission;
use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum GavelError {
    #[error("no {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("login required")]
    Unauthorized,
    #[error("access forbidden")]
    Forbidden(Option<Permission>),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("deletion must be confirmed")]
    ConfirmationRequired,
    #[error("the {collection} collection was modified by another writer, reload and retry")]
    StaleWrite { collection: &'static str },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("identity provider error: {0}")]
    IdentityProvider(String),
    #[error("cdn error: {0}")]
    Cdn(String),
    #[error("server error: {0}")]
    Server(String),
}

pub type GavelResult<T> = Result<T, GavelError>;

impl GavelError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        GavelError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GavelError::NotFound { .. } => StatusCode::NOT_FOUND,
            GavelError::InvalidCredentials | GavelError::Unauthorized => StatusCode::UNAUTHORIZED,
            GavelError::Forbidden(_) => StatusCode::FORBIDDEN,
            GavelError::BadRequest(_) | GavelError::ConfirmationRequired => StatusCode::BAD_REQUEST,
            GavelError::Conflict(_) | GavelError::StaleWrite { .. } => StatusCode::CONFLICT,
            GavelError::IdentityProvider(_) | GavelError::Cdn(_) => StatusCode::BAD_GATEWAY,
            GavelError::Storage(_) | GavelError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A stable name for the kind of error, for API clients to match on.
    pub fn code(&self) -> &'static str {
        match self {
            GavelError::NotFound { .. } => "NOT_FOUND",
            GavelError::InvalidCredentials => "INVALID_CREDENTIALS",
            GavelError::Unauthorized => "UNAUTHORIZED",
            GavelError::Forbidden(_) => "FORBIDDEN",
            GavelError::BadRequest(_) => "BAD_REQUEST",
            GavelError::Conflict(_) => "CONFLICT",
            GavelError::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            GavelError::StaleWrite { .. } => "STALE_WRITE",
            GavelError::Storage(_) => "STORAGE",
            GavelError::IdentityProvider(_) => "IDENTITY_PROVIDER",
            GavelError::Cdn(_) => "CDN",
            GavelError::Server(_) => "SERVER",
        }
    }
}

impl ErrorExtensions for GavelError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, extensions| {
            extensions.set("code", self.code());
            if let GavelError::Forbidden(Some(permission)) = self {
                extensions.set("requiredPermission", permission.describe().name);
            }
        })
    }
}

impl IntoResponse for GavelError {
    fn into_response(self) -> Response {
        let body = match &self {
            GavelError::Forbidden(Some(permission)) => json!({
                "message": self.to_string(),
                "code": self.code(),
                "required_permission": permission,
            }),
            GavelError::NotFound { kind, id } => json!({
                "message": self.to_string(),
                "code": self.code(),
                "kind": kind,
                "id": id,
            }),
            _ => json!({ "message": self.to_string(), "code": self.code() }),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
