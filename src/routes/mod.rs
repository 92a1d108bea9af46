//! All routes for the site.
//!
//! | Path                    | Methods   | Purpose                                   |
//! |-------------------------|-----------|-------------------------------------------|
//! | `/`                     | GET       | overview for the home page                |
//! | `/api/events`           | GET       | public event listing                      |
//! | `/api/resources`        | GET       | public resource listing                   |
//! | `/auth/login`           | GET, POST | sign-in options, password login           |
//! | `/auth/signup`          | GET, POST | sign-up options, account creation         |
//! | `/auth/session`         | GET       | the current session                       |
//! | `/auth/logout`          | POST      | ends the session                          |
//! | `/auth/oauth/:provider` | GET       | starts a Google or Microsoft sign-in      |
//! | `/auth/callback`        | GET       | finishes an identity provider sign-in     |
//! | `/admin/dashboard`      | GET       | dashboard overview                        |
//! | `/admin/api`            | GET, POST | GraphiQL and the admin GraphQL API        |
//! | `/cdn/...`              | GET       | uploaded files, when stored locally       |
//!
//! Every request passes through the [route guard](crate::guard) first.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::cdn::LocalCdn;
use crate::config::Config;
use crate::guard::route_guard;
use crate::session::SESSION_HEADER;
use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod public;

fn cors(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(SESSION_HEADER)]);

    match HeaderValue::from_str(&config.public_url) {
        Ok(origin) => layer.allow_origin(origin).allow_credentials(true),
        Err(err) => {
            warn!("PUBLIC_URL is not a valid origin, disabling cross-origin requests: {}", err);
            layer
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(public::home))
        .route("/api/events", get(public::events))
        .route("/api/resources", get(public::resources))
        .route("/auth/login", get(auth::sign_in_options).post(auth::login))
        .route("/auth/signup", get(auth::sign_in_options).post(auth::signup))
        .route("/auth/session", get(auth::session))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/oauth/:provider", get(auth::start_oauth))
        .route("/auth/callback", get(auth::oauth_callback))
        .route("/admin", get(admin::root))
        .route("/admin/dashboard", get(admin::dashboard))
        .route("/admin/api", get(admin::graphiql).post(admin::graphql));

    let cdn_path = state.config.cdn_public_url.trim_end_matches('/');
    if cdn_path.starts_with('/') {
        router = router.nest_service(
            cdn_path,
            ServeDir::new(LocalCdn::objects_in(&state.config.cdn_dir)),
        );
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), route_guard))
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
