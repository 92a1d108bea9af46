use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use tracing::info;

use crate::auth::PasswordHasher;
use crate::cdn::Cdn;
use crate::config::Config;
use crate::error::GavelResult;
use crate::graphql::{build_schema, AdminSchema};
use crate::models::user::AdminUser;
use crate::oauth::IdentityClient;
use crate::session::SessionStore;
use crate::store::Store;
use crate::util::current_time;

/// Everything a request handler may need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub sessions: SessionStore,
    pub hasher: PasswordHasher,
    pub cdn: Arc<dyn Cdn>,
    pub identity: Arc<dyn IdentityClient>,
    pub schema: AdminSchema,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Store,
        cdn: Arc<dyn Cdn>,
        identity: Arc<dyn IdentityClient>,
    ) -> Self {
        let hasher = PasswordHasher::new(config.bcrypt_cost);
        let sessions = SessionStore::new(store.clone(), config.session_ttl, config.secure_cookies);
        let schema = build_schema(store.clone(), cdn.clone(), hasher);

        Self {
            cookie_key: config.session_key.clone(),
            config: Arc::new(config),
            store,
            sessions,
            hasher,
            cdn,
            identity,
            schema,
        }
    }

    /// Brings stored data up to date, prunes expired sessions and seeds the
    /// administrator account.
    pub async fn prepare(&self) -> GavelResult<()> {
        self.store.migrate_legacy().await?;
        self.sessions.prune_expired(current_time()).await?;

        match self.config.admin_password.as_deref() {
            Some(password) => {
                let admin = AdminUser::seed(
                    &self.config.admin_name,
                    &self.config.admin_email,
                    password,
                    &self.hasher,
                    &self.store,
                )
                .await?;
                info!(email = %admin.email, "administrator account ready");
            }
            None => info!("ADMIN_PASSWORD not set, skipping administrator seeding"),
        }

        Ok(())
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
