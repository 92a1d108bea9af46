//! Permission checks for the admin API.
//!
//! Sessions carry a snapshot of the user taken at login, so every check here
//! goes back to the live user record: edits to a user's role or permissions,
//! suspensions and deletions all take effect on the next request.

use async_graphql::{Context, ErrorExtensions, Guard, Result};

use crate::error::GavelError;
use crate::models::permissions::{can_administer, effective_permissions, has_permission, Permission};
use crate::models::user::User;
use crate::session::Session;
use crate::store::Store;

/// The live record of the logged-in user.
pub async fn viewer(ctx: &Context<'_>) -> Result<User> {
    let session = ctx
        .data_opt::<Session>()
        .ok_or_else(|| GavelError::Unauthorized.extend())?;
    let store = Store::from_ctx(ctx);

    User::with_id_opt(&session.user.id, store)
        .await
        .filter(User::is_active)
        .ok_or_else(|| GavelError::Unauthorized.extend())
}

/// Requires the logged-in user to hold a permission. Anonymous requests and
/// sessions whose user is gone or inactive fail as unauthorized.
pub struct Requires(pub Permission);

impl Guard for Requires {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if has_permission(&viewer(ctx).await?, self.0) {
            Ok(())
        } else {
            Err(GavelError::Forbidden(Some(self.0)).extend())
        }
    }
}

/// Requires the logged-in user to be able to open the dashboard at all.
pub struct DashboardAccess;

impl Guard for DashboardAccess {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if can_administer(&viewer(ctx).await?) {
            Ok(())
        } else {
            Err(GavelError::Forbidden(None).extend())
        }
    }
}

/// Refuses to let `actor` act on an account holding any permission `actor`
/// lacks, so that a user manager cannot take over an administrator.
pub fn ensure_outranks(actor: &User, target: &User) -> Result<()> {
    let held = effective_permissions(actor);
    match effective_permissions(target)
        .into_iter()
        .find(|permission| !held.contains(permission))
    {
        Some(missing) => Err(GavelError::Forbidden(Some(missing)).extend()),
        None => Ok(()),
    }
}
