use std::sync::Arc;

use async_graphql::{EmptySubscription, Schema};

use crate::auth::PasswordHasher;
use crate::cdn::Cdn;
use crate::graphql::mutation::MutationRoot;
use crate::graphql::query::QueryRoot;
use crate::store::Store;

pub mod guards;
pub mod mutation;
pub mod query;

pub type AdminSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Builds the admin API schema.
///
/// The logged-in user's [Session](crate::session::Session) is attached to
/// each request separately.
pub fn build_schema(store: Store, cdn: Arc<dyn Cdn>, hasher: PasswordHasher) -> AdminSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(store)
        .data(cdn)
        .data(hasher)
        .finish()
}
