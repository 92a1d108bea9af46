use async_graphql::{Context, Enum, Object, Result, ResultExt};

use crate::graphql::guards::{viewer, DashboardAccess, Requires};
use crate::models::dashboard::Dashboard;
use crate::models::event::{Event, EventFilter};
use crate::models::permissions::{Permission, PermissionInfo, Role};
use crate::models::resource::{Resource, ResourceFilter};
use crate::models::user::{User, UserFilter};
use crate::store::Store;

/// The collections edited through the admin API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum)]
pub enum CollectionName {
    Events,
    Resources,
    Users,
}

impl CollectionName {
    fn permission(self) -> Permission {
        match self {
            CollectionName::Events => Permission::ManageEvents,
            CollectionName::Resources => Permission::ManageResources,
            CollectionName::Users => Permission::ManageUsers,
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The logged-in user
    pub async fn me(&self, ctx: &Context<'_>) -> Result<User> {
        viewer(ctx).await
    }

    /// What the logged-in user sees on the admin dashboard
    #[graphql(guard = "DashboardAccess")]
    pub async fn dashboard(&self, ctx: &Context<'_>) -> Result<Dashboard> {
        let user = viewer(ctx).await?;
        Ok(Dashboard::for_viewer(&user, Store::from_ctx(ctx)).await)
    }

    #[graphql(guard = "Requires(Permission::ManageEvents)")]
    pub async fn events(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] filter: EventFilter,
    ) -> Result<Vec<Event>> {
        Ok(Event::list(&filter, Store::from_ctx(ctx)).await)
    }

    #[graphql(guard = "Requires(Permission::ManageEvents)")]
    pub async fn event(&self, ctx: &Context<'_>, id: String) -> Result<Event> {
        Event::with_id(&id, Store::from_ctx(ctx)).await.extend()
    }

    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn resources(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] filter: ResourceFilter,
    ) -> Result<Vec<Resource>> {
        Ok(Resource::list(&filter, Store::from_ctx(ctx)).await)
    }

    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn resource(&self, ctx: &Context<'_>, id: String) -> Result<Resource> {
        Resource::with_id(&id, Store::from_ctx(ctx)).await.extend()
    }

    #[graphql(guard = "Requires(Permission::ManageUsers)")]
    pub async fn users(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] filter: UserFilter,
    ) -> Result<Vec<User>> {
        Ok(User::list(&filter, Store::from_ctx(ctx)).await)
    }

    #[graphql(guard = "Requires(Permission::ManageUsers)")]
    pub async fn user(&self, ctx: &Context<'_>, id: String) -> Result<User> {
        User::with_id(&id, Store::from_ctx(ctx)).await.extend()
    }

    /// Every role a user can be given
    #[graphql(guard = "DashboardAccess")]
    pub async fn roles(&self, ctx: &Context<'_>) -> Result<Vec<Role>> {
        Ok(Role::all().to_vec())
    }

    /// Every permission, with how it should be displayed
    #[graphql(guard = "DashboardAccess")]
    pub async fn permissions(&self, ctx: &Context<'_>) -> Result<Vec<PermissionInfo>> {
        Ok(Permission::ALL.into_iter().map(Permission::describe).collect())
    }

    /// The current revision of a collection, to pass as `expectedRevision`
    /// when editing from a list loaded earlier
    #[graphql(guard = "Requires(name.permission())")]
    pub async fn collection_revision(
        &self,
        ctx: &Context<'_>,
        name: CollectionName,
    ) -> Result<u64> {
        let store = Store::from_ctx(ctx);

        Ok(match name {
            CollectionName::Events => store.events().revision().await,
            CollectionName::Resources => store.resources().revision().await,
            CollectionName::Users => store.users().revision().await,
        })
    }
}
