use std::sync::Arc;

use async_graphql::{Context, ErrorExtensions, Object, Result, ResultExt};

use crate::auth::PasswordHasher;
use crate::cdn::Cdn;
use crate::error::GavelError;
use crate::graphql::guards::{ensure_outranks, viewer, Requires};
use crate::models::event::{Event, EventUpdate, NewEvent};
use crate::models::permissions::{has_permission, Permission};
use crate::models::resource::{CdnMetadata, NewResource, Resource, ResourceUpdate, ResourceUpload};
use crate::models::user::{NewUser, User, UserUpdate};
use crate::store::Store;

pub struct MutationRoot;

fn cdn<'c>(ctx: &Context<'c>) -> &'c dyn Cdn {
    ctx.data_unchecked::<Arc<dyn Cdn>>().as_ref()
}

/// Assigning roles and granting permissions need their own permissions on
/// top of being able to manage users.
fn ensure_can_assign(user: &User, role: bool, permissions: bool) -> Result<()> {
    if role && !has_permission(user, Permission::ManageRoles) {
        return Err(GavelError::Forbidden(Some(Permission::ManageRoles)).extend());
    }
    if permissions && !has_permission(user, Permission::ManagePermissions) {
        return Err(GavelError::Forbidden(Some(Permission::ManagePermissions)).extend());
    }

    Ok(())
}

/// Whether an update touches who can sign in to an account or what it may
/// do. Those fields may only be changed by someone holding every permission
/// the account holds.
fn changes_access(update: &UserUpdate) -> bool {
    update.password.is_some()
        || update.email.is_some()
        || update.status.is_some()
        || update.role.is_some()
        || update.permissions.is_some()
}

#[Object]
impl MutationRoot {
    #[graphql(guard = "Requires(Permission::ManageEvents)")]
    pub async fn create_event(
        &self,
        ctx: &Context<'_>,
        new_event: NewEvent,
        expected_revision: Option<u64>,
    ) -> Result<Event> {
        Event::create(new_event, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Changes the given fields of an event, leaving the rest alone
    #[graphql(guard = "Requires(Permission::ManageEvents)")]
    pub async fn update_event(
        &self,
        ctx: &Context<'_>,
        id: String,
        update: EventUpdate,
        expected_revision: Option<u64>,
    ) -> Result<Event> {
        Event::update(&id, update, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Deletes an event, which must be confirmed
    #[graphql(guard = "Requires(Permission::ManageEvents)")]
    pub async fn delete_event(
        &self,
        ctx: &Context<'_>,
        id: String,
        confirm: bool,
        expected_revision: Option<u64>,
    ) -> Result<Event> {
        Event::delete(&id, confirm, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Adds a resource that links to a file hosted elsewhere
    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn create_resource(
        &self,
        ctx: &Context<'_>,
        new_resource: NewResource,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        Resource::create(new_resource, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Uploads a file to the CDN and adds it as a resource
    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn upload_resource(
        &self,
        ctx: &Context<'_>,
        upload: ResourceUpload,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        Resource::create_from_upload(upload, cdn(ctx), expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn update_resource(
        &self,
        ctx: &Context<'_>,
        id: String,
        update: ResourceUpdate,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        Resource::update(&id, update, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Changes how the CDN serves an uploaded resource
    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn update_resource_metadata(
        &self,
        ctx: &Context<'_>,
        id: String,
        metadata: CdnMetadata,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        Resource::update_metadata(
            &id,
            metadata,
            cdn(ctx),
            expected_revision,
            Store::from_ctx(ctx),
        )
        .await
        .extend()
    }

    /// Deletes a resource along with its uploaded file, which must be confirmed
    #[graphql(guard = "Requires(Permission::ManageResources)")]
    pub async fn delete_resource(
        &self,
        ctx: &Context<'_>,
        id: String,
        confirm: bool,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        Resource::delete(
            &id,
            confirm,
            cdn(ctx),
            expected_revision,
            Store::from_ctx(ctx),
        )
        .await
        .extend()
    }

    #[graphql(guard = "Requires(Permission::ManageUsers)")]
    pub async fn create_user(
        &self,
        ctx: &Context<'_>,
        new_user: NewUser,
        expected_revision: Option<u64>,
    ) -> Result<User> {
        let admin = viewer(ctx).await?;
        ensure_can_assign(
            &admin,
            new_user.role.is_some(),
            !new_user.permissions.is_empty(),
        )?;

        let hasher: &PasswordHasher = ctx.data_unchecked();
        User::create(new_user, hasher, expected_revision, Store::from_ctx(ctx))
            .await
            .extend()
    }

    /// Changes the given fields of a user, leaving the rest alone
    #[graphql(guard = "Requires(Permission::ManageUsers)")]
    pub async fn update_user(
        &self,
        ctx: &Context<'_>,
        id: String,
        update: UserUpdate,
        expected_revision: Option<u64>,
    ) -> Result<User> {
        let admin = viewer(ctx).await?;
        ensure_can_assign(&admin, update.role.is_some(), update.permissions.is_some())?;

        let store = Store::from_ctx(ctx);
        if changes_access(&update) {
            let target = User::with_id(&id, store).await.extend()?;
            ensure_outranks(&admin, &target)?;
        }

        let hasher: &PasswordHasher = ctx.data_unchecked();
        User::update(&id, update, hasher, expected_revision, store)
            .await
            .extend()
    }

    /// Deletes a user, which must be confirmed
    #[graphql(guard = "Requires(Permission::ManageUsers)")]
    pub async fn delete_user(
        &self,
        ctx: &Context<'_>,
        id: String,
        confirm: bool,
        expected_revision: Option<u64>,
    ) -> Result<User> {
        let admin = viewer(ctx).await?;
        let store = Store::from_ctx(ctx);
        let target = User::with_id(&id, store).await.extend()?;
        ensure_outranks(&admin, &target)?;

        User::delete(&id, confirm, expected_revision, store)
            .await
            .extend()
    }
}

#[cfg(test)]
mod tests {
    use async_graphql::{Request, Value};
    use serde_json::json;

    use crate::graphql::build_schema;
    use crate::models::user::AdminUser;
    use crate::tests::mock::{
        memory_store, mock_session, seeded_admin, session_for, test_hasher, MockCdn,
    };

    use super::*;

    async fn run(
        store: &Store,
        session: Option<crate::session::Session>,
        query: &str,
    ) -> async_graphql::Response {
        let cdn: Arc<dyn Cdn> = Arc::new(MockCdn::default());
        let schema = build_schema(store.clone(), cdn, test_hasher());
        let request = Request::new(query);
        let request = match session {
            Some(session) => request.data(session),
            None => request,
        };

        schema.execute(request).await
    }

    fn error_code(response: &async_graphql::Response) -> Option<String> {
        let error = response.errors.first()?;
        match error.extensions.as_ref()?.get("code")? {
            Value::String(code) => Some(code.clone()),
            _ => None,
        }
    }

    const CREATE_EVENT: &str = r#"mutation {
        createEvent(newEvent: {
            title: "Spring Conf", date: "2024-03-15", time: "09:00",
            location: "Hall A", type: COMPETITION
        }) { id title type }
    }"#;

    #[tokio::test]
    async fn admins_manage_events() {
        let store = memory_store();
        let admin = seeded_admin(&store).await;
        let session = session_for(&admin);

        let response = run(&store, Some(session.clone()), CREATE_EVENT).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["createEvent"]["title"], json!("Spring Conf"));
        assert_eq!(data["createEvent"]["type"], json!("COMPETITION"));
        let id = data["createEvent"]["id"].as_str().unwrap().to_owned();

        let unconfirmed = format!(r#"mutation {{ deleteEvent(id: "{}", confirm: false) {{ id }} }}"#, id);
        let response = run(&store, Some(session.clone()), &unconfirmed).await;
        assert_eq!(error_code(&response).as_deref(), Some("CONFIRMATION_REQUIRED"));
        assert_eq!(Event::all(&store).await.len(), 1);

        let confirmed = format!(r#"mutation {{ deleteEvent(id: "{}", confirm: true) {{ id }} }}"#, id);
        let response = run(&store, Some(session), &confirmed).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert!(Event::all(&store).await.is_empty());
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let store = memory_store();
        let response = run(&store, None, CREATE_EVENT).await;

        assert_eq!(error_code(&response).as_deref(), Some("UNAUTHORIZED"));
        assert!(Event::all(&store).await.is_empty());
    }

    #[tokio::test]
    async fn sessions_for_deleted_users_stop_working() {
        let store = memory_store();
        let response = run(&store, Some(mock_session("admin", &[])), CREATE_EVENT).await;

        assert_eq!(error_code(&response).as_deref(), Some("UNAUTHORIZED"));
    }

    #[tokio::test]
    async fn permissions_are_checked_against_the_live_record() {
        let store = memory_store();
        let hasher = test_hasher();
        let member = User::create(
            NewUser {
                name: "Ada".to_owned(),
                email: "ada@umd.edu".to_owned(),
                ..Default::default()
            },
            &hasher,
            None,
            &store,
        )
        .await
        .unwrap();
        let session = session_for(&member);

        let response = run(&store, Some(session.clone()), CREATE_EVENT).await;
        assert_eq!(error_code(&response).as_deref(), Some("FORBIDDEN"));

        let grant = UserUpdate {
            permissions: Some(vec![Permission::ManageEvents]),
            ..Default::default()
        };
        User::update(&member.id, grant, &hasher, None, &store)
            .await
            .unwrap();

        let response = run(&store, Some(session), CREATE_EVENT).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
    }

    #[tokio::test]
    async fn stale_revisions_are_reported() {
        let store = memory_store();
        let admin = seeded_admin(&store).await;
        let session = session_for(&admin);
        run(&store, Some(session.clone()), CREATE_EVENT).await;

        let stale = r#"mutation {
            createEvent(newEvent: { title: "Late" }, expectedRevision: 0) { id }
        }"#;
        let response = run(&store, Some(session), stale).await;
        assert_eq!(error_code(&response).as_deref(), Some("STALE_WRITE"));
        assert_eq!(Event::all(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn user_managers_cannot_grant_permissions_without_permission() {
        let store = memory_store();
        let hasher = test_hasher();
        let manager = User::create(
            NewUser {
                name: "Grace".to_owned(),
                email: "grace@umd.edu".to_owned(),
                permissions: vec![Permission::ManageUsers],
                ..Default::default()
            },
            &hasher,
            None,
            &store,
        )
        .await
        .unwrap();

        let escalate = format!(
            r#"mutation {{ updateUser(id: "{}", update: {{ permissions: [MANAGE_EVENTS] }}) {{ id }} }}"#,
            manager.id
        );
        let response = run(&store, Some(session_for(&manager)), &escalate).await;
        assert_eq!(error_code(&response).as_deref(), Some("FORBIDDEN"));

        let rename = format!(
            r#"mutation {{ updateUser(id: "{}", update: {{ name: "Grace H." }}) {{ name }} }}"#,
            manager.id
        );
        let response = run(&store, Some(session_for(&manager)), &rename).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
    }

    #[tokio::test]
    async fn user_managers_cannot_take_over_stronger_accounts() {
        let store = memory_store();
        let hasher = test_hasher();
        let admin = seeded_admin(&store).await;
        let manager = User::create(
            NewUser {
                name: "Grace".to_owned(),
                email: "grace@umd.edu".to_owned(),
                permissions: vec![Permission::ManageUsers],
                ..Default::default()
            },
            &hasher,
            None,
            &store,
        )
        .await
        .unwrap();
        let member = User::create(
            NewUser {
                name: "Ada".to_owned(),
                email: "ada@umd.edu".to_owned(),
                ..Default::default()
            },
            &hasher,
            None,
            &store,
        )
        .await
        .unwrap();
        let session = session_for(&manager);

        for update in [
            r#"password: "Hijack3d!pass""#,
            r#"email: "grace+admin@umd.edu""#,
            "status: SUSPENDED",
        ] {
            let query = format!(
                r#"mutation {{ updateUser(id: "{}", update: {{ {} }}) {{ id }} }}"#,
                admin.id, update
            );
            let response = run(&store, Some(session.clone()), &query).await;
            assert_eq!(error_code(&response).as_deref(), Some("FORBIDDEN"), "{}", update);
        }
        assert_eq!(User::with_id(&admin.id, &store).await.unwrap(), admin);

        let delete = format!(
            r#"mutation {{ deleteUser(id: "{}", confirm: true) {{ id }} }}"#,
            admin.id
        );
        let response = run(&store, Some(session.clone()), &delete).await;
        assert_eq!(error_code(&response).as_deref(), Some("FORBIDDEN"));
        assert_eq!(User::all(&store).await.len(), 3);

        let reset = format!(
            r#"mutation {{ updateUser(id: "{}", update: {{ password: "N3w!member" }}) {{ id }} }}"#,
            member.id
        );
        let response = run(&store, Some(session.clone()), &reset).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let delete = format!(
            r#"mutation {{ deleteUser(id: "{}", confirm: true) {{ id }} }}"#,
            member.id
        );
        let response = run(&store, Some(session), &delete).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(User::all(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn dashboard_lists_visible_panels() {
        let store = memory_store();
        let admin = seeded_admin(&store).await;
        assert!(AdminUser::get(&store).await.is_some());

        let response = run(
            &store,
            Some(session_for(&admin)),
            "{ dashboard { panels userCount } me { email effectivePermissions } }",
        )
        .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["dashboard"]["userCount"], json!(1));
        assert_eq!(data["dashboard"]["panels"].as_array().unwrap().len(), 5);
        assert_eq!(
            data["me"]["effectivePermissions"].as_array().unwrap().len(),
            Permission::ALL.len()
        );
    }
}
