use async_graphql::{ComplexObject, Enum, InputObject, SimpleObject};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use super::permissions::{effective_permissions, Grantee, Permission, Role};
use super::unknown_time;
use crate::auth::{validate_email, PasswordHasher};
use crate::error::{GavelError, GavelResult};
use crate::store::collection::Record;
use crate::store::Store;
use crate::util::{contains_ignore_case, current_time, current_time_after, new_id};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Pending,
    Suspended,
}

#[derive(SimpleObject, InputObject, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[graphql(input_name = "SocialLinksInput")]
pub struct SocialLinks {
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
    pub instagram: Option<String>,
}

#[derive(SimpleObject, InputObject, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[graphql(input_name = "ContactInfoInput")]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub social_media: Option<SocialLinks>,
}

/// A chapter account.
#[derive(SimpleObject, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[graphql(complex)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The ID of the user
    #[serde(default)]
    pub id: String,
    /// The user's display name
    pub name: String,
    /// The user's email, which they log in with and which must be unique
    pub email: String,
    /// A bcrypt hash of the password, or empty for accounts that only sign in
    /// through an identity provider
    #[graphql(skip)]
    #[serde(default, rename = "password")]
    pub password_hash: String,
    /// The id of the user's role (see `roles`)
    #[serde(default = "member_role")]
    pub role: String,
    /// Permissions granted on top of those from the role
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// The officer position held, if any
    #[serde(default)]
    pub position: Option<String>,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub updated_at: OffsetDateTime,
    /// When the user last logged in
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_login: Option<OffsetDateTime>,
    #[serde(default)]
    pub status: UserStatus,
    /// A link to a profile picture
    #[serde(default)]
    pub profile_image: Option<String>,
    /// A short biography
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub contact_info: Option<ContactInfo>,
    /// The identity provider subject this account signs in as, if linked
    #[graphql(skip)]
    #[serde(default)]
    pub external_id: Option<String>,
}

fn member_role() -> String {
    Role::MEMBER.to_owned()
}

#[ComplexObject]
impl User {
    /// Every permission held, from the role and from individual grants
    async fn effective_permissions(&self) -> Vec<Permission> {
        effective_permissions(self).into_iter().collect()
    }
}

impl Grantee for User {
    fn role(&self) -> &str {
        &self.role
    }

    fn granted_permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

impl Record for User {
    const KIND: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// Leave empty for accounts that will only sign in through an identity provider
    pub password: Option<String>,
    pub role: Option<String>,
    #[graphql(default)]
    pub permissions: Vec<Permission>,
    pub position: Option<String>,
    pub status: Option<UserStatus>,
    pub profile_image: Option<String>,
    pub bio: Option<String>,
    pub contact_info: Option<ContactInfo>,
}

/// Fields to change on a user; omitted fields are left as they are.
#[derive(InputObject, Clone, Debug, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Vec<Permission>>,
    pub position: Option<String>,
    pub status: Option<UserStatus>,
    pub profile_image: Option<String>,
    pub bio: Option<String>,
    pub contact_info: Option<ContactInfo>,
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct UserFilter {
    /// Matched case-insensitively against the name and email
    pub search: Option<String>,
    pub role: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let matches_search = self.search.as_deref().map_or(true, |search| {
            contains_ignore_case(&user.name, search) || contains_ignore_case(&user.email, search)
        });
        let matches_role = self.role.as_deref().map_or(true, |role| user.role == role);

        matches_search && matches_role
    }
}

/// The profile an identity provider hands back after a successful sign-in.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalProfile {
    pub subject: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

fn ensure_known_role(role: &str) -> GavelResult<()> {
    if Role::with_id(role).is_some() {
        Ok(())
    } else {
        Err(GavelError::BadRequest(format!("unknown role {}", role)))
    }
}

fn ensure_email_unused(email: &str, users: &[User], except_id: Option<&str>) -> GavelResult<()> {
    let taken = users.iter().any(|user| {
        user.email.eq_ignore_ascii_case(email) && Some(user.id.as_str()) != except_id
    });

    if taken {
        Err(GavelError::Conflict(
            "An account with this email already exists".to_owned(),
        ))
    } else {
        Ok(())
    }
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Fills in fields that records from older versions may lack.
    ///
    /// Returns whether anything changed.
    pub fn normalized(mut self) -> (Self, bool) {
        let mut changed = false;

        if self.id.is_empty() {
            self.id = new_id();
            changed = true;
        }
        if self.role == "user" {
            self.role = member_role();
            changed = true;
        }
        if self.updated_at == unknown_time() && self.created_at != unknown_time() {
            self.updated_at = self.created_at;
            changed = true;
        }

        (self, changed)
    }

    pub async fn with_id(id: &str, store: &Store) -> GavelResult<Self> {
        Self::with_id_opt(id, store)
            .await
            .ok_or_else(|| GavelError::not_found(Self::KIND, id))
    }

    pub async fn with_id_opt(id: &str, store: &Store) -> Option<Self> {
        store.users().find(id).await
    }

    pub async fn with_email_opt(email: &str, store: &Store) -> Option<Self> {
        Self::all(store)
            .await
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
    }

    pub async fn all(store: &Store) -> Vec<Self> {
        store.users().all().await
    }

    pub async fn list(filter: &UserFilter, store: &Store) -> Vec<Self> {
        Self::all(store)
            .await
            .into_iter()
            .filter(|user| filter.matches(user))
            .collect()
    }

    pub async fn create(
        new_user: NewUser,
        hasher: &PasswordHasher,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        if new_user.name.trim().is_empty() {
            return Err(GavelError::BadRequest("a user needs a name".to_owned()));
        }
        validate_email(&new_user.email)?;
        let role = new_user.role.unwrap_or_else(member_role);
        ensure_known_role(&role)?;

        let password_hash = match new_user.password.as_deref() {
            Some(password) if !password.is_empty() => hasher.hash(password)?,
            _ => String::new(),
        };

        let now = current_time();
        let user = User {
            id: new_id(),
            name: new_user.name,
            email: new_user.email,
            password_hash,
            role,
            permissions: new_user.permissions,
            position: new_user.position,
            created_at: now,
            updated_at: now,
            last_login: None,
            status: new_user.status.unwrap_or_default(),
            profile_image: new_user.profile_image,
            bio: new_user.bio,
            contact_info: new_user.contact_info,
            external_id: None,
        };

        Self::insert_unique(user, expected_revision, store).await
    }

    /// Appends a user whose email no other account holds.
    pub async fn insert_unique(
        user: User,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        store
            .users()
            .insert_with(user, expected_revision, |user, users| {
                ensure_email_unused(&user.email, users, None)
            })
            .await
    }

    pub async fn update(
        id: &str,
        update: UserUpdate,
        hasher: &PasswordHasher,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        let password_hash = match update.password.as_deref() {
            Some(password) if !password.is_empty() => Some(hasher.hash(password)?),
            _ => None,
        };

        let updated = store
            .users()
            .update(id, expected_revision, |user, users| {
                if let Some(email) = update.email {
                    validate_email(&email)?;
                    ensure_email_unused(&email, users, Some(id))?;
                    user.email = email;
                }
                if let Some(role) = update.role {
                    ensure_known_role(&role)?;
                    user.role = role;
                }
                if let Some(name) = update.name {
                    user.name = name;
                }
                if let Some(hash) = password_hash {
                    user.password_hash = hash;
                }
                if let Some(permissions) = update.permissions {
                    user.permissions = permissions;
                }
                if let Some(position) = update.position {
                    user.position = Some(position);
                }
                if let Some(status) = update.status {
                    user.status = status;
                }
                if let Some(profile_image) = update.profile_image {
                    user.profile_image = Some(profile_image);
                }
                if let Some(bio) = update.bio {
                    user.bio = Some(bio);
                }
                if let Some(contact_info) = update.contact_info {
                    user.contact_info = Some(contact_info);
                }
                user.updated_at = current_time_after(user.updated_at);

                Ok(())
            })
            .await?;

        AdminUser::sync(&updated, store).await;
        Ok(updated)
    }

    pub async fn delete(
        id: &str,
        confirmed: bool,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        if !confirmed {
            return Err(GavelError::ConfirmationRequired);
        }

        let removed = store.users().remove(id, expected_revision).await?;
        AdminUser::forget(&removed, store).await;

        Ok(removed)
    }

    /// Stamps a successful login, swapping in a fresh password hash if one is given.
    pub async fn record_login(
        id: &str,
        upgraded_hash: Option<String>,
        store: &Store,
    ) -> GavelResult<Self> {
        store
            .users()
            .update(id, None, |user, _| {
                let now = current_time_after(user.updated_at);
                user.last_login = Some(now);
                user.updated_at = now;
                if let Some(hash) = upgraded_hash {
                    user.password_hash = hash;
                }

                Ok(())
            })
            .await
    }

    /// Finds the account an identity provider profile belongs to, creating
    /// a member account for first-time sign-ins.
    ///
    /// Accounts are matched on the provider subject first so that a changed
    /// email at the provider still lands on the same account. An existing
    /// account with the profile's email and no linked subject gets linked.
    pub async fn for_external_profile(profile: ExternalProfile, store: &Store) -> GavelResult<Self> {
        let users = Self::all(store).await;
        if let Some(linked) = users
            .iter()
            .find(|user| user.external_id.as_deref() == Some(profile.subject.as_str()))
        {
            return Ok(linked.clone());
        }

        if let Some(existing) = users
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(&profile.email))
        {
            if existing.external_id.is_some() {
                return Ok(existing);
            }

            let subject = profile.subject;
            return store
                .users()
                .update(&existing.id, None, |user, _| {
                    user.external_id = Some(subject);
                    user.updated_at = current_time_after(user.updated_at);
                    Ok(())
                })
                .await;
        }

        let now = current_time();
        let user = User {
            id: new_id(),
            name: profile.name,
            email: profile.email,
            password_hash: String::new(),
            role: member_role(),
            permissions: Vec::new(),
            position: None,
            created_at: now,
            updated_at: now,
            last_login: None,
            status: UserStatus::Active,
            profile_image: profile.picture,
            bio: None,
            contact_info: None,
            external_id: Some(profile.subject),
        };

        Self::insert_unique(user, None, store).await
    }
}

/// The seeded administrator account, mirrored at the `adminUser` key.
pub struct AdminUser;

impl AdminUser {
    pub async fn get(store: &Store) -> Option<User> {
        match store.kv().get(Store::ADMIN_USER).await {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .map_err(|err| warn!("corrupt admin user record: {}", err))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                warn!("failed to read admin user record: {}", err);
                None
            }
        }
    }

    async fn set(user: &User, store: &Store) -> GavelResult<()> {
        let raw = serde_json::to_string(user).map_err(crate::store::StorageError::from)?;
        store.kv().set(Store::ADMIN_USER, &raw).await?;

        Ok(())
    }

    /// Creates the administrator account unless one with that email exists.
    pub async fn seed(
        name: &str,
        email: &str,
        password: &str,
        hasher: &PasswordHasher,
        store: &Store,
    ) -> GavelResult<User> {
        if let Some(existing) = User::with_email_opt(email, store).await {
            if AdminUser::get(store).await.is_none() {
                AdminUser::set(&existing, store).await?;
            }
            return Ok(existing);
        }

        let admin = User::create(
            NewUser {
                name: name.to_owned(),
                email: email.to_owned(),
                password: Some(password.to_owned()),
                role: Some(Role::ADMIN.to_owned()),
                permissions: Permission::ALL.to_vec(),
                ..Default::default()
            },
            hasher,
            None,
            store,
        )
        .await?;
        AdminUser::set(&admin, store).await?;

        Ok(admin)
    }

    async fn sync(user: &User, store: &Store) {
        if Self::get(store).await.map_or(false, |admin| admin.id == user.id) {
            if let Err(err) = Self::set(user, store).await {
                warn!("failed to refresh admin user record: {}", err);
            }
        }
    }

    async fn forget(user: &User, store: &Store) {
        if Self::get(store).await.map_or(false, |admin| admin.id == user.id) {
            if let Err(err) = store.kv().remove(Store::ADMIN_USER).await {
                warn!("failed to remove admin user record: {}", err);
            }
        }
    }
}
