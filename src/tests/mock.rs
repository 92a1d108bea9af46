use std::path::PathBuf;
use std::sync::Mutex;

use axum_extra::extract::cookie::Key;
use time::Duration;
use uuid::Uuid;

use crate::auth::PasswordHasher;
use crate::cdn::{Cdn, UploadResponse, UploadedFile};
use crate::config::{Config, OAuthClient};
use crate::error::{GavelError, GavelResult};
use crate::models::event::{EventType, NewEvent};
use crate::models::permissions::Permission;
use crate::models::resource::{CdnMetadata, CdnProvider, NewResource, Resource, ResourceType};
use crate::models::user::{AdminUser, NewUser, User, UserStatus};
use crate::session::{Session, SessionUser};
use crate::store::{KvStore, MemoryStore, StorageError, Store};
use crate::util::{current_time, format_size};

pub const ADMIN_EMAIL: &str = "admin@umdfbla.org";
pub const ADMIN_PASSWORD: &str = "Adm1n!chapter";

pub fn memory_store() -> Store {
    Store::new(MemoryStore::new())
}

struct UnavailableStore;

#[async_trait::async_trait]
impl KvStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("disabled by policy".to_owned()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disabled by policy".to_owned()))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disabled by policy".to_owned()))
    }
}

/// A store whose every read and write fails.
pub fn unavailable_store() -> Store {
    Store::new(UnavailableStore)
}

/// Wraps a memory store, yielding to the runtime around every access so
/// that joined futures interleave at each read and write.
struct YieldingStore(MemoryStore);

#[async_trait::async_trait]
impl KvStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        tokio::task::yield_now().await;
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.remove(key).await
    }
}

pub fn yielding_store() -> Store {
    Store::new(YieldingStore(MemoryStore::new()))
}

pub fn test_hasher() -> PasswordHasher {
    PasswordHasher::new(4)
}

pub fn cookie_key() -> Key {
    Key::from(&[7u8; 64][..])
}

pub fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("gavel-{}-{}", name, Uuid::new_v4()))
}

pub fn mock_config() -> Config {
    Config {
        port: 3000,
        data_dir: scratch_dir("data"),
        session_ttl: Duration::hours(24),
        session_key: cookie_key(),
        secure_cookies: false,
        bcrypt_cost: 4,
        public_url: "http://localhost:3000".to_owned(),
        admin_email: ADMIN_EMAIL.to_owned(),
        admin_name: "Administrator".to_owned(),
        admin_password: Some(ADMIN_PASSWORD.to_owned()),
        google: Some(OAuthClient {
            client_id: "google-client".to_owned(),
            client_secret: "google-secret".to_owned(),
        }),
        microsoft: Some(OAuthClient {
            client_id: "microsoft-client".to_owned(),
            client_secret: "microsoft-secret".to_owned(),
        }),
        microsoft_tenant_id: "umd-tenant".to_owned(),
        cdn_dir: scratch_dir("cdn"),
        cdn_public_url: "/cdn".to_owned(),
    }
}

pub fn spring_conference() -> NewEvent {
    NewEvent {
        title: "Spring Conf".to_owned(),
        description: String::new(),
        date: "2024-03-15".to_owned(),
        time: "09:00".to_owned(),
        location: "Hall A".to_owned(),
        r#type: Some(EventType::Competition),
    }
}

pub fn chapter_guide() -> NewResource {
    NewResource {
        title: "Chapter Guide".to_owned(),
        description: "Everything new members need to know".to_owned(),
        r#type: Some(ResourceType::Document),
        url: "https://umdfbla.org/guide.pdf".to_owned(),
        size: "1.2 MB".to_owned(),
        mime_type: Some("application/pdf".to_owned()),
        is_public: None,
    }
}

pub fn new_member(email: &str) -> NewUser {
    NewUser {
        name: "Chapter Member".to_owned(),
        email: email.to_owned(),
        password: Some("Str0ng!pass".to_owned()),
        ..Default::default()
    }
}

pub async fn seeded_admin(store: &Store) -> User {
    AdminUser::seed(
        "Administrator",
        ADMIN_EMAIL,
        ADMIN_PASSWORD,
        &test_hasher(),
        store,
    )
    .await
    .unwrap()
}

pub fn mock_user(role: &str, permissions: &[Permission]) -> User {
    let now = current_time();
    User {
        id: Uuid::new_v4().to_string(),
        name: "Joe Schmoe".to_owned(),
        email: "joe.schmoe@umd.edu".to_owned(),
        password_hash: String::new(),
        role: role.to_owned(),
        permissions: permissions.to_vec(),
        position: None,
        created_at: now,
        updated_at: now,
        last_login: None,
        status: UserStatus::Active,
        profile_image: None,
        bio: None,
        contact_info: None,
        external_id: None,
    }
}

pub fn session_for(user: &User) -> Session {
    let now = current_time();
    Session {
        token: Uuid::new_v4(),
        user: SessionUser::from(user),
        issued_at: now,
        expires_at: now + Duration::hours(1),
    }
}

pub fn mock_session(role: &str, permissions: &[Permission]) -> Session {
    session_for(&mock_user(role, permissions))
}

pub fn uploaded_resource(upload: &UploadResponse) -> Resource {
    let now = current_time();
    Resource {
        id: Uuid::new_v4().to_string(),
        title: "Uploaded".to_owned(),
        description: String::new(),
        r#type: ResourceType::Other,
        url: upload.url.clone(),
        cdn_url: Some(upload.cdn_url.clone()),
        cdn_key: Some(upload.cdn_key.clone()),
        size: upload.size.clone(),
        mime_type: Some(upload.mime_type.clone()),
        is_public: true,
        metadata: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
struct MockCdnLog {
    uploaded: Vec<String>,
    deleted: Vec<String>,
    metadata_updates: usize,
    fail_deletes: bool,
}

/// Records what the code under test asks of the CDN.
#[derive(Default)]
pub struct MockCdn {
    log: Mutex<MockCdnLog>,
}

impl MockCdn {
    pub fn fail_deletes(&self) {
        self.log.lock().unwrap().fail_deletes = true;
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.log.lock().unwrap().uploaded.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.log.lock().unwrap().deleted.clone()
    }

    pub fn metadata_updates(&self) -> usize {
        self.log.lock().unwrap().metadata_updates
    }
}

#[async_trait::async_trait]
impl Cdn for MockCdn {
    fn provider(&self) -> CdnProvider {
        CdnProvider::Local
    }

    async fn upload(&self, file: UploadedFile) -> GavelResult<UploadResponse> {
        let key = format!("mock-{}", file.file_name);
        self.log.lock().unwrap().uploaded.push(key.clone());

        Ok(UploadResponse {
            url: format!("/cdn/{}", key),
            cdn_url: format!("/cdn/{}", key),
            size: format_size(file.content.len() as u64),
            mime_type: file.mime_type(),
            cdn_key: key,
        })
    }

    async fn delete(&self, resource: &Resource) -> GavelResult<bool> {
        let mut log = self.log.lock().unwrap();
        if log.fail_deletes {
            return Err(GavelError::Cdn("bucket unreachable".to_owned()));
        }

        match &resource.cdn_key {
            Some(key) => {
                log.deleted.push(key.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_metadata(
        &self,
        resource: &Resource,
        _metadata: &CdnMetadata,
    ) -> GavelResult<bool> {
        self.log.lock().unwrap().metadata_updates += 1;
        Ok(resource.cdn_key.is_some())
    }

    fn public_url(&self, resource: &Resource) -> String {
        match &resource.cdn_key {
            Some(key) => format!("https://cdn.umdfbla.org/{}", key),
            None => resource.url.clone(),
        }
    }
}
