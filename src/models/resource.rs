use async_graphql::{Enum, InputObject, SimpleObject};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use super::unknown_time;
use crate::cdn::{Cdn, UploadedFile};
use crate::error::{GavelError, GavelResult};
use crate::store::collection::Record;
use crate::store::Store;
use crate::util::{contains_ignore_case, current_time, current_time_after, new_id};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Presentation,
    Spreadsheet,
    #[default]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProvider {
    Cloudflare,
    Aws,
    Azure,
    Local,
}

/// Delivery settings for the object behind a resource.
#[derive(SimpleObject, InputObject, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[graphql(input_name = "CdnMetadataInput")]
#[serde(rename_all = "camelCase")]
pub struct CdnMetadata {
    pub cdn_provider: Option<CdnProvider>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub etag: Option<String>,
}

/// A downloadable file or link listed on the resources page.
#[derive(SimpleObject, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// The ID of the resource
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub r#type: ResourceType,
    /// Where the resource can be downloaded from
    pub url: String,
    /// The CDN address of the file, if it was uploaded
    #[serde(default)]
    pub cdn_url: Option<String>,
    /// The CDN object key of the file, if it was uploaded
    #[serde(default)]
    pub cdn_key: Option<String>,
    /// Human-readable size, e.g. `"2.5 MB"`
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Whether the resource is listed publicly
    #[serde(default = "listed")]
    pub is_public: bool,
    #[serde(default)]
    pub metadata: Option<CdnMetadata>,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "unknown_time")]
    pub updated_at: OffsetDateTime,
}

fn listed() -> bool {
    true
}

impl Record for Resource {
    const KIND: &'static str = "resource";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A resource that links to a file hosted elsewhere.
#[derive(InputObject, Clone, Debug, Default)]
pub struct NewResource {
    pub title: String,
    #[graphql(default)]
    pub description: String,
    pub r#type: Option<ResourceType>,
    pub url: String,
    #[graphql(default)]
    pub size: String,
    pub mime_type: Option<String>,
    pub is_public: Option<bool>,
}

/// A resource whose file is uploaded to the CDN.
#[derive(InputObject, Clone, Debug, Default)]
pub struct ResourceUpload {
    pub title: String,
    #[graphql(default)]
    pub description: String,
    pub r#type: Option<ResourceType>,
    pub is_public: Option<bool>,
    pub file_name: String,
    pub mime_type: Option<String>,
    /// The file content, base64 encoded
    pub content: String,
}

/// Fields to change on a resource; omitted fields are left as they are.
#[derive(InputObject, Clone, Debug, Default)]
pub struct ResourceUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub r#type: Option<ResourceType>,
    pub url: Option<String>,
    pub size: Option<String>,
    pub mime_type: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(InputObject, Clone, Debug, Default, Deserialize)]
pub struct ResourceFilter {
    /// Matched case-insensitively against the title and description
    pub search: Option<String>,
    pub r#type: Option<ResourceType>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &Resource) -> bool {
        let matches_search = self.search.as_deref().map_or(true, |search| {
            contains_ignore_case(&resource.title, search)
                || contains_ignore_case(&resource.description, search)
        });
        let matches_type = self
            .r#type
            .map_or(true, |r#type| resource.r#type == r#type);

        matches_search && matches_type
    }
}

fn require_title(title: &str) -> GavelResult<()> {
    if title.trim().is_empty() {
        Err(GavelError::BadRequest("a resource needs a title".to_owned()))
    } else {
        Ok(())
    }
}

impl Resource {
    pub async fn with_id(id: &str, store: &Store) -> GavelResult<Self> {
        Self::with_id_opt(id, store)
            .await
            .ok_or_else(|| GavelError::not_found(Self::KIND, id))
    }

    pub async fn with_id_opt(id: &str, store: &Store) -> Option<Self> {
        store.resources().find(id).await
    }

    pub async fn all(store: &Store) -> Vec<Self> {
        store.resources().all().await
    }

    pub async fn list(filter: &ResourceFilter, store: &Store) -> Vec<Self> {
        Self::all(store)
            .await
            .into_iter()
            .filter(|resource| filter.matches(resource))
            .collect()
    }

    pub async fn list_public(filter: &ResourceFilter, store: &Store) -> Vec<Self> {
        Self::list(filter, store)
            .await
            .into_iter()
            .filter(|resource| resource.is_public)
            .collect()
    }

    pub async fn create(
        new_resource: NewResource,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        require_title(&new_resource.title)?;
        if new_resource.url.trim().is_empty() {
            return Err(GavelError::BadRequest("a resource needs a url".to_owned()));
        }

        let now = current_time();
        let resource = Resource {
            id: new_id(),
            title: new_resource.title,
            description: new_resource.description,
            r#type: new_resource.r#type.unwrap_or_default(),
            url: new_resource.url,
            cdn_url: None,
            cdn_key: None,
            size: new_resource.size,
            mime_type: new_resource.mime_type,
            is_public: new_resource.is_public.unwrap_or(true),
            metadata: None,
            created_at: now,
            updated_at: now,
        };

        store.resources().insert(resource, expected_revision).await
    }

    /// Uploads the file to the CDN and records it as a new resource.
    ///
    /// The uploaded object is deleted again if the record can't be saved.
    pub async fn create_from_upload(
        upload: ResourceUpload,
        cdn: &dyn Cdn,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        require_title(&upload.title)?;
        let content = STANDARD
            .decode(upload.content.trim())
            .map_err(|err| GavelError::BadRequest(format!("file content is not base64: {}", err)))?;
        store.resources().ensure_revision(expected_revision).await?;

        let uploaded = cdn
            .upload(UploadedFile {
                file_name: upload.file_name,
                mime_type: upload.mime_type,
                content,
            })
            .await?;

        let now = current_time();
        let resource = Resource {
            id: new_id(),
            title: upload.title,
            description: upload.description,
            r#type: upload.r#type.unwrap_or_default(),
            url: uploaded.url,
            cdn_url: Some(uploaded.cdn_url),
            cdn_key: Some(uploaded.cdn_key),
            size: uploaded.size,
            mime_type: Some(uploaded.mime_type),
            is_public: upload.is_public.unwrap_or(true),
            metadata: Some(CdnMetadata {
                cdn_provider: Some(cdn.provider()),
                ..Default::default()
            }),
            created_at: now,
            updated_at: now,
        };

        match store.resources().insert(resource.clone(), expected_revision).await {
            Ok(resource) => Ok(resource),
            Err(err) => {
                if let Err(cleanup) = cdn.delete(&resource).await {
                    warn!("failed to remove orphaned cdn object: {}", cleanup);
                }
                Err(err)
            }
        }
    }

    pub async fn update(
        id: &str,
        update: ResourceUpdate,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        store
            .resources()
            .update(id, expected_revision, |resource, _| {
                if let Some(title) = update.title {
                    require_title(&title)?;
                    resource.title = title;
                }
                if let Some(description) = update.description {
                    resource.description = description;
                }
                if let Some(r#type) = update.r#type {
                    resource.r#type = r#type;
                }
                if let Some(url) = update.url {
                    resource.url = url;
                }
                if let Some(size) = update.size {
                    resource.size = size;
                }
                if let Some(mime_type) = update.mime_type {
                    resource.mime_type = Some(mime_type);
                }
                if let Some(is_public) = update.is_public {
                    resource.is_public = is_public;
                }
                resource.updated_at = current_time_after(resource.updated_at);

                Ok(())
            })
            .await
    }

    /// Pushes new delivery settings to the CDN object, then records them.
    pub async fn update_metadata(
        id: &str,
        metadata: CdnMetadata,
        cdn: &dyn Cdn,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        store.resources().ensure_revision(expected_revision).await?;
        let resource = Self::with_id(id, store).await?;
        if resource.cdn_key.is_some() && !cdn.update_metadata(&resource, &metadata).await? {
            return Err(GavelError::Cdn(format!(
                "no cdn object found for resource {}",
                id
            )));
        }

        store
            .resources()
            .update(id, expected_revision, |resource, _| {
                resource.metadata = Some(metadata);
                resource.updated_at = current_time_after(resource.updated_at);

                Ok(())
            })
            .await
    }

    /// Removes a resource, deleting its CDN object first.
    ///
    /// If the CDN delete fails the record is kept. A stale revision is
    /// rejected before the CDN is touched.
    pub async fn delete(
        id: &str,
        confirmed: bool,
        cdn: &dyn Cdn,
        expected_revision: Option<u64>,
        store: &Store,
    ) -> GavelResult<Self> {
        if !confirmed {
            return Err(GavelError::ConfirmationRequired);
        }

        store.resources().ensure_revision(expected_revision).await?;
        let resource = Self::with_id(id, store).await?;
        if resource.cdn_key.is_some() && !cdn.delete(&resource).await? {
            warn!(id, "cdn object for resource was already gone");
        }

        store.resources().remove(id, expected_revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::{chapter_guide, memory_store, MockCdn};

    fn handbook_upload() -> ResourceUpload {
        ResourceUpload {
            title: "Officer Handbook".to_owned(),
            r#type: Some(ResourceType::Document),
            file_name: "handbook.pdf".to_owned(),
            content: STANDARD.encode(b"%PDF-1.4"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resource_lifecycle() {
        let store = memory_store();
        let created = Resource::create(chapter_guide(), None, &store).await.unwrap();
        assert!(created.is_public);
        assert_eq!(created.created_at, created.updated_at);

        let update = ResourceUpdate {
            description: Some("Updated for fall".to_owned()),
            ..Default::default()
        };
        let updated = Resource::update(&created.id, update, None, &store)
            .await
            .unwrap();
        assert_eq!(updated.title, created.title);
        assert!(updated.updated_at > updated.created_at);

        let cdn = MockCdn::default();
        Resource::delete(&created.id, true, &cdn, None, &store)
            .await
            .unwrap();
        assert!(Resource::all(&store).await.is_empty());
        assert!(cdn.deleted().is_empty());
    }

    #[tokio::test]
    async fn uploads_record_cdn_details() {
        let store = memory_store();
        let cdn = MockCdn::default();

        let resource = Resource::create_from_upload(handbook_upload(), &cdn, None, &store)
            .await
            .unwrap();
        assert_eq!(resource.cdn_key.as_deref(), Some("mock-handbook.pdf"));
        assert_eq!(resource.size, "8 B");
        assert_eq!(
            resource.metadata.and_then(|metadata| metadata.cdn_provider),
            Some(CdnProvider::Local)
        );
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected_before_uploading() {
        let store = memory_store();
        let cdn = MockCdn::default();
        let upload = ResourceUpload {
            content: "not base64!".to_owned(),
            ..handbook_upload()
        };

        assert!(matches!(
            Resource::create_from_upload(upload, &cdn, None, &store).await,
            Err(GavelError::BadRequest(_))
        ));
        assert!(cdn.uploaded().is_empty());
    }

    #[tokio::test]
    async fn cdn_failures_keep_the_record() {
        let store = memory_store();
        let cdn = MockCdn::default();
        let resource = Resource::create_from_upload(handbook_upload(), &cdn, None, &store)
            .await
            .unwrap();

        cdn.fail_deletes();
        let err = Resource::delete(&resource.id, true, &cdn, None, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::Cdn(_)));
        assert_eq!(Resource::all(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn deleting_an_upload_removes_its_object() {
        let store = memory_store();
        let cdn = MockCdn::default();
        let resource = Resource::create_from_upload(handbook_upload(), &cdn, None, &store)
            .await
            .unwrap();

        let err = Resource::delete(&resource.id, false, &cdn, None, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::ConfirmationRequired));
        assert!(cdn.deleted().is_empty());

        Resource::delete(&resource.id, true, &cdn, None, &store)
            .await
            .unwrap();
        assert_eq!(cdn.deleted(), vec!["mock-handbook.pdf".to_owned()]);
        assert!(Resource::all(&store).await.is_empty());
    }

    #[tokio::test]
    async fn metadata_updates_reach_the_cdn() {
        let store = memory_store();
        let cdn = MockCdn::default();
        let resource = Resource::create_from_upload(handbook_upload(), &cdn, None, &store)
            .await
            .unwrap();

        let metadata = CdnMetadata {
            cache_control: Some("public, max-age=86400".to_owned()),
            ..Default::default()
        };
        let updated = Resource::update_metadata(&resource.id, metadata.clone(), &cdn, None, &store)
            .await
            .unwrap();
        assert_eq!(updated.metadata, Some(metadata));
        assert_eq!(cdn.metadata_updates(), 1);
    }

    #[tokio::test]
    async fn stale_edits_never_reach_the_cdn() {
        let store = memory_store();
        let cdn = MockCdn::default();
        let resource = Resource::create_from_upload(handbook_upload(), &cdn, None, &store)
            .await
            .unwrap();
        let stale = store.resources().revision().await;
        Resource::create(chapter_guide(), None, &store).await.unwrap();

        let err = Resource::update_metadata(
            &resource.id,
            CdnMetadata::default(),
            &cdn,
            Some(stale),
            &store,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GavelError::StaleWrite { .. }));
        assert_eq!(cdn.metadata_updates(), 0);

        let err = Resource::delete(&resource.id, true, &cdn, Some(stale), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::StaleWrite { .. }));
        assert!(cdn.deleted().is_empty());
        assert_eq!(Resource::all(&store).await.len(), 2);

        let err = Resource::create_from_upload(handbook_upload(), &cdn, Some(stale), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::StaleWrite { .. }));
        assert_eq!(cdn.uploaded().len(), 1);
    }

    #[tokio::test]
    async fn private_resources_are_not_listed_publicly() {
        let store = memory_store();
        Resource::create(chapter_guide(), None, &store).await.unwrap();
        Resource::create(
            NewResource {
                title: "Officer Budget".to_owned(),
                r#type: Some(ResourceType::Spreadsheet),
                is_public: Some(false),
                ..chapter_guide()
            },
            None,
            &store,
        )
        .await
        .unwrap();

        let everything = ResourceFilter::default();
        assert_eq!(Resource::list(&everything, &store).await.len(), 2);
        assert_eq!(Resource::list_public(&everything, &store).await.len(), 1);

        let spreadsheets = ResourceFilter {
            search: None,
            r#type: Some(ResourceType::Spreadsheet),
        };
        assert!(Resource::list_public(&spreadsheets, &store).await.is_empty());
    }
}
