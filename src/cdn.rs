//! Object storage for uploaded resource files.
//!
//! Resource records only point at their files; the [Cdn] owns the bytes.
//! [LocalCdn] keeps objects on disk next to the data directory and has them
//! served statically under the configured public URL.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GavelError, GavelResult};
use crate::models::resource::{CdnMetadata, CdnProvider, Resource};
use crate::util::{format_size, new_id};

/// A file handed to the CDN for upload.
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content: Vec<u8>,
}

impl UploadedFile {
    /// The declared MIME type, or one guessed from the file extension.
    pub fn mime_type(&self) -> String {
        if let Some(mime_type) = self.mime_type.as_deref().filter(|m| !m.is_empty()) {
            return mime_type.to_owned();
        }

        let extension = Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("pdf") => "application/pdf",
            Some("doc") => "application/msword",
            Some("docx") => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Some("ppt") => "application/vnd.ms-powerpoint",
            Some("pptx") => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Some("xls") => "application/vnd.ms-excel",
            Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Some("csv") => "text/csv",
            Some("txt") => "text/plain",
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "application/octet-stream",
        }
        .to_owned()
    }
}

/// Where an uploaded file ended up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub cdn_url: String,
    pub cdn_key: String,
    /// Human-readable size, e.g. `"2.0 KB"`
    pub size: String,
    pub mime_type: String,
}

#[async_trait::async_trait]
pub trait Cdn: Send + Sync {
    fn provider(&self) -> CdnProvider;

    async fn upload(&self, file: UploadedFile) -> GavelResult<UploadResponse>;

    /// Deletes the object behind a resource.
    ///
    /// Returns `false` if there was no object to delete.
    async fn delete(&self, resource: &Resource) -> GavelResult<bool>;

    /// Replaces the stored metadata of the object behind a resource.
    ///
    /// Returns `false` if there is no such object.
    async fn update_metadata(&self, resource: &Resource, metadata: &CdnMetadata)
        -> GavelResult<bool>;

    fn public_url(&self, resource: &Resource) -> String;
}

pub struct LocalCdn {
    dir: PathBuf,
    public_url: String,
}

impl LocalCdn {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into(),
        }
    }

    /// The directory holding the objects stored under `dir`, to be served
    /// at the public URL.
    pub fn objects_in(dir: &Path) -> PathBuf {
        dir.join("objects")
    }

    pub fn objects_dir(&self) -> PathBuf {
        Self::objects_in(&self.dir)
    }

    fn metadata_dir(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), key)
    }

    /// Keeps the last path segment of an uploaded file name, with anything
    /// outside `[A-Za-z0-9._-]` replaced.
    fn safe_file_name(file_name: &str) -> GavelResult<String> {
        let name = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| GavelError::BadRequest("Failed to get file name".to_owned()))?;

        Ok(name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect())
    }

    fn object_path(&self, key: &str) -> GavelResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(GavelError::Cdn(format!("invalid object key {:?}", key)));
        }

        Ok(self.objects_dir().join(key))
    }

    fn cdn_error(action: &str, err: std::io::Error) -> GavelError {
        GavelError::Cdn(format!("error {}: {}", action, err))
    }
}

#[async_trait::async_trait]
impl Cdn for LocalCdn {
    fn provider(&self) -> CdnProvider {
        CdnProvider::Local
    }

    async fn upload(&self, file: UploadedFile) -> GavelResult<UploadResponse> {
        let key = format!("{}-{}", new_id(), Self::safe_file_name(&file.file_name)?);
        let path = self.object_path(&key)?;

        tokio::fs::create_dir_all(self.objects_dir())
            .await
            .map_err(|err| Self::cdn_error("creating object directory", err))?;
        tokio::fs::write(&path, &file.content)
            .await
            .map_err(|err| Self::cdn_error("writing object", err))?;
        debug!(key = %key, bytes = file.content.len(), "stored cdn object");

        let url = self.url_for(&key);
        Ok(UploadResponse {
            url: url.clone(),
            cdn_url: url,
            cdn_key: key,
            size: format_size(file.content.len() as u64),
            mime_type: file.mime_type(),
        })
    }

    async fn delete(&self, resource: &Resource) -> GavelResult<bool> {
        let Some(key) = resource.cdn_key.as_deref() else {
            return Ok(false);
        };
        let path = self.object_path(key)?;

        let metadata_path = self.metadata_dir().join(format!("{}.json", key));
        if let Err(err) = tokio::fs::remove_file(&metadata_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(key, "failed to remove cdn metadata: {}", err);
            }
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Self::cdn_error("deleting object", err)),
        }
    }

    async fn update_metadata(
        &self,
        resource: &Resource,
        metadata: &CdnMetadata,
    ) -> GavelResult<bool> {
        let Some(key) = resource.cdn_key.as_deref() else {
            return Ok(false);
        };
        if !tokio::fs::try_exists(self.object_path(key)?)
            .await
            .unwrap_or(false)
        {
            return Ok(false);
        }

        let raw = serde_json::to_vec_pretty(metadata)
            .map_err(|err| GavelError::Cdn(format!("error serializing metadata: {}", err)))?;
        tokio::fs::create_dir_all(self.metadata_dir())
            .await
            .map_err(|err| Self::cdn_error("creating metadata directory", err))?;
        tokio::fs::write(self.metadata_dir().join(format!("{}.json", key)), raw)
            .await
            .map_err(|err| Self::cdn_error("writing metadata", err))?;

        Ok(true)
    }

    fn public_url(&self, resource: &Resource) -> String {
        match resource.cdn_key.as_deref() {
            Some(key) => self.url_for(key),
            None => resource.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::{scratch_dir, uploaded_resource};

    fn upload(name: &str, content: &[u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.to_owned(),
            mime_type: None,
            content: content.to_vec(),
        }
    }

    #[tokio::test]
    async fn uploads_land_under_the_public_url() {
        let dir = scratch_dir("cdn-upload");
        let cdn = LocalCdn::new(&dir, "/cdn/");

        let response = cdn
            .upload(upload("../../Officer Handbook.pdf", &[0u8; 2048]))
            .await
            .unwrap();
        assert!(response.cdn_key.ends_with("-Officer_Handbook.pdf"));
        assert_eq!(response.url, format!("/cdn/{}", response.cdn_key));
        assert_eq!(response.size, "2.0 KB");
        assert_eq!(response.mime_type, "application/pdf");

        let stored = std::fs::read(cdn.objects_dir().join(&response.cdn_key)).unwrap();
        assert_eq!(stored.len(), 2048);
    }

    #[tokio::test]
    async fn deleting_reports_whether_an_object_existed() {
        let dir = scratch_dir("cdn-delete");
        let cdn = LocalCdn::new(&dir, "/cdn");
        let response = cdn.upload(upload("minutes.txt", b"minutes")).await.unwrap();
        let resource = uploaded_resource(&response);

        let metadata = CdnMetadata {
            cache_control: Some("max-age=3600".to_owned()),
            ..Default::default()
        };
        assert!(cdn.update_metadata(&resource, &metadata).await.unwrap());
        assert!(cdn.delete(&resource).await.unwrap());
        assert!(!cdn.delete(&resource).await.unwrap());
        assert!(!cdn.update_metadata(&resource, &metadata).await.unwrap());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_object_directory() {
        let dir = scratch_dir("cdn-escape");
        let cdn = LocalCdn::new(&dir, "/cdn");
        let mut resource = uploaded_resource(&UploadResponse {
            url: "/cdn/x".to_owned(),
            cdn_url: "/cdn/x".to_owned(),
            cdn_key: "../users.json".to_owned(),
            size: "1 B".to_owned(),
            mime_type: "text/plain".to_owned(),
        });

        assert!(matches!(cdn.delete(&resource).await, Err(GavelError::Cdn(_))));

        resource.cdn_key = None;
        resource.url = "https://example.com/guide.pdf".to_owned();
        assert_eq!(cdn.public_url(&resource), "https://example.com/guide.pdf");
    }
}
