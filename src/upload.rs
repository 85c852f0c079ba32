//! Materializes request bodies of PUT requests.
//!
//! Uploads arrive as `multipart/form-data`; the accepted field with the
//! highest priority is streamed into a temp file that is deleted when the
//! [`UploadedFile`] is dropped, so every exit path of a handler cleans up.
//! Any other body is parsed as an optional JSON [`DuplicateRequest`].

use std::path::{Path, PathBuf};

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{
    error::{BitsResult, InputError},
    http_objects::DuplicateRequest,
};

#[derive(Debug)]
pub struct UploadedFile {
    field: String,
    path: TempPath,
    size: u64,
}

impl UploadedFile {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(field: &str, path: TempPath, size: u64) -> Self {
        Self {
            field: field.to_string(),
            path,
            size,
        }
    }
}

#[derive(Debug, Default)]
pub struct PutRequest {
    pub upload: Option<UploadedFile>,
    pub body: DuplicateRequest,
}

impl PutRequest {
    pub fn source_guid(&self) -> Option<&str> {
        self.body.source_guid.as_deref().filter(|guid| !guid.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadReader {
    upload_dir: Option<PathBuf>,
}

impl UploadReader {
    pub fn new(upload_dir: Option<PathBuf>) -> Self {
        Self { upload_dir }
    }

    pub fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        match &self.upload_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
    }

    pub fn temp_dir(&self) -> std::io::Result<tempfile::TempDir> {
        match &self.upload_dir {
            Some(dir) => tempfile::tempdir_in(dir),
            None => tempfile::tempdir(),
        }
    }

    /// Reads the body of `request`. Of the upload fields named in `fields`,
    /// the one listed first wins whatever their order in the body.
    pub async fn read(&self, request: Request, fields: &[&str]) -> BitsResult<PutRequest> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|e| InputError::MessageParse(e.body_text()))?;
            return self.read_multipart(multipart, fields).await;
        }

        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| InputError::MessageParse(e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(PutRequest::default());
        }
        let body: DuplicateRequest =
            serde_json::from_slice(&body).map_err(|e| InputError::MessageParse(e.to_string()))?;
        Ok(PutRequest { upload: None, body })
    }

    async fn read_multipart(
        &self,
        mut multipart: Multipart,
        fields: &[&str],
    ) -> BitsResult<PutRequest> {
        let mut request = PutRequest::default();
        let mut upload_rank: Option<usize> = None;
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| InputError::MessageParse(e.body_text()))?
        {
            let Some(name) = field.name().map(|n| n.to_string()) else {
                continue;
            };
            if name == "source_guid" {
                let text = field
                    .text()
                    .await
                    .map_err(|e| InputError::MessageParse(e.body_text()))?;
                request.body.source_guid = Some(text);
                continue;
            }
            let Some(rank) = fields.iter().position(|f| *f == name) else {
                continue;
            };
            if upload_rank.is_some_and(|kept| kept <= rank) {
                continue;
            }

            let (file, path) = self.temp_file()?.into_parts();
            let mut file = tokio::fs::File::from_std(file);
            let mut size = 0u64;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| InputError::MessageParse(e.body_text()))?
            {
                size += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            debug!(field = %name, size, path = %path.display(), "materialized upload");
            upload_rank = Some(rank);
            request.upload = Some(UploadedFile {
                field: name,
                path,
                size,
            });
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;
    use crate::error::BitsError;

    fn multipart_request(parts: &[(&str, &[u8])]) -> Request {
        let boundary = "bits-boundary";
        let mut body = Vec::new();
        for (name, content) in parts {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                     filename=\"{name}.zip\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Request::builder()
            .method("PUT")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(body: &str) -> Request {
        Request::builder()
            .method("PUT")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_accepted_field() {
        let reader = UploadReader::default();
        let request = multipart_request(&[("other", b"ignored"), ("package", b"package bytes")]);
        let put = reader.read(request, &["bits", "package"]).await.unwrap();
        let upload = put.upload.unwrap();
        assert_eq!(upload.field(), "package");
        assert_eq!(upload.size(), 13);
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"package bytes");
    }

    #[tokio::test]
    async fn test_field_priority_beats_arrival_order() {
        let reader = UploadReader::default();
        let request = multipart_request(&[
            ("package", b"package bytes"),
            ("bits", b"bits bytes"),
            ("package", b"late package"),
        ]);
        let put = reader.read(request, &["bits", "package"]).await.unwrap();
        let upload = put.upload.unwrap();
        assert_eq!(upload.field(), "bits");
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"bits bytes");
    }

    #[tokio::test]
    async fn test_upload_file_is_removed_on_drop() {
        let reader = UploadReader::default();
        let put = reader
            .read(multipart_request(&[("droplet", b"droplet")]), &["droplet"])
            .await
            .unwrap();
        let upload = put.upload.unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        drop(upload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_json_and_empty_bodies() {
        let reader = UploadReader::default();
        let put = reader
            .read(json_request(r#"{"source_guid": "abc"}"#), &["bits"])
            .await
            .unwrap();
        assert!(put.upload.is_none());
        assert_eq!(put.source_guid(), Some("abc"));

        let put = reader.read(json_request(""), &["bits"]).await.unwrap();
        assert!(put.upload.is_none());
        assert_eq!(put.source_guid(), None);
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let reader = UploadReader::default();
        let err = reader
            .read(json_request("{not json"), &["bits"])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BitsError::InvalidInput(InputError::MessageParse(_))
        ));
    }
}
