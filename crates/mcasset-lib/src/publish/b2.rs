//! Backblaze B2 client over the native JSON API (v2).

use super::upload::ObjectStore;
use crate::error::PublishError;
use crate::settings::StorageSettings;
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha1::{Digest, Sha1};
use std::path::Path;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

/// Let the service pick the content type from the file name
const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    authorization_token: String,
    api_url: String,
    recommended_part_size: u64,
    absolute_minimum_part_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LargeFile {
    file_id: String,
}

pub struct B2Store {
    http: Client,
    bucket_id: String,
    auth: Authorization,
    /// An upload URL serves one upload at a time; idle ones are parked here
    idle_targets: Mutex<Vec<UploadTarget>>,
}

impl B2Store {
    /// Authorize the account. `settings.bucket` is the bucket id.
    pub async fn connect(http: Client, settings: &StorageSettings) -> Result<Self, PublishError> {
        let url = format!(
            "{}/b2api/v2/b2_authorize_account",
            settings.api_url.trim_end_matches('/')
        );
        log::debug!("Authorizing B2 account {}", settings.key_id);
        let response = http
            .get(&url)
            .basic_auth(&settings.key_id, Some(&settings.application_key))
            .send()
            .await?;
        let auth: Authorization = parse("b2_authorize_account", response).await?;
        log::info!(
            "B2 authorized (recommended part size {} bytes)",
            auth.recommended_part_size
        );

        Ok(Self {
            http,
            bucket_id: settings.bucket.clone(),
            auth,
            idle_targets: Mutex::new(Vec::new()),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<T, PublishError> {
        let url = format!("{}/b2api/v2/{}", self.auth.api_url, operation);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &self.auth.authorization_token)
            .json(&body)
            .send()
            .await?;
        parse(operation, response).await
    }

    async fn checkout_target(&self) -> Result<UploadTarget, PublishError> {
        let parked = self.idle_targets.lock().ok().and_then(|mut idle| idle.pop());
        match parked {
            Some(target) => Ok(target),
            None => {
                self.call("b2_get_upload_url", json!({ "bucketId": self.bucket_id }))
                    .await
            }
        }
    }

    fn park_target(&self, target: UploadTarget) {
        if let Ok(mut idle) = self.idle_targets.lock() {
            idle.push(target);
        }
    }

    async fn put_small(&self, key: &str, path: &Path) -> Result<(), PublishError> {
        let data = tokio::fs::read(path).await.map_err(|source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let sha1 = sha1_hex(&data);
        let target = self.checkout_target().await?;

        let response = self
            .http
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(key))
            .header(CONTENT_TYPE, AUTO_CONTENT_TYPE)
            .header("X-Bz-Content-Sha1", sha1)
            .body(data)
            .send()
            .await?;
        parse::<serde_json::Value>("b2_upload_file", response).await?;

        // A target that failed is dropped; the service expects a fresh one
        self.park_target(target);
        Ok(())
    }

    async fn put_large(&self, key: &str, path: &Path, size: u64) -> Result<(), PublishError> {
        let part_size = part_size(
            size,
            self.auth.recommended_part_size,
            self.auth.absolute_minimum_part_size,
        );
        if size.div_ceil(part_size) < 2 {
            return self.put_small(key, path).await;
        }

        let file: LargeFile = self
            .call(
                "b2_start_large_file",
                json!({
                    "bucketId": self.bucket_id,
                    "fileName": key,
                    "contentType": AUTO_CONTENT_TYPE,
                }),
            )
            .await?;

        match self.put_parts(&file.file_id, path, size, part_size).await {
            Ok(part_sha1s) => {
                self.call::<serde_json::Value>(
                    "b2_finish_large_file",
                    json!({ "fileId": file.file_id, "partSha1Array": part_sha1s }),
                )
                .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(cancel) = self
                    .call::<serde_json::Value>(
                        "b2_cancel_large_file",
                        json!({ "fileId": file.file_id }),
                    )
                    .await
                {
                    log::warn!("Failed to cancel large file {}: {}", key, cancel);
                }
                Err(e)
            }
        }
    }

    async fn put_parts(
        &self,
        file_id: &str,
        path: &Path,
        size: u64,
        part_size: u64,
    ) -> Result<Vec<String>, PublishError> {
        let io_err = |source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        };
        let target: UploadTarget = self
            .call("b2_get_upload_part_url", json!({ "fileId": file_id }))
            .await?;

        let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let mut part_sha1s = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1u32;

        while offset < size {
            let len = part_size.min(size - offset) as usize;
            let mut part = vec![0u8; len];
            file.read_exact(&mut part).await.map_err(io_err)?;
            let sha1 = sha1_hex(&part);

            let response = self
                .http
                .post(&target.upload_url)
                .header(AUTHORIZATION, &target.authorization_token)
                .header("X-Bz-Part-Number", part_number)
                .header("X-Bz-Content-Sha1", &sha1)
                .body(part)
                .send()
                .await?;
            parse::<serde_json::Value>("b2_upload_part", response).await?;

            part_sha1s.push(sha1);
            offset += len as u64;
            part_number += 1;
        }
        Ok(part_sha1s)
    }
}

impl ObjectStore for B2Store {
    fn upload_small<'a>(
        &'a self,
        key: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(self.put_small(key, path))
    }

    fn upload_large<'a>(
        &'a self,
        key: &'a str,
        path: &'a Path,
        size: u64,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(self.put_large(key, path, size))
    }
}

async fn parse<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T, PublishError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Storage {
            message: format!("{} failed with HTTP {}: {}", operation, status, body),
        });
    }
    Ok(response.json().await?)
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Percent-encode a file name, keeping `/` as the folder separator
fn encode_file_name(key: &str) -> String {
    urlencoding::encode(key).replace("%2F", "/")
}

/// At least two parts of at least the minimum size where possible, capped at
/// the recommended size
fn part_size(size: u64, recommended: u64, minimum: u64) -> u64 {
    recommended.min(size.div_ceil(2)).max(minimum).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn authorized(server: &MockServer, part_size: u64) -> B2Store {
        Mock::given(method("GET"))
            .and(path("/b2api/v2/b2_authorize_account"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accountId": "acc",
                "authorizationToken": "account-token",
                "apiUrl": server.uri(),
                "downloadUrl": server.uri(),
                "recommendedPartSize": part_size,
                "absoluteMinimumPartSize": part_size,
            })))
            .expect(1)
            .mount(server)
            .await;

        let mut settings = StorageSettings::new("bucket-id".into(), "key-id".into(), "app-key".into());
        settings.api_url = server.uri();
        B2Store::connect(Client::new(), &settings).await.unwrap()
    }

    #[test]
    fn part_sizes() {
        let mb = 1_000_000;
        assert_eq!(part_size(6 * mb, 100 * mb, 5 * mb), 5 * mb);
        assert_eq!(part_size(1_000 * mb, 100 * mb, 5 * mb), 100 * mb);
        assert_eq!(part_size(300 * mb, 100 * mb, 5 * mb), 100 * mb);
        assert_eq!(part_size(12, 5, 5), 5);
    }

    #[test]
    fn file_names_keep_folders() {
        assert_eq!(
            encode_file_name("1.14_Pre-Release_1/assets/a b.json"),
            "1.14_Pre-Release_1/assets/a%20b.json"
        );
    }

    #[tokio::test]
    async fn small_uploads_reuse_upload_url() {
        let server = MockServer::start().await;
        let store = authorized(&server, 100).await;

        Mock::given(method("POST"))
            .and(path("/b2api/v2/b2_get_upload_url"))
            .and(header("authorization", "account-token"))
            .and(body_partial_json(json!({"bucketId": "bucket-id"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bucketId": "bucket-id",
                "uploadUrl": format!("{}/upload", server.uri()),
                "authorizationToken": "upload-token",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("authorization", "upload-token"))
            .and(header("content-type", "b2/x-auto"))
            .and(header("x-bz-file-name", "v/a%20b.json"))
            .and(header("x-bz-content-sha1", sha1_hex(b"{}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fileId": "x"})))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let file = dir.path().join("a b.json");
        std::fs::write(&file, "{}").unwrap();

        store.upload_small("v/a b.json", &file).await.unwrap();
        store.upload_small("v/a b.json", &file).await.unwrap();
    }

    #[tokio::test]
    async fn large_upload_sends_parts_and_finishes() {
        let server = MockServer::start().await;
        let store = authorized(&server, 5).await;

        Mock::given(method("POST"))
            .and(path("/b2api/v2/b2_start_large_file"))
            .and(body_partial_json(json!({"bucketId": "bucket-id", "fileName": "v/big.bin"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fileId": "f1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/b2api/v2/b2_get_upload_part_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "fileId": "f1",
                "uploadUrl": format!("{}/part", server.uri()),
                "authorizationToken": "part-token",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/part"))
            .and(header("authorization", "part-token"))
            .and(header_exists("x-bz-part-number"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/b2api/v2/b2_finish_large_file"))
            .and(body_partial_json(json!({
                "fileId": "f1",
                "partSha1Array": [sha1_hex(b"01234"), sha1_hex(b"56789"), sha1_hex(b"ab")],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let file = dir.path().join("big.bin");
        std::fs::write(&file, "0123456789ab").unwrap();

        store.upload_large("v/big.bin", &file, 12).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_upload_is_storage_error() {
        let server = MockServer::start().await;
        let store = authorized(&server, 100).await;

        Mock::given(method("POST"))
            .and(path("/b2api/v2/b2_get_upload_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uploadUrl": format!("{}/upload", server.uri()),
                "authorizationToken": "upload-token",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(503).set_body_string("service_unavailable"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "{}").unwrap();

        let err = store.upload_small("v/a.json", &file).await.unwrap_err();
        match err {
            PublishError::Storage { message } => assert!(message.contains("service_unavailable")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
