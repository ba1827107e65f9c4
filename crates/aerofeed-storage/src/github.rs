//! Version-control-hosted backend using the GitHub contents API.
//!
//! The contents API only updates an existing file when the request carries
//! that file's current blob SHA, and rejects a create that carries one. Every
//! write therefore starts with a read of the current SHA.
//!
//! Files over 1 MB come back from the contents endpoint with their SHA but no
//! inline content; their bytes are fetched separately in raw form.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    FlightStore, LoadOptions, SaveOptions, StorageBackend, StorageError, StorageKey, StoreFuture,
    StoredFlightEntry,
};

/// A file as currently stored in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub sha: String,
    /// `None` when the file is too large to be returned inline.
    pub content: Option<Vec<u8>>,
}

/// Minimal contents API surface used by [`GitHubStore`].
pub trait ContentsApi: Send + Sync {
    fn get_file<'a>(
        &'a self,
        path: &'a str,
        git_ref: Option<&'a str>,
    ) -> StoreFuture<'a, Option<RemoteFile>>;

    /// Raw file bytes, for files whose metadata came back without content.
    fn get_raw<'a>(&'a self, path: &'a str, git_ref: Option<&'a str>)
        -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Creates (`sha == None`) or updates the file; returns the new blob SHA.
    fn put_file<'a>(
        &'a self,
        path: &'a str,
        content: Vec<u8>,
        message: &'a str,
        sha: Option<&'a str>,
    ) -> StoreFuture<'a, String>;

    fn delete_file<'a>(&'a self, path: &'a str, message: &'a str, sha: &'a str)
        -> StoreFuture<'a, ()>;
}

/// reqwest implementation of [`ContentsApi`].
#[derive(Debug, Clone)]
pub struct GitHubContentsClient {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    branch: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteContentsRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ContentsResponse,
}

impl GitHubContentsClient {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, self.owner, self.repo, encoded
        )
    }

    fn ref_url(&self, path: &str, git_ref: Option<&str>) -> String {
        let git_ref = git_ref.unwrap_or(self.branch.as_str());
        format!(
            "{}?ref={}",
            self.contents_url(path),
            urlencoding::encode(git_ref)
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.request_as(method, url, "application/vnd.github+json")
    }

    fn request_as(&self, method: reqwest::Method, url: &str, accept: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, accept)
            .header(USER_AGENT, "aerofeed")
            .header("x-github-api-version", "2022-11-28")
    }
}

async fn remote_error(path: &str, response: reqwest::Response) -> StorageError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StorageError::Conflict {
            path: path.to_owned(),
            message,
        },
        _ => StorageError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

fn decode_content(path: &str, body: ContentsResponse) -> Result<RemoteFile, StorageError> {
    match body.encoding.as_deref() {
        None | Some("base64") => {}
        // Returned for files between 1 and 100 MB.
        Some("none") => {
            return Ok(RemoteFile {
                sha: body.sha,
                content: None,
            })
        }
        Some(other) => {
            return Err(StorageError::Corrupt {
                path: path.to_owned(),
                message: format!("unsupported content encoding '{other}'"),
            })
        }
    }

    let encoded = body.content.unwrap_or_default();

    // The API wraps base64 content at 60 columns.
    let compact: String = encoded.chars().filter(|ch| !ch.is_whitespace()).collect();
    let content = BASE64
        .decode(compact.as_bytes())
        .map_err(|error| StorageError::Corrupt {
            path: path.to_owned(),
            message: error.to_string(),
        })?;

    Ok(RemoteFile {
        sha: body.sha,
        content: Some(content),
    })
}

impl ContentsApi for GitHubContentsClient {
    fn get_file<'a>(
        &'a self,
        path: &'a str,
        git_ref: Option<&'a str>,
    ) -> StoreFuture<'a, Option<RemoteFile>> {
        Box::pin(async move {
            let url = self.ref_url(path, git_ref);
            let response = self.request(reqwest::Method::GET, &url).send().await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(remote_error(path, response).await);
            }

            let body: ContentsResponse = response.json().await?;
            decode_content(path, body).map(Some)
        })
    }

    fn get_raw<'a>(
        &'a self,
        path: &'a str,
        git_ref: Option<&'a str>,
    ) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let url = self.ref_url(path, git_ref);
            let response = self
                .request_as(reqwest::Method::GET, &url, "application/vnd.github.raw+json")
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(remote_error(path, response).await);
            }
            Ok(Some(response.bytes().await?.to_vec()))
        })
    }

    fn put_file<'a>(
        &'a self,
        path: &'a str,
        content: Vec<u8>,
        message: &'a str,
        sha: Option<&'a str>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let request = PutContentsRequest {
                message,
                content: BASE64.encode(content),
                branch: &self.branch,
                sha,
            };
            let response = self
                .request(reqwest::Method::PUT, &self.contents_url(path))
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(remote_error(path, response).await);
            }

            let body: PutContentsResponse = response.json().await?;
            Ok(body.content.sha)
        })
    }

    fn delete_file<'a>(
        &'a self,
        path: &'a str,
        message: &'a str,
        sha: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let request = DeleteContentsRequest {
                message,
                sha,
                branch: &self.branch,
            };
            let response = self
                .request(reqwest::Method::DELETE, &self.contents_url(path))
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(remote_error(path, response).await);
            }
            Ok(())
        })
    }
}

/// Stores entries as JSON files in a repository tree.
#[derive(Clone)]
pub struct GitHubStore {
    api: Arc<dyn ContentsApi>,
    base_path: String,
}

impl GitHubStore {
    pub fn new(api: Arc<dyn ContentsApi>, base_path: impl Into<String>) -> Self {
        Self {
            api,
            base_path: base_path.into().trim_matches('/').to_owned(),
        }
    }

    pub fn path_for(&self, key: &StorageKey) -> String {
        if self.base_path.is_empty() {
            key.relative_path()
        } else {
            format!("{}/{}", self.base_path, key.relative_path())
        }
    }

    /// Bytes of `file`, fetched raw when the metadata carried none.
    async fn content_of(
        &self,
        path: &str,
        git_ref: Option<&str>,
        file: &RemoteFile,
    ) -> Result<Vec<u8>, StorageError> {
        if let Some(content) = &file.content {
            return Ok(content.clone());
        }
        tracing::debug!(path, "fetching large file in raw form");
        self.api
            .get_raw(path, git_ref)
            .await?
            .ok_or_else(|| StorageError::Corrupt {
                path: path.to_owned(),
                message: String::from("file disappeared between metadata and raw reads"),
            })
    }
}

fn parse_entry(path: &str, content: &[u8]) -> Result<StoredFlightEntry, StorageError> {
    serde_json::from_slice(content).map_err(|error| StorageError::Corrupt {
        path: path.to_owned(),
        message: error.to_string(),
    })
}

impl FlightStore for GitHubStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::GitHub
    }

    fn save<'a>(
        &'a self,
        key: &'a StorageKey,
        data: &'a Value,
        options: &'a SaveOptions,
    ) -> StoreFuture<'a, StoredFlightEntry> {
        Box::pin(async move {
            let path = self.path_for(key);
            let current = self.api.get_file(&path, None).await?;

            let previous_created_at = match &current {
                Some(file) => {
                    let content = self.content_of(&path, None, file).await?;
                    parse_entry(&path, &content).ok().map(|entry| entry.created_at)
                }
                None => None,
            };
            let entry = StoredFlightEntry::upserted(key, data, options, previous_created_at);

            let mut content = serde_json::to_vec_pretty(&entry)?;
            content.push(b'\n');

            let verb = if current.is_some() { "Update" } else { "Add" };
            let message = options
                .message
                .clone()
                .unwrap_or_else(|| format!("{verb} {} flight data for {}", key.flight_type(), key));
            let sha = current.as_ref().map(|file| file.sha.as_str());

            let new_sha = self.api.put_file(&path, content, &message, sha).await?;
            tracing::debug!(path = %path, sha = %new_sha, updated = current.is_some(), "committed flight entry");
            Ok(entry)
        })
    }

    fn load<'a>(
        &'a self,
        key: &'a StorageKey,
        options: &'a LoadOptions,
    ) -> StoreFuture<'a, Option<StoredFlightEntry>> {
        Box::pin(async move {
            let path = self.path_for(key);
            let git_ref = options.git_ref.as_deref();
            match self.api.get_file(&path, git_ref).await? {
                Some(file) => {
                    let content = self.content_of(&path, git_ref, &file).await?;
                    parse_entry(&path, &content).map(Some)
                }
                None => Ok(None),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.path_for(key);
            Ok(self.api.get_file(&path, None).await?.is_some())
        })
    }

    fn delete<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.path_for(key);
            let Some(file) = self.api.get_file(&path, None).await? else {
                return Ok(false);
            };
            let message = format!("Remove flight data for {key}");
            self.api.delete_file(&path, &message, &file.sha).await?;
            Ok(true)
        })
    }
}
