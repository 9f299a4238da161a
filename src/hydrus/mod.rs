use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::hydrus::model::{
    FileMetadataResp, RawFileMetadata, SearchFilesResp, VerifyAccessKeyResp,
};

pub mod model;

const ACCESS_KEY_HEADER: &str = "Hydrus-Client-API-Access-Key";
/// Upper bound on one archive request, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Permissions the bot needs: import URLs, import files, add tags, search
/// files, manage pages.
const REQUIRED_PERMISSIONS: [u32; 5] = [0, 1, 2, 3, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAction {
    Add,
    Delete,
}

impl TagAction {
    pub fn code(&self) -> u8 {
        match self {
            TagAction::Add => 0,
            TagAction::Delete => 1,
        }
    }
}

/// The two local tag services the bot reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagService {
    MyTags,
    DownloaderTags,
}

impl TagService {
    pub fn key(&self) -> &'static str {
        match self {
            TagService::MyTags => "6c6f63616c2074616773",
            TagService::DownloaderTags => "646f776e6c6f616465722074616773",
        }
    }
}

/// Operations the ingestion sync needs from the archive.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// `false` when the archive is unreachable or the key lacks permissions.
    async fn check_permissions(&self) -> Result<bool>;

    async fn search_by_tag(&self, tag: &str) -> Result<Vec<u64>>;

    async fn get_metadata(&self, id: u64) -> Result<Option<RawFileMetadata>>;

    async fn get_content(&self, file_id: u64) -> Result<Vec<u8>>;

    async fn mutate_tag(
        &self,
        id: u64,
        tag: &str,
        action: TagAction,
        service: TagService,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct HydrusClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HydrusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydrusClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HydrusClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.hydrus.api_url).context("invalid Hydrus API URL")?;
        Self::with_base_url(cfg.hydrus.api_key.clone(), base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Result<Self> {
        Self::with_timeout(api_key, base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(api_key: String, base_url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("hydrus-telegram-bot/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid Hydrus endpoint {path}"))
    }

    pub fn build_get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Request> {
        self.http
            .get(self.endpoint(path)?)
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .query(query)
            .build()
            .context("failed to build Hydrus request")
    }

    pub fn build_add_tags(
        &self,
        id: u64,
        tag: &str,
        action: TagAction,
        service: TagService,
    ) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint("add_tags/add_tags")?)
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .json(&build_add_tags_body(id, tag, action, service))
            .build()
            .context("failed to build Hydrus request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        debug!(url = %request.url(), method = %request.method(), "sending hydrus request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Hydrus")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("hydrus error {}: {}", status, body));
        }
        Ok(res)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let res = self.execute(self.build_get(path, query)?).await?;
        res.json::<T>()
            .await
            .with_context(|| format!("invalid Hydrus response from {path}"))
    }
}

#[async_trait]
impl ArchiveClient for HydrusClient {
    async fn check_permissions(&self) -> Result<bool> {
        let request = self.build_get("verify_access_key", &[])?;
        let res = match self.http.execute(request).await {
            Ok(res) => res,
            Err(err) if err.is_connect() || err.is_timeout() => {
                warn!(%err, "the Hydrus client is not running");
                return Ok(false);
            }
            Err(err) => return Err(err).context("failed to reach Hydrus"),
        };
        if !res.status().is_success() {
            error!(status = %res.status(), "Hydrus rejected the access key");
            return Ok(false);
        }
        let payload: VerifyAccessKeyResp =
            res.json().await.context("invalid verify_access_key response")?;
        let ok = has_required_permissions(&payload);
        if !ok {
            error!(
                granted = ?payload.basic_permissions,
                "the client does not have the required permissions"
            );
        }
        Ok(ok)
    }

    async fn search_by_tag(&self, tag: &str) -> Result<Vec<u64>> {
        let tags = serde_json::to_string(&[tag])?;
        let payload: SearchFilesResp = self
            .get_json("get_files/search_files", &[("tags", tags)])
            .await?;
        Ok(payload.file_ids)
    }

    async fn get_metadata(&self, id: u64) -> Result<Option<RawFileMetadata>> {
        let ids = serde_json::to_string(&[id])?;
        let payload: FileMetadataResp = self
            .get_json("get_files/file_metadata", &[("file_ids", ids)])
            .await?;
        Ok(payload.metadata.into_iter().next())
    }

    async fn get_content(&self, file_id: u64) -> Result<Vec<u8>> {
        let request = self.build_get("get_files/file", &[("file_id", file_id.to_string())])?;
        let res = self.execute(request).await?;
        let bytes = res.bytes().await.context("failed to read file content")?;
        Ok(bytes.to_vec())
    }

    async fn mutate_tag(
        &self,
        id: u64,
        tag: &str,
        action: TagAction,
        service: TagService,
    ) -> Result<()> {
        let request = self.build_add_tags(id, tag, action, service)?;
        self.execute(request).await?;
        Ok(())
    }
}

pub fn has_required_permissions(resp: &VerifyAccessKeyResp) -> bool {
    resp.permits_everything
        || REQUIRED_PERMISSIONS
            .iter()
            .all(|p| resp.basic_permissions.contains(p))
}

pub fn build_add_tags_body(id: u64, tag: &str, action: TagAction, service: TagService) -> Value {
    json!({
        "file_ids": [id],
        "service_keys_to_actions_to_tags": {
            service.key(): {
                action.code().to_string(): [tag]
            }
        }
    })
}
