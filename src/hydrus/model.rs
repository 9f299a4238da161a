//! Raw Hydrus client API payloads. Every field is optional here; validation
//! into [`FileMetadata`] happens once at the ingestion boundary.

use crate::model::FileMetadata;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Debug, Default)]
pub struct VerifyAccessKeyResp {
    #[serde(default)]
    pub basic_permissions: Vec<u32>,
    #[serde(default)]
    pub permits_everything: bool,
    #[serde(default)]
    pub human_description: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchFilesResp {
    #[serde(default)]
    pub file_ids: Vec<u64>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FileMetadataResp {
    #[serde(default)]
    pub metadata: Vec<RawFileMetadata>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RawFileMetadata {
    pub file_id: Option<u64>,
    pub hash: Option<String>,
    pub ext: Option<String>,
    #[serde(default)]
    pub known_urls: Vec<String>,
    pub tags: Option<HashMap<String, ServiceTags>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ServiceTags {
    /// Keyed by tag status; `"0"` is current.
    #[serde(default)]
    pub display_tags: HashMap<String, Vec<String>>,
}

impl RawFileMetadata {
    /// Validate into a typed record, reading caption tags from `service_key`.
    /// Returns the name of the first missing required field on failure.
    pub fn validate(self, service_key: &str) -> Result<FileMetadata, &'static str> {
        let file_id = self.file_id.ok_or("file_id")?;
        let hash = self.hash.filter(|h| is_hex_hash(h)).ok_or("hash")?;
        let ext = self.ext.filter(|e| is_extension(e)).ok_or("ext")?;
        let mut services = self.tags.ok_or("tags")?;
        let service = services.remove(service_key).ok_or("tags.downloader_tags")?;
        let tags = service
            .display_tags
            .get("0")
            .cloned()
            .unwrap_or_default();
        Ok(FileMetadata {
            file_id,
            hash,
            ext,
            known_urls: self.known_urls,
            tags,
        })
    }
}

/// Both values end up in a local file name, so anything that could leave the
/// media directory is rejected.
fn is_hex_hash(hash: &str) -> bool {
    !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_extension(ext: &str) -> bool {
    match ext.strip_prefix('.') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}
