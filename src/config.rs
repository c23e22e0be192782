use serde::Deserialize;

use crate::error::{Error, Result};

const MEG: u64 = 1 << 20;
const KIB: u64 = 1 << 10;

/// Block layout and transfer parallelism for [`crate::FileStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// The remote service's fixed block size.
    pub block_size: u64,
    /// Length of the prefix covered by the `slice-md5` digest.
    pub slice_size: u64,
    /// Number of blocks transferred at once.
    pub concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: 4 * MEG,
            slice_size: 256 * KIB,
            concurrency: 3,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Validation("block size cannot be zero".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::Validation("concurrency cannot be zero".into()));
        }
        if self.slice_size > self.block_size {
            return Err(Error::Validation(format!(
                "slice size {} exceeds block size {}",
                self.slice_size, self.block_size
            )));
        }
        Ok(())
    }
}

/// Endpoints and credentials for [`crate::backend::http_impl::HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_file_api_url")]
    pub file_api_url: String,
    #[serde(default = "default_album_api_url")]
    pub album_api_url: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    pub access_token: String,
    /// Numeric id of the account owning the uploads.
    #[serde(default)]
    pub uk: i64,
}

fn default_file_api_url() -> String {
    "https://photo.baidu.com/youai/file/v1".into()
}

fn default_album_api_url() -> String {
    "https://photo.baidu.com/youai/album/v1".into()
}

fn default_upload_url() -> String {
    "https://c3.pcs.baidu.com/rest/2.0/pcs/superfile2".into()
}

impl RemoteConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            file_api_url: default_file_api_url(),
            album_api_url: default_album_api_url(),
            upload_url: default_upload_url(),
            access_token: access_token.into(),
            uk: 0,
        }
    }

    /// Reads `BLOCKPUT_*` variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let access_token = lookup("BLOCKPUT_ACCESS_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Validation("BLOCKPUT_ACCESS_TOKEN is not set".into()))?;

        let mut config = Self::new(access_token.trim());
        if let Some(uk) = lookup("BLOCKPUT_UK") {
            config.uk = uk
                .trim()
                .parse()
                .map_err(|_| Error::Validation(format!("BLOCKPUT_UK is not a number: {uk}")))?;
        }
        if let Some(url) = lookup("BLOCKPUT_FILE_API_URL") {
            config.file_api_url = url;
        }
        if let Some(url) = lookup("BLOCKPUT_ALBUM_API_URL") {
            config.album_api_url = url;
        }
        if let Some(url) = lookup("BLOCKPUT_UPLOAD_URL") {
            config.upload_url = url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_upload_config_is_valid() {
        let config = UploadConfig::default();
        assert_eq!(config.block_size, 1 << 22);
        assert_eq!(config.slice_size, 1 << 18);
        assert_eq!(config.concurrency, 3);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_upload_config() {
        let zero_block = UploadConfig {
            block_size: 0,
            slice_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_block.validate(), Err(Error::Validation(_))));

        let no_slots = UploadConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(no_slots.validate(), Err(Error::Validation(_))));

        let big_slice = UploadConfig {
            block_size: 16,
            slice_size: 32,
            concurrency: 1,
        };
        assert!(matches!(big_slice.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn remote_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("BLOCKPUT_ACCESS_TOKEN", " secret "),
            ("BLOCKPUT_UK", "42"),
            ("BLOCKPUT_UPLOAD_URL", "http://localhost:1/superfile2"),
        ]
        .into();
        let config = RemoteConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.access_token, "secret");
        assert_eq!(config.uk, 42);
        assert_eq!(config.upload_url, "http://localhost:1/superfile2");
        assert_eq!(config.file_api_url, default_file_api_url());

        let missing = RemoteConfig::from_lookup(|_| None);
        assert!(matches!(missing, Err(Error::Validation(_))));
    }

    #[test]
    fn remote_config_deserializes_with_defaults() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"access_token": "abc", "uk": 7}"#).unwrap();
        assert_eq!(config, RemoteConfig { uk: 7, ..RemoteConfig::new("abc") });
    }
}
