use serde::Deserialize;

use crate::digest::DigestSet;
use crate::error::{Error, Result, Stage};
use crate::object::{Album, AlbumFile, RemoteFile};
use crate::plan::BlockPlan;
use crate::source::BlockData;

pub mod http_impl;
pub mod mem_impl;

/// File metadata and digests, sent to both `precreate` and `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecreateRequest {
    /// Destination path, `/<file name>`.
    pub path: String,
    pub size: u64,
    pub digests: DigestSet,
}

impl PrecreateRequest {
    /// The form fields shared by `precreate` and `create`.
    pub fn form(&self) -> serde_json::Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("autoinit", "1".into()),
            ("isdir", "0".into()),
            ("rtype", "1".into()),
            ("ctype", "11".into()),
            ("path", self.path.clone()),
            ("size", self.size.to_string()),
            ("slice-md5", self.digests.slice_md5.clone()),
            ("content-md5", self.digests.content_md5.clone()),
            ("block_list", self.digests.block_list_json()?),
        ])
    }

    pub fn file_name(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

/// What the remote wants done next, per `return_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Some or all blocks must be sent, then `create` called.
    UploadBlocks = 1,
    /// All blocks are already held, only `create` is needed.
    CreateOnly = 2,
    /// The file already exists; the response carries it.
    Complete = 3,
}

impl TryFrom<i64> for Outcome {
    type Error = Error;

    fn try_from(return_type: i64) -> Result<Self> {
        match return_type {
            1 => Ok(Self::UploadBlocks),
            2 => Ok(Self::CreateOnly),
            3 => Ok(Self::Complete),
            other => Err(Error::UnsupportedOutcome(other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PrecreateResponse {
    #[serde(default)]
    pub return_type: i64,
    #[serde(default, rename = "uploadid")]
    pub upload_id: String,
    /// Sequence numbers of the blocks the remote still needs.
    #[serde(default)]
    pub block_list: Vec<u32>,
    /// Set when the file already exists.
    #[serde(default, rename = "data")]
    pub file: Option<RemoteFile>,
}

impl PrecreateResponse {
    pub fn outcome(&self) -> Result<Outcome> {
        Outcome::try_from(self.return_type)
    }

    /// The blocks to transfer. An empty list means every block.
    pub fn pending_blocks(&self, plan: &BlockPlan) -> Result<Vec<u32>> {
        if self.block_list.is_empty() {
            return Ok(plan.blocks.iter().map(|b| b.partseq).collect());
        }
        if let Some(bad) = self.block_list.iter().find(|&&p| plan.get(p).is_none()) {
            return Err(Error::remote(
                Stage::Precreate,
                format!("requested block {bad} of a {}-block file", plan.block_count()),
            ));
        }
        Ok(self.block_list.clone())
    }
}

/// One block transfer.
#[derive(Debug)]
pub struct BlockUpload {
    pub path: String,
    pub file_name: String,
    pub upload_id: String,
    pub data: BlockData,
}

impl BlockUpload {
    pub fn partseq(&self) -> u32 {
        self.data.descriptor().partseq
    }
}

/// The remote photo service, and the album operations uploads rely on.
#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn precreate(&self, request: &PrecreateRequest)
        -> Result<PrecreateResponse, Self::Error>;

    async fn upload_block(&self, block: BlockUpload) -> Result<(), Self::Error>;

    async fn create(
        &self,
        request: &PrecreateRequest,
        upload_id: &str,
    ) -> Result<RemoteFile, Self::Error>;

    async fn add_album_file(
        &self,
        album: &Album,
        file: &RemoteFile,
    ) -> Result<AlbumFile, Self::Error>;

    /// Copies an album entry out into the root namespace.
    async fn copy_album_file(&self, file: &AlbumFile) -> Result<RemoteFile, Self::Error>;

    async fn delete_album_file(&self, file: &AlbumFile) -> Result<(), Self::Error>;
}
