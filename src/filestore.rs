use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::backend::{Backend, Outcome, PrecreateRequest};
use crate::cancel::CancelSignal;
use crate::config::UploadConfig;
use crate::digest;
use crate::error::{Error, Result, Stage};
use crate::object::{Container, Entry, RemoteFile};
use crate::plan::BlockPlan;
use crate::source::TempSource;
use crate::uploader::{upload_blocks, Progress, UploadTarget};

/// A stream to upload, with its exact length.
pub struct Upload<R> {
    pub name: String,
    pub size: u64,
    pub stream: R,
}

impl<R: AsyncRead + Unpin> Upload<R> {
    pub fn new(name: impl Into<String>, stream: R, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            stream,
        }
    }
}

#[derive(Debug)]
pub struct FileStore<B> {
    pub(crate) backend: Arc<B>,
    config: UploadConfig,
}

impl<B: Backend> FileStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            config: UploadConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Uploads `upload` and places the result in `dst`.
    ///
    /// `progress` receives a percentage after each transferred block, and
    /// only then. Cancelling `signal` stops at the next block or stage
    /// boundary with [`Error::Cancelled`].
    pub async fn put<R: AsyncRead + Unpin>(
        &self,
        dst: &Container,
        upload: Upload<R>,
        progress: impl Fn(u8) + Send + Sync + 'static,
        signal: &CancelSignal,
    ) -> Result<Entry> {
        let Upload { name, size, stream } = upload;
        if size == 0 {
            return Err(Error::Validation("file size cannot be zero".into()));
        }
        if name.is_empty() || name.contains('/') {
            return Err(Error::Validation(format!("invalid file name {name:?}")));
        }
        self.config.validate()?;

        let source = TempSource::materialize(stream, size).await?;
        let plan = BlockPlan::new(size, self.config.block_size);

        let digests = digest::compute(
            source.reader().await?,
            &plan,
            self.config.slice_size,
            signal,
        )
        .await?;
        debug!(content_md5 = %digests.content_md5, blocks = plan.block_count(), "hashed {name}");

        let request = PrecreateRequest {
            path: format!("/{name}"),
            size,
            digests,
        };

        signal.check()?;
        let response = self
            .backend
            .precreate(&request)
            .await
            .map_err(|e| Error::remote(Stage::Precreate, e))?;
        let outcome = response.outcome()?;
        info!(?outcome, upload_id = %response.upload_id, "precreated {}", request.path);

        let file = match outcome {
            Outcome::UploadBlocks => {
                let pending = response.pending_blocks(&plan)?;
                let target = UploadTarget {
                    path: &request.path,
                    file_name: &name,
                    upload_id: &response.upload_id,
                };
                let progress = Arc::new(Progress::new(pending.len(), progress));
                upload_blocks(
                    &self.backend,
                    &source,
                    &plan,
                    &pending,
                    &target,
                    self.config.concurrency,
                    progress,
                    signal,
                )
                .await?;

                self.create(&request, &response.upload_id, signal).await?
            }
            Outcome::CreateOnly => self.create(&request, &response.upload_id, signal).await?,
            Outcome::Complete => response.file.ok_or_else(|| {
                Error::remote(Stage::Precreate, "existing file missing from response")
            })?,
        };
        drop(source);

        self.place(dst, file).await
    }

    async fn create(
        &self,
        request: &PrecreateRequest,
        upload_id: &str,
        signal: &CancelSignal,
    ) -> Result<RemoteFile> {
        signal.check()?;
        let file = self
            .backend
            .create(request, upload_id)
            .await
            .map_err(|e| Error::remote(Stage::Create, e))?;
        info!(fs_id = file.fs_id, size = file.size, "created {}", file.path);
        Ok(file)
    }
}
