use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::{Backend, BlockUpload};
use crate::cancel::CancelSignal;
use crate::error::{Error, Result, Stage};
use crate::plan::BlockPlan;
use crate::source::TempSource;

pub type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;

/// Counts finished blocks and reports each completion as a percentage.
pub struct Progress {
    done: AtomicUsize,
    total: usize,
    report: ProgressFn,
}

impl Progress {
    pub fn new(total: usize, report: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            report: Box::new(report),
        }
    }

    pub fn block_done(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if self.total > 0 {
            (self.report)((done * 100 / self.total) as u8);
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }
}

/// Where the blocks go.
pub struct UploadTarget<'a> {
    pub path: &'a str,
    pub file_name: &'a str,
    pub upload_id: &'a str,
}

/// Sends the `pending` blocks of `source`, at most `concurrency` at a time.
///
/// The first failure, or cancellation of `parent`, stops further dispatch.
/// Transfers already running are awaited, and the first cause is returned.
#[allow(clippy::too_many_arguments)]
pub async fn upload_blocks<B: Backend>(
    backend: &Arc<B>,
    source: &TempSource,
    plan: &BlockPlan,
    pending: &[u32],
    target: &UploadTarget<'_>,
    concurrency: usize,
    progress: Arc<Progress>,
    parent: &CancelSignal,
) -> Result<()> {
    let signal = parent.child();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut joinset = JoinSet::new();

    for &partseq in pending {
        let Some(block) = plan.get(partseq) else {
            continue;
        };

        // a cancellation that races a free slot always wins
        let permit = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            break;
        };

        let data = match source.block(block).await {
            Ok(data) => data,
            Err(err) => {
                signal.cancel_with(err.into());
                break;
            }
        };
        let upload = BlockUpload {
            path: target.path.to_string(),
            file_name: target.file_name.to_string(),
            upload_id: target.upload_id.to_string(),
            data,
        };

        let backend = Arc::clone(backend);
        let progress = Arc::clone(&progress);
        let signal = signal.clone();
        debug!(partseq, len = block.len, "uploading block");
        joinset.spawn(async move {
            match backend.upload_block(upload).await {
                Ok(()) if !signal.is_cancelled() => progress.block_done(),
                Ok(()) => {}
                Err(err) => signal.cancel_with(Error::remote(Stage::UploadBlock(partseq), err)),
            }
            drop(permit);
        });
    }

    while let Some(joined) = joinset.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }

    signal.check()
}
